//! Common-root inference for staged files.
//!
//! The runtime sees bundled files relative to the deepest directory shared by
//! every included file, so a bundle whose outputs all live under `models/`
//! unpacks with `unzipped = "models"` and short visible paths.

/// Root written when files share no directory.
pub const CURRENT_DIR: &str = ".";

fn directory_segments(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != CURRENT_DIR)
        .collect();
    segments.pop();
    segments
}

/// Deepest directory shared by all `paths`, or `"."` when there is none.
///
/// Only whole segments are compared: `models/a` and `models-b/c` share nothing.
pub fn common_root<'a>(paths: impl IntoIterator<Item = &'a str>) -> String {
    let mut paths = paths.into_iter();
    let Some(first) = paths.next() else {
        return CURRENT_DIR.to_string();
    };

    let mut shared = directory_segments(first);
    for path in paths {
        let segments = directory_segments(path);
        let keep = shared
            .iter()
            .zip(&segments)
            .take_while(|(a, b)| a == b)
            .count();
        shared.truncate(keep);
        if shared.is_empty() {
            break;
        }
    }

    if shared.is_empty() {
        CURRENT_DIR.to_string()
    } else {
        shared.join("/")
    }
}

/// `path` relative to `root`. Paths outside `root` are returned unchanged.
pub fn relative_to_root(path: &str, root: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != CURRENT_DIR)
        .collect();
    let root_segments: Vec<&str> = root
        .split('/')
        .filter(|s| !s.is_empty() && *s != CURRENT_DIR)
        .collect();

    if segments.len() > root_segments.len() && segments.starts_with(&root_segments) {
        segments[root_segments.len()..].join("/")
    } else {
        segments.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_directory_becomes_root() {
        assert_eq!(common_root(["models/a.bin", "models/a.param"]), "models");
        assert_eq!(
            common_root(["models/x/a.bin", "models/x/b.bin", "models/x/sub/c.bin"]),
            "models/x"
        );
    }

    #[test]
    fn disjoint_or_flat_files_use_current_dir() {
        assert_eq!(common_root(["models/a.bin", "other/b.bin"]), ".");
        assert_eq!(common_root(["a.bin", "models/b.bin"]), ".");
        assert_eq!(common_root(["models/a", "models-b/c"]), ".");
        assert_eq!(common_root(std::iter::empty()), ".");
    }

    #[test]
    fn single_file_root_is_its_directory() {
        assert_eq!(common_root(["models/deep/a.bin"]), "models/deep");
        assert_eq!(common_root(["a.bin"]), ".");
    }

    #[test]
    fn paths_relative_to_root() {
        assert_eq!(relative_to_root("models/a.bin", "models"), "a.bin");
        assert_eq!(relative_to_root("models/x/a.bin", "models"), "x/a.bin");
        assert_eq!(relative_to_root("other/b.bin", "models"), "other/b.bin");
        assert_eq!(relative_to_root("a.bin", "."), "a.bin");
        assert_eq!(relative_to_root("./models/a.bin", "models"), "a.bin");
    }
}
