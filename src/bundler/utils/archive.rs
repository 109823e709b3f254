//! Archive creation and extraction.
//!
//! Bundles are zip files written with fixed timestamps and permissions so
//! identical inputs give byte-identical bundles. Source archives may be
//! gzip-compressed tarballs or zip files; the format is sniffed from the
//! leading bytes rather than trusted from the URL.
//!
//! These helpers are blocking; async callers wrap them in `spawn_blocking`.

use crate::bundler::error::{Error, ErrorExt, Result};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

/// Detected archive container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// gzip-compressed tarball
    TarGz,
    /// zip
    Zip,
}

/// Sniffs the archive format from its magic bytes.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path).fs_context("opening archive", path)?;
    let n = file.read(&mut magic).fs_context("reading archive header", path)?;

    match &magic[..n] {
        [0x1f, 0x8b, ..] => Ok(ArchiveFormat::TarGz),
        [b'P', b'K', 0x03, 0x04] | [b'P', b'K', 0x05, 0x06] => Ok(ArchiveFormat::Zip),
        _ => Err(Error::GenericError(format!(
            "{} is neither a gzip tarball nor a zip archive",
            path.display()
        ))),
    }
}

/// Extracts an archive of either supported format into `dest`.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    match detect_format(archive)? {
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest),
        ArchiveFormat::Zip => extract_zip(archive, dest).map(|_| ()),
    }
}

/// Extracts a `.tar.gz` into `dest`. Entries escaping `dest` are skipped by `tar`.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).fs_context("opening tarball", archive)?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut tarball = tar::Archive::new(decoder);
    tarball
        .unpack(dest)
        .fs_context("extracting tarball", archive)?;
    Ok(())
}

/// Extracts a zip into `dest`, returning the written files in archive order.
///
/// Entries whose names would land outside `dest` are rejected.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive).fs_context("opening zip archive", archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    let mut written = Vec::with_capacity(zip.len());

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::GenericError(format!(
                "{}: entry '{}' escapes the extraction root",
                archive.display(),
                entry.name()
            )));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).fs_context("creating directory", &out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).fs_context("creating directory", parent)?;
        }
        let mut out = File::create(&out_path).fs_context("creating extracted file", &out_path)?;
        io::copy(&mut entry, &mut out).fs_context("writing extracted file", &out_path)?;
        written.push(out_path);
    }

    Ok(written)
}

fn bundle_entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Writes `entries` (slash-separated paths relative to `base`) into a new zip
/// at `bundle_path`, in the order given.
pub fn write_zip(bundle_path: &Path, base: &Path, entries: &[String]) -> Result<()> {
    let file = File::create(bundle_path).fs_context("creating bundle", bundle_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for name in entries {
        let source = base.join(name);
        zip.start_file(name.as_str(), bundle_entry_options())?;
        let mut input = File::open(&source).fs_context("opening staged file", &source)?;
        io::copy(&mut input, &mut zip).fs_context("compressing staged file", &source)?;
    }

    let mut writer = zip.finish()?;
    writer.flush().fs_context("flushing bundle", bundle_path)?;
    Ok(())
}

/// Lists the entry names of a zip archive in archive order.
pub fn zip_entry_names(archive: &Path) -> Result<Vec<String>> {
    let file = File::open(archive).fs_context("opening zip archive", archive)?;
    let zip = ZipArchive::new(BufReader::new(file))?;
    Ok(zip.file_names().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_round_trip_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("stage");
        std::fs::create_dir_all(base.join("models")).unwrap();
        std::fs::write(base.join("models/a.bin"), vec![1u8; 2048]).unwrap();
        std::fs::write(base.join("models/a.param"), b"7767517\n").unwrap();
        let entries = vec!["models/a.bin".to_string(), "models/a.param".to_string()];

        let first = tmp.path().join("one.zip");
        let second = tmp.path().join("two.zip");
        write_zip(&first, &base, &entries).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        write_zip(&second, &base, &entries).unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
        assert_eq!(detect_format(&first).unwrap(), ArchiveFormat::Zip);

        let mut names = zip_entry_names(&first).unwrap();
        names.sort();
        assert_eq!(names, entries);

        let out = tmp.path().join("out");
        let written = extract_zip(&first, &out).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read(out.join("models/a.param")).unwrap(), b"7767517\n");
    }

    #[test]
    fn tarball_extracts() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball = tmp.path().join("src.tar.gz");
        {
            let file = File::create(&tarball).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"print('hi')\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "repo-abc/code/model.py", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        assert_eq!(detect_format(&tarball).unwrap(), ArchiveFormat::TarGz);
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        extract(&tarball, &out).unwrap();
        assert!(out.join("repo-abc/code/model.py").is_file());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("plain.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert!(detect_format(&path).is_err());
    }
}
