//! Backend that runs an external conversion tool.

use super::{BackendResult, ConvertContext, OutputFileDescriptor};
use crate::bundler::{
    error::{Error, Result},
    settings::{CommandSpec, OptimizeSpec},
    utils::fs::move_path,
};
use serde_json::{Map, Value};
use std::{path::Path, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};

/// Stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `program args...` and collects the declared outputs from `{out_dir}`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    spec: CommandSpec,
}

impl CommandBackend {
    /// Creates the backend.
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    /// Backend id.
    pub fn id(&self) -> &str {
        &self.spec.backend
    }

    pub(super) async fn convert(
        &self,
        ctx: &ConvertContext<'_>,
        out_dir: &Path,
    ) -> Result<BackendResult> {
        let timeout = self
            .spec
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(ctx.timeout);

        let program = ctx.toolchain.resolve(&self.spec.program).ok_or_else(|| {
            Error::ToolFailed {
                tool: self.spec.program.clone(),
                code: None,
                stderr: "not found in PATH".into(),
            }
        })?;
        let args = expand_args(&self.spec.args, ctx, out_dir)?;
        run_tool(&self.spec.program, program, &args, out_dir, timeout).await?;

        let mut metadata = Map::new();
        metadata.insert("tool".into(), Value::String(self.spec.program.clone()));

        if let Some(optimize) = &self.spec.optimize {
            let optimized = self.optimize(optimize, ctx, out_dir, timeout).await?;
            metadata.insert("optimized".into(), Value::Bool(optimized));
        }

        let files = self
            .spec
            .outputs
            .iter()
            .map(|output| {
                let file = output.file.as_deref().unwrap_or(&output.relative);
                OutputFileDescriptor::from_spec(out_dir.join(file), output)
            })
            .collect();

        Ok(BackendResult {
            backend: self.spec.backend.clone(),
            files,
            metadata,
        })
    }

    /// Runs the optional optimizer. Returns `false` when the tool is not
    /// installed; a failing optimizer is an error.
    async fn optimize(
        &self,
        optimize: &OptimizeSpec,
        ctx: &ConvertContext<'_>,
        out_dir: &Path,
        timeout: Duration,
    ) -> Result<bool> {
        let Some(program) = ctx.toolchain.resolve(&optimize.program) else {
            log::warn!(
                "{} not available, shipping unoptimized {} outputs",
                optimize.program,
                self.spec.backend
            );
            return Ok(false);
        };

        let args = expand_args(&optimize.args, ctx, out_dir)?;
        run_tool(&optimize.program, program, &args, out_dir, timeout).await?;

        for (from, to) in &optimize.renames {
            move_path(&out_dir.join(from), &out_dir.join(to)).await?;
        }
        Ok(true)
    }
}

fn expand_args(args: &[String], ctx: &ConvertContext<'_>, out_dir: &Path) -> Result<Vec<String>> {
    args.iter().map(|arg| expand_arg(arg, ctx, out_dir)).collect()
}

/// Expands `{out_dir}`, `{source:<id>}`, `{model_id}` and `{precision}` in one argument.
///
/// Unknown placeholders are configuration errors.
pub fn expand_arg(arg: &str, ctx: &ConvertContext<'_>, out_dir: &Path) -> Result<String> {
    let mut expanded = String::with_capacity(arg.len());
    let mut rest = arg;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        expanded.push_str(&rest[..start]);
        let name = &rest[start + 1..start + len];

        let value = match name {
            "out_dir" => out_dir.display().to_string(),
            "model_id" => ctx.model.id.clone(),
            "precision" => ctx
                .model
                .precision
                .map(|p| p.as_str().to_string())
                .unwrap_or_default(),
            _ => match name.strip_prefix("source:") {
                Some(id) => ctx.source(id)?.display().to_string(),
                None => {
                    return Err(Error::Config(format!(
                        "model '{}': unknown placeholder {{{name}}} in '{arg}'",
                        ctx.model.id
                    )));
                }
            },
        };
        expanded.push_str(&value);
        rest = &rest[start + len + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

/// Runs a tool to completion, streaming stdout to the debug log and keeping
/// the tail of stderr for the error report.
async fn run_tool(
    name: &str,
    program: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<()> {
    log::info!("Running {} {}", name, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ToolFailed {
            tool: name.to_string(),
            code: None,
            stderr: e.to_string(),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        // Both streams must drain before the exit status is read
        let (_, stderr_lines) = tokio::join!(
            async {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        log::debug!("[{}] {}", name, line);
                    }
                }
            },
            async {
                let mut captured = Vec::new();
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        log::debug!("[{}] {}", name, line);
                        captured.push(line);
                        if captured.len() > STDERR_TAIL_LINES {
                            captured.remove(0);
                        }
                    }
                }
                captured
            }
        );
        let status = child.wait().await;
        (status, stderr_lines)
    };

    match tokio::time::timeout(timeout, run).await {
        Ok((Ok(status), _)) if status.success() => Ok(()),
        Ok((Ok(status), stderr_lines)) => Err(Error::ToolFailed {
            tool: name.to_string(),
            code: status.code(),
            stderr: stderr_lines.join("\n"),
        }),
        Ok((Err(e), _)) => Err(Error::ToolFailed {
            tool: name.to_string(),
            code: None,
            stderr: e.to_string(),
        }),
        Err(_elapsed) => Err(Error::ToolTimeout {
            tool: name.to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}
