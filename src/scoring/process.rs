use super::{ScoredPost, ScoringCapability};
use crate::config::ScoringConfig;
use crate::error::{PipelineError, Result};
use crate::staging::{StagedBatch, StagingStore};
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Cap on diagnostic text carried in an error; tracebacks end with the useful part.
const MAX_DIAGNOSTIC_BYTES: usize = 4096;

/// Runs the scoring program as a child process against a staged batch.
///
/// The child runs inside the run's staging directory and also gets the
/// absolute paths in `STAGED_INPUT_PATH` / `SCORED_OUTPUT_PATH`. Its
/// stdout/stderr are only used for diagnostics.
pub struct ProcessScorer {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    store: Arc<StagingStore>,
}

impl ProcessScorer {
    pub fn new(config: &ScoringConfig, store: Arc<StagingStore>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
            store,
        }
    }

    /// Make relative program/arg paths that exist under `base` absolute,
    /// since the child runs in a different working directory.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let absolutize = |value: &mut String| {
            if Path::new(value.as_str()).is_absolute() {
                return;
            }
            let candidate = base.join(value.as_str());
            if candidate.exists() {
                if let Ok(abs) = std::fs::canonicalize(&candidate) {
                    *value = abs.to_string_lossy().into_owned();
                }
            }
        };
        if self.program.contains('/') {
            absolutize(&mut self.program);
        }
        self.args.iter_mut().for_each(absolutize);
        self
    }

    fn expand_args(&self, staged: &StagedBatch) -> Vec<String> {
        let input = staged.input_path().to_string_lossy();
        let output = staged.output_path().to_string_lossy();
        let dir = staged.dir().to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{dir}", &dir)
            })
            .collect()
    }

    async fn run(&self, staged: &StagedBatch) -> Result<Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.expand_args(staged))
            .current_dir(staged.dir())
            .env("STAGED_INPUT_PATH", staged.input_path())
            .env("SCORED_OUTPUT_PATH", staged.output_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            PipelineError::external_process(format!("failed to start scoring process '{}': {}", self.program, e))
                .with_cause(e)
        })?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    PipelineError::external_process(format!(
                        "scoring process timed out after {}s",
                        limit.as_secs()
                    ))
                })?,
            None => child.wait_with_output().await,
        };

        waited.map_err(|e| {
            PipelineError::external_process(format!("failed waiting for scoring process: {}", e)).with_cause(e)
        })
    }
}

/// Combined stderr + stdout, trimmed to the last `MAX_DIAGNOSTIC_BYTES`.
fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text;
    }
    let mut start = text.len() - MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[async_trait]
impl ScoringCapability for ProcessScorer {
    async fn score(&self, staged: &StagedBatch) -> Result<Vec<ScoredPost>> {
        tracing::debug!(request_id = %staged.request_id(), program = %self.program, "starting scoring process");
        let output = self.run(staged).await?;
        let diag = diagnostics(&output);
        for line in diag.lines() {
            tracing::debug!(request_id = %staged.request_id(), "scorer: {}", line);
        }

        if !output.status.success() {
            let status = match output.status.code() {
                Some(code) => format!("exit code {}", code),
                None => "a signal".to_string(),
            };
            tracing::warn!(request_id = %staged.request_id(), status = %status, "scoring process failed");
            return Err(PipelineError::external_process(format!(
                "scoring process terminated with {}: {}",
                status, diag
            )));
        }

        self.store.read_scored(staged)?.ok_or_else(|| {
            PipelineError::external_process(format!(
                "scoring process exited successfully but wrote no output to {}: {}",
                staged.output_path().display(),
                diag
            ))
        })
    }
}
