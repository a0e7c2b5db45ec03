// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Extractor adapters
//!
//! `CommandExtractor` runs an external introspection tool against the running
//! guest. The tool prints one fact event per line as JSON, tagged by `kind`:
//!
//! ```text
//! {"kind": "processes_captured", "processes": [{"pid": 1, "name": "systemd"}]}
//! {"kind": "syscalls_captured", "run_id": "…", "tables": [...]}
//! ```
//!
//! A line may carry the `run_id` it was produced for; a mismatch rejects the
//! whole batch.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::domain::capture_config::IntrospectionConfig;
use crate::domain::events::{CaptureEvent, RunId};
use crate::domain::extractor::{ExtractError, ExtractionContext, Extractor};
use crate::infrastructure::process::{display_command, run_command, RunFailure};

pub struct CommandExtractor {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self, ExtractError> {
        if command.is_empty() {
            return Err(ExtractError::EmptyCommand);
        }
        Ok(Self { command, timeout })
    }

    pub fn from_config(config: &IntrospectionConfig) -> Result<Self, ExtractError> {
        Self::new(config.command.clone(), config.timeout)
    }

    /// Command line with `{domain}` and `{run_id}` substituted
    fn render(&self, ctx: &ExtractionContext) -> Vec<String> {
        let run_id = ctx.run_id.to_string();
        self.command
            .iter()
            .map(|arg| arg.replace("{domain}", &ctx.domain).replace("{run_id}", &run_id))
            .collect()
    }
}

/// Parse JSON-lines fact output. Blank lines are ignored.
pub fn parse_fact_lines(stdout: &str, run_id: RunId) -> Result<Vec<CaptureEvent>, ExtractError> {
    let mut facts = Vec::new();
    for (index, line) in stdout.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let invalid = |reason: String| ExtractError::InvalidFact { line: line_no, reason };
        let mut value: serde_json::Value = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;

        if let Some(stamp) = value.as_object_mut().and_then(|o| o.remove("run_id")) {
            let actual: RunId = serde_json::from_value(stamp).map_err(|e| invalid(format!("run_id: {}", e)))?;
            if actual != run_id {
                return Err(ExtractError::ForeignRun {
                    line: line_no,
                    expected: run_id,
                    actual,
                });
            }
        }

        let fact: CaptureEvent = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        if fact.kind().is_lifecycle() {
            return Err(ExtractError::LifecycleEvent(fact.kind()));
        }
        facts.push(fact);
    }
    Ok(facts)
}

#[async_trait]
impl Extractor for CommandExtractor {
    fn name(&self) -> &str {
        &self.command[0]
    }

    async fn extract(&self, ctx: &ExtractionContext) -> Result<Vec<CaptureEvent>, ExtractError> {
        let argv = self.render(ctx);
        let (program, args) = argv.split_first().ok_or(ExtractError::EmptyCommand)?;
        let program = PathBuf::from(program);
        let command = display_command(&program, args);

        let output = run_command(&program, args, Some(self.timeout))
            .await
            .map_err(|failure| match failure {
                RunFailure::Spawn(source) => ExtractError::Spawn {
                    command: command.clone(),
                    source,
                },
                RunFailure::TimedOut => ExtractError::Timeout {
                    command: command.clone(),
                },
            })?;

        if !output.success {
            return Err(ExtractError::NonZeroExit {
                command,
                status: output.status,
                stderr: output.stderr,
            });
        }

        let facts = parse_fact_lines(&output.stdout, ctx.run_id)?;
        debug!("{} returned {} facts", command, facts.len());
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventKind;

    #[test]
    fn test_parse_facts() {
        let run = RunId::new();
        let stamped = format!(r#"{{"kind": "syscalls_captured", "run_id": "{}", "tables": []}}"#, run);
        let stdout = format!(
            "{}\n\n{}\n",
            r#"{"kind": "processes_captured", "processes": [{"pid": 1, "name": "systemd"}]}"#,
            stamped
        );
        let facts = parse_fact_lines(&stdout, run).unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].kind(), EventKind::ProcessesCaptured);
        assert_eq!(facts[1].kind(), EventKind::SyscallsCaptured);
    }

    #[test]
    fn test_foreign_run_rejected() {
        let line = format!(r#"{{"kind": "syscalls_captured", "run_id": "{}", "tables": []}}"#, RunId::new());
        let err = parse_fact_lines(&line, RunId::new()).unwrap_err();
        assert!(matches!(err, ExtractError::ForeignRun { line: 1, .. }));
    }

    #[test]
    fn test_lifecycle_and_garbage_rejected() {
        let err = parse_fact_lines(r#"{"kind": "desktop_ready"}"#, RunId::new()).unwrap_err();
        assert!(matches!(err, ExtractError::LifecycleEvent(EventKind::DesktopReady)));

        let err = parse_fact_lines("{\"kind\": \"processes_captured\", \"processes\": []}\nnope", RunId::new())
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidFact { line: 2, .. }));
    }

    #[test]
    fn test_placeholders() {
        let extractor = CommandExtractor::new(
            vec!["osw-extract".into(), "--domain={domain}".into(), "{run_id}".into()],
            Duration::from_secs(1),
        )
        .unwrap();
        let ctx = ExtractionContext {
            run_id: RunId::new(),
            domain: "osw-debian-osw-1a2b3c4d".into(),
        };
        let argv = extractor.render(&ctx);
        assert_eq!(argv[1], "--domain=osw-debian-osw-1a2b3c4d");
        assert_eq!(argv[2], ctx.run_id.to_string());
    }

    #[test]
    fn test_empty_command() {
        assert!(matches!(
            CommandExtractor::new(Vec::new(), Duration::from_secs(1)),
            Err(ExtractError::EmptyCommand)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_becomes_facts() {
        let extractor = CommandExtractor::new(
            vec![
                "sh".into(),
                "-c".into(),
                r#"echo '{"kind": "processes_captured", "processes": [{"pid": 1, "name": "init"}]}'"#.into(),
            ],
            Duration::from_secs(5),
        )
        .unwrap();
        let ctx = ExtractionContext {
            run_id: RunId::new(),
            domain: "vm".into(),
        };
        let facts = extractor.extract(&ctx).await.unwrap();
        assert_eq!(facts.len(), 1);
    }
}
