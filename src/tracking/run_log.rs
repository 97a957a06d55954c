use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{MetricSink, RunState, RunTracker, TrackingError};

/// One line of a run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Metric { name: String, value: f64, ts_ms: i64 },
    Completed { ts_ms: i64 },
    Failed { reason: String, ts_ms: i64 },
}

/// Append-only JSON-lines run log.
///
/// Every event is written and flushed immediately and echoed to `tracing`.
pub struct RunLog {
    path: PathBuf,
    file: File,
    state: RunState,
}

impl RunLog {
    /// Create (or truncate) a run log at `path`, creating parent directories.
    pub fn create(path: &Path) -> Result<Self, TrackingError> {
        let io_error = |source: std::io::Error| TrackingError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(io_error)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            state: RunState::Running,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Read every event from an existing run log.
    pub fn read_events(path: &Path) -> Result<Vec<RunEvent>, TrackingError> {
        let file = File::open(path).map_err(|source| TrackingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut events = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| TrackingError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line).map_err(|source| TrackingError::Decode {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
            events.push(event);
        }
        Ok(events)
    }

    fn append(&mut self, event: &RunEvent) -> Result<(), TrackingError> {
        self.append_all(std::slice::from_ref(event))
    }

    /// Encode every event first, then write them with a single call.
    fn append_all(&mut self, events: &[RunEvent]) -> Result<(), TrackingError> {
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }
        self.file
            .write_all(&buf)
            .and_then(|_| self.file.flush())
            .map_err(|source| TrackingError::Io {
                path: self.path.clone(),
                source,
            })
    }

    fn finish(&mut self, state: RunState, event: RunEvent) -> Result<(), TrackingError> {
        if self.state.is_finished() {
            return Err(TrackingError::AlreadyFinished(self.state.clone()));
        }
        self.append(&event)?;
        self.file.sync_all().map_err(|source| TrackingError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.state = state;
        Ok(())
    }
}

impl MetricSink for RunLog {
    fn log_metric(&mut self, name: &str, value: f64) -> Result<(), TrackingError> {
        if self.state.is_finished() {
            return Err(TrackingError::MetricAfterFinish(name.to_string()));
        }
        self.append(&RunEvent::Metric {
            name: name.to_string(),
            value,
            ts_ms: now_ms(),
        })?;
        tracing::info!(metric = name, value, "metric logged");
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &[(&str, f64)]) -> Result<(), TrackingError> {
        if let Some((name, _)) = metrics.first().filter(|_| self.state.is_finished()) {
            return Err(TrackingError::MetricAfterFinish(name.to_string()));
        }
        let ts_ms = now_ms();
        let events: Vec<RunEvent> = metrics
            .iter()
            .map(|(name, value)| RunEvent::Metric {
                name: name.to_string(),
                value: *value,
                ts_ms,
            })
            .collect();
        self.append_all(&events)?;
        for (name, value) in metrics {
            tracing::info!(metric = *name, value = *value, "metric logged");
        }
        Ok(())
    }
}

impl RunTracker for RunLog {
    fn complete(&mut self) -> Result<(), TrackingError> {
        self.finish(RunState::Completed, RunEvent::Completed { ts_ms: now_ms() })?;
        tracing::info!(run_log = %self.path.display(), "run completed");
        Ok(())
    }

    fn fail(&mut self, reason: &str) -> Result<(), TrackingError> {
        self.finish(
            RunState::Failed(reason.to_string()),
            RunEvent::Failed {
                reason: reason.to_string(),
                ts_ms: now_ms(),
            },
        )?;
        tracing::error!(run_log = %self.path.display(), reason, "run failed");
        Ok(())
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_metrics_then_terminal_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("run.jsonl");
        let mut log = RunLog::create(&path).unwrap();
        log.log_metric("Accuracy", 0.5).unwrap();
        log.log_metric("F1 score", 0.25).unwrap();
        log.complete().unwrap();

        let events = RunLog::read_events(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], RunEvent::Metric { name, value, .. } if name == "Accuracy" && *value == 0.5));
        assert!(matches!(events[2], RunEvent::Completed { .. }));
    }

    #[test]
    fn failure_is_terminal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut log = RunLog::create(&path).unwrap();
        log.fail("dataset missing").unwrap();
        assert!(log.complete().is_err());
        assert!(log.log_metric("AUC", 1.0).is_err());

        let events = RunLog::read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RunEvent::Failed { reason, .. } if reason == "dataset missing"));
        assert_eq!(log.state(), &RunState::Failed("dataset missing".into()));
    }

    #[test]
    fn metric_group_is_written_as_one_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut log = RunLog::create(&path).unwrap();
        log.log_metrics(&[("Accuracy", 0.75), ("F1 score", 0.5), ("AUC", 0.25)])
            .unwrap();
        log.complete().unwrap();
        assert!(log.log_metrics(&[("Accuracy", 1.0)]).is_err());

        let names: Vec<String> = RunLog::read_events(&path)
            .unwrap()
            .into_iter()
            .filter_map(|event| match event {
                RunEvent::Metric { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["Accuracy", "F1 score", "AUC"]);
    }
}
