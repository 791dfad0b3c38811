//! JSONL run recorder.
//!
//! A reference implementation of the recorder sink: one JSON object per line,
//! appended as events arrive. Recorder I/O errors are logged and swallowed so
//! a broken sink can never fail a run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use botwright_types::{WorkflowEvent, WorkflowRun};

use crate::bus::{ListenerFn, listener_fn};

/// Appends workflow events (and final run records) to a JSONL file.
pub struct JsonlRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlRecorder {
    /// Open (or create) the file at `path` for appending.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a JSON line. Failures are logged, never raised.
    pub fn record(&self, event: &WorkflowEvent) {
        match serde_json::to_string(event) {
            Ok(line) => self.append_line(&line),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to serialize event");
            }
        }
    }

    /// Append the terminal run record as a JSON line.
    pub fn record_run(&self, run: &WorkflowRun) {
        match serde_json::to_string(run) {
            Ok(line) => self.append_line(&line),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to serialize run record");
            }
        }
    }

    fn append_line(&self, line: &str) {
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(file, "{line}") {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to write event line");
        }
    }

    /// The recorder as an event listener, for `EventBus`/`RunOptions`.
    pub fn listener(self: &Arc<Self>) -> ListenerFn {
        let recorder = Arc::clone(self);
        listener_fn(move |event| {
            let recorder = recorder.clone();
            async move {
                recorder.record(&event);
                Ok(())
            }
        })
    }
}

impl std::fmt::Debug for JsonlRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlRecorder")
            .field("path", &self.path)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
