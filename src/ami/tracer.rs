//! Durable JSON trace of every AMI event an instance observed.
//!
//! The file is a JSON array written incrementally: `[\n\t` before the
//! first event, `,\n\t` before each later one, and `\n]` on finish. It is
//! flushed after every event so a crashed run still leaves a readable
//! prefix. Nothing is created if no event ever arrives.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::event::AmiEvent;
use crate::error::{Error, Result};

#[derive(Debug)]
enum TracerState {
    /// No event written yet; the file does not exist.
    Closed,
    /// Array opened, at least one element written.
    Open(BufWriter<File>),
    /// Array closed. Further events are ignored.
    Finished,
}

/// Appends AMI events to a JSON array file.
#[derive(Debug)]
pub struct EventTracer {
    path: PathBuf,
    state: TracerState,
    written: usize,
}

impl EventTracer {
    /// Create a tracer that will write to `path` on the first event.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: TracerState::Closed,
            written: 0,
        }
    }

    /// Trace file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append one event, opening the file on first use.
    ///
    /// Returns false if the tracer was already finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Trace`] if the file cannot be created or written.
    pub fn append(&mut self, event: &AmiEvent) -> Result<bool> {
        let path = &self.path;
        let err = |e: std::io::Error| Error::trace(path, e);

        match &mut self.state {
            TracerState::Finished => return Ok(false),
            TracerState::Open(writer) => writer.write_all(b",\n\t").map_err(err)?,
            TracerState::Closed => {
                let mut writer = BufWriter::new(File::create(path).map_err(err)?);
                writer.write_all(b"[\n\t").map_err(err)?;
                self.state = TracerState::Open(writer);
            },
        }

        let TracerState::Open(writer) = &mut self.state else {
            return Ok(false);
        };
        serde_json::to_writer(&mut *writer, event)
            .map_err(|e| Error::trace(path, e.into()))?;
        writer.flush().map_err(err)?;
        self.written += 1;
        Ok(true)
    }

    /// Close the array and release the file. Idempotent.
    ///
    /// Returns the number of events written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Trace`] if the closing bracket cannot be written.
    pub fn finish(&mut self) -> Result<usize> {
        if let TracerState::Open(mut writer) =
            std::mem::replace(&mut self.state, TracerState::Finished)
        {
            let err = |e: std::io::Error| Error::trace(&self.path, e);
            writer.write_all(b"\n]").map_err(err)?;
            writer.flush().map_err(err)?;
            debug!(path = %self.path.display(), events = self.written, "AMI trace finalized");
        }
        Ok(self.written)
    }
}
