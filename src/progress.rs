//! Progress reporting for long-running searches.

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

/// Raised by a reporter that can no longer deliver updates. The finder
/// drops the reporter on the first error and keeps going silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("progress reporter failed: {0}")]
pub struct ProgressError(pub String);

/// Sink for status updates from the engine.
pub trait ProgressReporter {
    /// `total` of 0 means the amount of work is not known yet.
    fn report(&mut self, message: &str, current: usize, total: usize)
        -> Result<(), ProgressError>;
}

/// Reporter that swallows all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(
        &mut self,
        _message: &str,
        _current: usize,
        _total: usize,
    ) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// Reporter backed by an indicatif bar on stderr.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConsoleProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for ConsoleProgress {
    fn report(
        &mut self,
        message: &str,
        current: usize,
        total: usize,
    ) -> Result<(), ProgressError> {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(current as u64);
        self.bar.set_message(message.to_string());
        Ok(())
    }
}
