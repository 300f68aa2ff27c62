//! Coalescing of malformed lines into ranges
//!
//! Consecutive lines with the same message and severity share one
//! [`BadLineRange`]. Storage stays proportional to the number of runs rather
//! than the number of bad lines.

use crate::models::BadLineRange;

/// Severity of a bad line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The line was repaired and still processed
    Warning,
    /// The line was skipped
    Error,
}

#[derive(Debug, Default)]
pub struct BadLineTracker {
    filename: String,
    pending: Option<BadLineRange>,
    completed: Vec<BadLineRange>,
}

impl BadLineTracker {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            pending: None,
            completed: Vec::new(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Continue a range already stored by an earlier run, so lines that
    /// follow it on resume extend it instead of starting a new one
    pub fn resume(&mut self, stored: BadLineRange) {
        self.finish();
        self.pending = Some(stored);
    }

    pub fn error(&mut self, line_no: i64, line: &str, message: &str) {
        self.record(line_no, line, message, Severity::Error);
    }

    pub fn warning(&mut self, line_no: i64, line: &str, message: &str) {
        self.record(line_no, line, message, Severity::Warning);
    }

    fn record(&mut self, line_no: i64, line: &str, message: &str, severity: Severity) {
        let is_warning = severity == Severity::Warning;

        if let Some(pending) = self.pending.as_mut() {
            if pending.last_line_no + 1 == line_no
                && pending.message == message
                && pending.is_warning == is_warning
            {
                pending.last_line_no = line_no;
                return;
            }
        }

        if let Some(done) = self.pending.take() {
            self.completed.push(done);
        }
        self.pending = Some(BadLineRange {
            id: None,
            filename: self.filename.clone(),
            first_line_no: line_no,
            last_line_no: line_no,
            example_line: line.to_string(),
            message: message.to_string(),
            is_warning,
        });
    }

    /// Close the open range; called at end of file
    pub fn finish(&mut self) {
        if let Some(done) = self.pending.take() {
            self.completed.push(done);
        }
    }

    /// Ranges that can no longer grow
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Hand out everything that needs writing: the closed ranges (removed
    /// from the tracker) and the still-open range (kept, so it can grow and
    /// be written again later under the same id).
    pub fn take_for_flush(&mut self) -> (Vec<BadLineRange>, Option<&mut BadLineRange>) {
        let completed = std::mem::take(&mut self.completed);
        (completed, self.pending.as_mut())
    }

    /// Drop everything unwritten
    pub fn clear(&mut self) {
        self.pending = None;
        self.completed.clear();
    }
}
