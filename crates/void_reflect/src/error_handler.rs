//! Error reporting with stack-frame context
//!
//! Walkers and streams push a frame for every node they enter, so a failure
//! deep inside a graph is reported with the full path that led to it.
//! Reports are forwarded to the `log` facade and counted.

use core::fmt;

use void_core::ClassId;

/// One level of the path being walked
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub class_name: String,
    pub class_id: ClassId,
    /// Field through which the node was reached, if any
    pub field: Option<String>,
    /// Byte offset of the field within its owner
    pub offset: usize,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}({}) @ {}+{}", self.class_name, self.class_id, field, self.offset),
            None => write!(f, "{}({})", self.class_name, self.class_id),
        }
    }
}

/// Collects errors and warnings raised while walking object graphs
#[derive(Debug, Default)]
pub struct ErrorHandler {
    stack: Vec<StackFrame>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an error at the current path
    pub fn report_error(&mut self, message: impl AsRef<str>) {
        let report = self.with_path(message.as_ref());
        log::error!("{}", report);
        self.errors.push(report);
    }

    /// Report a warning at the current path
    pub fn report_warning(&mut self, message: impl AsRef<str>) {
        let report = self.with_path(message.as_ref());
        log::warn!("{}", report);
        self.warnings.push(report);
    }

    pub fn push(&mut self, frame: StackFrame) {
        self.stack.push(frame);
    }

    pub fn pop(&mut self) -> Option<StackFrame> {
        self.stack.pop()
    }

    /// Frames from the root to the current node
    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Clear counters, reports and the frame stack
    pub fn reset(&mut self) {
        self.stack.clear();
        self.errors.clear();
        self.warnings.clear();
    }

    fn with_path(&self, message: &str) -> String {
        if self.stack.is_empty() {
            return message.to_string();
        }
        let path: Vec<String> = self.stack.iter().map(ToString::to_string).collect();
        format!("{} [at {}]", message, path.join(" -> "))
    }
}
