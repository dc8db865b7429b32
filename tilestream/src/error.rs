//! Error and warning accumulation for parse and load operations.
//!
//! Parsing a tileset document or decoding tile content can produce many
//! independent problems, most of which should not abort the operation. An
//! [`ErrorList`] collects errors (fatal for the specific resource) and
//! warnings (diagnostic, resource still usable) so callers can log or surface
//! them in aggregate instead of failing on the first issue.
//!
//! Nothing at an async boundary in this crate throws; failures cross the
//! worker/main boundary as values, either an `Err` variant or a non-empty
//! error list attached to the operation's result.

use std::fmt;

/// Accumulated errors and warnings from a single operation.
///
/// Errors mean the specific resource could not be used; warnings mean the
/// resource is usable but degraded or suspicious. An operation that touches
/// many resources (parsing a tileset tree, decoding a composite tile) merges
/// the per-resource lists into one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorList {
    /// Fatal problems for the resource this list describes.
    pub errors: Vec<String>,
    /// Non-fatal diagnostics.
    pub warnings: Vec<String>,
}

impl ErrorList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a list holding a single error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }

    /// Creates a list holding a single warning.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            errors: Vec::new(),
            warnings: vec![message.into()],
        }
    }

    /// Appends an error.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Appends a warning.
    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Moves all entries from `other` into this list.
    pub fn merge(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Returns true if there is at least one error.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns true if there are no errors and no warnings.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Emits every entry through `tracing` with the given context string.
    pub fn log(&self, context: &str) {
        for error in &self.errors {
            tracing::error!(context, "{}", error);
        }
        for warning in &self.warnings {
            tracing::warn!(context, "{}", warning);
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        )?;
        for error in &self.errors {
            write!(f, "\n  error: {}", error)?;
        }
        for warning in &self.warnings {
            write!(f, "\n  warning: {}", warning)?;
        }
        Ok(())
    }
}
