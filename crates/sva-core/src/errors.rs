//! Error type returned by every fallible SVA operation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code, message and diagnostic context of an [`SvaError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Kebab-case code that tests and callers match on.
    pub code: String,
    /// One-line description.
    pub message: String,
    /// Offending values keyed by name (widths, rows, paths).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// What the caller can do about it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Payload without context or hint.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Records `key = value`.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Attaches a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        let mut entries = self.context.iter();
        if let Some((key, value)) = entries.next() {
            write!(f, " ({key}={value}")?;
            for (key, value) in entries {
                write!(f, ", {key}={value}")?;
            }
            f.write_str(")")?;
        }
        match &self.hint {
            Some(hint) => write!(f, "; hint: {hint}"),
            None => Ok(()),
        }
    }
}

/// Failure of an SVA operation, grouped by what went wrong.
///
/// Loading state written by another engine version is not an error; see
/// `sva_exp::CompatibilityWarning`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum SvaError {
    /// Wrong number of rows or columns.
    #[error("shape error: {0}")]
    Shape(ErrorInfo),
    /// Inputs outside the valid domain.
    #[error("domain error: {0}")]
    Domain(ErrorInfo),
    /// Unknown names, unsupported options or inconsistent settings.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// State not ready for the operation.
    #[error("precondition error: {0}")]
    Precondition(ErrorInfo),
    /// Surrogate fit or prediction failed.
    #[error("model error: {0}")]
    Model(ErrorInfo),
    /// Acquisition could not produce a proposal.
    #[error("acquisition error: {0}")]
    Acquisition(ErrorInfo),
    /// Encoding, decoding or filesystem failure.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl SvaError {
    /// Payload of any family.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            SvaError::Shape(info)
            | SvaError::Domain(info)
            | SvaError::Config(info)
            | SvaError::Precondition(info)
            | SvaError::Model(info)
            | SvaError::Acquisition(info)
            | SvaError::Serde(info) => info,
        }
    }

    /// Error code of the payload.
    pub fn code(&self) -> &str {
        &self.info().code
    }

    /// `Config` error without context.
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        SvaError::Config(ErrorInfo::new(code, message))
    }

    /// `Serde` error carrying the display text of `err`.
    pub fn serde(code: impl Into<String>, err: impl ToString) -> Self {
        SvaError::Serde(ErrorInfo::new(code, err.to_string()))
    }
}
