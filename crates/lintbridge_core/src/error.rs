//! Analysis error types and their wire representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while orchestrating an analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Malformed source input.
    #[error("Parsing error: {message}")]
    Parsing {
        message: String,
        line: Option<u32>,
        code: ErrorCode,
    },

    /// The per-project analysis program could not be built.
    #[error("Program construction failed: {0}")]
    ProgramConstruction(String),

    /// The request exceeded its time budget.
    #[error("Analysis timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A worker crashed or exited before replying.
    #[error("Worker failure: {0}")]
    WorkerFailure(String),

    /// Malformed request or cache misuse.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The linter was not initialized, or its initialization failed.
    #[error("Linter initialization error: {0}")]
    LinterInitialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Creates a parsing error.
    pub fn parsing(message: impl Into<String>, line: Option<u32>) -> Self {
        Self::Parsing {
            message: message.into(),
            line,
            code: ErrorCode::Parsing,
        }
    }

    /// Creates a program construction error.
    pub fn program(message: impl Into<String>) -> Self {
        Self::ProgramConstruction(message.into())
    }

    /// Creates a worker failure.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::WorkerFailure(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a linter initialization error.
    pub fn linter(message: impl Into<String>) -> Self {
        Self::LinterInitialization(message.into())
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parsing { .. } => ErrorKind::Parsing,
            Self::ProgramConstruction(_) => ErrorKind::ProgramConstruction,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::WorkerFailure(_) => ErrorKind::WorkerFailure,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Config(_) | Self::LinterInitialization(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the error is recovered per file during a project analysis.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Self::Parsing { .. } | Self::ProgramConstruction(_) | Self::Io(_)
        )
    }

    /// Converts the error into the payload sent to callers.
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::Parsing {
                message,
                line,
                code,
            } => ErrorPayload::Parsing {
                parsing_error: ParsingErrorDetail {
                    message: message.clone(),
                    code: *code,
                    line: *line,
                },
            },
            Self::ProgramConstruction(message) => ErrorPayload::Parsing {
                parsing_error: ParsingErrorDetail {
                    message: message.clone(),
                    code: ErrorCode::FailingTypescript,
                    line: None,
                },
            },
            Self::LinterInitialization(message) => ErrorPayload::Parsing {
                parsing_error: ParsingErrorDetail {
                    message: message.clone(),
                    code: ErrorCode::LinterInitialization,
                    line: None,
                },
            },
            other => ErrorPayload::General {
                error: other.to_string(),
                kind: Some(other.kind()),
            },
        }
    }
}

/// Error codes understood by the calling host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Parsing,
    FailingTypescript,
    GeneralError,
    LinterInitialization,
}

/// Machine-readable error kind attached to general error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Parsing,
    ProgramConstruction,
    Timeout,
    WorkerFailure,
    Validation,
    Config,
    Io,
}

/// Detail of a parsing error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsingErrorDetail {
    pub message: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Structured error object returned to callers.
///
/// Serialized either as `{"parsingError": {...}}` or as
/// `{"error": "...", "kind": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Parsing {
        #[serde(rename = "parsingError")]
        parsing_error: ParsingErrorDetail,
    },
    General {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
}

impl ErrorPayload {
    /// Builds a general payload without a kind.
    pub fn message(error: impl Into<String>) -> Self {
        Self::General {
            error: error.into(),
            kind: None,
        }
    }

    /// Returns the kind of a general payload.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Parsing { .. } => Some(ErrorKind::Parsing),
            Self::General { kind, .. } => *kind,
        }
    }
}
