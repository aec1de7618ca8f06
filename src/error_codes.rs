use std::fmt;
use std::process::ExitCode;

use anyhow::Error;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    MissingDependency,
    Transcode,
    Io,
}

impl CodedErrorKind {
    pub fn exit_status(self) -> u8 {
        match self {
            Self::Usage => 2,
            Self::MissingDependency => 3,
            Self::Transcode => 4,
            Self::Io => 5,
        }
    }
}

/// Exit status for errors that carry no [`CodedError`].
pub const GENERIC_EXIT_STATUS: u8 = 1;

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub kind: CodedErrorKind,
}

impl CodedError {
    fn new(kind: CodedErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind,
        }
    }

    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Usage, code, message)
    }

    pub fn missing_dependency(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::MissingDependency, code, message)
    }

    pub fn transcode(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Transcode, code, message)
    }

    pub fn io(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Io, code, message)
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

pub fn exit_code_for(error: &Error) -> ExitCode {
    let status = find_coded_error(error)
        .map(|coded| coded.kind.exit_status())
        .unwrap_or(GENERIC_EXIT_STATUS);
    ExitCode::from(status)
}

/// JSON error body for `--json` output. Uncoded errors report `E_INTERNAL`.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    let code = find_coded_error(error).map_or("E_INTERNAL", |coded| coded.code);
    ErrorEnvelope {
        ok: false,
        error: ErrorEnvelopeBody {
            code: code.to_owned(),
            message: format!("{error:#}"),
        },
    }
}
