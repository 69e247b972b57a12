use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

/// Error taxonomy of the processing core.
///
/// Callers branch on the *kind* of failure, never on message text:
/// `Parse`/`Validation` travel unchanged to the original caller, `NotFound`
/// and `Conflict` map to repository outcomes, `Transient` downgrades to a
/// metric plus retry, `Permanent` dead-letters, and `Internal` marks a
/// broken invariant that should page.
#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("parse error")]
    Parse,
    #[error("validation error")]
    Validation,
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("transient infrastructure error")]
    Transient,
    #[error("permanent infrastructure error")]
    Permanent,
    #[error("internal invariant violation")]
    Internal,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Parse => 1101,
            Self::Validation => 1102,
            Self::NotFound => 1103,
            Self::Conflict => 1104,
            Self::Transient => 1105,
            Self::Permanent => 1106,
            Self::Internal => 1107,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;

/// Shorthand for a detail-carrying error of the given kind.
pub fn core_err(reason: CoreReason, detail: impl Into<String>) -> CoreError {
    StructError::from(reason).with_detail(detail.into())
}
