//! Status codes shared by every response.
//!
//! Codes are partitioned into three bands:
//!
//! | Range     | Meaning                         |
//! |-----------|---------------------------------|
//! | 0..=50    | success / informational         |
//! | 51..=100  | error                           |
//! | 101..=999 | application-defined             |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest code available to applications.
pub const CUSTOM_MIN: u16 = 101;

/// Highest code available to applications.
pub const CUSTOM_MAX: u16 = 999;

/// A status code outside of the known vocabulary or the custom range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusError {
    /// Custom codes must fall within 101..=999.
    #[error("custom status {0} is outside {CUSTOM_MIN}..={CUSTOM_MAX}")]
    OutOfRange(u16),

    /// The code sits in a reserved band but has no assigned meaning.
    #[error("status {0} is reserved and unassigned")]
    Unassigned(u16),
}

/// Response status.
///
/// Serialized as its bare integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Status {
    /// The request succeeded.
    Ok,
    /// The request was accepted and is still being processed.
    Processing,
    /// The request changed nothing (e.g. deleting an already deleted object).
    NoChanges,
    /// The chunk was stored; send the next one.
    FileNext,
    /// The whole upload was terminated.
    FileAbort,

    /// An internal error occurred.
    Error,
    /// The target is full (e.g. joining a full room).
    Full,
    /// The thing being created already exists.
    Exists,
    /// The request is malformed.
    Invalid,
    /// The requested resource does not exist.
    NotFound,
    /// The client must sign in first.
    NotAuthorized,
    /// The client is signed in but lacks permission.
    NoPermission,
    /// The feature is not implemented yet.
    Unimplemented,
    /// The client sent too many requests recently.
    TooManyRequests,
    /// The client exhausted its quota.
    ResourceExhausted,
    /// The server is too busy to handle the request.
    Busy,
    /// The chunk failed; resend the same chunk.
    FileRetry,
    /// The uploaded chunk or file is empty.
    FileEmpty,
    /// The chunk or file exceeds the allowed size.
    FileTooLarge,

    /// Application-defined code in 101..=999.
    Custom(CustomStatus),
}

/// An application-defined status code, guaranteed to be within 101..=999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomStatus(u16);

impl CustomStatus {
    /// Returns the numeric code.
    pub fn code(self) -> u16 {
        self.0
    }
}

impl Status {
    /// Creates an application-defined status, validating its range.
    pub fn custom(code: u16) -> Result<Self, StatusError> {
        if (CUSTOM_MIN..=CUSTOM_MAX).contains(&code) {
            Ok(Self::Custom(CustomStatus(code)))
        } else {
            Err(StatusError::OutOfRange(code))
        }
    }

    /// Resolves a numeric code into a status.
    pub fn from_code(code: u16) -> Result<Self, StatusError> {
        let status = match code {
            0 => Self::Ok,
            1 => Self::Processing,
            2 => Self::NoChanges,
            10 => Self::FileNext,
            11 => Self::FileAbort,
            51 => Self::Error,
            52 => Self::Full,
            53 => Self::Exists,
            54 => Self::Invalid,
            55 => Self::NotFound,
            56 => Self::NotAuthorized,
            57 => Self::NoPermission,
            58 => Self::Unimplemented,
            59 => Self::TooManyRequests,
            60 => Self::ResourceExhausted,
            61 => Self::Busy,
            70 => Self::FileRetry,
            71 => Self::FileEmpty,
            72 => Self::FileTooLarge,
            CUSTOM_MIN..=CUSTOM_MAX => Self::Custom(CustomStatus(code)),
            0..=100 => return Err(StatusError::Unassigned(code)),
            _ => return Err(StatusError::OutOfRange(code)),
        };
        Ok(status)
    }

    /// Returns the numeric wire code.
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 0,
            Self::Processing => 1,
            Self::NoChanges => 2,
            Self::FileNext => 10,
            Self::FileAbort => 11,
            Self::Error => 51,
            Self::Full => 52,
            Self::Exists => 53,
            Self::Invalid => 54,
            Self::NotFound => 55,
            Self::NotAuthorized => 56,
            Self::NoPermission => 57,
            Self::Unimplemented => 58,
            Self::TooManyRequests => 59,
            Self::ResourceExhausted => 60,
            Self::Busy => 61,
            Self::FileRetry => 70,
            Self::FileEmpty => 71,
            Self::FileTooLarge => 72,
            Self::Custom(custom) => custom.code(),
        }
    }

    /// True for the success/informational band (0..=50).
    pub fn is_success(self) -> bool {
        self.code() <= 50
    }

    /// True for the error band (51..=100).
    pub fn is_error(self) -> bool {
        (51..=100).contains(&self.code())
    }

    /// True for application-defined codes.
    pub fn is_custom(self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// Returns a short human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Processing => "processing",
            Self::NoChanges => "no changes",
            Self::FileNext => "send next chunk",
            Self::FileAbort => "upload aborted",
            Self::Error => "internal error",
            Self::Full => "full",
            Self::Exists => "already exists",
            Self::Invalid => "invalid request",
            Self::NotFound => "not found",
            Self::NotAuthorized => "not authorized",
            Self::NoPermission => "no permission",
            Self::Unimplemented => "unimplemented",
            Self::TooManyRequests => "too many requests",
            Self::ResourceExhausted => "resource exhausted",
            Self::Busy => "busy",
            Self::FileRetry => "retry chunk",
            Self::FileEmpty => "empty file",
            Self::FileTooLarge => "file too large",
            Self::Custom(_) => "application status",
        }
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<u16> for Status {
    type Error = StatusError;

    fn try_from(code: u16) -> Result<Self, StatusError> {
        Self::from_code(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}
