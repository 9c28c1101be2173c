//! Shared error type across partwire crates.

use thiserror::Error;

use crate::schema::SchemaId;

/// Stable error codes (safe to log, compare, or ship to a peer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Bytes could not be turned into a message.
    DecodeFailed,
    /// A message could not be turned into bytes.
    EncodeFailed,
    /// A copy-on-write clone could not be built.
    CopyFailed,
    /// A peer or store could not supply a schema.
    SchemaUnavailable,
    /// Caller used an accessor or value the schema does not allow.
    SchemaViolation,
    /// Schema definition rejected at construction.
    InvalidSchema,
    /// Configuration could not be loaded or failed validation.
    BadConfig,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and peer responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::DecodeFailed => "DECODE_FAILED",
            ErrorCode::EncodeFailed => "ENCODE_FAILED",
            ErrorCode::CopyFailed => "COPY_FAILED",
            ErrorCode::SchemaUnavailable => "SCHEMA_UNAVAILABLE",
            ErrorCode::SchemaViolation => "SCHEMA_VIOLATION",
            ErrorCode::InvalidSchema => "INVALID_SCHEMA",
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PartwireError>;

/// Unified error type used by core and comms.
#[derive(Debug, Error)]
pub enum PartwireError {
    #[error("decode failed: {reason}{}", fmt_schema(.schema_id))]
    DecodeFailed {
        reason: String,
        schema_id: Option<SchemaId>,
    },
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("copy failed: {0}")]
    CopyFailed(String),
    #[error("schema unavailable: {0:#018x}")]
    SchemaUnavailable(SchemaId),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("internal: {0}")]
    Internal(String),
}

fn fmt_schema(id: &Option<SchemaId>) -> String {
    match id {
        Some(id) => format!(" (schema {id:#018x})"),
        None => String::new(),
    }
}

impl PartwireError {
    /// Decode failure not tied to a particular schema (framing, lengths).
    pub fn decode(reason: impl Into<String>) -> Self {
        PartwireError::DecodeFailed {
            reason: reason.into(),
            schema_id: None,
        }
    }

    /// Decode failure attributed to the schema that governed the bytes.
    pub fn decode_in(schema_id: SchemaId, reason: impl Into<String>) -> Self {
        PartwireError::DecodeFailed {
            reason: reason.into(),
            schema_id: Some(schema_id),
        }
    }

    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PartwireError::DecodeFailed { .. } => ErrorCode::DecodeFailed,
            PartwireError::EncodeFailed(_) => ErrorCode::EncodeFailed,
            PartwireError::CopyFailed(_) => ErrorCode::CopyFailed,
            PartwireError::SchemaUnavailable(_) => ErrorCode::SchemaUnavailable,
            PartwireError::SchemaViolation(_) => ErrorCode::SchemaViolation,
            PartwireError::InvalidSchema(_) => ErrorCode::InvalidSchema,
            PartwireError::BadConfig(_) => ErrorCode::BadConfig,
            PartwireError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Schema id carried by the error, if any.
    pub fn schema_id(&self) -> Option<SchemaId> {
        match self {
            PartwireError::DecodeFailed { schema_id, .. } => *schema_id,
            PartwireError::SchemaUnavailable(id) => Some(*id),
            _ => None,
        }
    }

    /// Re-tag a decode-side failure as `DecodeFailed`, keeping any schema id.
    ///
    /// `SchemaUnavailable` from a peer or store surfaces to decode callers this way.
    pub fn into_decode_failure(self) -> Self {
        match self {
            e @ PartwireError::DecodeFailed { .. } => e,
            PartwireError::SchemaUnavailable(id) => {
                PartwireError::decode_in(id, "schema unavailable from peer")
            }
            other => PartwireError::decode(other.to_string()),
        }
    }

    /// Encode-side failures are reported as `CopyFailed` by copy operations.
    pub fn into_copy_failure(self) -> Self {
        match self {
            e @ PartwireError::CopyFailed(_) => e,
            other => PartwireError::CopyFailed(other.to_string()),
        }
    }
}
