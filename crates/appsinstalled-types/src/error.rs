//! Error types for appsinstalled-types crate.

use std::num::ParseFloatError;
use thiserror::Error;

/// Reasons a log line cannot be turned into an [`AppsInstalled`](crate::AppsInstalled).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed line: expected 5 tab-separated fields, found {fields}")]
    MalformedLine { fields: usize },

    #[error("missing device type or device id")]
    MissingIdentity,

    #[error("invalid {axis} '{value}'")]
    BadCoordinate {
        axis: &'static str,
        value: String,
        /// `None` when the value parsed but is not finite (`inf`, `NaN`).
        #[source]
        source: Option<ParseFloatError>,
    },
}

/// Errors raised while encoding or decoding a `UserApps` payload.
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Protobuf encoding error: {0}")]
    Encode(String),

    #[error("Protobuf decoding error: {0}")]
    Decode(String),

    #[error("Unexpected field {field} with wire type {wire_type}")]
    UnexpectedField { field: u32, wire_type: u32 },
}

/// Result type alias for protobuf operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
