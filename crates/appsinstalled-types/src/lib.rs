//! Installed-apps record types for memc-load.
//!
//! This crate provides the record parsed from one line of an installed-apps
//! log, and the `UserApps` protobuf payload that is stored in memcached.
//!
//! # Architecture
//!
//! ```text
//! "idfa\t<id>\t<lat>\t<lon>\t<app,app,...>"
//!     -> AppsInstalled (parse_line)
//!     -> UserApps      (AppsInstalled::user_apps)
//!     -> encoded bytes (encode_user_apps)
//! ```
//!
//! # Modules
//!
//! - [`record`] - `AppsInstalled` and the line parser
//! - [`proto`] - `UserApps` protobuf encoding and decoding
//! - [`error`] - Error types for parsing and encoding

pub mod error;
pub mod proto;
pub mod record;

pub use error::{ParseError, ProtoError};
pub use proto::{decode_user_apps, encode_user_apps, UserApps};
pub use record::{parse_line, AppsInstalled};
