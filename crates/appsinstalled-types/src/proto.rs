//! `UserApps` protobuf payload.
//!
//! Wire layout, compatible with the `appsinstalled.proto` message used by
//! the consumers of the cache:
//!
//! ```text
//! message UserApps {
//!     repeated uint32 apps = 1 [packed=true];
//!     optional double lat = 2;
//!     optional double lon = 3;
//! }
//! ```

use crate::error::{ProtoError, Result};
use protobuf::{CodedInputStream, CodedOutputStream};

const APPS_FIELD: u32 = 1;
const LAT_FIELD: u32 = 2;
const LON_FIELD: u32 = 3;

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LENGTH_DELIMITED: u32 = 2;

/// Payload stored in memcached for one device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserApps {
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}

/// Encode a `UserApps` message to protobuf binary format.
pub fn encode_user_apps(message: &UserApps) -> Result<Vec<u8>> {
    let packed = encode_packed_apps(&message.apps)?;

    let mut buffer = Vec::new();
    {
        let mut stream = CodedOutputStream::vec(&mut buffer);
        if !packed.is_empty() {
            stream
                .write_bytes(APPS_FIELD, &packed)
                .map_err(|e| ProtoError::Encode(e.to_string()))?;
        }
        stream
            .write_double(LAT_FIELD, message.lat)
            .map_err(|e| ProtoError::Encode(e.to_string()))?;
        stream
            .write_double(LON_FIELD, message.lon)
            .map_err(|e| ProtoError::Encode(e.to_string()))?;
        stream
            .flush()
            .map_err(|e| ProtoError::Encode(e.to_string()))?;
    }

    Ok(buffer)
}

/// Packed repeated field body: the varints back to back, no tags.
fn encode_packed_apps(apps: &[u32]) -> Result<Vec<u8>> {
    let mut packed = Vec::new();
    {
        let mut stream = CodedOutputStream::vec(&mut packed);
        for app in apps {
            stream
                .write_raw_varint32(*app)
                .map_err(|e| ProtoError::Encode(e.to_string()))?;
        }
        stream
            .flush()
            .map_err(|e| ProtoError::Encode(e.to_string()))?;
    }
    Ok(packed)
}

/// Decode a `UserApps` message from protobuf binary format.
///
/// Accepts both packed and unpacked encodings of `apps`.
pub fn decode_user_apps(data: &[u8]) -> Result<UserApps> {
    let mut message = UserApps::default();
    let mut stream = CodedInputStream::from_bytes(data);

    while !stream
        .eof()
        .map_err(|e| ProtoError::Decode(e.to_string()))?
    {
        let tag = stream
            .read_raw_varint32()
            .map_err(|e| ProtoError::Decode(e.to_string()))?;
        let field = tag >> 3;
        let wire_type = tag & 0x7;

        match (field, wire_type) {
            (APPS_FIELD, WIRE_LENGTH_DELIMITED) => {
                let packed = stream
                    .read_bytes()
                    .map_err(|e| ProtoError::Decode(e.to_string()))?;
                let mut apps = CodedInputStream::from_bytes(&packed);
                while !apps
                    .eof()
                    .map_err(|e| ProtoError::Decode(e.to_string()))?
                {
                    message.apps.push(
                        apps.read_raw_varint32()
                            .map_err(|e| ProtoError::Decode(e.to_string()))?,
                    );
                }
            }
            (APPS_FIELD, WIRE_VARINT) => {
                message.apps.push(
                    stream
                        .read_uint32()
                        .map_err(|e| ProtoError::Decode(e.to_string()))?,
                );
            }
            (LAT_FIELD, WIRE_FIXED64) => {
                message.lat = stream
                    .read_double()
                    .map_err(|e| ProtoError::Decode(e.to_string()))?;
            }
            (LON_FIELD, WIRE_FIXED64) => {
                message.lon = stream
                    .read_double()
                    .map_err(|e| ProtoError::Decode(e.to_string()))?;
            }
            _ => return Err(ProtoError::UnexpectedField { field, wire_type }),
        }
    }

    Ok(message)
}
