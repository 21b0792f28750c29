//! Installed-apps record and its line parser.

use crate::error::ParseError;
use crate::proto::UserApps;

/// One device's installed applications, as read from a single log line.
///
/// Only [`parse_line`] constructs this type, so both identity fields are
/// non-empty and the coordinates are finite.
#[derive(Debug, Clone, PartialEq)]
pub struct AppsInstalled {
    pub dev_type: String,
    pub dev_id: String,
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}

impl AppsInstalled {
    /// Cache key for this record: `<dev_type>:<dev_id>`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.dev_type, self.dev_id)
    }

    /// The payload stored under [`key`](Self::key).
    pub fn user_apps(&self) -> UserApps {
        UserApps {
            lat: self.lat,
            lon: self.lon,
            apps: self.apps.clone(),
        }
    }
}

/// Parse one line of the form
/// `dev_type \t dev_id \t lat \t lon \t app,app,...`.
///
/// App ids that are not non-negative integers are skipped, so a line whose
/// app list is empty or entirely garbage still yields a record.
pub fn parse_line(line: &str) -> Result<AppsInstalled, ParseError> {
    // Tabs are field separators, keep them so an empty trailing app list survives.
    let line = line.trim_matches(|c: char| c.is_whitespace() && c != '\t');

    let fields: Vec<&str> = line.split('\t').collect();
    let [dev_type, dev_id, lat, lon, raw_apps] = fields.as_slice() else {
        return Err(ParseError::MalformedLine {
            fields: fields.len(),
        });
    };

    let dev_type = dev_type.trim();
    let dev_id = dev_id.trim();
    if dev_type.is_empty() || dev_id.is_empty() {
        return Err(ParseError::MissingIdentity);
    }

    let lat = parse_coordinate("latitude", lat)?;
    let lon = parse_coordinate("longitude", lon)?;

    let apps = raw_apps
        .split(',')
        .filter_map(|token| token.trim().parse::<u32>().ok())
        .collect();

    Ok(AppsInstalled {
        dev_type: dev_type.to_string(),
        dev_id: dev_id.to_string(),
        lat,
        lon,
        apps,
    })
}

fn parse_coordinate(axis: &'static str, raw: &str) -> Result<f64, ParseError> {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Err(ParseError::BadCoordinate {
            axis,
            value: raw.to_string(),
            source: None,
        }),
        Err(e) => Err(ParseError::BadCoordinate {
            axis,
            value: raw.to_string(),
            source: Some(e),
        }),
    }
}
