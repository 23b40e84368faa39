//! Encoding of per-source cursor payloads into the opaque `cursor_data` text.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Decode a cursor blob. Absent or blank data yields the payload's default.
pub fn decode<T: DeserializeOwned + Default>(data: Option<&str>) -> Result<T> {
    match data.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => Ok(serde_json::from_str(text)?),
    }
}

pub fn encode<T: Serialize>(cursor: &T) -> Result<String> {
    Ok(serde_json::to_string(cursor)?)
}
