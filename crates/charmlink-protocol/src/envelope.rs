use charmlink_types::envelope::Envelope;

use crate::codec;
use crate::error::DecodeError;

pub const WIRE_PREFIX: &str = "0x";

/// Serialize an envelope into its transport form: `0x` + hex(JSON).
pub fn to_wire(envelope: &Envelope) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(envelope)?;
    Ok(format!("{}{}", WIRE_PREFIX, codec::encode(&json)))
}

/// Parse a raw transport payload. The `0x` prefix is optional.
pub fn from_wire(raw: &str) -> Result<Envelope, DecodeError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix(WIRE_PREFIX)
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let json = codec::decode(body)?;
    Ok(serde_json::from_str(&json)?)
}
