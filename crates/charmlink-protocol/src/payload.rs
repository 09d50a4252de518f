use serde_json::Value;
use tracing::warn;

/// Escape text the way peers expect it inside the `message` field.
pub fn escape_text(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

/// Undo [`escape_text`]. Malformed escapes are passed through verbatim.
pub fn unescape_text(escaped: &str) -> String {
    match urlencoding::decode(escaped) {
        Ok(text) => text.into_owned(),
        Err(e) => {
            warn!("Malformed escaped text, keeping raw payload: {}", e);
            escaped.to_string()
        }
    }
}

/// Read an integer that a peer may have sent as a number or as a string.
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Amount carried by an inbound envelope. Missing or unparseable amounts
/// are 0.
pub fn parse_amount(value: Option<&Value>) -> i64 {
    match value {
        None => 0,
        Some(v) => parse_int(v).unwrap_or_else(|| {
            warn!("Unparseable amount {}, storing 0", v);
            0
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escape_roundtrip() {
        let text = "hello world & friends? 100% ✨";
        let escaped = escape_text(text);
        assert!(!escaped.contains(' '));
        assert_eq!(unescape_text(&escaped), text);
    }

    #[test]
    fn bad_escape_passes_through() {
        // %FF alone is not valid UTF-8
        assert_eq!(unescape_text("%FF"), "%FF");
    }

    #[test]
    fn amounts() {
        assert_eq!(parse_amount(Some(&json!(20))), 20);
        assert_eq!(parse_amount(Some(&json!("35"))), 35);
        assert_eq!(parse_amount(Some(&json!(" 7 "))), 7);
        assert_eq!(parse_amount(Some(&json!("lots"))), 0);
        assert_eq!(parse_amount(Some(&json!(null))), 0);
        assert_eq!(parse_amount(None), 0);
    }
}
