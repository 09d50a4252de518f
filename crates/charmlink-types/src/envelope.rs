use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON object carried over the transport, before hex encoding.
///
/// `amount` and `timestamp` are kept as raw JSON values because peers send
/// them either as numbers or as numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub application: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub username: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filedata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl Envelope {
    pub fn new(application: &str, kind: EnvelopeType, username: &str, message: String) -> Self {
        Self {
            application: application.to_string(),
            kind: kind.as_str().to_string(),
            username: username.to_string(),
            message,
            filedata: None,
            amount: None,
            timestamp: None,
        }
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(Value::from(amount));
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(Value::from(timestamp));
        self
    }

    /// The dispatch-table key, or `None` for types this side does not know.
    pub fn envelope_type(&self) -> Option<EnvelopeType> {
        EnvelopeType::parse(&self.kind)
    }
}

/// Envelope `type` values understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    Text,
    Charm,
    Token,
    Ping,
    Pong,
    Read,
    DeliveryReceipt,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Charm => "charm",
            Self::Token => "token",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Read => "read",
            Self::DeliveryReceipt => "delivery_receipt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "charm" => Some(Self::Charm),
            "token" => Some(Self::Token),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "read" => Some(Self::Read),
            "delivery_receipt" => Some(Self::DeliveryReceipt),
            _ => None,
        }
    }
}
