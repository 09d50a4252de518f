use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageState};

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendCharmRequest {
    pub charm_id: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendTokenRequest {
    pub token: String,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub id: i64,
    pub state: MessageState,
    pub correlation_id: Option<i64>,
}

impl From<&Message> for SendResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            state: message.state,
            correlation_id: message.correlation_id,
        }
    }
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveRequest {
    pub archived: bool,
}

#[derive(Debug, Serialize)]
pub struct OpenResponse {
    /// `None` while no pong has been seen within the presence window.
    pub installed: Option<bool>,
}

// -- Transport bridge --

/// Raw event pushed by the transport daemon into the background worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportEventRequest {
    pub sender: String,
    pub channel: String,
    pub payload: String,
}
