use serde::Serialize;

use charmlink_engine::TransportError;
use charmlink_engine::collaborators::Transport;

/// Hands encoded envelopes to the local transport daemon. Inbound traffic
/// comes back through `POST /transport/events`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    destination: &'a str,
    channel: &'a str,
    data: &'a str,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, wire: &str, destination: &str, channel: &str) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(format!("{}/send", self.base_url))
            .json(&SendRequest {
                destination,
                channel,
                data: wire,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    TransportError::Unreachable(e.to_string())
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            Err(TransportError::Rejected(format!("{}: {}", status, body)))
        } else {
            Err(TransportError::Http(format!("unexpected status {}", status)))
        }
    }
}
