use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use charmlink_engine::LedgerError;
use charmlink_engine::collaborators::{Confirmation, Ledger, Submission};
use charmlink_types::models::{Contact, TransferKind, TransferMetadata};

/// Ledger collaborator speaking JSON over HTTP to the wallet daemon.
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    kind: TransferKind,
    address: &'a str,
    amount: i64,
    metadata: &'a TransferMetadata,
}

#[derive(Deserialize)]
struct TransferResponse {
    #[serde(default)]
    ledger_op_id: Option<String>,
    #[serde(default)]
    approval_queue_id: Option<String>,
    #[serde(default)]
    deferred: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum OperationStatus {
    Confirmed,
    Rejected,
    Pending,
}

#[derive(Deserialize)]
struct OperationResponse {
    status: OperationStatus,
}

impl HttpLedger {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(map_reqwest)?;
        read_json(resp).await
    }
}

fn map_reqwest(e: reqwest::Error) -> LedgerError {
    if e.is_connect() || e.is_timeout() {
        LedgerError::Unreachable(e.to_string())
    } else {
        LedgerError::Http(e.to_string())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, LedgerError> {
    let status = resp.status();
    if status.is_client_error() {
        let body = resp.text().await.unwrap_or_default();
        return Err(LedgerError::Rejected(format!("{}: {}", status, body)));
    }
    if !status.is_success() {
        return Err(LedgerError::Http(format!("unexpected status {}", status)));
    }
    resp.json().await.map_err(|e| LedgerError::Http(e.to_string()))
}

#[async_trait::async_trait]
impl Ledger for HttpLedger {
    async fn submit_transfer(
        &self,
        kind: TransferKind,
        address: &str,
        amount: i64,
        metadata: &TransferMetadata,
    ) -> Result<Submission, LedgerError> {
        let resp = self
            .client
            .post(format!("{}/transfers", self.base_url))
            .json(&TransferRequest {
                kind,
                address,
                amount,
                metadata,
            })
            .send()
            .await
            .map_err(map_reqwest)?;

        let body: TransferResponse = read_json(resp).await?;
        Ok(Submission {
            ledger_op_id: body.ledger_op_id,
            approval_queue_id: body.approval_queue_id,
            deferred: body.deferred,
        })
    }

    async fn confirmation_status(&self, ledger_op_id: &str) -> Result<Confirmation, LedgerError> {
        let body: OperationResponse = self
            .get_json(&format!("/operations/{}", urlencoding::encode(ledger_op_id)))
            .await?;
        Ok(match body.status {
            OperationStatus::Confirmed => Confirmation::Confirmed,
            OperationStatus::Rejected => Confirmation::Rejected,
            OperationStatus::Pending => Confirmation::Pending,
        })
    }

    async fn list_approval_queue(&self) -> Result<HashSet<String>, LedgerError> {
        let ids: Vec<String> = self.get_json("/approval-queue").await?;
        Ok(ids.into_iter().collect())
    }

    async fn get_contacts(&self) -> Result<Vec<Contact>, LedgerError> {
        self.get_json("/contacts").await
    }
}
