//! JSON-RPC 2.0 ledger backend.
//!
//! Methods (all take a single object parameter):
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `anchor_submit` | `{contract, from, receiver, contentHash, blobRef}` | `{txHash, sequence, timestamp}` |
//! | `anchor_getLogs` | `{contract, fromSequence, participant?, sinceTimestamp?}` | `[RawAnchorLog]` |
//! | `anchor_getMessages` | `{contract, a, b}` | `[RawMessageRecord]` |
//! | `registry_getPublicKey` | `{contract, address}` | `"0x.." (32 bytes, zero = none)` |
//!
//! The live stream is a polling cursor over `anchor_getLogs`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use anchor_relay_core::{Address, AnchorEvent, MessageRecord, RegisteredKey};

use crate::decode::{decode_anchor_logs, decode_message_record, parse_uint, RawAnchorLog, RawMessageRecord};
use crate::error::{LedgerError, Result};
use crate::traits::{AnchorRequest, EventSource, EventStream, IdentityRegistry, LedgerClient, LogFilter, TxReceipt};

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Build a request body.
fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": [params],
    })
}

/// Extract the typed `result` from a response body.
fn parse_response<T: DeserializeOwned>(body: Value) -> Result<T> {
    let response: RpcResponse =
        serde_json::from_value(body).map_err(|e| LedgerError::Decode(format!("rpc envelope: {}", e)))?;

    if let Some(err) = response.error {
        return Err(LedgerError::Rpc {
            code: err.code,
            message: err.message,
        });
    }

    let result = response.result.unwrap_or(Value::Null);
    serde_json::from_value(result).map_err(|e| LedgerError::Decode(format!("rpc result: {}", e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTxReceipt {
    #[serde(alias = "transactionHash")]
    tx_hash: String,
    sequence: Value,
    timestamp: Value,
    #[serde(default)]
    status: Option<Value>,
}

fn decode_tx_receipt(raw: RawTxReceipt) -> Result<TxReceipt> {
    // Receipts with an explicit failed status (0 / "0x0") are reverts.
    if let Some(status) = &raw.status {
        if parse_uint("status", status)? == 0 {
            return Err(LedgerError::Rejected(format!("transaction {} reverted", raw.tx_hash)));
        }
    }

    Ok(TxReceipt {
        sequence: parse_uint("sequence", &raw.sequence)?,
        timestamp: parse_uint("timestamp", &raw.timestamp)?,
        tx_ref: raw.tx_hash,
    })
}

/// Ledger client speaking JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct RpcLedgerClient {
    endpoint: Url,
    contract: Address,
    client: Client,
    timeout: Duration,
    poll_interval: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcLedgerClient {
    /// Create a client for `endpoint` bound to the anchoring contract.
    ///
    /// Every call is bounded by `timeout`.
    pub fn new(endpoint: &Url, contract: Address, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.clone(),
            contract,
            client,
            timeout,
            poll_interval: Duration::from_secs(2),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Interval between polls of the live stream.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = request_body(id, method, params);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rpc {
                code: i64::from(status.as_u16()),
                message: text,
            });
        }

        let body: Value = response.json().await.map_err(|e| self.map_send_error(e))?;
        parse_response(body)
    }

    fn map_send_error(&self, e: reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout(self.timeout)
        } else if e.is_decode() {
            LedgerError::Decode(e.to_string())
        } else {
            LedgerError::Reqwest(e)
        }
    }

    fn logs_params(&self, filter: &LogFilter) -> Value {
        json!({
            "contract": self.contract,
            "fromSequence": filter.from_sequence,
            "participant": filter.participant,
            "sinceTimestamp": filter.since_timestamp,
        })
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn submit_anchor(&self, sender: Address, request: &AnchorRequest) -> Result<TxReceipt> {
        let raw: RawTxReceipt = self
            .call(
                "anchor_submit",
                json!({
                    "contract": self.contract,
                    "from": sender,
                    "receiver": request.receiver,
                    "contentHash": request.content_hash,
                    "blobRef": request.blob_ref,
                }),
            )
            .await?;
        decode_tx_receipt(raw)
    }

    async fn anchor_events(&self, filter: &LogFilter) -> Result<Vec<AnchorEvent>> {
        let raw: Vec<RawAnchorLog> = self.call("anchor_getLogs", self.logs_params(filter)).await?;
        let mut events: Vec<AnchorEvent> = decode_anchor_logs(&raw)
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn message_records(&self, a: &Address, b: &Address) -> Result<Vec<MessageRecord>> {
        let raw: Vec<RawMessageRecord> = self
            .call("anchor_getMessages", json!({ "contract": self.contract, "a": a, "b": b }))
            .await?;
        raw.iter().map(decode_message_record).collect()
    }
}

#[async_trait]
impl IdentityRegistry for RpcLedgerClient {
    async fn get_public_key(&self, address: &Address) -> Result<Option<RegisteredKey>> {
        let raw: Option<String> = self
            .call("registry_getPublicKey", json!({ "contract": self.contract, "address": address }))
            .await?;

        match raw.as_deref() {
            None | Some("") | Some("0x") => Ok(None),
            Some(hex) => Ok(RegisteredKey::from_hex(hex)?.non_empty()),
        }
    }
}

#[async_trait]
impl EventSource for RpcLedgerClient {
    async fn connect(&self, filter: LogFilter) -> Result<Box<dyn EventStream>> {
        // The first poll doubles as the handshake: an unreachable node fails here.
        let backlog = self
            .anchor_events(&filter)
            .await
            .map_err(|e| match e {
                LedgerError::Timeout(d) => LedgerError::Timeout(d),
                other => LedgerError::ConnectFailed(other.to_string()),
            })?;

        let mut stream = PollingEventStream {
            client: self.clone(),
            filter,
            buffer: VecDeque::new(),
        };
        stream.absorb(backlog);
        Ok(Box::new(stream))
    }
}

/// Polling cursor over `anchor_getLogs`.
struct PollingEventStream {
    client: RpcLedgerClient,
    filter: LogFilter,
    buffer: VecDeque<AnchorEvent>,
}

impl PollingEventStream {
    fn absorb(&mut self, events: Vec<AnchorEvent>) {
        for event in events {
            if event.sequence >= self.filter.from_sequence {
                self.filter.from_sequence = event.sequence + 1;
                self.buffer.push_back(event);
            }
        }
    }
}

#[async_trait]
impl EventStream for PollingEventStream {
    async fn next_event(&mut self) -> Result<Option<AnchorEvent>> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }

            tokio::time::sleep(self.client.poll_interval).await;
            let events = self
                .client
                .anchor_events(&self.filter)
                .await
                .map_err(|e| LedgerError::StreamDropped(e.to_string()))?;
            self.absorb(events);
        }
    }
}
