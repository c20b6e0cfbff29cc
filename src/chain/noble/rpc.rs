//! CometBFT RPC and LCD REST client for Noble
//!
//! The relayer only needs a handful of queries, so they are issued as plain
//! HTTP requests with serde response types rather than through a full Cosmos
//! client stack.

use reqwest::Client;
use serde::{Deserialize, Deserializer};

use crate::error::{RelayerError, Result};

#[derive(Debug, Clone)]
pub struct NobleRpc {
    rpc_url: String,
    api_url: String,
    client: Client,
}

/// CometBFT wraps every RPC response in a JSON-RPC envelope
#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    #[serde(deserialize_with = "u64_from_string")]
    latest_block_height: u64,
}

#[derive(Debug, Deserialize)]
struct TxSearchResult {
    #[serde(default)]
    txs: Vec<TxResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxResult {
    pub hash: String,
    pub tx_result: TxResultData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxResultData {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub events: Vec<TxEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<TxEventAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxEventAttribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastTxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

impl NobleRpc {
    pub fn new(rpc_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        let rpc_url: String = rpc_url.into();
        let api_url: String = api_url.into();
        Self {
            rpc_url: rpc_url.trim_end_matches('/').to_owned(),
            api_url: api_url.trim_end_matches('/').to_owned(),
            client: Client::new(),
        }
    }

    /// Current chain height
    pub async fn latest_height(&self) -> Result<u64> {
        let envelope: RpcEnvelope<StatusResult> = self
            .client
            .get(format!("{}/status", self.rpc_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.result.sync_info.latest_block_height)
    }

    /// All transactions included at a height, with their hashes and events
    pub async fn block_txs(&self, height: u64) -> Result<Vec<TxResult>> {
        const PER_PAGE: usize = 100;

        let query = format!("\"tx.height={height}\"");
        let mut txs = Vec::new();
        let mut page = 1u32;
        loop {
            let page_param = page.to_string();
            let envelope: RpcEnvelope<TxSearchResult> = self
                .client
                .get(format!("{}/tx_search", self.rpc_url))
                .query(&[
                    ("query", query.as_str()),
                    ("per_page", "100"),
                    ("page", page_param.as_str()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let batch = envelope.result.txs;
            let full_page = batch.len() == PER_PAGE;
            txs.extend(batch);
            if !full_page {
                break;
            }
            page += 1;
        }
        Ok(txs)
    }

    /// Submits a signed transaction, returning the CheckTx result
    pub async fn broadcast_tx_sync(&self, tx_bytes: &[u8]) -> Result<BroadcastTxResult> {
        let tx = format!("0x{}", alloy_primitives::hex::encode(tx_bytes));
        let envelope: RpcEnvelope<BroadcastTxResult> = self
            .client
            .get(format!("{}/broadcast_tx_sync", self.rpc_url))
            .query(&[("tx", tx.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.result)
    }

    /// Account number and sequence for a bech32 address
    pub async fn account(&self, address: &str) -> Result<AccountInfo> {
        let value: serde_json::Value = self
            .client
            .get(format!(
                "{}/cosmos/auth/v1beta1/accounts/{address}",
                self.api_url
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let account = value
            .get("account")
            .ok_or_else(|| RelayerError::Provider("account response missing account".into()))?;
        // vesting and module accounts nest the numbers under base_account
        let base = account.get("base_account").unwrap_or(account);

        Ok(AccountInfo {
            account_number: string_number(base, "account_number")?,
            sequence: string_number(base, "sequence")?,
        })
    }

    /// Spendable balance of `address` in `denom`
    pub async fn balance(&self, address: &str, denom: &str) -> Result<u128> {
        let value: serde_json::Value = self
            .client
            .get(format!(
                "{}/cosmos/bank/v1beta1/balances/{address}/by_denom",
                self.api_url
            ))
            .query(&[("denom", denom)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        value
            .pointer("/balance/amount")
            .and_then(|amount| amount.as_str())
            .and_then(|amount| amount.parse().ok())
            .ok_or_else(|| RelayerError::Provider("malformed balance response".into()))
    }
}

fn string_number(value: &serde_json::Value, field: &str) -> Result<u64> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| RelayerError::Provider(format!("account response missing {field}")))
}

/// Cosmos encodes 64-bit numbers as JSON strings
fn u64_from_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
