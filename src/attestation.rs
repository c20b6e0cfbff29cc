//! Circle Iris attestation types and client
//!
//! The attestation service is polled with the message's lookup id (the
//! keccak-256 of its raw bytes). The client is stateless; retry cadence is
//! the processor's responsibility, so every failure mode — transport error,
//! 404, rate limit, undecodable body — collapses to `None`, which callers
//! treat as "still processing".

use alloy_primitives::{hex::FromHex, Bytes};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use tracing::{debug, instrument};

use crate::protocol::Domain;

/// Represents the status of an attestation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Complete,
    Pending,
    PendingConfirmations,
    Failed,
}

/// Response from the attestation service
///
/// **API quirk**: Iris sometimes returns the string `"PENDING"` for the
/// attestation field instead of `null` while the attestation is not ready.
/// The deserializer treats it as `None`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    pub status: AttestationStatus,
    #[serde(default, deserialize_with = "deserialize_optional_bytes_or_pending")]
    pub attestation: Option<Bytes>,
}

/// Handles the attestation field's possible shapes:
/// hex string (with or without `0x`) -> `Some(Bytes)`; `"PENDING"` in any
/// case, `null`, a missing field or an empty string -> `None`; invalid hex
/// is a decode error.
fn deserialize_optional_bytes_or_pending<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;

    match opt {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("pending") => Ok(None),
        Some(s) => {
            let bytes = Bytes::from_hex(s).map_err(serde::de::Error::custom)?;
            Ok(Some(bytes))
        }
    }
}

/// Attestation lookup, abstracted so tests can script responses
#[async_trait]
pub trait AttestationClient: Send + Sync {
    /// Fetches the attestation for a lookup id.
    ///
    /// Returns `None` on any transport or decode error; callers retry.
    async fn check_attestation(
        &self,
        lookup_id: &str,
        source_tx_hash: &str,
        source_domain: Domain,
        dest_domain: Domain,
    ) -> Option<AttestationResponse>;
}

/// Production client against Circle's Iris API
#[derive(Debug, Clone)]
pub struct IrisClient {
    base_url: String,
    client: Client,
}

impl IrisClient {
    /// Creates a client against the given base URL, e.g.
    /// `https://iris-api.circle.com/v1/attestations`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    /// Full lookup URL for a message; Iris expects the `0x` prefix.
    fn attestation_url(&self, lookup_id: &str) -> String {
        format!("{}/0x{}", self.base_url.trim_end_matches('/'), lookup_id)
    }
}

#[async_trait]
impl AttestationClient for IrisClient {
    #[instrument(skip(self))]
    async fn check_attestation(
        &self,
        lookup_id: &str,
        source_tx_hash: &str,
        source_domain: Domain,
        dest_domain: Domain,
    ) -> Option<AttestationResponse> {
        let url = self.attestation_url(lookup_id);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "attestation request failed");
                return None;
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("attestation not found yet");
                return None;
            }
            StatusCode::TOO_MANY_REQUESTS => {
                debug!("attestation service rate limited");
                return None;
            }
            status if !status.is_success() => {
                debug!(%status, "attestation service returned error status");
                return None;
            }
            _ => {}
        }

        match response.json::<AttestationResponse>().await {
            Ok(parsed) => {
                debug!(status = ?parsed.status, "attestation response parsed");
                Some(parsed)
            }
            Err(err) => {
                debug!(error = %err, "attestation response decode failed");
                None
            }
        }
    }
}
