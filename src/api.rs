//! Read-only query API
//!
//! `GET /tx/{txHash}?domain=D&type=T` returns the message states recorded
//! for a source transaction, optionally filtered by source domain and
//! message type. The server shares the state store with the processing
//! pipeline and never mutates it.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::error::Result;
use crate::protocol::{Domain, MessageType};
use crate::state::{MessageState, StateStore};

#[derive(Clone)]
struct ApiContext {
    store: StateStore,
    trusted_proxies: Arc<Vec<IpAddr>>,
}

/// Serves the query API until shutdown
pub async fn serve(
    store: StateStore,
    config: ApiConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = config.listen_addr;
    let router = build_router(store, &config);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "query api listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await?;
    Ok(())
}

pub fn build_router(store: StateStore, config: &ApiConfig) -> Router {
    let context = ApiContext {
        store,
        trusted_proxies: Arc::new(
            config
                .trusted_proxies
                .iter()
                .filter_map(|proxy| proxy.parse().ok())
                .collect(),
        ),
    };
    Router::new()
        .route("/tx/{tx_hash}", get(get_tx_by_hash))
        .layer(middleware::from_fn_with_state(
            context.clone(),
            request_log,
        ))
        .with_state(context)
}

#[derive(Debug, Deserialize)]
struct TxQuery {
    domain: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn get_tx_by_hash(
    State(context): State<ApiContext>,
    Path(tx_hash): Path<String>,
    Query(query): Query<TxQuery>,
) -> Response {
    let domain = match query.domain.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u32>() {
            Ok(domain) => Some(Domain(domain)),
            Err(_) => return bad_request("unable to parse domain"),
        },
    };
    let kind = match query.kind.as_deref() {
        None | Some("") => None,
        Some("mint") => Some(MessageType::Mint),
        Some("forward") => Some(MessageType::Forward),
        Some(_) => return bad_request("unable to parse type"),
    };

    let Some(tx) = context.store.get(&tx_hash) else {
        return not_found();
    };

    let msgs: Vec<MessageState> = tx
        .msgs
        .into_iter()
        .filter(|msg| domain.is_none_or(|d| msg.source_domain == d))
        .filter(|msg| kind.is_none_or(|k| msg.kind == k))
        .collect();

    if msgs.is_empty() {
        return not_found();
    }
    (StatusCode::OK, Json(msgs)).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "message not found"})),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"message": message}))).into_response()
}

async fn request_log(
    State(context): State<ApiContext>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_ip(&context.trusted_proxies, peer, request.headers());

    let response = next.run(request).await;
    debug!(%client, %method, %path, status = %response.status(), "api request");
    response
}

/// X-Forwarded-For is only believed when the direct peer is a trusted proxy
fn client_ip(trusted: &[IpAddr], peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    let Some(peer) = peer else {
        return "unknown".to_owned();
    };
    if trusted.contains(&peer.ip()) {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(ip) = forwarded
                .split(',')
                .next()
                .and_then(|first| first.trim().parse::<IpAddr>().ok())
            {
                return ip.to_string();
            }
        }
    }
    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BurnMessage, Message};
    use crate::state::TxState;
    use alloy_primitives::{Bytes, FixedBytes, U256};
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn message_state(source: Domain, kind: MessageType) -> MessageState {
        let body = match kind {
            MessageType::Mint => BurnMessage {
                version: 0,
                burn_token: FixedBytes::ZERO,
                mint_recipient: FixedBytes::ZERO,
                amount: U256::from(1u64),
                message_sender: FixedBytes::ZERO,
            }
            .encode(),
            MessageType::Forward => Bytes::from(vec![1, 2, 3]),
        };
        let message = Message {
            version: 0,
            source_domain: source,
            destination_domain: Domain::NOBLE,
            nonce: 1,
            sender: FixedBytes::ZERO,
            recipient: FixedBytes::ZERO,
            destination_caller: FixedBytes::ZERO,
            body,
        };
        MessageState::from_raw("0xfeed", &message.encode()).unwrap()
    }

    fn router_with_tx() -> Router {
        let store = StateStore::new();
        store.load_or_insert(&TxState::new(
            "0xfeed",
            vec![
                message_state(Domain::ETHEREUM, MessageType::Mint),
                message_state(Domain::ETHEREUM, MessageType::Forward),
            ],
        ));
        build_router(store, &ApiConfig::default())
    }

    async fn status_of(router: Router, uri: &str) -> StatusCode {
        let response = router
            .oneshot(HttpRequest::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    async fn body_of(router: Router, uri: &str) -> serde_json::Value {
        let response = router
            .oneshot(HttpRequest::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_tx_found() {
        let body = body_of(router_with_tx(), "/tx/0xfeed").await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_tx_not_found() {
        assert_eq!(
            status_of(router_with_tx(), "/tx/0xmissing").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_domain_filter() {
        let body = body_of(router_with_tx(), "/tx/0xfeed?domain=0").await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        assert_eq!(
            status_of(router_with_tx(), "/tx/0xfeed?domain=7").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_domain_parse_error() {
        assert_eq!(
            status_of(router_with_tx(), "/tx/0xfeed?domain=abc").await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_type_filter() {
        let body = body_of(router_with_tx(), "/tx/0xfeed?type=mint").await;
        let msgs = body.as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "mint");

        let body = body_of(router_with_tx(), "/tx/0xfeed?type=forward").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let body = body_of(router_with_tx(), "/tx/0xother").await;
        assert_eq!(body, json!({"message": "message not found"}));
    }

    #[test]
    fn test_client_ip_from_trusted_proxy() {
        let trusted: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap()];
        let peer: SocketAddr = "10.0.0.1:9999".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        assert_eq!(client_ip(&trusted, Some(peer), &headers), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_ignores_untrusted_forwarding() {
        let peer: SocketAddr = "192.0.2.5:9999".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());

        assert_eq!(client_ip(&[], Some(peer), &headers), "192.0.2.5");
    }

    #[test]
    fn test_client_ip_unknown_peer() {
        assert_eq!(client_ip(&[], None, &HeaderMap::new()), "unknown");
    }
}
