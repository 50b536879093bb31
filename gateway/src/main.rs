use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::get};
use clap::Parser;
use search_cluster::coordination::remote::RemoteConnector;
use search_cluster::coordination::store::{Connector, MembershipStore};
use search_cluster::coordination::types::CoordinationError;
use search_cluster::leader::protocol::{ENDPOINT_DOWNLOAD, ENDPOINT_START};
use search_cluster::node::types::{ClusterStatus, ENDPOINT_CLUSTER_STATUS, LEADER_INFO_PATH};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[cfg(test)]
mod tests;

#[derive(Debug, Parser)]
#[command(name = "search-gateway", version, about = "Forwards client requests to the cluster leader")]
struct GatewayArgs {
    #[arg(long, env = "GATEWAY_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Base URL of the coordination server.
    #[arg(long, env = "SEARCH_COORDINATION")]
    coordination: String,

    #[arg(long, env = "SEARCH_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    request_timeout_ms: u64,
}

#[derive(Clone)]
struct AppState {
    connector: Arc<dyn Connector>,
    session: Arc<Mutex<Option<Arc<dyn MembershipStore>>>>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
}

#[derive(Deserialize)]
struct DownloadParams {
    path: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProxyResponse {
    status: u16,
    leader: String,
    body: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GatewayStatus {
    leader: String,
    workers: Vec<String>,
}

type ProxyError = (StatusCode, String);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = GatewayArgs::parse();
    let timeout = Duration::from_millis(args.request_timeout_ms);

    let state = AppState {
        connector: Arc::new(RemoteConnector::new(
            args.coordination.trim_end_matches('/'),
            timeout,
        )),
        session: Arc::new(Mutex::new(None)),
        client: reqwest::Client::builder().timeout(timeout).build()?,
    };

    tracing::info!("Gateway listening on {}", args.bind);
    axum::serve(tokio::net::TcpListener::bind(args.bind).await?, app(state)).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/search", get(api_search))
        .route("/download", get(api_download))
        .route("/api/status", get(api_status))
        .with_state(state)
}

async fn api_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ProxyResponse>, ProxyError> {
    let leader = resolve_leader(&state).await?;
    let resp = state
        .client
        .post(format!("{}{}", leader, ENDPOINT_START))
        .body(params.query)
        .send()
        .await
        .map_err(|e| unreachable_leader(&leader, e))?;

    let status = resp.status().as_u16();
    let body = resp
        .json::<serde_json::Value>()
        .await
        .unwrap_or_else(|_| serde_json::json!({"error": "invalid json"}));

    Ok(Json(ProxyResponse { status, leader, body }))
}

async fn api_download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ProxyError> {
    let leader = resolve_leader(&state).await?;
    let resp = state
        .client
        .get(format!("{}{}", leader, ENDPOINT_DOWNLOAD))
        .query(&[("path", params.path.as_str())])
        .send()
        .await
        .map_err(|e| unreachable_leader(&leader, e))?;

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
    let disposition = resp.headers().get(reqwest::header::CONTENT_DISPOSITION).cloned();
    let bytes = resp.bytes().await.map_err(|e| unreachable_leader(&leader, e))?;

    let mut response = (status, Body::from(bytes)).into_response();
    if let Some(value) = content_type
        && let Ok(value) = header::HeaderValue::from_bytes(value.as_bytes())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Some(value) = disposition
        && let Ok(value) = header::HeaderValue::from_bytes(value.as_bytes())
    {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn api_status(State(state): State<AppState>) -> Result<Json<GatewayStatus>, ProxyError> {
    let leader = resolve_leader(&state).await?;
    let status: ClusterStatus = state
        .client
        .get(format!("{}{}", leader, ENDPOINT_CLUSTER_STATUS))
        .send()
        .await
        .map_err(|e| unreachable_leader(&leader, e))?
        .json()
        .await
        .map_err(|e| unreachable_leader(&leader, e))?;

    Ok(Json(GatewayStatus {
        leader,
        workers: status.workers.unwrap_or_default(),
    }))
}

/// Reads the leader's address from the coordination service, reconnecting
/// when the previous session is gone.
async fn resolve_leader(state: &AppState) -> Result<String, ProxyError> {
    let mut guard = state.session.lock().await;

    let live = guard.as_ref().filter(|session| !session.is_closed()).cloned();
    let session = match live {
        Some(session) => session,
        None => {
            let session = state.connector.connect().await.map_err(|e| {
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Coordination service unavailable: {}", e),
                )
            })?;
            *guard = Some(session.clone());
            session
        }
    };

    match session.get_data(LEADER_INFO_PATH).await {
        Ok(data) => String::from_utf8(data)
            .map(|address| address.trim_end_matches('/').to_string())
            .map_err(|_| {
                (
                    StatusCode::BAD_GATEWAY,
                    "Published leader address is not valid UTF-8".to_string(),
                )
            }),
        Err(CoordinationError::NoNode(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "No leader has been elected yet".to_string(),
        )),
        Err(e) => {
            *guard = None;
            Err((
                StatusCode::BAD_GATEWAY,
                format!("Coordination service unavailable: {}", e),
            ))
        }
    }
}

fn unreachable_leader(leader: &str, e: reqwest::Error) -> ProxyError {
    tracing::warn!("Leader {} unreachable: {}", leader, e);
    (
        StatusCode::BAD_GATEWAY,
        format!("Leader {} unreachable: {}", leader, e),
    )
}
