//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; upgrades are enabled on every connection so
//! the signer route can hand the socket to the tethered server.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::tethered::TetheredSignerServer;
use crate::types::{CustodyError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest accepted `POST /sessions` body
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub tethered: Arc<TetheredSignerServer>,
}

impl AppState {
    pub fn new(args: Args) -> Self {
        let tethered = Arc::new(TetheredSignerServer::new(args.tethered_config()));
        Self { args, tethered }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSessionRequest {
    pub_key_hex: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewSessionResponse {
    session_id: String,
}

/// Bind `args.listen` and serve until the task is dropped
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(
        "Custody gateway listening on {} (signer endpoint {})",
        local_addr, state.args.ws_path
    );

    let cleanup = state.tethered.spawn_cleanup_task();
    let _cleanup = AbortOnDrop(cleanup);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {} from {}", method, path, addr);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => health(&state),
        (&Method::POST, "/sessions") => match create_session(&state, req).await {
            Ok(response) => response,
            Err(e) => error_response(e),
        },
        (&Method::GET, p) if p == state.args.ws_path => state.tethered.handle_upgrade(req),
        _ => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": format!("no route for {} {}", method, path) }),
        ),
    };

    Ok(to_boxed(response))
}

async fn create_session(
    state: &AppState,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let body = http_body_util::Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| CustodyError::InvalidArgument(format!("unreadable body: {e}")))?
        .to_bytes();

    let request: NewSessionRequest = serde_json::from_slice(&body)
        .map_err(|e| CustodyError::InvalidArgument(format!("expected {{\"pubKeyHex\"}}: {e}")))?;
    let session_id = state.tethered.new_session(&request.pub_key_hex)?;

    Ok(json_response(StatusCode::OK, NewSessionResponse { session_id }))
}

fn health(state: &AppState) -> Response<Full<Bytes>> {
    let stats = state.tethered.stats();
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "ok",
            "liveSessions": stats.live_sessions,
            "pendingSessions": stats.pending_sessions,
        }),
    )
}

fn error_response(err: CustodyError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    json_response(status, serde_json::json!({ "error": message }))
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}
