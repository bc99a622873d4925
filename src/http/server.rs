//! Standalone admission service.
//!
//! Exposes the controller to reverse proxies as a forward-auth endpoint
//! (nginx `auth_request`, Traefik `ForwardAuth`): the proxy asks
//! `/v1/admission/{policy}` before forwarding each request and relays the
//! quota headers.

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::middleware::{forwarded_for, peer_addr};
use super::response::{apply_quota_headers, rejection};
use crate::admission::{AdmissionController, RequestContext};
use crate::error::{Result, TurnstileError};

/// Header a trusted proxy uses to pass the subject it authenticated.
pub const X_AUTHENTICATED_SUBJECT: &str = "x-authenticated-subject";

/// HTTP server for the admission service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission controller instance
    controller: Arc<AdmissionController>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, controller: Arc<AdmissionController>) -> Self {
        Self { addr, controller }
    }

    /// Build the service router.
    pub fn router(controller: Arc<AdmissionController>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/v1/admission/{policy}", any(admit))
            .with_state(controller)
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        Self::serve_listener(listener, self.controller, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub(crate) async fn serve_listener<F>(
        listener: tokio::net::TcpListener,
        controller: Arc<AdmissionController>,
        signal: F,
    ) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting admission HTTP server");

        let app = Self::router(controller);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Server(e.to_string())
        })
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Forward-auth check for one proxied request.
///
/// The subject header is only honoured when the peer is a trusted proxy.
#[instrument(skip_all, fields(policy = %policy))]
async fn admit(
    State(controller): State<Arc<AdmissionController>>,
    Path(policy): Path<String>,
    request: Request,
) -> Response {
    let peer = peer_addr(&request).map(|addr| addr.ip());
    let from_proxy = peer.is_some_and(|ip| controller.resolver().is_trusted_proxy(&ip));

    let ctx = RequestContext {
        peer_addr: peer,
        forwarded_for: forwarded_for(request.headers()),
        subject: if from_proxy {
            request
                .headers()
                .get(X_AUTHENTICATED_SUBJECT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        } else {
            None
        },
    };

    let verdict = controller.evaluate(&ctx, &policy).await;

    if let Some(response) = rejection(&verdict, controller.now()) {
        info!(policy = %verdict.policy(), "Request rejected");
        return response;
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(decision) = verdict.decision() {
        apply_quota_headers(response.headers_mut(), decision);
    }
    response
}
