//! In-process admission gate for axum routers.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{routing::post, Router};
//! use turnstile::admission::{AdmissionController, PolicyKey, PolicyTable};
//! use turnstile::http::middleware::guard;
//!
//! let controller = Arc::new(AdmissionController::new(PolicyTable::builtin()));
//! let payments: Router = guard(
//!     Router::new().route("/api/payments", post(|| async { "created" })),
//!     controller,
//!     PolicyKey::PaymentCreate,
//! );
//! ```

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::instrument;

use super::response::{apply_quota_headers, rejection};
use crate::admission::{AdmissionController, PolicyKey, RequestContext};

/// Subject established by an authentication layer that runs before the gate.
///
/// Insert it as a request extension; the gate then limits by subject rather
/// than by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

/// Middleware state: the shared controller and the tier for the routes it guards.
#[derive(Clone)]
pub struct Gate {
    controller: Arc<AdmissionController>,
    policy: PolicyKey,
}

impl Gate {
    pub fn new(controller: Arc<AdmissionController>, policy: PolicyKey) -> Self {
        Self { controller, policy }
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`.
pub(crate) fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Every `X-Forwarded-For` line, joined in arrival order.
pub(crate) fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if hops.is_empty() {
        None
    } else {
        Some(hops.join(", "))
    }
}

/// Build the admission context for an in-process request.
pub fn request_context(request: &Request) -> RequestContext {
    RequestContext {
        peer_addr: peer_addr(request).map(|addr| addr.ip()),
        forwarded_for: forwarded_for(request.headers()),
        subject: request
            .extensions()
            .get::<AuthenticatedSubject>()
            .map(|AuthenticatedSubject(subject)| subject.clone()),
    }
}

/// Admit or reject `request` before it reaches the route handler.
///
/// Rejections short-circuit with 429/401. Admitted responses get the
/// quota headers appended.
#[instrument(skip_all, fields(policy = %gate.policy, path = %request.uri().path()))]
pub async fn admission_gate(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    let ctx = request_context(&request);
    let verdict = gate.controller.evaluate_policy(&ctx, gate.policy).await;

    if let Some(response) = rejection(&verdict, gate.controller.now()) {
        return response;
    }

    let mut response = next.run(request).await;
    if let Some(decision) = verdict.decision() {
        apply_quota_headers(response.headers_mut(), decision);
    }
    response
}

/// Guard every route of `router` with the tier `policy`.
pub fn guard<S>(router: Router<S>, controller: Arc<AdmissionController>, policy: PolicyKey) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(
        Gate::new(controller, policy),
        admission_gate,
    ))
}
