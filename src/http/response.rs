//! Response header contract and rejection bodies.
//!
//! Every gated response carries:
//!
//! | Header                  | Value                                          |
//! |-------------------------|------------------------------------------------|
//! | `X-RateLimit-Limit`     | the tier's configured limit                    |
//! | `X-RateLimit-Remaining` | requests left in the current window            |
//! | `X-RateLimit-Reset`     | Unix epoch seconds when the oldest request expires |
//!
//! Throttled requests get `429 Too Many Requests`, a `Retry-After` header and
//! a JSON body `{"error": "..."}`. Callers a strict tier cannot identify get
//! `401 Unauthorized` with the same body shape.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionDecision, Verdict};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub const THROTTLED_MESSAGE: &str = "Too many requests. Please try again later.";
pub const UNIDENTIFIED_MESSAGE: &str = "Unable to identify caller";

/// JSON body of a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Write the quota headers for `decision` onto `headers`.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_epoch_secs()));
}

/// `429` response for a caller that exhausted its quota.
pub fn throttled(decision: &AdmissionDecision, now: DateTime<Utc>) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody::new(THROTTLED_MESSAGE)),
    )
        .into_response();

    let headers = response.headers_mut();
    apply_quota_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs(now)));
    response
}

/// `401` response for a caller a strict tier could not identify.
pub fn unidentified(limit: u32) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody::new(UNIDENTIFIED_MESSAGE)),
    )
        .into_response();
    response
        .headers_mut()
        .insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    response
}

/// The rejection for `verdict`, or `None` if the request may proceed.
pub fn rejection(verdict: &Verdict, now: DateTime<Utc>) -> Option<Response> {
    match verdict {
        Verdict::Admitted(_) => None,
        Verdict::Throttled(decision) => Some(throttled(decision, now)),
        Verdict::Unidentified { limit, .. } => Some(unidentified(*limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::PolicyKey;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()
    }

    fn decision(allowed: bool, remaining: u32) -> AdmissionDecision {
        AdmissionDecision {
            allowed,
            remaining,
            reset_at: now() + Duration::seconds(50),
            limit: 5,
            policy: PolicyKey::Auth,
        }
    }

    #[test]
    fn test_quota_headers() {
        let mut headers = HeaderMap::new();
        apply_quota_headers(&mut headers, &decision(true, 3));

        assert_eq!(headers[&X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "3");
        assert_eq!(
            headers[&X_RATELIMIT_RESET],
            (now().timestamp() + 50).to_string().as_str()
        );
    }

    #[tokio::test]
    async fn test_throttled_response() {
        let response = throttled(&decision(false, 0), now());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(response.headers()[RETRY_AFTER], "50");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, ErrorBody::new(THROTTLED_MESSAGE));
    }

    #[test]
    fn test_rejection_mapping() {
        assert!(rejection(&Verdict::Admitted(decision(true, 4)), now()).is_none());

        let response = rejection(
            &Verdict::Unidentified {
                policy: PolicyKey::Email,
                limit: 5,
            },
            now(),
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[&X_RATELIMIT_LIMIT], "5");
        assert!(response.headers().get(&X_RATELIMIT_REMAINING).is_none());
    }
}
