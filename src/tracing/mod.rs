use std::cell::RefCell;
use std::fmt;
use std::future::Future;

use http::Request;
use tower_http::classify::{SharedClassifier, StatusInRangeAsFailures};
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

/// Identifier attached to every request, echoed in logs, error bodies, and
/// the `x-request-id` response header.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

tokio::task_local! {
    static ACTIVE_REQUEST_ID: RefCell<Option<RequestId>>;
}

/// Runs `future` with `request_id` as the ambient request id.
///
/// Error bodies and response metadata read it back through
/// [`current_request_id`] instead of threading it through every call.
pub async fn scope_request_id<F, T>(request_id: RequestId, future: F) -> T
where
    F: Future<Output = T>,
{
    ACTIVE_REQUEST_ID
        .scope(RefCell::new(Some(request_id)), future)
        .await
}

/// The ambient request id, if one is in scope. Safe to call from anywhere;
/// outside a request scope it returns `None`.
pub fn current_request_id() -> Option<RequestId> {
    ACTIVE_REQUEST_ID
        .try_with(|cell| cell.borrow().clone())
        .unwrap_or(None)
}

/// Builds the per-request span. Prefers the id the request-id middleware
/// stashed in extensions, then the inbound header, then a fresh one.
#[derive(Clone, Default)]
pub struct RequestSpanMaker;

impl<B> MakeSpan<B> for RequestSpanMaker {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = match request.extensions().get::<RequestId>() {
            Some(rid) => rid.clone(),
            None => request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(RequestId::new)
                .unwrap_or_default(),
        };

        tracing::info_span!(
            "http.request",
            request_id = %request_id,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

/// HTTP tracing layer; only 5xx responses classify as failures.
pub fn configure_http_tracing(
) -> TraceLayer<SharedClassifier<StatusInRangeAsFailures>, RequestSpanMaker> {
    let classifier = SharedClassifier::new(StatusInRangeAsFailures::new(500..=599));
    TraceLayer::new(classifier).make_span_with(RequestSpanMaker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scoped_request_id_is_visible_inside_future() {
        let seen = scope_request_id(RequestId::new("req-77"), async {
            current_request_id().map(|rid| rid.as_str().to_string())
        })
        .await;
        assert_eq!(seen.as_deref(), Some("req-77"));
    }

    #[test]
    fn request_id_outside_scope_is_none() {
        assert!(current_request_id().is_none());
    }

    #[test]
    fn default_request_ids_are_unique() {
        assert_ne!(RequestId::default().as_str(), RequestId::default().as_str());
    }
}
