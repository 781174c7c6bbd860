use std::convert::Infallible;
use std::fmt;
use std::time::Instant;

use axum::extract::{FromRequestParts, Request};
use axum::http::{request::Parts, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const MAX_INBOUND_ID_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        let usable = !value.is_empty()
            && value.len() <= MAX_INBOUND_ID_LEN
            && value.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
        usable.then(|| Self(value.to_string()))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CorrelationId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<CorrelationId>().cloned().unwrap_or_else(CorrelationId::generate))
    }
}

/// Tags each request with a correlation id (the caller's `x-correlation-id`
/// when it is well formed) and runs the handler inside a span carrying it.
pub async fn correlate(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(CorrelationId::from_header)
        .unwrap_or_else(CorrelationId::generate);
    request.extensions_mut().insert(correlation_id.clone());

    let span = info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let started = Instant::now();
        let mut response = next.run(request).await;
        info!(
            event_name = "server.request.responded",
            correlation_id = %correlation_id,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request responded"
        );
        if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Body of a dialogue turn. Clients written against the camel-cased API
/// send `conversationState`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest<S> {
    pub question: String,
    #[serde(default, alias = "conversationState")]
    pub conversation_state: Option<S>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use carbonex_core::domain::conversation::CalculatorState;

    use super::{ChatRequest, CorrelationId};

    #[test]
    fn inbound_ids_are_accepted_only_when_well_formed() {
        let accepted = CorrelationId::from_header(&HeaderValue::from_static("req-42.a_b"));
        assert_eq!(accepted.as_ref().map(CorrelationId::as_str), Some("req-42.a_b"));

        assert!(CorrelationId::from_header(&HeaderValue::from_static("")).is_none());
        assert!(CorrelationId::from_header(&HeaderValue::from_static("two words")).is_none());
        let oversized = "x".repeat(129);
        let header = HeaderValue::from_str(&oversized).expect("header");
        assert!(CorrelationId::from_header(&header).is_none());
    }

    #[test]
    fn chat_requests_accept_both_state_spellings() {
        let snake: ChatRequest<CalculatorState> = serde_json::from_value(json!({
            "question": "cement",
            "conversation_state": {"sector": "cement", "cursor": 1}
        }))
        .expect("snake case");
        let camel: ChatRequest<CalculatorState> = serde_json::from_value(json!({
            "question": "cement",
            "conversationState": {"sector": "cement", "cursor": 1}
        }))
        .expect("camel case");

        assert_eq!(snake.conversation_state, camel.conversation_state);
        assert_eq!(camel.conversation_state.map(|state| state.cursor), Some(1));
    }

    #[test]
    fn missing_or_null_state_means_a_new_conversation() {
        let request: ChatRequest<CalculatorState> =
            serde_json::from_value(json!({"question": "hi", "conversation_state": null}))
                .expect("json");
        assert!(request.conversation_state.is_none());

        let request: ChatRequest<CalculatorState> =
            serde_json::from_value(json!({"question": "hi"})).expect("json");
        assert!(request.conversation_state.is_none());
    }
}
