//! HTTP-01 ACME challenge responses
//!
//! Holds the token -> key authorization answers that the ACME server fetches
//! from `/.well-known/acme-challenge/<token>` while an authorization is being
//! validated, and the responder that serves them.

use crate::metrics;
use bytes::Bytes;
use dashmap::DashMap;
use http::{header, Response, StatusCode};
use std::sync::Arc;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// 💾 Token -> key authorization store
///
/// Written by background issuance tasks, read concurrently by the HTTP
/// listener. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ChallengeResponseStore {
    responses: Arc<DashMap<String, String>>,
}

impl ChallengeResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the response for a token, replacing any previous value.
    pub fn put(&self, token: &str, response: &str) {
        tracing::debug!("🚀 Publishing HTTP-01 response for token {}", token);
        self.responses.insert(token.to_string(), response.to_string());
    }

    /// Key authorization for a token, if one is published
    pub fn get(&self, token: &str) -> Option<String> {
        self.responses.get(token).map(|v| v.value().clone())
    }

    /// 🧹 Drop a token once its authorization is settled
    pub fn remove(&self, token: &str) {
        if self.responses.remove(token).is_some() {
            tracing::debug!("🧹 Removed HTTP-01 response for token {}", token);
        }
    }

    /// Number of published tokens
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// 🌐 Answers ACME HTTP-01 requests from the challenge store
#[derive(Debug, Clone)]
pub struct Http01Responder {
    store: ChallengeResponseStore,
}

impl Http01Responder {
    pub fn new(store: ChallengeResponseStore) -> Self {
        Self { store }
    }

    /// Token part of a challenge request path, if the path is one.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty() && !token.contains('/'))
    }

    /// Build the challenge response for a request path.
    ///
    /// Returns `None` when the path is not a challenge path or the token is
    /// unknown, so the host can fall through to its normal routing.
    pub fn respond(&self, path: &str) -> Option<Response<Bytes>> {
        let token = Self::extract_token(path)?;

        let Some(key_authorization) = self.store.get(token) else {
            tracing::trace!("🔍 Unknown challenge token {}", token);
            metrics::CHALLENGE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
            return None;
        };

        tracing::debug!("✅ Confirmed challenge request for {}", token);
        metrics::CHALLENGE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();

        let body = Bytes::from(key_authorization);
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, body.len())
            .body(body)
            .ok()
    }
}
