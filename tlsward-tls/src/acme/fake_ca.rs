//! In-process ACME server for exercising the instant-acme adapter
//!
//! Serves one account, one order and one authorization. The authorization
//! status follows a script, the last entry repeats.

use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use instant_acme::{BodyWrapper, BytesResponse, HttpClient};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};

const BASE: &str = "https://ca.test";
pub(crate) const DIRECTORY_URL: &str = "https://ca.test/directory";
pub(crate) const TOKEN: &str = "ca-token";

pub(crate) struct FakeCa {
    domain: String,
    statuses: Mutex<VecDeque<&'static str>>,
    nonces: AtomicU32,
    /// Authorization requests, including the first one made by listing
    pub authz_fetches: AtomicU32,
    pub challenge_posts: AtomicU32,
}

impl FakeCa {
    pub(crate) fn new(domain: &str, statuses: &[&'static str]) -> Self {
        Self {
            domain: domain.to_string(),
            statuses: Mutex::new(statuses.iter().copied().collect()),
            nonces: AtomicU32::new(0),
            authz_fetches: AtomicU32::new(0),
            challenge_posts: AtomicU32::new(0),
        }
    }

    fn next_status(&self) -> &'static str {
        let mut statuses = self.statuses.lock();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or("valid")
        } else {
            statuses.front().copied().unwrap_or("valid")
        }
    }

    fn authorization(&self) -> Value {
        let status = self.next_status();
        let challenge_status = if status == "invalid" { "invalid" } else { "pending" };
        let mut challenge = json!({
            "type": "http-01",
            "url": url("/chall/1"),
            "token": TOKEN,
            "status": challenge_status,
        });
        if status == "invalid" {
            challenge["error"] = json!({
                "type": "urn:ietf:params:acme:error:unauthorized",
                "detail": "Invalid response from http://a.example/.well-known/acme-challenge/ca-token",
                "status": 403,
            });
        }
        json!({
            "identifier": { "type": "dns", "value": self.domain },
            "status": status,
            "challenges": [challenge],
        })
    }

    fn respond(&self, method: &Method, path: &str) -> (StatusCode, Option<String>, Option<Value>) {
        match (method, path) {
            (&Method::GET, "/directory") => (
                StatusCode::OK,
                None,
                Some(json!({
                    "newNonce": url("/nonce"),
                    "newAccount": url("/account"),
                    "newOrder": url("/order"),
                })),
            ),
            (&Method::HEAD, "/nonce") => (StatusCode::OK, None, None),
            (&Method::POST, "/account") => (
                StatusCode::CREATED,
                Some(url("/acct/1")),
                Some(json!({ "status": "valid" })),
            ),
            (&Method::POST, "/acct/1") => (StatusCode::OK, None, Some(json!({ "status": "valid" }))),
            (&Method::POST, "/order") => (
                StatusCode::CREATED,
                Some(url("/order/1")),
                Some(json!({
                    "status": "pending",
                    "identifiers": [{ "type": "dns", "value": self.domain }],
                    "authorizations": [url("/authz/1")],
                    "finalize": url("/finalize/1"),
                })),
            ),
            (&Method::POST, "/authz/1") => {
                self.authz_fetches.fetch_add(1, Ordering::SeqCst);
                (StatusCode::OK, None, Some(self.authorization()))
            }
            (&Method::POST, "/chall/1") => {
                self.challenge_posts.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::OK,
                    None,
                    Some(json!({
                        "type": "http-01",
                        "url": url("/chall/1"),
                        "token": TOKEN,
                        "status": "processing",
                    })),
                )
            }
            _ => (
                StatusCode::NOT_FOUND,
                None,
                Some(json!({
                    "type": "urn:ietf:params:acme:error:malformed",
                    "detail": format!("no resource at {}", path),
                    "status": 404,
                })),
            ),
        }
    }
}

impl HttpClient for FakeCa {
    fn request(
        &self,
        req: Request<BodyWrapper<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<BytesResponse, instant_acme::Error>> + Send>> {
        let (status, location, body) = self.respond(req.method(), req.uri().path());
        let nonce = format!("nonce-{}", self.nonces.fetch_add(1, Ordering::SeqCst));

        let mut builder = Response::builder()
            .status(status)
            .header("Replay-Nonce", nonce)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(location) = location {
            builder = builder.header(header::LOCATION, location);
        }
        let body = body
            .map(|value| serde_json::to_vec(&value).unwrap())
            .unwrap_or_default();
        let response = BytesResponse::from(builder.body(BodyWrapper::from(body)).unwrap());

        Box::pin(async move { Ok(response) })
    }
}

fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
}
