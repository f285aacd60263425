//! Plain HTTP listener
//!
//! 🌐 Answers ACME HTTP-01 challenges, optionally serves `/metrics`, and
//! redirects everything else to HTTPS.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tlsward_tls::Http01Responder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Shared state of the HTTP listener
pub struct HttpState {
    pub responder: Http01Responder,
    /// Port HTTPS redirects point to
    pub https_port: u16,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics: bool,
}

/// Run the HTTP listener until `shutdown` fires
pub async fn run_http_server(
    listener: TcpListener,
    state: Arc<HttpState>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("🔄 HTTP challenge/redirect server listening on http://{}", addr);
    }

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to accept HTTP connection: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(move |req| handle_request(req, state.clone())))
                .await
            {
                tracing::debug!("Error serving HTTP connection: {:?}", err);
            }
        });
    }

    tracing::info!("🛑 HTTP listener stopped");
}

async fn handle_request<B>(
    req: Request<B>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();

    if let Some(challenge) = state.responder.respond(path) {
        return Ok(challenge.map(Full::new));
    }

    if state.metrics && req.method() == Method::GET && path == "/metrics" {
        let buffer = tlsward_tls::metrics::gather();
        return Ok(response(
            StatusCode::OK,
            Some("text/plain; version=0.0.4"),
            Bytes::from(buffer),
        ));
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host());
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let Some(location) = redirect_location(host, path_and_query, state.https_port) else {
        return Ok(response(StatusCode::BAD_REQUEST, None, Bytes::from_static(b"Missing Host header")));
    };

    Ok(Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(header::LOCATION, location)
        .header(header::CONTENT_LENGTH, 0)
        .header(header::SERVER, "Tlsward")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

/// HTTPS URL for the same host and path
fn redirect_location(host: Option<&str>, path_and_query: &str, https_port: u16) -> Option<String> {
    let host = host.map(str::trim).filter(|h| !h.is_empty())?;
    let host_without_port = strip_port(host);

    Some(if https_port == 443 {
        format!("https://{}{}", host_without_port, path_and_query)
    } else {
        format!("https://{}:{}{}", host_without_port, https_port, path_and_query)
    })
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literal, e.g. [::1]:80
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

fn response(status: StatusCode, content_type: Option<&str>, body: Bytes) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Full::new(body.clone()))
        .unwrap_or_else(|_| Response::new(Full::new(body)))
}
