//! TLS listener
//!
//! 🔒 Terminates TLS with certificates picked by the SNI selector and pipes
//! the decrypted stream to the upstream routed for that host.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tlsward_core::config::TlswardConfig;
use tlsward_tls::CertificateSelector;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// rustls server configuration resolving certificates through `selector`
pub fn server_config(selector: Arc<CertificateSelector>) -> anyhow::Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to set TLS protocol versions")?
        .with_no_client_auth()
        .with_cert_resolver(selector);
    Ok(Arc::new(config))
}

/// Run the TLS listener until `shutdown` fires
pub async fn run_tls_server(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    routes: Arc<TlswardConfig>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("🔒 TLS server listening on https://{}", addr);
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to accept TLS connection: {}", e);
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let routes = routes.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, acceptor, routes).await {
                tracing::debug!("Connection from {} ended: {:#}", peer, e);
            }
        });
    }

    tracing::info!("🛑 TLS listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    routes: Arc<TlswardConfig>,
) -> anyhow::Result<()> {
    let mut tls = acceptor.accept(stream).await.context("TLS handshake failed")?;

    let Some(server_name) = tls.get_ref().1.server_name().map(str::to_string) else {
        tracing::debug!("⚠️ {} connected without SNI", peer);
        return Ok(());
    };
    let Some(upstream) = routes.upstream_for(&server_name) else {
        tracing::debug!("🚫 No route for {} (from {})", server_name, peer);
        return Ok(());
    };

    let mut upstream_stream = TcpStream::connect(upstream)
        .await
        .with_context(|| format!("Failed to connect to upstream {}", upstream))?;

    tracing::debug!("🔀 {} -> {} via {}", peer, upstream, server_name);
    let (sent, received) = tokio::io::copy_bidirectional(&mut tls, &mut upstream_stream).await?;
    tracing::trace!("{} closed ({} bytes up, {} bytes down)", peer, sent, received);

    Ok(())
}
