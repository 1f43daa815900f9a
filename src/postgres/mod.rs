// ABOUTME: PostgreSQL connection setup for delta sync backends
// ABOUTME: Applies the transport timeout and TLS policy, and drives the connection task

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::Client;

use crate::error::{Result, SyncError};
use crate::utils::sanitize_url;

/// How connections are established, independent of which backend is used.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound on establishing a connection (SQLite: busy timeout)
    pub connect_timeout: Duration,
    /// Accept invalid TLS certificates (insecure - use only for testing)
    pub allow_self_signed_certs: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            allow_self_signed_certs: false,
        }
    }
}

/// Connect to PostgreSQL.
///
/// The returned client owns the session: the background connection task ends
/// when the client is dropped, which is how stages release their connection.
pub async fn connect(url: &str, options: &ConnectOptions) -> Result<Client> {
    let endpoint = sanitize_url(url);

    let mut config: tokio_postgres::Config = url
        .parse()
        .map_err(|e| SyncError::connection(&endpoint, e))?;
    config.connect_timeout(options.connect_timeout);

    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(options.allow_self_signed_certs)
        .build()
        .map_err(|e| SyncError::connection(&endpoint, e))?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = config
        .connect(tls)
        .await
        .map_err(|e| SyncError::connection(&endpoint, e))?;

    let log_endpoint = endpoint.clone();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error on {}: {}", log_endpoint, e);
        }
    });

    tracing::debug!("Connected to {}", endpoint);
    Ok(client)
}
