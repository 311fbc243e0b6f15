//! Postgres connections with TLS chosen from the connection string's sslmode.

use std::sync::Arc;

use rustls::ClientConfig;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Connection, Socket};
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::debug;

use crate::error::{PgError, PgResult};

/// An owned client plus the task driving its connection.
///
/// Dropping it closes the connection in the background; [`close`](Self::close)
/// waits for the task to finish.
pub struct PgConnection {
    client: Client,
    task: JoinHandle<()>,
}

impl PgConnection {
    pub async fn connect(connection_string: &str) -> PgResult<Self> {
        if requires_tls(connection_string) {
            let config = ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .map_err(|e| PgError::Connection(format!("TLS config error: {}", e)))?
            .with_root_certificates(root_certs())
            .with_no_client_auth();

            let (client, connection) =
                tokio_postgres::connect(connection_string, MakeRustlsConnect::new(config))
                    .await
                    .map_err(|e| PgError::Connection(e.to_string()))?;

            Ok(Self::spawn(client, connection))
        } else {
            let (client, connection) =
                tokio_postgres::connect(connection_string, tokio_postgres::NoTls)
                    .await
                    .map_err(|e| PgError::Connection(e.to_string()))?;

            Ok(Self::spawn(client, connection))
        }
    }

    fn spawn<T>(client: Client, connection: Connection<Socket, T>) -> Self
    where
        T: tokio_postgres::tls::TlsStream + Unpin + Send + 'static,
    {
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });
        Self { client, task }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Close the connection and wait for its task to exit.
    pub async fn close(self) {
        drop(self.client);
        if let Err(e) = self.task.await {
            debug!(error = %e, "Postgres connection task did not exit cleanly");
        }
    }
}

/// Get root certificates from webpki-roots.
fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Check if the connection string requires TLS.
fn requires_tls(connection_string: &str) -> bool {
    connection_string.contains("sslmode=require")
        || connection_string.contains("sslmode=verify-ca")
        || connection_string.contains("sslmode=verify-full")
}
