use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{IngestError, Result};
use crate::session::{IngestContext, ServerSession};

/// Accepts RTMP publishers and runs one [`ServerSession`] task per socket.
pub struct IngestServer {
    ctx: Arc<IngestContext>,
    max_connections: usize,
    shutdown_grace: Duration,
    active_connections: Arc<AtomicUsize>,
}

impl IngestServer {
    #[must_use]
    pub fn new(ctx: Arc<IngestContext>, config: &ServerConfig) -> Self {
        Self {
            ctx,
            max_connections: config.max_connections,
            shutdown_grace: config.shutdown_grace(),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn bind(address: &str) -> Result<TcpListener> {
        let socket_addr: SocketAddr = address.parse().map_err(|e| {
            IngestError::Config(format!("invalid listen address '{address}': {e}"))
        })?;
        Ok(TcpListener::bind(socket_addr).await?)
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Runs the accept loop until `cancel` fires, then gives open sessions
    /// `shutdown_grace` to tear down before aborting them.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            %local_addr,
            max_connections = self.max_connections,
            "rtmp ingest listening"
        );

        let mut sessions = JoinSet::new();
        loop {
            let (stream, remote_addr) = tokio::select! {
                () = cancel.cancelled() => break,
                Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let current = self.active_connections.load(Ordering::Relaxed);
            if current >= self.max_connections {
                tracing::warn!(
                    %remote_addr,
                    current,
                    max = self.max_connections,
                    "rtmp connection rejected: at capacity"
                );
                drop(stream);
                continue;
            }
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%remote_addr, error = %e, "failed to set TCP_NODELAY");
            }

            let guard = ConnectionGuard::new(Arc::clone(&self.active_connections));
            let session = ServerSession::new(
                stream,
                remote_addr,
                Arc::clone(&self.ctx),
                cancel.child_token(),
            );
            sessions.spawn(async move {
                let _guard = guard;
                session.run().await
            });
        }

        drop(listener);
        tracing::info!(open_sessions = sessions.len(), "rtmp ingest shutting down");
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = sessions.len(),
                "sessions did not close within the shutdown grace, aborting"
            );
            sessions.shutdown().await;
        }
        Ok(())
    }
}

struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
