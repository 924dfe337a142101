//! Listener and server lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! ProxyServer::new(config)
//!       |
//!       +--> run()    bind + accept forever
//!       |
//!       +--> start() --> ProxyHandle
//!                           |
//!                           v
//!                 ProxyHandle::shutdown()  (stops accepting; open sessions finish)
//! ```
//!
//! Every accepted connection gets its own task and [`Session`]. There is no
//! connection limit.

use crate::{Dialer, ProxyError, Result, Session, TcpDialer};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on.
    /// Default: `127.0.0.1:1080`
    pub bind_addr: SocketAddr,
}

impl ProxyConfig {
    /// The loopback SOCKS port the server listens on in production.
    pub const DEFAULT_BIND_ADDR: SocketAddr =
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1080));

    /// Config listening on `bind_addr`.
    pub fn with_bind_addr(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: Self::DEFAULT_BIND_ADDR,
        }
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Join handle for the accept loop.
    join_handle: Option<tokio::task::JoinHandle<Result<()>>>,

    /// Actual listening address (with the OS-assigned port, if any).
    local_addr: SocketAddr,
}

impl ProxyHandle {
    /// Address the server is accepting on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if the accept loop is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop accepting connections.
    ///
    /// Sessions already accepted keep running until their relay ends.
    /// If the shutdown signal cannot be delivered the accept loop is aborted.
    ///
    /// # Errors
    /// Currently infallible; always returns `Ok`.
    pub async fn shutdown(mut self) -> Result<()> {
        let signal_sent = match self.shutdown_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        };

        if let Some(handle) = self.join_handle.take() {
            if signal_sent {
                // The accept loop stops at its next select, which is immediate.
                let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
            } else {
                handle.abort();
            }
        }

        Ok(())
    }
}

/// SOCKS5 proxy server.
pub struct ProxyServer<D = TcpDialer> {
    config: ProxyConfig,

    /// Shared by every session.
    dialer: Arc<D>,
}

impl ProxyServer<TcpDialer> {
    /// Create a server that dials destinations over TCP.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_dialer(config, TcpDialer)
    }
}

impl<D: Dialer> ProxyServer<D> {
    /// Create a server with a custom upstream dialer.
    pub fn with_dialer(config: ProxyConfig, dialer: D) -> Self {
        Self {
            config,
            dialer: Arc::new(dialer),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind the configured address and serve until the process ends.
    ///
    /// # Errors
    /// * `ProxyError::Bind` - If binding to `config.bind_addr` fails.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.run_on(listener).await
    }

    /// Serve on a pre-bound listener.
    ///
    /// Accept errors are logged and accepting continues; this only returns
    /// if the task is cancelled.
    ///
    /// # Errors
    /// Currently never returns an error; the `Result` mirrors [`ProxyServer::run`].
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "SOCKS5 proxy listening");
        }

        loop {
            let (client, client_addr) = match listener.accept().await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "TCP accept error");
                    continue;
                }
            };
            debug!(client = %client_addr, "Accepted connection");

            let dialer = Arc::clone(&self.dialer);
            tokio::spawn(async move {
                let mut session = Session::new(client, client_addr);
                if let Err(e) = session.run(&*dialer).await {
                    warn!(client = %client_addr, error = %e, "Session failed");
                }
            });
        }
    }

    /// Bind, spawn the accept loop, and return a handle to it.
    ///
    /// The listener is bound before this returns, so
    /// [`ProxyHandle::local_addr`] reports the OS-assigned port immediately.
    ///
    /// # Errors
    /// * `ProxyError::Bind` - If binding to `config.bind_addr` fails.
    pub async fn start(self) -> Result<ProxyHandle> {
        let listener = self.bind().await?;
        let local_addr = listener.local_addr().map_err(|e| ProxyError::Bind {
            addr: self.config.bind_addr,
            source: e,
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(async move {
            tokio::select! {
                result = self.run_on(listener) => result,
                _ = shutdown_rx => {
                    debug!(addr = %local_addr, "SOCKS5 proxy stopped accepting");
                    Ok(())
                }
            }
        });

        Ok(ProxyHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
            local_addr,
        })
    }

    async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| ProxyError::Bind {
                addr: self.config.bind_addr,
                source: e,
            })
    }
}
