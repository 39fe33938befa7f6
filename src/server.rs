//! Server driver: TLS accept loop with one task per connection; each
//! connection carries uploads one after another.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::codec::{self, ClientFrame};
use crate::config::ServerSettings;
use crate::error::UploadError;
use crate::log::{TransferLog, TransferLogEntry, TransferStatus};
use crate::logger::Logger;
use crate::message::TransferResult;
use crate::protocol::{timeouts, CONTENT_TYPE_KEY};
use crate::protocol_core::PathPolicy;
use crate::session::{SessionEnd, SessionReport, UploadSession};
use crate::tls;

/// Shared, read-only state handed to every connection task.
pub struct ServerContext {
    pub root: PathBuf,
    pub policy: PathPolicy,
    pub io_deadline: Option<Duration>,
    pub logger: Arc<dyn Logger>,
    pub transfer_log: Option<Arc<TransferLog>>,
}

impl ServerContext {
    pub fn new(root: PathBuf, policy: PathPolicy, logger: Arc<dyn Logger>) -> Self {
        Self {
            root,
            policy,
            io_deadline: timeouts::frame_deadline(timeouts::FRAME_IO_SECS),
            logger,
            transfer_log: None,
        }
    }

    /// Append the outcome to the transfer log, off the async workers.
    async fn record(&self, peer: Option<SocketAddr>, report: &SessionReport) {
        let Some(log) = &self.transfer_log else {
            return;
        };
        let name = report.header.as_ref().map(|h| h.name.as_str()).unwrap_or("");
        let status = match report.result {
            TransferResult::Ok => TransferStatus::Completed,
            TransferResult::Failed { .. } => TransferStatus::Failed,
        };
        let mut entry = TransferLogEntry::now(name, status);
        entry.peer = peer.map(|p| p.to_string());
        entry.destination = report.destination.clone();
        entry.declared_size = report.header.as_ref().map(|h| h.size).unwrap_or(0);
        entry.bytes_written = report.bytes_written;
        entry.content_type = report
            .header
            .as_ref()
            .and_then(|h| h.get(CONTENT_TYPE_KEY))
            .map(str::to_string);
        entry.error = report.result.error_message().map(str::to_string);

        let log = Arc::clone(log);
        match tokio::task::spawn_blocking(move || log.add_entry(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.logger.error("transfer log", &format!("{:#}", e)),
            Err(e) => self.logger.error("transfer log", &e.to_string()),
        }
    }
}

/// Run uploads on one established connection until the client closes it.
pub async fn serve_connection<S>(
    stream: &mut S,
    ctx: &ServerContext,
    peer: Option<SocketAddr>,
) -> std::result::Result<(), UploadError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        // Clean EOF between uploads ends the connection
        let Some(mut frame) = codec::read_client_frame(stream, ctx.io_deadline).await? else {
            return Ok(());
        };

        let mut session = UploadSession::new(&ctx.root, ctx.policy, ctx.logger.as_ref());
        let end = loop {
            match frame {
                ClientFrame::Request(req) => session.accept(req).await,
                ClientFrame::Close => break SessionEnd::Close,
                ClientFrame::Cancel(reason) => break SessionEnd::Cancel(reason),
            }
            frame = match codec::read_client_frame(stream, ctx.io_deadline).await {
                Ok(Some(f)) => f,
                Ok(None) => break SessionEnd::Aborted(UploadError::Disconnected),
                Err(e) => break SessionEnd::Aborted(e),
            };
        };

        let report = session.finish(end).await;
        ctx.record(peer, &report).await;
        if report.connection_broken {
            // Best effort: the peer may already be gone
            let _ = codec::write_result(stream, &report.result, ctx.io_deadline).await;
            return Err(UploadError::Protocol(format!(
                "upload aborted: {}",
                report.result.error_message().unwrap_or("connection lost")
            )));
        }
        codec::write_result(stream, &report.result, ctx.io_deadline).await?;
    }
}

pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Load credentials, validate the root and bind. Any failure here is fatal.
    pub async fn bind(settings: &ServerSettings, logger: Arc<dyn Logger>) -> Result<Self> {
        if !settings.root.exists() {
            bail!("Root directory does not exist: {}", settings.root.display());
        }
        if !settings.root.is_dir() {
            bail!("Root path is not a directory: {}", settings.root.display());
        }

        let (cert, key) = tls::default_cert_paths(&settings.tls_dir);
        if settings.generate_cert && !(cert.exists() && key.exists()) {
            tls::generate_self_signed(&settings.tls_dir, &["localhost"])
                .context("Failed to generate self-signed certificate")?;
            logger.warn(&format!(
                "generated self-signed certificate in {}",
                settings.tls_dir.display()
            ));
        }
        let creds = tls::load_credentials(&cert, &key)?;
        let tls_config = tls::build_server_config(creds, settings.client_auth)
            .context("Failed to set up TLS configuration")?;

        let listener = TcpListener::bind(&settings.bind)
            .await
            .with_context(|| format!("cannot listen on {}", settings.bind))?;
        logger.listening(&listener.local_addr()?);

        if settings.client_auth == tls::ClientAuthPolicy::Skip {
            logger.warn("client certificates are not verified (--client-auth skip)");
        }
        if settings.path_policy == PathPolicy::Unrestricted {
            logger.warn("uploaded file names are not confined to the root (--path-policy unrestricted)");
        }

        let transfer_log = settings
            .transfer_log
            .clone()
            .map(|path| Arc::new(TransferLog::new(path)));
        let ctx = ServerContext {
            root: settings.root.clone(),
            policy: settings.path_policy,
            io_deadline: settings.io_deadline(),
            logger,
            transfer_log,
        };

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
            ctx: Arc::new(ctx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves. Connection tasks
    /// already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                accepted = self.listener.accept() => {
                    let (tcp, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            self.ctx.logger.error("accept", &e.to_string());
                            continue;
                        }
                    };
                    let _ = tcp.set_nodelay(true);
                    let acceptor = self.acceptor.clone();
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        ctx.logger.connection(&peer);
                        let handshake = timeout(
                            Duration::from_millis(timeouts::HANDSHAKE_MS),
                            acceptor.accept(tcp),
                        )
                        .await;
                        let mut stream = match handshake {
                            Ok(Ok(s)) => s,
                            Ok(Err(e)) => {
                                ctx.logger.error(&format!("tls {}", peer), &e.to_string());
                                return;
                            }
                            Err(_) => {
                                ctx.logger.error(&format!("tls {}", peer), "handshake timeout");
                                return;
                            }
                        };
                        if let Err(e) = serve_connection(&mut stream, &ctx, Some(peer)).await {
                            ctx.logger.error(&format!("conn {}", peer), &e.to_string());
                        }
                        let _ = stream.shutdown().await;
                    });
                }
            }
        }
    }
}
