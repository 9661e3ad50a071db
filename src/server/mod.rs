// Server module: hosts the pipeline behind a local Unix socket

mod ipc;
mod service;
mod signals;

pub use ipc::{read_frame, write_frame, IpcClient, IpcRequest, IpcResponse, IpcServer};
pub use service::{AskRequest, AskResponse, HealthReport, QaService};
pub use signals::{ShutdownSignal, SignalHandler};

use crate::config::Config;
use crate::error::Result;
use crate::retrieval::RetrievalReadingPipeline;
use crate::storage::open_store;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task;

/// Socket server around a shared `QaService`
pub struct Server {
    service: Arc<QaService>,
    socket_path: PathBuf,
    max_connections: usize,
}

impl Server {
    /// Load the corpus, both models and the conversation store
    pub fn from_config(config: &Config) -> Result<Self> {
        let config = config.with_expanded_paths();

        let pipeline = RetrievalReadingPipeline::load(&config)?;
        let store = open_store(&config.storage)?;
        let service = QaService::new(
            pipeline,
            store,
            config.retrieval.clone(),
            config.server.max_concurrent_inferences,
        );

        Ok(Self::with_service(
            Arc::new(service),
            config.server.socket_path,
            config.server.max_connections,
        ))
    }

    pub fn with_service(
        service: Arc<QaService>,
        socket_path: PathBuf,
        max_connections: usize,
    ) -> Self {
        Self {
            service,
            socket_path,
            max_connections,
        }
    }

    pub fn service(&self) -> &Arc<QaService> {
        &self.service
    }

    /// Serve until a shutdown signal or a `shutdown` request arrives, then
    /// remove the socket and shut the store down.
    pub async fn run(self) -> Result<()> {
        let mut signal_handler = SignalHandler::new()?;

        let mut listener = IpcServer::new(self.socket_path.clone());
        listener.bind().await?;

        let connection_permits = Arc::new(Semaphore::new(self.max_connections));
        let shutdown = Arc::new(Notify::new());

        tracing::info!("Server started");

        // Main event loop
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::error!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    match connection_permits.clone().try_acquire_owned() {
                        Ok(permit) => {
                            let service = self.service.clone();
                            let shutdown = shutdown.clone();
                            task::spawn(async move {
                                if let Err(e) = handle_client(stream, service, shutdown, permit).await {
                                    tracing::error!("Client handler error: {}", e);
                                }
                            });
                        }
                        Err(_) => {
                            task::spawn(reject_client(stream));
                        }
                    }
                }

                _ = shutdown.notified() => {
                    tracing::info!("Shutdown requested by client");
                    break;
                }

                received = signal_handler.wait() => {
                    tracing::info!("Shutting down on {}", received);
                    break;
                }
            }
        }

        listener.shutdown()?;
        self.service.store().shutdown()?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}

/// Serve one request on one connection
async fn handle_client(
    mut stream: UnixStream,
    service: Arc<QaService>,
    shutdown: Arc<Notify>,
    _permit: OwnedSemaphorePermit,
) -> Result<()> {
    let request: IpcRequest = match read_frame(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            let response = IpcResponse::error(format!("Malformed request: {}", e));
            return write_frame(&mut stream, &response).await;
        }
    };

    let is_shutdown = matches!(request, IpcRequest::Shutdown);
    let response = service.handle(request).await;

    write_frame(&mut stream, &response).await?;

    if is_shutdown {
        shutdown.notify_one();
    }

    Ok(())
}

/// Answer a connection over the limit without reading its request
async fn reject_client(mut stream: UnixStream) {
    tracing::warn!("Connection limit reached, rejecting client");
    let response = IpcResponse::error("Too many connections, try again later");
    if let Err(e) = write_frame(&mut stream, &response).await {
        tracing::debug!("Failed to notify rejected client: {}", e);
    }
}
