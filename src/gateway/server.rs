//! HTTP server accept loop.

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::service::GatewayService;
use crate::error::Result;

/// HTTP/1 and HTTP/2 server for the gateway.
pub struct HttpServer {
    listener: TcpListener,
    service: Arc<GatewayService>,
}

impl HttpServer {
    /// Bind the listener. Use port 0 to let the OS pick one.
    pub async fn bind(addr: SocketAddr, service: Arc<GatewayService>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until `signal` resolves.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let builder = ConnBuilder::new(TokioExecutor::new());
        tokio::pin!(signal);

        info!(
            addr = %self.local_addr()?,
            "Starting HTTP gateway"
        );

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Accept error");
                            continue;
                        }
                    };

                    let service = Arc::clone(&self.service);
                    let builder = builder.clone();
                    tokio::spawn(async move {
                        let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                            let service = Arc::clone(&service);
                            async move { Ok::<_, hyper::Error>(service.handle(req, peer).await) }
                        });

                        if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                            debug!(?peer, error = %e, "serve_connection error");
                        }
                    });
                }
            }
        }

        Ok(())
    }
}
