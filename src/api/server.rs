use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::AppResult;
use crate::shutdown::ShutdownReceiver;

use super::routes::route;
use super::wire::{read_http_request, write_error_response, write_json_response};

/// # Errors
///
/// Returns an error when the address cannot be bound.
pub async fn bind(listen: SocketAddr) -> AppResult<TcpListener> {
    let listener = TcpListener::bind(listen).await?;
    Ok(listener)
}

/// Accepts connections until shutdown is broadcast. Each connection is
/// handled on its own task and carries exactly one request.
///
/// # Errors
///
/// Returns an error when the listener address cannot be read.
pub async fn serve(
    engine: Arc<Engine>,
    listener: TcpListener,
    mut shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let local_addr = listener.local_addr()?;
    info!(listen = %local_addr, "HTTP surface listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("HTTP surface shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move {
                            handle_connection(&engine, socket, peer).await;
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to accept connection");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(engine: &Engine, mut socket: TcpStream, peer: SocketAddr) {
    let request = match read_http_request(&mut socket).await {
        Ok(request) => request,
        Err(err) => {
            if let Err(write_err) = write_error_response(&mut socket, &err).await {
                debug!(%peer, error = %write_err, "Failed to write error response");
            }
            return;
        }
    };
    debug!(%peer, method = %request.method, path = %request.path, "Request received");

    let written = match route(engine, &request).await {
        Ok(reply) => write_json_response(&mut socket, reply.status, &reply.body).await,
        Err(err) => {
            if err.status >= 500 {
                warn!(path = %request.path, status = err.status, error = %err.message, "Request failed");
            } else {
                debug!(path = %request.path, status = err.status, error = %err.message, "Request rejected");
            }
            write_error_response(&mut socket, &err).await
        }
    };
    if let Err(err) = written {
        debug!(%peer, error = %err, "Failed to write response");
    }
}
