/// Byte relay for the unix-socket proxy deployment mode.
///
/// A proxy listener accepts a `{"type": "proxy"}` control frame (sync
/// variant, so the client knows it was consumed), answers with a status
/// frame, then relays bytes in both directions until either side closes.
/// Half-close is propagated by `copy_bidirectional`'s shutdown handling.

use crate::error::{EngineError, Result};
use crate::network::frame::{read_frame_sync, write_frame_sync};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixListener};

#[derive(Debug, Serialize, Deserialize)]
struct ProxyRequest {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProxyStatus {
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Relays `a` and `b` bidirectionally until both directions have shut down.
pub async fn relay<A, B>(a: &mut A, b: &mut B) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    tokio::io::copy_bidirectional(a, b)
        .await
        .map_err(|e| EngineError::Network(e.to_string()))
}

/// Serves proxy requests on a unix socket, relaying each connection to the
/// worker's TCP endpoint.
pub async fn serve_proxy(listener: UnixListener, worker_addr: String) -> Result<()> {
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        let addr = worker_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_proxy(stream, &addr).await {
                tracing::warn!("proxy connection failed: {}", e);
            }
        });
    }
}

async fn handle_proxy(mut stream: tokio::net::UnixStream, worker_addr: &str) -> Result<()> {
    let (mut r, mut w) = stream.split();
    let payload = read_frame_sync(&mut r, &mut w).await?;
    let req: ProxyRequest = serde_json::from_slice(&payload)?;
    if req.kind != "proxy" {
        return Err(EngineError::Network(format!(
            "unknown request type: {}",
            req.kind
        )));
    }
    match TcpStream::connect(worker_addr).await {
        Err(e) => {
            let status = ProxyStatus {
                status: "NG".to_string(),
                error: Some(e.to_string()),
            };
            write_frame_sync(&mut w, &mut r, &serde_json::to_vec(&status)?).await?;
            Err(EngineError::Network(e.to_string()))
        }
        Ok(mut upstream) => {
            let status = ProxyStatus {
                status: "OK".to_string(),
                error: None,
            };
            write_frame_sync(&mut w, &mut r, &serde_json::to_vec(&status)?).await?;
            relay(&mut stream, &mut upstream).await?;
            Ok(())
        }
    }
}

/// Client side: asks a proxy listener to splice this connection through to
/// its worker. After this returns the stream speaks the worker protocol.
pub async fn request_proxy(stream: &mut tokio::net::UnixStream) -> Result<()> {
    let (mut r, mut w) = stream.split();
    let req = serde_json::to_vec(&ProxyRequest {
        kind: "proxy".to_string(),
    })?;
    write_frame_sync(&mut w, &mut r, &req).await?;
    let payload = read_frame_sync(&mut r, &mut w).await?;
    let status: ProxyStatus = serde_json::from_slice(&payload)?;
    if status.status != "OK" {
        return Err(EngineError::Network(format!(
            "proxy refused: {}",
            status.error.unwrap_or_default()
        )));
    }
    Ok(())
}
