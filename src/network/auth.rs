/// Connection authentication.
///
/// Worker side: generate a 512-bit nonce, send it as 128 hex chars, compare
/// the reply against `SHA-512(nonce || secret)`. Master side (`knock`):
/// answer the challenge. Failure detail never crosses the wire beyond the
/// `ng:` line, and non-loopback peers must match the configured master
/// address before the challenge is even issued.

use crate::error::{EngineError, Result};
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MIN_SECRET_LEN: usize = 256;
const MAX_LINE: u64 = 1024;

#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Loads the shared secret. The file must hold at least 256 bytes after
    /// trimming and must not be readable by group or others.
    pub fn load(path: &Path) -> Result<Secret> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path)?.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(EngineError::Config(format!(
                    "secret file {} must not be accessible by group/others",
                    path.display()
                )));
            }
        }
        let bytes = std::fs::read(path)?;
        let trimmed: Vec<u8> = bytes
            .strip_suffix(b"\n")
            .unwrap_or(&bytes)
            .to_vec();
        if trimmed.len() < MIN_SECRET_LEN {
            return Err(EngineError::Config(format!(
                "secret in {} is too short ({} bytes, need {})",
                path.display(),
                trimmed.len(),
                MIN_SECRET_LEN
            )));
        }
        Ok(Secret(trimmed))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Secret {
        Secret(bytes)
    }
}

fn digest_hex(nonce: &[u8], secret: &Secret) -> String {
    let mut h = Sha512::new();
    h.update(nonce);
    h.update(&secret.0);
    hex::encode(h.finalize())
}

fn new_nonce() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

async fn read_line<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<String> {
    let mut line = String::new();
    let mut limited = r.take(MAX_LINE);
    limited
        .read_line(&mut line)
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    if line.is_empty() {
        return Err(EngineError::Network("connection closed".to_string()));
    }
    Ok(line.trim_end_matches('\n').to_string())
}

/// Worker side of the handshake. `peer_allowed` is false for non-loopback
/// peers that do not match the configured master address.
pub async fn authenticate<R, W>(
    r: &mut R,
    w: &mut W,
    peer_allowed: bool,
    secret: &Secret,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !peer_allowed {
        return refuse(w, "connection from this address is not allowed").await;
    }
    let nonce = new_nonce();
    w.write_all(format!("{}\n", nonce).as_bytes())
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    w.flush().await.map_err(|e| EngineError::Network(e.to_string()))?;

    let reply = read_line(r).await?;
    if reply != digest_hex(nonce.as_bytes(), secret) {
        return refuse(w, "invalid credentials").await;
    }
    w.write_all(b"ok\n")
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    w.flush().await.map_err(|e| EngineError::Network(e.to_string()))?;
    Ok(())
}

async fn refuse<W: AsyncWrite + Unpin>(w: &mut W, reason: &str) -> Result<()> {
    w.write_all(format!("ng: {}\n", reason).as_bytes())
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    w.flush()
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    Err(EngineError::Auth(reason.to_string()))
}

/// Master side of the handshake.
pub async fn knock<R, W>(r: &mut R, w: &mut W, secret: &Secret) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let challenge = read_line(r).await?;
    if let Some(reason) = challenge.strip_prefix("ng:") {
        return Err(EngineError::Auth(reason.trim().to_string()));
    }
    w.write_all(format!("{}\n", digest_hex(challenge.as_bytes(), secret)).as_bytes())
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    w.flush().await.map_err(|e| EngineError::Network(e.to_string()))?;

    let verdict = read_line(r).await?;
    if verdict == "ok" {
        return Ok(());
    }
    match verdict.strip_prefix("ng:") {
        Some(reason) => Err(EngineError::Auth(reason.trim().to_string())),
        None => Err(EngineError::Auth("unexpected handshake reply".to_string())),
    }
}
