/// Length-prefixed message framing.
///
/// Each frame is `<ascii-decimal-length>:<payload>`. The sync variant makes
/// the receiver append a one-byte acknowledgement after consuming the
/// payload, giving the sender back-pressure when it needs a round-trip.

use crate::error::{EngineError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected on both sides.
pub const MAX_FRAME_LEN: u64 = u32::MAX as u64;

const MAX_HEADER_DIGITS: usize = 20;

pub const ACK: u8 = 0x00;

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() as u64 > MAX_FRAME_LEN {
        return Err(EngineError::Network(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }
    w.write_all(format!("{}:", payload.len()).as_bytes())
        .await
        .map_err(net_err)?;
    w.write_all(payload).await.map_err(net_err)?;
    w.flush().await.map_err(net_err)?;
    Ok(())
}

/// Writes a frame and waits for the receiver's acknowledgement byte.
pub async fn write_frame_sync<W, R>(w: &mut W, r: &mut R, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    write_frame(w, payload).await?;
    let mut ack = [0u8; 1];
    r.read_exact(&mut ack).await.map_err(net_err)?;
    if ack[0] != ACK {
        return Err(EngineError::Network(format!(
            "bad frame acknowledgement: {:#x}",
            ack[0]
        )));
    }
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let mut header = Vec::with_capacity(MAX_HEADER_DIGITS);
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte).await.map_err(net_err)?;
        match byte[0] {
            b'0'..=b'9' => header.push(byte[0]),
            b':' => break,
            other => {
                return Err(EngineError::Network(format!(
                    "invalid frame header byte: {:#x}",
                    other
                )))
            }
        }
        if header.len() > MAX_HEADER_DIGITS {
            return Err(EngineError::Network("invalid frame header".to_string()));
        }
    }
    if header.is_empty() {
        return Err(EngineError::Network("empty frame header".to_string()));
    }
    let len: u64 = std::str::from_utf8(&header)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Network("invalid frame header".to_string()))?;
    if len > MAX_FRAME_LEN {
        return Err(EngineError::Network(format!("frame too large: {}", len)));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await.map_err(net_err)?;
    Ok(payload)
}

/// Reads a frame and acknowledges it.
pub async fn read_frame_sync<R, W>(r: &mut R, w: &mut W) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let payload = read_frame(r).await?;
    w.write_all(&[ACK]).await.map_err(net_err)?;
    w.flush().await.map_err(net_err)?;
    Ok(payload)
}

fn net_err(e: std::io::Error) -> EngineError {
    EngineError::Network(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        for payload in [b"".as_slice(), b"hello", &[0u8; 100_000]] {
            let (mut a, mut b) = tokio::io::duplex(1 << 20);
            write_frame(&mut a, payload).await.unwrap();
            let got = read_frame(&mut b).await.unwrap();
            assert_eq!(got, payload);
        }
    }

    #[tokio::test]
    async fn sync_variant_acknowledges() {
        let (a, b) = tokio::io::duplex(1 << 20);
        let (mut ar, mut aw) = tokio::io::split(a);
        let (mut br, mut bw) = tokio::io::split(b);
        let sender = tokio::spawn(async move {
            write_frame_sync(&mut aw, &mut ar, b"ping").await.unwrap();
        });
        let got = read_frame_sync(&mut br, &mut bw).await.unwrap();
        assert_eq!(got, b"ping");
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_header_fails() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(b"xx:abc").await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn consecutive_frames() {
        let (mut a, mut b) = tokio::io::duplex(1 << 16);
        write_frame(&mut a, b"one").await.unwrap();
        write_frame(&mut a, b"two").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), b"one");
        assert_eq!(read_frame(&mut b).await.unwrap(), b"two");
    }
}
