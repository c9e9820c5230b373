pub mod tls;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use dispatch_common::DispatchError;

/// Maximum frame body size accepted from a peer, guarding against a
/// malicious or corrupt 4-byte length prefix triggering an unbounded
/// allocation.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Read one length-prefixed JSON frame: a 4-byte big-endian length
/// followed by that many bytes of UTF-8 JSON. Returns `Ok(None)` on a
/// clean EOF before any bytes of a new frame have arrived.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, DispatchError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DispatchError::Transport(e.to_string())),
    }

    // A malformed length prefix and an undecodable body are both channel-level
    // decode failures: fatal to the connection, the same as a raw I/O error,
    // and distinct from a dispatcher-level "unrecognized frame" (a frame that
    // decodes fine as JSON but doesn't match any known command shape), which
    // is handled a layer up and does not close the connection.
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(DispatchError::Transport(format!(
            "frame length {len} exceeds maximum of {MAX_FRAME_BYTES}"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| DispatchError::Transport(e.to_string()))?;

    let value = serde_json::from_slice(&body)
        .map_err(|e| DispatchError::Transport(format!("invalid JSON frame: {e}")))?;

    Ok(Some(value))
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), DispatchError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len())
        .map_err(|_| DispatchError::Protocol("frame body too large to encode".into()))?;

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| DispatchError::Transport(e.to_string()))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| DispatchError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| DispatchError::Transport(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &json!({"type": "heartbeat", "node_id": "n1"}))
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let value: serde_json::Value = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["node_id"], "n1");
    }

    #[tokio::test]
    async fn clean_eof_before_any_frame_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let value: Option<serde_json::Value> = read_frame(&mut cursor).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result: Result<Option<serde_json::Value>, _> = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }
}
