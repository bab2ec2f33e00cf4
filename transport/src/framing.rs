//! LSP-style `Content-Length` framing over an arbitrary byte stream
//! (`spec.md` §4.1 "each message is a UTF-8 JSON object preceded by a
//! `Content-Length:` header line and blank line").

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),
    #[error("connection closed")]
    Eof,
}

/// Encode a JSON body as a single `Content-Length` framed message.
pub fn encode_frame(body: &serde_json::Value) -> Vec<u8> {
    let payload = serde_json::to_vec(body).expect("Value always serializes");
    let mut out = Vec::with_capacity(payload.len() + 32);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
    out.extend_from_slice(&payload);
    out
}

pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    body: &serde_json::Value,
) -> Result<(), FramingError> {
    writer.write_all(&encode_frame(body)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message from a buffered reader. Returns
/// `FramingError::Eof` when the stream ends cleanly between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<serde_json::Value, FramingError> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(FramingError::Eof);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedHeader(trimmed.to_string()))?;
        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(value.trim().parse().map_err(|_| {
                FramingError::MalformedHeader(format!("bad content-length: {value}"))
            })?);
        }
    }

    let len = content_length
        .ok_or_else(|| FramingError::MalformedHeader("missing Content-Length".to_string()))?;
    let mut buf = vec![0u8; len];
    tokio::io::AsyncReadExt::read_exact(reader, &mut buf).await?;
    serde_json::from_slice(&buf)
        .map_err(|e| FramingError::MalformedHeader(format!("invalid json body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
        let bytes = encode_frame(&body);
        let mut reader = BufReader::new(&bytes[..]);
        let parsed = read_frame(&mut reader).await.unwrap();
        assert_eq!(parsed, body);
    }

    #[tokio::test]
    async fn two_frames_back_to_back() {
        let a = serde_json::json!({"n": 1});
        let b = serde_json::json!({"n": 2});
        let mut bytes = encode_frame(&a);
        bytes.extend(encode_frame(&b));
        let mut reader = BufReader::new(&bytes[..]);
        assert_eq!(read_frame(&mut reader).await.unwrap(), a);
        assert_eq!(read_frame(&mut reader).await.unwrap(), b);
    }

    #[tokio::test]
    async fn eof_between_frames_is_reported() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FramingError::Eof)
        ));
    }

    #[tokio::test]
    async fn missing_content_length_is_malformed() {
        let raw = b"X-Other: 1\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FramingError::MalformedHeader(_))
        ));
    }
}
