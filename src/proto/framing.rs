use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound for one encoded message, newline excluded.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    FrameTooLarge,
    #[error("networking error - {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame - {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Reads newline-delimited JSON messages.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buffer: Vec::new(),
        }
    }

    /// Next message, or `None` on a clean end of stream.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        loop {
            self.buffer.clear();
            let limit = MAX_FRAME_LEN as u64 + 1;
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buffer)
                .await?;
            if read == 0 {
                return Ok(None);
            }
            if self.buffer.last() != Some(&b'\n') {
                if self.buffer.len() > MAX_FRAME_LEN {
                    return Err(TransportError::FrameTooLarge);
                }
                // EOF in the middle of a frame
                return Err(TransportError::Closed);
            }

            let line = self.buffer.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_slice(line)?));
        }
    }
}

/// Writes newline-delimited JSON messages.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let mut encoded = serde_json::to_vec(message)?;
        if encoded.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge);
        }
        encoded.push(b'\n');
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Registration, Request};

    #[tokio::test]
    async fn frames_survive_a_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let req = Request::Register(Registration {
            worker: "w1".into(),
            address: "10.0.0.1".into(),
        });
        writer.send(&req).await.unwrap();
        writer.send(&req).await.unwrap();
        drop(writer);

        assert_eq!(reader.next::<Request>().await.unwrap(), Some(req.clone()));
        assert_eq!(reader.next::<Request>().await.unwrap(), Some(req));
        assert!(reader.next::<Request>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let input: &[u8] = b"\n  \n{\"_c\":\"Ack\"}\n";
        let mut reader = FrameReader::new(input);
        let resp = reader.next::<crate::proto::Response>().await.unwrap();
        assert_eq!(resp, Some(crate::proto::Response::Ack));
    }

    #[tokio::test]
    async fn truncated_frame_is_closed() {
        let input: &[u8] = b"{\"_c\":\"Ack\"";
        let mut reader = FrameReader::new(input);
        let err = reader.next::<crate::proto::Response>().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let input = vec![b'x'; MAX_FRAME_LEN + 10];
        let mut reader = FrameReader::new(input.as_slice());
        let err = reader.next::<crate::proto::Response>().await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge));
    }

    #[tokio::test]
    async fn garbage_is_a_codec_error() {
        let input: &[u8] = b"not json\n";
        let mut reader = FrameReader::new(input);
        let err = reader.next::<crate::proto::Response>().await.unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }
}
