//! Newline-delimited framing for inbound client data
//!
//! TCP gives no message boundaries, so a read may hold half a frame or
//! several. `FrameReader` buffers the stream and hands out one line at a
//! time. Lines longer than the configured maximum are skipped up to the next
//! newline so the stream resynchronizes instead of misparsing the tail.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(Vec<u8>),
    /// A line that exceeded the limit and was discarded. Carries the number
    /// of bytes dropped.
    Oversized(usize),
    /// The peer closed the stream. A trailing unterminated line is dropped.
    Closed,
}

pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_frame_bytes,
        }
    }

    pub async fn next_frame(&mut self) -> std::io::Result<Frame> {
        // Room for the payload plus a `\r\n` terminator
        let limit = self.max_frame_bytes as u64 + 2;
        let mut line = Vec::new();

        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await?;

        if n == 0 {
            return Ok(Frame::Closed);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_frame_bytes {
                return Ok(Frame::Oversized(n));
            }
            return Ok(Frame::Line(line));
        }

        if (n as u64) < limit {
            return Ok(Frame::Closed);
        }

        let skipped = self.skip_line().await?;
        Ok(Frame::Oversized(n + skipped))
    }

    /// Discards input through the next newline (or end of stream).
    async fn skip_line(&mut self) -> std::io::Result<usize> {
        let mut skipped = 0;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }

            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.inner.consume(pos + 1);
                    return Ok(skipped + pos + 1);
                }
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                    skipped += len;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn frames(input: &[u8], max: usize) -> Vec<Frame> {
        let mut reader = FrameReader::new(input, max);
        let mut frames = Vec::new();
        loop {
            let frame = reader.next_frame().await.unwrap();
            let done = frame == Frame::Closed;
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    #[tokio::test]
    async fn test_multiple_frames_in_one_read() {
        let result = frames(b"one\ntwo\r\nthree\n", 64).await;
        assert_eq!(
            result,
            vec![
                Frame::Line(b"one".to_vec()),
                Frame::Line(b"two".to_vec()),
                Frame::Line(b"three".to_vec()),
                Frame::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_trailing_partial_frame_is_dropped() {
        let result = frames(b"whole\npart", 64).await;
        assert_eq!(result, vec![Frame::Line(b"whole".to_vec()), Frame::Closed]);
    }

    #[tokio::test]
    async fn test_frame_at_exact_limit() {
        let mut input = vec![b'a'; 8];
        input.push(b'\n');
        let result = frames(&input, 8).await;
        assert_eq!(result, vec![Frame::Line(vec![b'a'; 8]), Frame::Closed]);
    }

    #[tokio::test]
    async fn test_crlf_frame_at_exact_limit() {
        let mut input = vec![b'a'; 1023];
        input.extend_from_slice(b"\r\n");
        let result = frames(&input, 1023).await;
        assert_eq!(result, vec![Frame::Line(vec![b'a'; 1023]), Frame::Closed]);
    }

    #[tokio::test]
    async fn test_one_byte_over_limit() {
        let mut input = vec![b'a'; 9];
        input.extend_from_slice(b"\nok\r\n");
        let result = frames(&input, 8).await;
        assert_eq!(
            result,
            vec![
                Frame::Oversized(10),
                Frame::Line(b"ok".to_vec()),
                Frame::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_resynchronizes() {
        let mut input = vec![b'x'; 20];
        input.extend_from_slice(b"\nok\n");
        let result = frames(&input, 8).await;
        assert_eq!(
            result,
            vec![
                Frame::Oversized(21),
                Frame::Line(b"ok".to_vec()),
                Frame::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_line() {
        let result = frames(b"\n", 8).await;
        assert_eq!(result, vec![Frame::Line(Vec::new()), Frame::Closed]);
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server, 64);

        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(b"{\"posi").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"tion\":[1,2,3]}\n").await.unwrap();
        });

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Frame::Line(br#"{"position":[1,2,3]}"#.to_vec())
        );
        writer.await.unwrap();
        assert_eq!(reader.next_frame().await.unwrap(), Frame::Closed);
    }
}
