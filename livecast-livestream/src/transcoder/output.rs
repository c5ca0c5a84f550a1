// Continuous draining of transcoder stdout/stderr.
//
// The pipes must be read for the whole life of the process or the engine
// blocks on a full buffer. Progress lines end in '\r', so both '\r' and '\n'
// delimit lines.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tracing::{debug, trace, warn};

use crate::registry::StreamKey;

const MAX_LINE_LENGTH: usize = 4096;

fn is_progress_line(line: &str) -> bool {
    line.contains("Opening") || line.contains("frame=")
}

pub(crate) async fn drain_output<R>(reader: R, key: StreamKey, pipe: &'static str)
where
    R: AsyncRead + Unpin,
{
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
    let mut lines = FramedRead::new(reader, codec);

    while let Some(item) = lines.next().await {
        match item {
            Ok(chunk) => {
                let line = String::from_utf8_lossy(&chunk);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if is_progress_line(line) {
                    debug!(stream_key = %key, pipe, "{}", line);
                } else {
                    trace!(stream_key = %key, pipe, "{}", line);
                }
            }
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                warn!(
                    stream_key = %key,
                    pipe,
                    "Transcoder output line exceeds {} bytes, discarding the rest of the stream",
                    MAX_LINE_LENGTH
                );
                let mut reader = lines.into_inner();
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    debug!(stream_key = %key, pipe, error = %e, "Transcoder output closed");
                }
                return;
            }
            Err(AnyDelimiterCodecError::Io(e)) => {
                debug!(stream_key = %key, pipe, error = %e, "Transcoder output closed");
                return;
            }
        }
    }

    trace!(stream_key = %key, pipe, "Transcoder output reached EOF");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_progress_lines() {
        assert!(is_progress_line("frame=  120 fps= 30 q=-1.0 size=N/A"));
        assert!(is_progress_line("[hls @ 0x5581] Opening 'test_0.ts' for writing"));
        assert!(!is_progress_line("Stream mapping:"));
    }

    #[tokio::test]
    async fn test_drains_until_eof() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let key = StreamKey::parse("test").unwrap();
        let drain = tokio::spawn(drain_output(reader, key, "stderr"));

        for i in 0..100 {
            writer
                .write_all(format!("frame={i}\r").as_bytes())
                .await
                .unwrap();
        }
        writer.write_all(b"done\n").await.unwrap();
        drop(writer);

        drain.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_line_keeps_draining() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let key = StreamKey::parse("test").unwrap();
        let drain = tokio::spawn(drain_output(reader, key, "stdout"));

        // Far more than the pipe capacity without any delimiter; the writer
        // only completes if the reader keeps consuming.
        let blob = vec![b'x'; MAX_LINE_LENGTH * 8];
        writer.write_all(&blob).await.unwrap();
        writer.write_all(b"\nafter\n").await.unwrap();
        drop(writer);

        drain.await.unwrap();
    }
}
