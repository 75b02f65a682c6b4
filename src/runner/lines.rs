use crate::error::RunnerError;
use crate::model::{ExecEvent, OutputStream};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Notify};

use super::ReadErrorPolicy;

/// Forward one captured stream to the event channel, a line at a time.
///
/// Stops at EOF, on the first read error, or once the consumer has gone away.
pub(crate) async fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    event_tx: mpsc::UnboundedSender<ExecEvent>,
    policy: ReadErrorPolicy,
    read_failed: Arc<Notify>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                if event_tx.send(ExecEvent::Output { stream, line }).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(%stream, error = %e, "reading process output failed");
                let _ = event_tx.send(ExecEvent::Error(RunnerError::Read {
                    stream,
                    source: Arc::new(e),
                }));
                if policy == ReadErrorPolicy::Abort {
                    read_failed.notify_one();
                }
                break;
            }
        }
    }
}

/// Strip the line terminator (`\n`, optionally preceded by `\r`) and decode lossily.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
