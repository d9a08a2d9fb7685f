use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::core::{Error, Result};
use crate::protocol::LineCodec;
use super::MessageTransport;

/// Lines dispatched but not yet written to the stream
const DISPATCH_BUFFER: usize = 16;

/// Binds a transport to a byte stream until the transport stops
///
/// Lines read are handed to the transport; lines it dispatches are written
/// CRLF-terminated. End of input aborts the transport. Returns once the drain
/// loop has finished and every dispatched line is written.
pub async fn run<S>(stream: S, transport: Arc<MessageTransport>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut lines_in = FramedRead::new(reader, LineCodec::new());
    let mut lines_out = FramedWrite::new(writer, LineCodec::new());

    let (dispatcher, mut dispatched) = mpsc::channel::<String>(DISPATCH_BUFFER);
    let writer_task = transport.start(dispatcher)?;
    let mut reading = true;

    loop {
        tokio::select! {
            line = dispatched.recv() => match line {
                Some(line) => {
                    if let Err(e) = lines_out.send(line).await {
                        tracing::error!("Failed to write to stream: {}", e);
                        let reason = e.to_string();
                        transport.abort_with(Some(e));
                        if let Err(e) = writer_task.await {
                            tracing::error!("Drain loop failed: {}", e);
                        }
                        return Err(Error::transport_closed(reason));
                    }
                }
                // the drain loop has finished
                None => break,
            },

            line = lines_in.next(), if reading => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    transport.on_line_received(&line);
                }
                Some(Err(e)) => {
                    tracing::warn!("Failed to read from stream: {}", e);
                }
                None => {
                    tracing::debug!("End of input stream");
                    reading = false;
                    transport.abort();
                }
            },
        }
    }

    if let Err(e) = writer_task.await {
        tracing::error!("Drain loop failed: {}", e);
    }
    Ok(())
}
