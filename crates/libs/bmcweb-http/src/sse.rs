//! Server-sent event streams.
//!
//! An SSE route takes over the connection once its privilege check passed:
//! the response head is written without a length and the handler then pushes
//! events until it returns or the client goes away. The connection deadline
//! is disarmed for the lifetime of the stream.

use std::fmt::Write as _;
use std::future::Future;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::debug;

use crate::connection::BoxedIo;
use crate::prelude::*;

/// An open event stream.
pub struct SseConnection {
    writer: WriteHalf<BoxedIo>,
    closed: watch::Receiver<bool>,
}

impl SseConnection {
    /// Writes the stream head and starts watching for the client hanging up.
    pub(crate) async fn start(io: BoxedIo, server_name: &str, date: &str) -> Result<Self> {
        let (reader, mut writer) = tokio::io::split(io);
        let head = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/event-stream\r\n\
             Cache-Control: no-cache\r\n\
             Connection: keep-alive\r\n\
             Server: {server_name}\r\n\
             Date: {date}\r\n\r\n"
        );
        writer.write_all(head.as_bytes()).await?;
        writer.flush().await?;

        let (tx, closed) = watch::channel(false);
        tokio::task::spawn_local(watch_hangup(reader, tx));
        Ok(Self { writer, closed })
    }

    /// Sends one event. Multi-line data is split over several `data:` fields.
    pub async fn send_event(&mut self, id: &str, data: &str) -> Result<()> {
        self.writer.write_all(format_event(id, data).as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the client hung up.
    pub fn closed(&self) -> impl Future<Output = ()> + 'static {
        let mut closed = self.closed.clone();
        async move {
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }
}

async fn watch_hangup(mut reader: ReadHalf<BoxedIo>, tx: watch::Sender<bool>) {
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                // Clients have nothing to say on an event stream.
                Ok(_) => continue,
            },
            // The stream was dropped by its handler.
            _ = tx.closed() => return,
        }
    }
    debug!("Event stream client hung up");
    let _ = tx.send(true);
}

pub fn format_event(id: &str, data: &str) -> String {
    let mut event = String::new();
    if !id.is_empty() {
        let _ = writeln!(event, "id: {id}");
    }
    for line in data.lines() {
        let _ = writeln!(event, "data: {line}");
    }
    event.push('\n');
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_framed() {
        assert_eq!(format_event("1", "hello"), "id: 1\ndata: hello\n\n");
        assert_eq!(format_event("", "a\nb"), "data: a\ndata: b\n\n");
    }
}
