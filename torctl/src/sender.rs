//! The background send loop
//!
//! One task per connection owns the write half. Callers hand it encoded
//! commands over a channel; it registers each command's completion slot and
//! writes the frame in full. A caller that stops waiting cannot interrupt a
//! write halfway, and closing the connection never waits on a stalled peer.

use std::sync::Arc;

use tokio::{
    io::AsyncWrite,
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use torctl_common::{Signal, internal};

use crate::{
    ControlError,
    command::Command,
    correlator::{Completion, PendingQueue},
    transport::FrameWriter,
};

/// Commands allowed to queue for the send loop before callers wait
pub const REQUEST_CAPACITY: usize = 64;

/// An encoded command on its way to the wire
#[derive(Debug)]
pub struct Outgoing {
    pub command: Command,
    pub bytes: Vec<u8>,
    pub completion: Completion,
}

pub struct SendLoop<W> {
    writer: FrameWriter<W>,
    requests: mpsc::Receiver<Outgoing>,
    pending: Arc<PendingQueue>,
    shutdown: broadcast::Receiver<Signal>,
}

impl<W> SendLoop<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub const fn new(
        writer: FrameWriter<W>,
        requests: mpsc::Receiver<Outgoing>,
        pending: Arc<PendingQueue>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Self {
        Self {
            writer,
            requests,
            pending,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        while let Some(outgoing) = self.next_request().await {
            let Outgoing {
                command,
                bytes,
                completion,
            } = outgoing;

            if !self.pending.push(completion) {
                continue;
            }

            let sent = tokio::select! {
                signal = self.shutdown.recv() => {
                    internal!(level = DEBUG, "Send loop interrupted mid-write ({signal:?})");
                    break;
                }
                sent = self.writer.send(&command, &bytes) => sent,
            };

            if let Err(error) = sent {
                internal!(level = WARN, "Failed to send {}: {error}", command.name());
                break;
            }
        }

        self.pending.close();
        self.requests.close();
        while let Ok(outgoing) = self.requests.try_recv() {
            let _ = outgoing.completion.send(Err(ControlError::ConnectionClosed));
        }

        if let Err(error) = self.writer.shutdown().await {
            internal!(level = DEBUG, "Error shutting down writer: {error}");
        }
        internal!(level = DEBUG, "Send loop stopped");
    }

    /// Wait for the next command, or `None` once shutdown is signalled or
    /// every connection handle is gone
    async fn next_request(&mut self) -> Option<Outgoing> {
        tokio::select! {
            signal = self.shutdown.recv() => {
                internal!(level = DEBUG, "Send loop shutting down ({signal:?})");
                None
            }
            outgoing = self.requests.recv() => outgoing,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{io::AsyncReadExt, sync::oneshot};

    use super::*;
    use crate::{
        Result,
        correlator::PendingReply,
        frame::{Frame, ReplyLine},
        reply::Reply,
    };

    struct Harness {
        server: tokio::io::DuplexStream,
        requests: mpsc::Sender<Outgoing>,
        pending: Arc<PendingQueue>,
        shutdown: broadcast::Sender<Signal>,
        task: JoinHandle<()>,
    }

    fn start(capacity: usize) -> Harness {
        let (client, server) = tokio::io::duplex(capacity);
        let (requests, incoming) = mpsc::channel(REQUEST_CAPACITY);
        let pending = Arc::new(PendingQueue::new());
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let task = SendLoop::new(
            FrameWriter::new(client),
            incoming,
            pending.clone(),
            shutdown_rx,
        )
        .spawn();

        Harness {
            server,
            requests,
            pending,
            shutdown,
            task,
        }
    }

    async fn submit(harness: &Harness, command: Command, bytes: &[u8]) -> PendingReply {
        let (completion, waiter) = oneshot::channel::<Result<Reply>>();
        harness
            .requests
            .send(Outgoing {
                command,
                bytes: bytes.to_vec(),
                completion,
            })
            .await
            .unwrap();
        waiter
    }

    #[tokio::test]
    async fn test_commands_are_written_in_order() {
        let mut harness = start(1024);
        let first = submit(&harness, Command::SaveConf, b"SAVECONF\r\n").await;
        let second = submit(
            &harness,
            Command::GetInfo(vec!["version".into()]),
            b"GETINFO version\r\n",
        )
        .await;

        let mut received = [0u8; 27];
        harness.server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"SAVECONF\r\nGETINFO version\r\n");
        assert_eq!(harness.pending.len(), 2);

        let ok = Reply::new(Frame::Text {
            lines: vec![ReplyLine::new(250, "OK")],
        });
        harness.pending.resolve_oldest(Ok(ok.clone())).unwrap();
        harness.pending.resolve_oldest(Ok(ok)).unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_a_stalled_write() {
        let harness = start(16);
        let waiter = submit(
            &harness,
            Command::PostDescriptor(String::new()),
            &[b'x'; 4096],
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        harness.shutdown.send(Signal::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(1), harness.task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(ControlError::ConnectionClosed)));
        assert!(harness.pending.is_closed());
        assert!(harness.requests.is_closed());
    }

    #[tokio::test]
    async fn test_commands_after_close_are_refused() {
        let harness = start(1024);
        harness.pending.close();

        let waiter = submit(&harness, Command::SaveConf, b"SAVECONF\r\n").await;
        assert!(matches!(waiter.await.unwrap(), Err(ControlError::ConnectionClosed)));
    }
}
