//! The background receive loop
//!
//! One task per connection owns the read half. It cuts frames, hands
//! replies to the oldest waiting command and events to the registered
//! handler, until the stream ends, framing breaks or shutdown is signalled.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::{
    io::AsyncRead,
    sync::broadcast,
    task::JoinHandle,
};
use torctl_common::{Signal, internal};

use crate::{
    ControlError,
    correlator::PendingQueue,
    dialect::Codec,
    dispatch::{EventHandler, dispatch},
    frame::Frame,
    transport::FrameReader,
};

/// Where registered event handlers live; replaced by `register_handler`
pub type HandlerSlot = RwLock<Option<Arc<dyn EventHandler>>>;

#[derive(Debug)]
enum LoopState {
    Idle,
    ReadingFrame,
    Classifying(Frame),
    Dispatching(Frame),
    Closed,
}

pub struct ReceiveLoop<R> {
    reader: FrameReader<R>,
    codec: &'static dyn Codec,
    pending: Arc<PendingQueue>,
    handler: Arc<HandlerSlot>,
    shutdown: broadcast::Receiver<Signal>,
    /// Buffered bytes have not been tried since they arrived
    unparsed: bool,
}

impl<R> ReceiveLoop<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(
        reader: FrameReader<R>,
        codec: &'static dyn Codec,
        pending: Arc<PendingQueue>,
        handler: Arc<HandlerSlot>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Self {
        let unparsed = reader.has_buffered();
        Self {
            reader,
            codec,
            pending,
            handler,
            shutdown,
            unparsed,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut state = LoopState::Idle;

        loop {
            state = match state {
                LoopState::Idle => self.idle().await,
                LoopState::ReadingFrame => self.read_frame(),
                LoopState::Classifying(frame) => self.classify(frame),
                LoopState::Dispatching(frame) => {
                    self.dispatch(&frame);
                    LoopState::Idle
                }
                LoopState::Closed => break,
            };
        }

        self.pending.close();
        internal!(level = DEBUG, "Receive loop stopped");
    }

    async fn idle(&mut self) -> LoopState {
        if self.unparsed {
            return LoopState::ReadingFrame;
        }

        tokio::select! {
            signal = self.shutdown.recv() => {
                internal!(level = DEBUG, "Receive loop shutting down ({signal:?})");
                LoopState::Closed
            }
            filled = self.reader.fill() => match filled {
                Ok(()) => {
                    self.unparsed = true;
                    LoopState::ReadingFrame
                }
                Err(error) => Self::fail(&error),
            }
        }
    }

    fn read_frame(&mut self) -> LoopState {
        match self.reader.try_frame() {
            Ok(Some(frame)) => LoopState::Classifying(frame),
            Ok(None) => {
                self.unparsed = false;
                LoopState::Idle
            }
            Err(error) => Self::fail(&error),
        }
    }

    fn classify(&self, frame: Frame) -> LoopState {
        if self.codec.is_event(&frame) {
            return LoopState::Dispatching(frame);
        }

        let result = self.codec.check_reply(frame);
        match self.pending.resolve_oldest(result) {
            Ok(()) => LoopState::Idle,
            Err(error) => Self::fail(&error),
        }
    }

    fn dispatch(&self, frame: &Frame) {
        let handler = self.handler.read().clone();
        let decoded = self.codec.decode_event(frame);

        match (handler, decoded) {
            (Some(handler), Ok(event)) => dispatch(handler.as_ref(), &event),
            (Some(handler), Err(error)) => handler.event_error(&error),
            (None, Ok(event)) => {
                internal!("No handler registered, dropping {:?} event", event.kind());
            }
            (None, Err(error)) => {
                tracing::warn!(%error, "Dropping malformed event");
            }
        }
    }

    fn fail(error: &ControlError) -> LoopState {
        match error {
            ControlError::ConnectionClosed => {
                internal!(level = DEBUG, "Control port closed the connection");
            }
            error => {
                internal!(level = WARN, "Receive loop failed: {error}");
            }
        }
        LoopState::Closed
    }
}
