//! Matching replies to the commands that caused them
//!
//! The protocol has no request ids: the n-th reply answers the n-th command.
//! The send loop pushes each completion slot just before it writes the
//! command, so the queue order is always the order commands hit the wire.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{ControlError, Result, reply::Reply};

pub type Completion = oneshot::Sender<Result<Reply>>;
pub type PendingReply = oneshot::Receiver<Result<Reply>>;

#[derive(Debug, Default)]
struct Queue {
    waiting: VecDeque<Completion>,
    closed: bool,
}

/// FIFO of commands awaiting their reply
#[derive(Debug, Default)]
pub struct PendingQueue {
    inner: Mutex<Queue>,
}

impl PendingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command about to be sent
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ConnectionClosed` once the queue is closed
    pub fn enqueue(&self) -> Result<PendingReply> {
        let (sender, receiver) = oneshot::channel();
        if self.push(sender) {
            Ok(receiver)
        } else {
            Err(ControlError::ConnectionClosed)
        }
    }

    /// Queue an existing completion slot
    ///
    /// Returns false, after failing `completion` with `ConnectionClosed`,
    /// once the queue is closed.
    #[must_use]
    pub fn push(&self, completion: Completion) -> bool {
        let mut queue = self.inner.lock();
        if queue.closed {
            drop(queue);
            let _ = completion.send(Err(ControlError::ConnectionClosed));
            return false;
        }

        queue.waiting.push_back(completion);
        true
    }

    /// Hand `result` to the oldest waiting command
    ///
    /// A waiter that gave up (timed out or was dropped) still consumes its
    /// reply, so later replies stay aligned.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if no command is waiting
    pub fn resolve_oldest(&self, result: Result<Reply>) -> Result<()> {
        let completion = self
            .inner
            .lock()
            .waiting
            .pop_front()
            .ok_or_else(|| ControlError::protocol("reply received with no command pending"))?;

        if completion.send(result).is_err() {
            tracing::debug!("Discarding reply for an abandoned command");
        }
        Ok(())
    }

    /// Refuse new commands and fail every waiting one with
    /// `ConnectionClosed`
    pub fn close(&self) {
        let waiting = {
            let mut queue = self.inner.lock();
            queue.closed = true;
            std::mem::take(&mut queue.waiting)
        };

        for completion in waiting {
            let _ = completion.send(Err(ControlError::ConnectionClosed));
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, ReplyLine};

    fn reply(text: &str) -> Reply {
        Reply::new(Frame::Text {
            lines: vec![ReplyLine::new(250, text)],
        })
    }

    #[tokio::test]
    async fn test_replies_resolve_in_fifo_order() {
        let queue = PendingQueue::new();
        let first = queue.enqueue().unwrap();
        let second = queue.enqueue().unwrap();

        queue.resolve_oldest(Ok(reply("A"))).unwrap();
        queue.resolve_oldest(Ok(reply("B"))).unwrap();

        assert_eq!(first.await.unwrap().unwrap().message(), "A");
        assert_eq!(second.await.unwrap().unwrap().message(), "B");
    }

    #[test]
    fn test_unsolicited_reply_is_protocol_error() {
        let queue = PendingQueue::new();
        assert!(matches!(
            queue.resolve_oldest(Ok(reply("OK"))),
            Err(ControlError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_still_consumes_reply() {
        let queue = PendingQueue::new();
        drop(queue.enqueue().unwrap());
        let live = queue.enqueue().unwrap();

        queue.resolve_oldest(Ok(reply("late"))).unwrap();
        queue.resolve_oldest(Ok(reply("mine"))).unwrap();

        assert_eq!(live.await.unwrap().unwrap().message(), "mine");
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let queue = PendingQueue::new();
        let first = queue.enqueue().unwrap();
        let second = queue.enqueue().unwrap();

        queue.close();

        assert!(matches!(first.await.unwrap(), Err(ControlError::ConnectionClosed)));
        assert!(matches!(second.await.unwrap(), Err(ControlError::ConnectionClosed)));
        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert!(matches!(queue.enqueue(), Err(ControlError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_push_after_close_fails_the_slot() {
        let queue = PendingQueue::new();
        let (open, waiting) = oneshot::channel();
        assert!(queue.push(open));
        assert_eq!(queue.len(), 1);

        queue.close();
        let (late, refused) = oneshot::channel();
        assert!(!queue.push(late));

        assert!(matches!(waiting.await.unwrap(), Err(ControlError::ConnectionClosed)));
        assert!(matches!(refused.await.unwrap(), Err(ControlError::ConnectionClosed)));
        assert!(queue.is_empty());
    }
}
