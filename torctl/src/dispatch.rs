//! Routing decoded events to caller callbacks
//!
//! Handlers run on the receive loop's task. A handler that needs to issue a
//! command must do so from a spawned task on a cloned
//! [`Connection`](crate::Connection), otherwise the loop cannot deliver the
//! reply it is waiting for.

use tokio::sync::mpsc;
use torctl_common::{incoming, internal};

use crate::{
    ControlError,
    event::{
        AddressMapped, Bandwidth, CircuitStatus, Event, EventKind, LogMessage, NewDescriptor,
        OrConnStatus, StreamStatus, UnknownEvent,
    },
};

/// Per-category event callbacks
///
/// Every method defaults to doing nothing, so implementors only override
/// the categories they subscribed to.
pub trait EventHandler: Send + Sync {
    fn circ_status(&self, _event: &CircuitStatus) {}

    fn stream_status(&self, _event: &StreamStatus) {}

    fn or_conn_status(&self, _event: &OrConnStatus) {}

    fn bandwidth(&self, _event: &Bandwidth) {}

    fn new_desc(&self, _event: &NewDescriptor) {}

    fn msg(&self, _event: &LogMessage) {}

    fn address_mapped(&self, _event: &AddressMapped) {}

    /// Called for events of a type this client does not decode
    fn unknown_event(&self, _event: &UnknownEvent) {}

    /// Called when a correctly framed event could not be decoded
    fn event_error(&self, error: &ControlError) {
        tracing::warn!(%error, "Dropping malformed event");
    }
}

type Route = fn(&dyn EventHandler, &Event);

/// One entry per [`EventKind`], in declaration order
static ROUTES: [Route; EventKind::COUNT] = [
    |handler, event| {
        if let Event::CircuitStatus(e) = event {
            handler.circ_status(e);
        }
    },
    |handler, event| {
        if let Event::StreamStatus(e) = event {
            handler.stream_status(e);
        }
    },
    |handler, event| {
        if let Event::OrConnStatus(e) = event {
            handler.or_conn_status(e);
        }
    },
    |handler, event| {
        if let Event::Bandwidth(e) = event {
            handler.bandwidth(e);
        }
    },
    |handler, event| {
        if let Event::NewDescriptor(e) = event {
            handler.new_desc(e);
        }
    },
    |handler, event| {
        if let Event::LogMessage(e) = event {
            handler.msg(e);
        }
    },
    |handler, event| {
        if let Event::AddressMapped(e) = event {
            handler.address_mapped(e);
        }
    },
    |handler, event| {
        if let Event::Unknown(e) = event {
            handler.unknown_event(e);
        }
    },
];

/// Invoke the handler method for `event`'s category
pub fn dispatch(handler: &dyn EventHandler, event: &Event) {
    ROUTES[event.kind() as usize](handler, event);
}

/// Forwards every event into a bounded channel
///
/// Use this to move event processing off the receive loop. Events are
/// dropped, with a warning, while the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::Sender<Event>,
}

impl ChannelHandler {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    fn forward(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(kind = ?event.kind(), "Event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                internal!(level = DEBUG, "Event receiver dropped");
            }
        }
    }
}

impl EventHandler for ChannelHandler {
    fn circ_status(&self, event: &CircuitStatus) {
        self.forward(Event::CircuitStatus(event.clone()));
    }

    fn stream_status(&self, event: &StreamStatus) {
        self.forward(Event::StreamStatus(event.clone()));
    }

    fn or_conn_status(&self, event: &OrConnStatus) {
        self.forward(Event::OrConnStatus(event.clone()));
    }

    fn bandwidth(&self, event: &Bandwidth) {
        self.forward(Event::Bandwidth(*event));
    }

    fn new_desc(&self, event: &NewDescriptor) {
        self.forward(Event::NewDescriptor(event.clone()));
    }

    fn msg(&self, event: &LogMessage) {
        self.forward(Event::LogMessage(event.clone()));
    }

    fn address_mapped(&self, event: &AddressMapped) {
        self.forward(Event::AddressMapped(event.clone()));
    }

    fn unknown_event(&self, event: &UnknownEvent) {
        self.forward(Event::Unknown(event.clone()));
    }
}

/// Writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn circ_status(&self, event: &CircuitStatus) {
        incoming!(
            "CIRC {} {} {}",
            event.id,
            event.status,
            event.path.join(",")
        );
    }

    fn stream_status(&self, event: &StreamStatus) {
        incoming!(
            "STREAM {} {} {} {}",
            event.id,
            event.status,
            event.circuit,
            event.target
        );
    }

    fn or_conn_status(&self, event: &OrConnStatus) {
        incoming!("ORCONN {} {}", event.target, event.status);
    }

    fn bandwidth(&self, event: &Bandwidth) {
        incoming!("BW read={} written={}", event.read, event.written);
    }

    fn new_desc(&self, event: &NewDescriptor) {
        incoming!("NEWDESC {}", event.identities.join(" "));
    }

    fn msg(&self, event: &LogMessage) {
        incoming!("{} {}", event.severity, event.message);
    }

    fn address_mapped(&self, event: &AddressMapped) {
        match event.expiry {
            Some(expiry) => incoming!("ADDRMAP {} {} {expiry}", event.from, event.to),
            None => incoming!("ADDRMAP {} {} NEVER", event.from, event.to),
        }
    }

    fn unknown_event(&self, event: &UnknownEvent) {
        incoming!(
            "{} {}",
            event.kind,
            String::from_utf8_lossy(&event.body)
        );
    }

    fn event_error(&self, error: &ControlError) {
        incoming!(level = WARN, "Malformed event: {error}");
    }
}
