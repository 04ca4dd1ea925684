//! Scripted control-port peers for integration tests
//!
//! Each peer owns the server end of an in-memory duplex stream. Tests drive
//! it step by step: read what the client sent, then write back whatever the
//! scenario calls for.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream},
    sync::mpsc,
};
use torctl::{
    AddressMapped, Bandwidth, CircuitStatus, Connection, ControlConfig, ControlError, Event,
    EventHandler, LogMessage, NewDescriptor, OrConnStatus, StreamStatus, UnknownEvent,
    detect::PROBE,
    dialect::binary::{HEADER_LEN, encode_message, msg},
};

const DUPLEX_CAPACITY: usize = 256 * 1024;
const WAIT: Duration = Duration::from_secs(2);

/// Peer speaking the line-oriented dialect
pub struct TextPeer {
    stream: BufReader<DuplexStream>,
}

impl TextPeer {
    /// Read the version probe and answer it the way a text-only peer does
    pub async fn accept(&mut self) {
        let mut probe = [0u8; 4];
        self.stream.read_exact(&mut probe).await.unwrap();
        assert_eq!(probe, PROBE);
        self.send("510 Unrecognized command \"\"\r\n").await;
    }

    /// Next command line from the client, without its line ending
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = tokio::time::timeout(WAIT, self.stream.read_line(&mut line))
            .await
            .expect("client sent nothing")
            .unwrap();
        assert_ne!(n, 0, "client closed the stream");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    pub async fn expect(&mut self, line: &str) {
        assert_eq!(self.read_line().await, line);
    }

    pub async fn send(&mut self, text: &str) {
        self.stream.get_mut().write_all(text.as_bytes()).await.unwrap();
        self.stream.get_mut().flush().await.unwrap();
    }

    /// Expect `line`, then answer it with `reply`
    pub async fn respond(&mut self, line: &str, reply: &str) {
        self.expect(line).await;
        self.send(reply).await;
    }

    /// True once the client has closed its end
    pub async fn is_closed(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(
            tokio::time::timeout(WAIT, self.stream.read_to_end(&mut rest)).await,
            Ok(Ok(_))
        )
    }
}

/// Peer speaking the length-prefixed dialect
pub struct BinaryPeer {
    stream: DuplexStream,
}

impl BinaryPeer {
    /// Read the version probe and acknowledge it with an empty DONE
    pub async fn accept(&mut self) {
        let mut probe = [0u8; 4];
        self.stream.read_exact(&mut probe).await.unwrap();
        assert_eq!(probe, PROBE);
        self.send(msg::DONE, &[]).await;
    }

    /// Next message from the client as `(type, body)`
    pub async fn read_message(&mut self) -> (u16, Vec<u8>) {
        let mut header = [0u8; HEADER_LEN];
        tokio::time::timeout(WAIT, self.stream.read_exact(&mut header))
            .await
            .expect("client sent nothing")
            .unwrap();
        let len = usize::from(u16::from_be_bytes([header[0], header[1]]));
        let kind = u16::from_be_bytes([header[2], header[3]]);
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.unwrap();
        (kind, body)
    }

    pub async fn expect(&mut self, kind: u16, body: &[u8]) {
        let (received_kind, received_body) = self.read_message().await;
        assert_eq!(received_kind, kind, "message type");
        assert_eq!(received_body, body, "message body");
    }

    pub async fn send(&mut self, kind: u16, body: &[u8]) {
        self.send_raw(&encode_message(kind, body)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn done(&mut self) {
        self.send(msg::DONE, &[]).await;
    }
}

pub async fn text_session(config: ControlConfig) -> (Connection, TextPeer) {
    text_session_with_capacity(config, DUPLEX_CAPACITY).await
}

/// Text session over a pipe holding at most `capacity` unread bytes, so a
/// peer that stops reading stalls the client's writes
pub async fn text_session_with_capacity(
    config: ControlConfig,
    capacity: usize,
) -> (Connection, TextPeer) {
    let (client, server) = tokio::io::duplex(capacity);
    let mut peer = TextPeer {
        stream: BufReader::new(server),
    };
    let (connection, ()) = tokio::join!(Connection::from_stream(client, config), peer.accept());
    (connection.unwrap(), peer)
}

pub async fn binary_session(config: ControlConfig) -> (Connection, BinaryPeer) {
    let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
    let mut peer = BinaryPeer { stream: server };
    let (connection, ()) = tokio::join!(Connection::from_stream(client, config), peer.accept());
    (connection.unwrap(), peer)
}

/// What the recorder saw, in arrival order
#[derive(Debug, PartialEq)]
pub enum Observed {
    Event(Event),
    Error(String),
}

/// Handler forwarding every callback to a channel the test can await
pub struct Recorder {
    observed: mpsc::UnboundedSender<Observed>,
}

impl Recorder {
    pub fn attach(connection: &Connection) -> Observations {
        let (observed, receiver) = mpsc::unbounded_channel();
        connection.register_handler(Arc::new(Self { observed }));
        Observations { receiver }
    }

    fn record(&self, event: Event) {
        let _ = self.observed.send(Observed::Event(event));
    }
}

impl EventHandler for Recorder {
    fn circ_status(&self, event: &CircuitStatus) {
        self.record(Event::CircuitStatus(event.clone()));
    }

    fn stream_status(&self, event: &StreamStatus) {
        self.record(Event::StreamStatus(event.clone()));
    }

    fn or_conn_status(&self, event: &OrConnStatus) {
        self.record(Event::OrConnStatus(event.clone()));
    }

    fn bandwidth(&self, event: &Bandwidth) {
        self.record(Event::Bandwidth(*event));
    }

    fn new_desc(&self, event: &NewDescriptor) {
        self.record(Event::NewDescriptor(event.clone()));
    }

    fn msg(&self, event: &LogMessage) {
        self.record(Event::LogMessage(event.clone()));
    }

    fn address_mapped(&self, event: &AddressMapped) {
        self.record(Event::AddressMapped(event.clone()));
    }

    fn unknown_event(&self, event: &UnknownEvent) {
        self.record(Event::Unknown(event.clone()));
    }

    fn event_error(&self, error: &ControlError) {
        let _ = self.observed.send(Observed::Error(error.to_string()));
    }
}

pub struct Observations {
    receiver: mpsc::UnboundedReceiver<Observed>,
}

impl Observations {
    pub async fn next(&mut self) -> Observed {
        tokio::time::timeout(WAIT, self.receiver.recv())
            .await
            .expect("no event arrived")
            .expect("recorder dropped")
    }

    pub async fn next_event(&mut self) -> Event {
        match self.next().await {
            Observed::Event(event) => event,
            Observed::Error(error) => panic!("expected an event, got error {error}"),
        }
    }

    pub fn is_empty(&mut self) -> bool {
        self.receiver.try_recv().is_err()
    }
}
