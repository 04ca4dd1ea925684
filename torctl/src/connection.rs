//! A live session with a control port
//!
//! [`Connection`] is a cheap handle; clones share one transport, one
//! receive loop, one send loop and one pending-command queue. Commands from
//! any clone are written by the send loop one at a time, so their replies
//! come back in the order the commands were sent.

use std::{
    fmt::{Debug, Formatter},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use torctl_common::{Signal, internal};

use crate::{
    ControlConfig, ControlError, Endpoint, Result,
    auth::Credential,
    command::{Command, ProcessSignal},
    correlator::{PendingQueue, PendingReply},
    sender::{Outgoing, REQUEST_CAPACITY, SendLoop},
    detect::detect,
    dialect::{Codec, Dialect},
    dispatch::EventHandler,
    event::EventCategory,
    receiver::{HandlerSlot, ReceiveLoop},
    reply::Reply,
    transport::{BoxedReader, BoxedWriter, FrameReader, FrameWriter},
};

struct Inner {
    dialect: Dialect,
    codec: &'static dyn Codec,
    requests: mpsc::Sender<Outgoing>,
    pending: Arc<PendingQueue>,
    handler: Arc<HandlerSlot>,
    shutdown: broadcast::Sender<Signal>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    authenticated: AtomicBool,
    subscribed: parking_lot::Mutex<Vec<EventCategory>>,
    config: ControlConfig,
}

/// Handle to a control-port session
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.config.endpoint)
            .field("dialect", &self.inner.dialect)
            .field("authenticated", &self.is_authenticated())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect to `endpoint` with default settings
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Transport` if the TCP connection fails, or any
    /// error from version detection
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        Self::connect_with(ControlConfig::default().with_endpoint(endpoint.clone())).await
    }

    /// Connect to the endpoint named in `config`
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Timeout` if connecting takes longer than the
    /// configured connect timeout, `ControlError::Transport` if it fails, or
    /// any error from version detection
    pub async fn connect_with(config: ControlConfig) -> Result<Self> {
        let endpoint = &config.endpoint;
        internal!(level = DEBUG, "Connecting to control port {endpoint}");

        let stream = tokio::time::timeout(
            config.timeouts.connect_timeout(),
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| ControlError::Timeout)??;
        stream.set_nodelay(true)?;

        Self::from_stream(stream, config).await
    }

    /// Start a session over an already connected stream
    ///
    /// Runs version detection, then spawns the receive and send loops. Must
    /// be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` or `ControlError::Timeout` if the
    /// dialect cannot be determined
    pub async fn from_stream<S>(mut stream: S, config: ControlConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (dialect, leftover) = detect(
            &mut stream,
            config.detect_window,
            config.timeouts.detect_timeout(),
        )
        .await?;
        let codec = dialect.codec();

        let (reader, writer) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);

        let pending = Arc::new(PendingQueue::new());
        let handler: Arc<HandlerSlot> = Arc::new(parking_lot::RwLock::new(None));
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let (requests, incoming) = mpsc::channel(REQUEST_CAPACITY);

        let receiver = ReceiveLoop::new(
            FrameReader::new(reader, codec, config.max_frame_size, &leftover),
            codec,
            pending.clone(),
            handler.clone(),
            shutdown_rx,
        )
        .spawn();
        let sender = SendLoop::new(
            FrameWriter::new(writer),
            incoming,
            pending.clone(),
            shutdown.subscribe(),
        )
        .spawn();

        internal!("Control connection ready, speaking {dialect}");

        Ok(Self {
            inner: Arc::new(Inner {
                dialect,
                codec,
                requests,
                pending,
                handler,
                shutdown,
                tasks: parking_lot::Mutex::new(vec![receiver, sender]),
                authenticated: AtomicBool::new(false),
                subscribed: parking_lot::Mutex::new(Vec::new()),
                config,
            }),
        })
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::Acquire)
    }

    /// Categories accepted by the last successful `set_events`
    #[must_use]
    pub fn subscribed_events(&self) -> Vec<EventCategory> {
        self.inner.subscribed.lock().clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// Replace the handler events are dispatched to
    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    /// Encode a command and hand it to the send loop, returning the slot its
    /// reply will land in
    ///
    /// Once this returns the command is written in full even if the caller
    /// stops waiting.
    async fn submit(&self, command: Command) -> Result<PendingReply> {
        let bytes = self.inner.codec.encode_command(&command)?;
        if self.inner.pending.is_closed() {
            return Err(ControlError::ConnectionClosed);
        }

        let (completion, waiter) = oneshot::channel();
        self.inner
            .requests
            .send(Outgoing {
                command,
                bytes,
                completion,
            })
            .await
            .map_err(|_| ControlError::ConnectionClosed)?;
        Ok(waiter)
    }

    async fn wait(waiter: PendingReply, timeout: Option<Duration>) -> Result<Reply> {
        let received = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, waiter)
                .await
                .map_err(|_| ControlError::Timeout)?,
            None => waiter.await,
        };
        received.map_err(|_| ControlError::ConnectionClosed)?
    }

    /// Send a command and wait for its reply
    ///
    /// Waits indefinitely unless the configuration sets a command timeout.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the peer rejects the command,
    /// `ControlError::ConnectionClosed` if the connection closes first, or
    /// `ControlError::Unsupported` if the dialect cannot express it
    pub async fn send_command(&self, command: Command) -> Result<Reply> {
        let waiter = self.submit(command).await?;
        Self::wait(waiter, self.inner.config.timeouts.command_timeout()).await
    }

    /// Send a command and wait at most `timeout` for its reply
    ///
    /// On timeout the command stays pending; its reply is consumed and
    /// discarded when it arrives.
    ///
    /// # Errors
    ///
    /// As [`Self::send_command`], plus `ControlError::Timeout`
    pub async fn send_command_timeout(&self, command: Command, timeout: Duration) -> Result<Reply> {
        let waiter = self.submit(command).await?;
        Self::wait(waiter, Some(timeout)).await
    }

    /// Authenticate with a password
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the password is rejected
    pub async fn authenticate(&self, secret: &str) -> Result<()> {
        self.authenticate_with(Credential::Password(secret.to_string()))
            .await
    }

    /// Authenticate with the contents of a cookie file
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Transport` if the file cannot be read, or
    /// `ControlError::ErrorReply` if the cookie is rejected
    pub async fn authenticate_cookie(&self, path: impl AsRef<Path>) -> Result<()> {
        let credential = Credential::cookie_from_file(path).await?;
        self.authenticate_with(credential).await
    }

    /// Authenticate against a control port with no authentication configured
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the peer requires a credential
    pub async fn authenticate_none(&self) -> Result<()> {
        self.authenticate_with(Credential::None).await
    }

    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the credential is rejected
    pub async fn authenticate_with(&self, credential: Credential) -> Result<()> {
        self.send_command(Command::Authenticate(credential)).await?;
        self.inner.authenticated.store(true, Ordering::Release);
        internal!(level = DEBUG, "Authenticated");
        Ok(())
    }

    /// Fetch one information value
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` for unknown keys, or
    /// `ControlError::Protocol` if the reply omits the key
    pub async fn get_info(&self, key: &str) -> Result<String> {
        self.get_info_many(&[key])
            .await?
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
            .ok_or_else(|| ControlError::protocol(format!("GETINFO reply is missing {key}")))
    }

    /// Fetch several information values in one round trip
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` for unknown keys
    pub async fn get_info_many(&self, keys: &[&str]) -> Result<Vec<(String, String)>> {
        let keys = keys.iter().map(ToString::to_string).collect();
        let reply = self.send_command(Command::GetInfo(keys)).await?;
        self.inner.codec.info_values(&reply)
    }

    /// Fetch one configuration value
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` for unknown options, or
    /// `ControlError::Protocol` if the reply omits the option
    pub async fn get_option(&self, key: &str) -> Result<String> {
        self.get_options(&[key])
            .await?
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
            .ok_or_else(|| ControlError::protocol(format!("GETCONF reply is missing {key}")))
    }

    /// Fetch several configuration values; options with several values
    /// appear once per value
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` for unknown options
    pub async fn get_options(&self, keys: &[&str]) -> Result<Vec<(String, String)>> {
        let keys = keys.iter().map(ToString::to_string).collect();
        let reply = self.send_command(Command::GetConf(keys)).await?;
        self.inner.codec.conf_values(&reply)
    }

    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the option or value is rejected
    pub async fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.set_options(&[(key, value)]).await
    }

    /// Set several options atomically
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if any option or value is rejected
    pub async fn set_options(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let pairs = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), Some((*value).to_string())))
            .collect();
        self.send_command(Command::SetConf(pairs)).await?;
        Ok(())
    }

    /// Return an option to its default value
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the option is unknown
    pub async fn reset_option(&self, key: &str) -> Result<()> {
        self.send_command(Command::SetConf(vec![(key.to_string(), None)]))
            .await?;
        Ok(())
    }

    /// Subscribe to exactly `categories`, replacing any earlier subscription
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Unsupported` if a category has no encoding in
    /// the negotiated dialect, or `ControlError::ErrorReply` if the peer
    /// refuses
    pub async fn set_events(&self, categories: &[EventCategory]) -> Result<()> {
        self.send_command(Command::SetEvents(categories.to_vec()))
            .await?;
        *self.inner.subscribed.lock() = categories.to_vec();
        Ok(())
    }

    /// Write the running configuration back to disk
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the peer cannot save
    pub async fn save_conf(&self) -> Result<()> {
        self.send_command(Command::SaveConf).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the signal is refused
    pub async fn signal(&self, signal: ProcessSignal) -> Result<()> {
        self.send_command(Command::Signal(signal)).await?;
        Ok(())
    }

    /// Install address mappings, returning the mappings actually made
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if a mapping is refused
    pub async fn map_address(&self, pairs: &[(&str, &str)]) -> Result<Vec<(String, String)>> {
        let pairs = pairs
            .iter()
            .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
            .collect();
        let reply = self.send_command(Command::MapAddress(pairs)).await?;
        self.inner.codec.mapped_addresses(&reply)
    }

    /// Extend `circuit` (or build a new one, for circuit 0) through `path`,
    /// returning the circuit id
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the circuit cannot be extended
    pub async fn extend_circuit(&self, circuit: u32, path: &[&str]) -> Result<u32> {
        let path = path.iter().map(ToString::to_string).collect();
        let reply = self
            .send_command(Command::ExtendCircuit { circuit, path })
            .await?;
        self.inner.codec.extended_circuit(&reply)
    }

    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the stream or circuit is unknown
    pub async fn attach_stream(&self, stream: u32, circuit: u32) -> Result<()> {
        self.send_command(Command::AttachStream { stream, circuit })
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the stream is unknown
    pub async fn redirect_stream(&self, stream: u32, address: &str) -> Result<()> {
        self.send_command(Command::RedirectStream {
            stream,
            address: address.to_string(),
        })
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the stream is unknown
    pub async fn close_stream(&self, stream: u32, reason: u8) -> Result<()> {
        self.send_command(Command::CloseStream { stream, reason })
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the circuit is unknown
    pub async fn close_circuit(&self, circuit: u32, if_unused: bool) -> Result<()> {
        self.send_command(Command::CloseCircuit { circuit, if_unused })
            .await?;
        Ok(())
    }

    /// Upload a router descriptor, returning the peer's response text
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` if the descriptor is rejected
    pub async fn post_descriptor(&self, descriptor: &str) -> Result<String> {
        let reply = self
            .send_command(Command::PostDescriptor(descriptor.to_string()))
            .await?;
        Ok(reply.message())
    }

    /// Stop both background loops and close the transport
    ///
    /// Every command still waiting for a reply fails with
    /// `ControlError::ConnectionClosed`, as does every later command. A write
    /// stalled on an unresponsive peer is abandoned rather than waited for.
    pub async fn close(&self) {
        let _ = self.inner.shutdown.send(Signal::Shutdown);

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        let timeout = self.inner.config.timeouts.shutdown_timeout();
        for task in tasks {
            if tokio::time::timeout(timeout, task).await.is_err() {
                internal!(level = WARN, "Connection task did not stop within {timeout:?}");
            }
        }

        self.inner.pending.close();
    }
}
