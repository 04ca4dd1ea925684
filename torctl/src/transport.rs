//! Framed reads and writes over the control-port stream
//!
//! The stream is split once: the reader half belongs to the receive loop,
//! the writer half belongs to the send loop.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use torctl_common::{incoming, outgoing};

use crate::{ControlError, Result, command::Command, dialect::Codec, frame::Frame};

/// Initial size of the read buffer
const BUFFER_SIZE: usize = 8192;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffers reads until the codec can cut a complete frame
pub struct FrameReader<R> {
    reader: R,
    codec: &'static dyn Codec,
    buffer: Vec<u8>,
    buffer_pos: usize,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `reader`, starting with bytes that were already read from it
    pub fn new(
        reader: R,
        codec: &'static dyn Codec,
        max_frame_size: usize,
        leftover: &[u8],
    ) -> Self {
        let mut buffer = vec![0u8; BUFFER_SIZE.max(leftover.len())];
        buffer[..leftover.len()].copy_from_slice(leftover);
        Self {
            reader,
            codec,
            buffer,
            buffer_pos: leftover.len(),
            max_frame_size,
        }
    }

    /// Whether unparsed bytes are waiting in the buffer
    #[must_use]
    pub const fn has_buffered(&self) -> bool {
        self.buffer_pos > 0
    }

    /// Cut one frame from the buffered bytes, if a complete one is there
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if the buffered bytes are malformed
    pub fn try_frame(&mut self) -> Result<Option<Frame>> {
        let Some((frame, consumed)) = self
            .codec
            .parse_frame(&self.buffer[..self.buffer_pos], self.max_frame_size)?
        else {
            return Ok(None);
        };

        self.buffer.copy_within(consumed..self.buffer_pos, 0);
        self.buffer_pos -= consumed;

        incoming!(
            "Frame {:#06x} ({} bytes)",
            frame.code(),
            frame.payload_len()
        );
        Ok(Some(frame))
    }

    /// Read more bytes from the stream into the buffer
    ///
    /// Cancel safe: if the future is dropped no bytes are lost.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ConnectionClosed` on end of stream, or
    /// `ControlError::Transport` if the read fails
    pub async fn fill(&mut self) -> Result<()> {
        if self.buffer_pos >= self.buffer.len() {
            let new_size = self.buffer.len() * 2;
            if new_size > self.max_frame_size.saturating_mul(2).max(BUFFER_SIZE * 2) {
                return Err(ControlError::protocol(format!(
                    "frame too large (exceeds {} bytes)",
                    self.max_frame_size
                )));
            }
            self.buffer.resize(new_size, 0);
        }

        let n = self.reader.read(&mut self.buffer[self.buffer_pos..]).await?;
        if n == 0 {
            return Err(ControlError::ConnectionClosed);
        }
        self.buffer_pos += n;
        Ok(())
    }

    /// Wait for the next complete frame
    ///
    /// # Errors
    ///
    /// Returns any framing or transport error; see [`Self::fill`]
    pub async fn receive_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.try_frame()? {
                return Ok(frame);
            }
            self.fill().await?;
        }
    }
}

/// Writes complete frames
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one encoded command and flush it
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Transport` if the write fails
    pub async fn send(&mut self, command: &Command, bytes: &[u8]) -> Result<()> {
        if command.is_sensitive() {
            outgoing!("{} <redacted> ({} bytes)", command.name(), bytes.len());
        } else {
            outgoing!("{}", String::from_utf8_lossy(bytes).trim_end());
        }

        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the write half
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Transport` if the shutdown fails
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
