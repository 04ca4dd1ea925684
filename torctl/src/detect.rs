//! Protocol version detection
//!
//! A zero-length binary message is sent as a probe. A binary peer answers it
//! with an ERROR or DONE message; a text peer reads the probe as a (bad)
//! command line and answers with a line of its own.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use torctl_common::{incoming, internal, outgoing};

use crate::{
    ControlError, Result,
    dialect::{
        Dialect,
        binary::{HEADER_LEN, msg},
    },
};

/// Empty message of type 0x0D0A: a valid binary header, and a bare CRLF to
/// a text peer
pub const PROBE: [u8; 4] = [0x00, 0x00, 0x0D, 0x0A];

const READ_CHUNK: usize = 512;

/// Decide the dialect from the bytes received so far
///
/// Returns the dialect and whatever followed the probe's answer, or `None`
/// if more bytes are needed.
///
/// # Errors
///
/// Returns `ControlError::Protocol` if `window` bytes arrived without either
/// answer showing up
pub fn classify(buf: &[u8], window: usize) -> Result<Option<(Dialect, Vec<u8>)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    let kind = u16::from_be_bytes([buf[2], buf[3]]);
    if kind == msg::ERROR || kind == msg::DONE {
        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        return Ok(Some((Dialect::Binary, buf[HEADER_LEN + len..].to_vec())));
    }

    if let Some(newline) = buf.iter().take(window).position(|&b| b == b'\n') {
        return Ok(Some((Dialect::Text, buf[newline + 1..].to_vec())));
    }

    if buf.len() >= window {
        return Err(ControlError::protocol(format!(
            "no protocol version answer within {window} bytes"
        )));
    }

    Ok(None)
}

/// Probe `stream` and work out which dialect it speaks
///
/// # Errors
///
/// Returns `ControlError::Timeout` if the peer does not answer within
/// `timeout`, `ControlError::Protocol` if it closes the stream or its answer
/// fits neither dialect, or `ControlError::Transport` on I/O failure
pub async fn detect<S>(stream: &mut S, window: usize, timeout: Duration) -> Result<(Dialect, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (dialect, leftover) = tokio::time::timeout(timeout, probe(stream, window))
        .await
        .map_err(|_| ControlError::Timeout)??;

    internal!(
        level = DEBUG,
        "Detected {dialect} control protocol ({} bytes carried over)",
        leftover.len()
    );
    Ok((dialect, leftover))
}

async fn probe<S>(stream: &mut S, window: usize) -> Result<(Dialect, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    outgoing!("Version probe");
    stream.write_all(&PROBE).await?;
    stream.flush().await?;

    let mut received = Vec::with_capacity(window);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(decision) = classify(&received, window)? {
            return Ok(decision);
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ControlError::protocol(
                "connection closed during version detection",
            ));
        }
        incoming!("{n} bytes answering version probe");
        received.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_ack_with_body() {
        let buf = [0x00, 0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x06];
        assert_eq!(
            classify(&buf[..5], 512).unwrap(),
            None,
            "waits for the ack body"
        );
        assert_eq!(
            classify(&buf, 512).unwrap(),
            Some((Dialect::Binary, vec![0x00, 0x06]))
        );
    }

    #[test]
    fn test_done_ack() {
        assert_eq!(
            classify(&[0, 0, 0, 1], 512).unwrap(),
            Some((Dialect::Binary, vec![]))
        );
    }

    #[test]
    fn test_text_answer() {
        let buf = b"510 Unrecognized command \"\"\r\n650 BW 1 2\r\n";
        assert_eq!(
            classify(buf, 512).unwrap(),
            Some((Dialect::Text, b"650 BW 1 2\r\n".to_vec()))
        );
    }

    #[test]
    fn test_needs_four_bytes() {
        assert_eq!(classify(b"51\n", 512).unwrap(), None);
    }

    #[test]
    fn test_gives_up_after_window() {
        let buf = vec![b'x'; 16];
        assert!(matches!(classify(&buf, 16), Err(ControlError::Protocol(_))));
        assert_eq!(classify(&buf[..8], 16).unwrap(), None);
    }

    #[tokio::test]
    async fn test_detect_sends_probe_and_times_out() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let result = detect(&mut client, 512, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ControlError::Timeout)));

        let mut probe = [0u8; 4];
        server.read_exact(&mut probe).await.unwrap();
        assert_eq!(probe, PROBE);
    }

    #[tokio::test]
    async fn test_detect_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let result = detect(&mut client, 512, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
