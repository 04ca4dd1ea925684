//! Binary dialect (version 0)
//!
//! Every message is `[u16 body length][u16 type][body]`, big-endian. Bodies
//! longer than 65535 bytes travel as a FRAGMENTHEADER followed by FRAGMENT
//! messages and are reassembled before anything else sees them.

use crate::{
    ControlError, Result,
    auth::Credential,
    command::Command,
    dialect::{Codec, Dialect, check_argument},
    event::{
        Bandwidth, CircuitStatus, Event, EventCategory, LogMessage, NewDescriptor, OrConnStatus,
        Severity, StreamStatus, UnknownEvent,
    },
    frame::Frame,
    reply::Reply,
};

pub const HEADER_LEN: usize = 4;
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Message types
pub mod msg {
    pub const ERROR: u16 = 0x0000;
    pub const DONE: u16 = 0x0001;
    pub const SETCONF: u16 = 0x0002;
    pub const GETCONF: u16 = 0x0003;
    pub const CONFVALUE: u16 = 0x0004;
    pub const SETEVENTS: u16 = 0x0005;
    pub const EVENT: u16 = 0x0006;
    pub const AUTH: u16 = 0x0007;
    pub const SAVECONF: u16 = 0x0008;
    pub const SIGNAL: u16 = 0x0009;
    pub const MAPADDRESS: u16 = 0x000A;
    pub const GETINFO: u16 = 0x000B;
    pub const INFOVALUE: u16 = 0x000C;
    pub const EXTENDCIRCUIT: u16 = 0x000D;
    pub const ATTACHSTREAM: u16 = 0x000E;
    pub const POSTDESCRIPTOR: u16 = 0x000F;
    pub const FRAGMENTHEADER: u16 = 0x0010;
    pub const FRAGMENT: u16 = 0x0011;
    pub const REDIRECTSTREAM: u16 = 0x0012;
    pub const CLOSESTREAM: u16 = 0x0013;
    pub const CLOSECIRCUIT: u16 = 0x0014;
}

/// Event code of the obsolete log event, delivered at NOTICE
const OBSOLETE_LOG: u16 = 0x0005;

pub const CIRCUIT_STATUS: [&str; 5] = ["LAUNCHED", "BUILT", "EXTENDED", "FAILED", "CLOSED"];
pub const STREAM_STATUS: [&str; 8] = [
    "SENT_CONNECT",
    "SENT_RESOLVE",
    "SUCCEEDED",
    "FAILED",
    "CLOSED",
    "NEW_CONNECT",
    "NEW_RESOLVE",
    "DETACHED",
];
pub const OR_CONN_STATUS: [&str; 4] = ["LAUNCHED", "CONNECTED", "FAILED", "CLOSED"];

/// Default messages for ERROR codes, used when the peer sends none
pub const ERROR_MESSAGES: [&str; 13] = [
    "Unspecified error",
    "Internal error",
    "Unrecognized message type",
    "Syntax error",
    "Unrecognized configuration key",
    "Invalid configuration value",
    "Unrecognized byte code",
    "Unauthorized",
    "Failed authentication attempt",
    "Resource exhausted",
    "No such stream",
    "No such circuit",
    "No such OR",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// The bytes up to the first NUL (or the end), as text
fn nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn status_name(table: &[&str], byte: u8, what: &str) -> Result<String> {
    table
        .get(usize::from(byte))
        .map(|name| (*name).to_string())
        .ok_or_else(|| ControlError::protocol(format!("unknown {what} status {byte}")))
}

fn status_byte(table: &[&str], name: &str, what: &str) -> Result<u8> {
    table
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(name))
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| ControlError::Unsupported(format!("{what} status {name} has no byte code")))
}

fn require(payload: &[u8], len: usize, what: &str) -> Result<()> {
    if payload.len() < len {
        return Err(ControlError::protocol(format!(
            "{what} event needs {len} bytes, got {}",
            payload.len()
        )));
    }
    Ok(())
}

/// Frame `body` as a message of type `kind`, fragmenting it if needed
#[must_use]
pub fn encode_message(kind: u16, body: &[u8]) -> Vec<u8> {
    if body.len() <= MAX_BODY_LEN {
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        push_header(&mut out, body.len(), kind);
        out.extend_from_slice(body);
        return out;
    }

    let mut out = Vec::with_capacity(body.len() + HEADER_LEN * (body.len() / MAX_BODY_LEN + 2));
    let first = MAX_BODY_LEN - 6;
    push_header(&mut out, MAX_BODY_LEN, msg::FRAGMENTHEADER);
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&u32::try_from(body.len()).unwrap_or(u32::MAX).to_be_bytes());
    out.extend_from_slice(&body[..first]);

    for chunk in body[first..].chunks(MAX_BODY_LEN) {
        push_header(&mut out, chunk.len(), msg::FRAGMENT);
        out.extend_from_slice(chunk);
    }
    out
}

fn push_header(out: &mut Vec<u8>, len: usize, kind: u16) {
    // Callers never pass more than MAX_BODY_LEN
    out.extend_from_slice(&u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes());
    out.extend_from_slice(&kind.to_be_bytes());
}

/// Encode an event as a complete EVENT message
///
/// # Errors
///
/// Returns `ControlError::Unsupported` for events the binary dialect has no
/// encoding for (address mappings, unknown text keywords, status names
/// outside the protocol tables, counters above `u32::MAX`)
pub fn encode_event(event: &Event) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let string_field = |body: &mut Vec<u8>, value: &str| {
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    };

    match event {
        Event::CircuitStatus(circuit) => {
            body.extend_from_slice(&0x0001u16.to_be_bytes());
            body.push(status_byte(&CIRCUIT_STATUS, &circuit.status, "circuit")?);
            body.extend_from_slice(&circuit.id.to_be_bytes());
            string_field(&mut body, &circuit.path.join(","));
        }
        Event::StreamStatus(stream) => {
            body.extend_from_slice(&0x0002u16.to_be_bytes());
            body.push(status_byte(&STREAM_STATUS, &stream.status, "stream")?);
            body.extend_from_slice(&stream.id.to_be_bytes());
            string_field(&mut body, &stream.target);
        }
        Event::OrConnStatus(conn) => {
            body.extend_from_slice(&0x0003u16.to_be_bytes());
            body.push(status_byte(&OR_CONN_STATUS, &conn.status, "OR connection")?);
            string_field(&mut body, &conn.target);
        }
        Event::Bandwidth(bandwidth) => {
            let counter = |value: u64| {
                u32::try_from(value).map_err(|_| {
                    ControlError::Unsupported(format!("bandwidth counter {value} exceeds u32"))
                })
            };
            body.extend_from_slice(&0x0004u16.to_be_bytes());
            body.extend_from_slice(&counter(bandwidth.read)?.to_be_bytes());
            body.extend_from_slice(&counter(bandwidth.written)?.to_be_bytes());
        }
        Event::NewDescriptor(descriptor) => {
            body.extend_from_slice(&0x0006u16.to_be_bytes());
            string_field(&mut body, &descriptor.identities.join(","));
        }
        Event::LogMessage(log) => {
            let code = log.severity.category().binary_code().ok_or_else(|| {
                ControlError::Unsupported(format!("no code for {}", log.severity))
            })?;
            body.extend_from_slice(&code.to_be_bytes());
            string_field(&mut body, &log.message);
        }
        Event::AddressMapped(_) => {
            return Err(ControlError::Unsupported(
                "ADDRMAP events have no binary encoding".to_string(),
            ));
        }
        Event::Unknown(unknown) => {
            let code = unknown.kind.parse::<u16>().map_err(|_| {
                ControlError::Unsupported(format!("event type {} is not numeric", unknown.kind))
            })?;
            body.extend_from_slice(&code.to_be_bytes());
            body.extend_from_slice(&unknown.body);
        }
    }

    Ok(encode_message(msg::EVENT, &body))
}

impl BinaryCodec {
    fn reassemble(
        buf: &[u8],
        header_body: &[u8],
        mut offset: usize,
        max_frame_size: usize,
    ) -> Result<Option<(Frame, usize)>> {
        if header_body.len() < 6 {
            return Err(ControlError::protocol("FRAGMENTHEADER shorter than 6 bytes"));
        }
        let kind = read_u16(header_body, 0);
        let total = read_u32(header_body, 2) as usize;
        if total > max_frame_size {
            return Err(ControlError::protocol(format!(
                "fragmented message of {total} bytes exceeds limit of {max_frame_size}"
            )));
        }

        let mut body = Vec::with_capacity(total);
        body.extend_from_slice(&header_body[6..]);

        while body.len() < total {
            if buf.len() < offset + HEADER_LEN {
                return Ok(None);
            }
            let len = usize::from(read_u16(buf, offset));
            let fragment_kind = read_u16(buf, offset + 2);
            if fragment_kind != msg::FRAGMENT {
                return Err(ControlError::protocol(format!(
                    "expected FRAGMENT, got message type {fragment_kind:#06x}"
                )));
            }
            if buf.len() < offset + HEADER_LEN + len {
                return Ok(None);
            }
            body.extend_from_slice(&buf[offset + HEADER_LEN..offset + HEADER_LEN + len]);
            offset += HEADER_LEN + len;
        }

        if body.len() != total {
            return Err(ControlError::protocol(format!(
                "fragments carry {} bytes, header declared {total}",
                body.len()
            )));
        }

        Ok(Some((Frame::Binary { kind, body }, offset)))
    }

    fn expect_kind(reply: &Reply, kind: u16, what: &str) -> Result<()> {
        if reply.code() == kind {
            Ok(())
        } else {
            Err(ControlError::protocol(format!(
                "expected {what}, got message type {:#06x}",
                reply.code()
            )))
        }
    }

    fn lines(body: &[u8]) -> impl Iterator<Item = (String, String)> + '_ {
        body.split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                let line = String::from_utf8_lossy(line);
                match line.split_once(' ') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (line.into_owned(), String::new()),
                }
            })
    }
}

impl Codec for BinaryCodec {
    fn dialect(&self) -> Dialect {
        Dialect::Binary
    }

    fn parse_frame(&self, buf: &[u8], max_frame_size: usize) -> Result<Option<(Frame, usize)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(read_u16(buf, 0));
        let kind = read_u16(buf, 2);
        if len > max_frame_size {
            return Err(ControlError::protocol(format!(
                "declared length {len} exceeds limit of {max_frame_size}"
            )));
        }
        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let body = &buf[HEADER_LEN..HEADER_LEN + len];
        match kind {
            msg::FRAGMENT => Err(ControlError::protocol("FRAGMENT without FRAGMENTHEADER")),
            msg::FRAGMENTHEADER => Self::reassemble(buf, body, HEADER_LEN + len, max_frame_size),
            _ => Ok(Some((
                Frame::Binary {
                    kind,
                    body: body.to_vec(),
                },
                HEADER_LEN + len,
            ))),
        }
    }

    fn is_event(&self, frame: &Frame) -> bool {
        matches!(frame, Frame::Binary { kind: msg::EVENT, .. })
    }

    fn decode_event(&self, frame: &Frame) -> Result<Event> {
        match frame {
            Frame::Binary { body, .. } => self.decode_event_body(body),
            Frame::Text { .. } => Err(ControlError::protocol("text frame on a binary connection")),
        }
    }

    fn decode_event_body(&self, raw: &[u8]) -> Result<Event> {
        if raw.len() < 2 {
            return Err(ControlError::protocol("event shorter than its type code"));
        }
        let code = read_u16(raw, 0);
        let payload = &raw[2..];

        let event = match code {
            0x0001 => {
                require(payload, 5, "CIRC")?;
                Event::CircuitStatus(CircuitStatus {
                    status: status_name(&CIRCUIT_STATUS, payload[0], "circuit")?,
                    id: read_u32(payload, 1),
                    path: comma_list(&nul_terminated(&payload[5..])),
                })
            }
            0x0002 => {
                require(payload, 5, "STREAM")?;
                Event::StreamStatus(StreamStatus {
                    status: status_name(&STREAM_STATUS, payload[0], "stream")?,
                    id: read_u32(payload, 1),
                    circuit: 0,
                    target: nul_terminated(&payload[5..]),
                })
            }
            0x0003 => {
                require(payload, 2, "ORCONN")?;
                let target = nul_terminated(&payload[1..]);
                if target.is_empty() {
                    return Err(ControlError::protocol("ORCONN event has an empty target"));
                }
                Event::OrConnStatus(OrConnStatus {
                    status: status_name(&OR_CONN_STATUS, payload[0], "OR connection")?,
                    target,
                })
            }
            0x0004 => {
                require(payload, 8, "BANDWIDTH")?;
                Event::Bandwidth(Bandwidth {
                    read: u64::from(read_u32(payload, 0)),
                    written: u64::from(read_u32(payload, 4)),
                })
            }
            OBSOLETE_LOG => Event::LogMessage(LogMessage {
                severity: Severity::Notice,
                message: nul_terminated(payload),
            }),
            0x0006 => Event::NewDescriptor(NewDescriptor {
                identities: comma_list(&nul_terminated(payload)),
            }),
            _ => match EventCategory::from_binary_code(code).and_then(Severity::from_category) {
                Some(severity) => Event::LogMessage(LogMessage {
                    severity,
                    message: nul_terminated(payload),
                }),
                None => Event::Unknown(UnknownEvent {
                    kind: code.to_string(),
                    body: payload.to_vec(),
                }),
            },
        };

        Ok(event)
    }

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>> {
        let mut body = Vec::new();

        let kind = match command {
            Command::Authenticate(credential) => {
                match credential {
                    Credential::None => {}
                    Credential::Password(secret) => {
                        body.extend_from_slice(secret.as_bytes());
                    }
                    Credential::Cookie(cookie) => body.extend_from_slice(cookie),
                }
                msg::AUTH
            }
            Command::GetInfo(keys) | Command::GetConf(keys) => {
                for key in keys {
                    check_argument(key, "key")?;
                    body.extend_from_slice(key.as_bytes());
                    body.push(b'\n');
                }
                if matches!(command, Command::GetInfo(_)) {
                    msg::GETINFO
                } else {
                    msg::GETCONF
                }
            }
            Command::SetConf(pairs) => {
                for (key, value) in pairs {
                    check_argument(key, "key")?;
                    body.extend_from_slice(key.as_bytes());
                    if let Some(value) = value {
                        check_argument(value, "value")?;
                        body.push(b' ');
                        body.extend_from_slice(value.as_bytes());
                    }
                    body.push(b'\n');
                }
                msg::SETCONF
            }
            Command::SetEvents(categories) => {
                for category in categories {
                    let code = category.binary_code().ok_or_else(|| {
                        ControlError::Unsupported(format!(
                            "{category} events cannot be subscribed to in the binary dialect"
                        ))
                    })?;
                    body.extend_from_slice(&code.to_be_bytes());
                }
                msg::SETEVENTS
            }
            Command::SaveConf => msg::SAVECONF,
            Command::Signal(signal) => {
                body.push(signal.binary_code());
                msg::SIGNAL
            }
            Command::MapAddress(pairs) => {
                for (from, to) in pairs {
                    check_argument(from, "address")?;
                    check_argument(to, "address")?;
                    body.extend_from_slice(format!("{from} {to}\n").as_bytes());
                }
                msg::MAPADDRESS
            }
            Command::ExtendCircuit { circuit, path } => {
                let path = path.join(",");
                check_argument(&path, "path")?;
                body.extend_from_slice(&circuit.to_be_bytes());
                body.extend_from_slice(path.as_bytes());
                msg::EXTENDCIRCUIT
            }
            Command::AttachStream { stream, circuit } => {
                body.extend_from_slice(&stream.to_be_bytes());
                body.extend_from_slice(&circuit.to_be_bytes());
                msg::ATTACHSTREAM
            }
            Command::RedirectStream { stream, address } => {
                check_argument(address, "address")?;
                body.extend_from_slice(&stream.to_be_bytes());
                body.extend_from_slice(address.as_bytes());
                msg::REDIRECTSTREAM
            }
            Command::CloseStream { stream, reason } => {
                body.extend_from_slice(&stream.to_be_bytes());
                body.push(*reason);
                body.push(0);
                msg::CLOSESTREAM
            }
            Command::CloseCircuit { circuit, if_unused } => {
                body.extend_from_slice(&circuit.to_be_bytes());
                body.push(u8::from(*if_unused));
                msg::CLOSECIRCUIT
            }
            Command::PostDescriptor(descriptor) => {
                body.extend_from_slice(descriptor.as_bytes());
                msg::POSTDESCRIPTOR
            }
        };

        Ok(encode_message(kind, &body))
    }

    fn check_reply(&self, frame: Frame) -> Result<Reply> {
        match frame {
            Frame::Binary {
                kind: msg::ERROR,
                body,
            } => {
                let code = if body.len() >= 2 { read_u16(&body, 0) } else { 0 };
                let message = if body.len() > 2 {
                    nul_terminated(&body[2..])
                } else {
                    String::new()
                };
                let message = if message.is_empty() {
                    ERROR_MESSAGES
                        .get(usize::from(code))
                        .map_or_else(|| "Unknown error".to_string(), |m| (*m).to_string())
                } else {
                    message
                };
                Err(ControlError::ErrorReply { code, message })
            }
            Frame::Binary { .. } => Ok(Reply::new(frame)),
            Frame::Text { .. } => Err(ControlError::protocol("text frame on a binary connection")),
        }
    }

    fn info_values(&self, reply: &Reply) -> Result<Vec<(String, String)>> {
        Self::expect_kind(reply, msg::INFOVALUE, "INFOVALUE")?;

        let mut fields: Vec<&[u8]> = reply.body().split(|&b| b == 0).collect();
        if fields.last().is_some_and(|field| field.is_empty()) {
            fields.pop();
        }
        if fields.len() % 2 != 0 {
            return Err(ControlError::protocol(
                "INFOVALUE has a key without a value",
            ));
        }

        Ok(fields
            .chunks(2)
            .map(|pair| {
                (
                    String::from_utf8_lossy(pair[0]).into_owned(),
                    String::from_utf8_lossy(pair[1]).into_owned(),
                )
            })
            .collect())
    }

    fn conf_values(&self, reply: &Reply) -> Result<Vec<(String, String)>> {
        Self::expect_kind(reply, msg::CONFVALUE, "CONFVALUE")?;
        Ok(Self::lines(reply.body()).collect())
    }

    fn extended_circuit(&self, reply: &Reply) -> Result<u32> {
        let body = reply.body();
        if body.len() < 4 {
            return Err(ControlError::protocol(
                "EXTENDCIRCUIT reply carries no circuit id",
            ));
        }
        Ok(read_u32(body, 0))
    }

    fn mapped_addresses(&self, reply: &Reply) -> Result<Vec<(String, String)>> {
        Self::lines(reply.body())
            .map(|(from, to)| {
                if to.is_empty() {
                    Err(ControlError::protocol(format!(
                        "MAPADDRESS reply line {from:?} has no target"
                    )))
                } else {
                    Ok((from, to))
                }
            })
            .collect()
    }
}
