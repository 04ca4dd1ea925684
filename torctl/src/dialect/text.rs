//! Text dialect (version 1)
//!
//! Replies are CRLF-terminated lines of the form `NNN<sep>text`, where the
//! separator is `-` for a continuation line, `+` for a line followed by a
//! data block, and a space for the final line. Data blocks end with a line
//! holding a single `.`; lines starting with a dot are dot-stuffed.
//! Asynchronous events use status code 650.

use chrono::NaiveDateTime;

use crate::{
    ControlError, Result,
    auth::Credential,
    command::Command,
    dialect::{Codec, Dialect, check_argument},
    event::{
        AddressMapped, Bandwidth, CircuitStatus, Event, EventCategory, LogMessage, NewDescriptor,
        OrConnStatus, Severity, StreamStatus, UnknownEvent,
    },
    frame::{Frame, ReplyLine},
    reply::Reply,
};

pub const EVENT_CODE: u16 = 650;

const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

/// Quote a string argument, escaping backslashes and double quotes
#[must_use]
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Strip the quotes from a quoted string and undo its escapes
///
/// Values that are not quoted are returned unchanged.
#[must_use]
pub fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Find the next line starting at `offset`, without its terminator
///
/// Returns the line and the offset just past its `\n`, or `None` if the line
/// is not complete yet. A bare LF is accepted in place of CRLF.
fn next_line(buf: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let newline = buf[offset..].iter().position(|&b| b == b'\n')?;
    let mut line = &buf[offset..offset + newline];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some((line, offset + newline + 1))
}

/// Parse the status code and separator of one reply line
///
/// # Errors
///
/// Returns `ControlError::Protocol` if the line is not `NNN<sep>text`
pub fn parse_line(line: &str) -> Result<(u16, char, String)> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 {
        return Err(ControlError::protocol(format!(
            "reply line too short: {line:?}"
        )));
    }

    if !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(ControlError::protocol(format!(
            "invalid status code in {line:?}"
        )));
    }
    let code = line[..3]
        .parse::<u16>()
        .map_err(|_| ControlError::protocol(format!("invalid status code in {line:?}")))?;

    let separator = char::from(bytes[3]);
    if !matches!(separator, ' ' | '-' | '+') {
        return Err(ControlError::protocol(format!(
            "invalid separator {separator:?} in {line:?}"
        )));
    }

    Ok((code, separator, line[4..].to_string()))
}

fn token<'a>(tokens: &mut impl Iterator<Item = &'a str>, keyword: &str, field: &str) -> Result<&'a str> {
    tokens
        .next()
        .ok_or_else(|| ControlError::protocol(format!("{keyword} event is missing {field}")))
}

/// Next whitespace-delimited word of `value` and whatever follows it
fn split_word<'a>(value: &'a str, keyword: &str, field: &str) -> Result<(&'a str, &'a str)> {
    let value = value.trim_start();
    if value.is_empty() {
        return Err(ControlError::protocol(format!(
            "{keyword} event is missing {field}"
        )));
    }
    Ok(value.split_once(char::is_whitespace).unwrap_or((value, "")))
}

fn number<T: std::str::FromStr>(value: &str, keyword: &str, field: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ControlError::protocol(format!("{keyword} event has bad {field} {value:?}")))
}

fn parse_expiry(rest: &str) -> Result<Option<NaiveDateTime>> {
    let rest = rest.trim_start();
    let value = if let Some(quoted) = rest.strip_prefix('"') {
        quoted
            .split_once('"')
            .map(|(inner, _)| inner)
            .ok_or_else(|| ControlError::protocol("ADDRMAP expiry has no closing quote"))?
    } else {
        rest.split_whitespace()
            .next()
            .ok_or_else(|| ControlError::protocol("ADDRMAP event is missing expiry"))?
    };

    if value.eq_ignore_ascii_case("NEVER") {
        return Ok(None);
    }

    NaiveDateTime::parse_from_str(value, EXPIRY_FORMAT)
        .map(Some)
        .map_err(|e| ControlError::protocol(format!("ADDRMAP expiry {value:?}: {e}")))
}

impl TextCodec {
    fn final_line(reply: &Reply) -> Result<&ReplyLine> {
        reply
            .lines()
            .last()
            .ok_or_else(|| ControlError::protocol("reply has no lines"))
    }

    /// `key=value` lines of a reply, with data blocks standing in for the
    /// value and the trailing `OK` dropped
    fn key_values<'a>(reply: &'a Reply) -> impl Iterator<Item = (&'a ReplyLine, Option<(&'a str, &'a str)>)> {
        let count = reply.lines().len();
        reply
            .lines()
            .iter()
            .enumerate()
            .filter(move |(index, line)| !(index + 1 == count && line.text == "OK"))
            .map(|(_, line)| (line, line.text.split_once('=')))
    }
}

impl Codec for TextCodec {
    fn dialect(&self) -> Dialect {
        Dialect::Text
    }

    fn parse_frame(&self, buf: &[u8], max_frame_size: usize) -> Result<Option<(Frame, usize)>> {
        let mut lines = Vec::new();
        let mut first_code = None;
        let mut offset = 0;

        loop {
            let Some((raw, next)) = next_line(buf, offset) else {
                if buf.len() > max_frame_size {
                    return Err(ControlError::protocol(format!(
                        "reply exceeds limit of {max_frame_size} bytes"
                    )));
                }
                return Ok(None);
            };
            offset = next;

            if raw.is_empty() {
                return Err(ControlError::protocol("empty reply line"));
            }

            let line = String::from_utf8_lossy(raw);
            let (code, separator, text) = parse_line(&line)?;

            match first_code {
                Some(expected) if expected != code => {
                    return Err(ControlError::protocol(format!(
                        "status code mismatch in multi-line reply: expected {expected}, got {code}"
                    )));
                }
                Some(_) => {}
                None => first_code = Some(code),
            }

            let mut reply_line = ReplyLine::new(code, text);

            if separator == '+' {
                let mut data = Vec::new();
                loop {
                    let Some((raw, next)) = next_line(buf, offset) else {
                        if buf.len() > max_frame_size {
                            return Err(ControlError::protocol(format!(
                                "data block exceeds limit of {max_frame_size} bytes"
                            )));
                        }
                        return Ok(None);
                    };
                    offset = next;

                    if raw == b"." {
                        break;
                    }
                    let raw = raw.strip_prefix(b".").unwrap_or(raw);
                    data.push(String::from_utf8_lossy(raw).into_owned());
                }
                reply_line = reply_line.with_data(data.join("\n"));
            }

            lines.push(reply_line);

            if offset > max_frame_size {
                return Err(ControlError::protocol(format!(
                    "reply exceeds limit of {max_frame_size} bytes"
                )));
            }

            if separator == ' ' {
                return Ok(Some((Frame::Text { lines }, offset)));
            }
        }
    }

    fn is_event(&self, frame: &Frame) -> bool {
        matches!(frame, Frame::Text { .. }) && frame.code() == EVENT_CODE
    }

    fn decode_event(&self, frame: &Frame) -> Result<Event> {
        match frame {
            Frame::Text { lines } => {
                let first = lines
                    .first()
                    .ok_or_else(|| ControlError::protocol("event has no lines"))?;
                self.decode_event_body(first.text.as_bytes())
            }
            Frame::Binary { .. } => Err(ControlError::protocol("binary frame on a text connection")),
        }
    }

    fn decode_event_body(&self, raw: &[u8]) -> Result<Event> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
        if keyword.is_empty() {
            return Err(ControlError::protocol("event has no keyword"));
        }

        let Some(category) = EventCategory::from_keyword(keyword) else {
            return Ok(Event::Unknown(UnknownEvent {
                kind: keyword.to_string(),
                body: rest.as_bytes().to_vec(),
            }));
        };

        let keyword = category.keyword();
        let mut tokens = rest.split_whitespace();

        let event = match category {
            EventCategory::Circ => {
                let id = number(token(&mut tokens, keyword, "circuit id")?, keyword, "circuit id")?;
                let status = token(&mut tokens, keyword, "status")?.to_string();
                // Later fields are KEY=VALUE pairs, not a path
                let path = tokens
                    .next()
                    .filter(|candidate| !candidate.contains('='))
                    .map(|path| {
                        path.split(',')
                            .filter(|relay| !relay.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Event::CircuitStatus(CircuitStatus { status, id, path })
            }
            EventCategory::Stream => {
                let id = number(token(&mut tokens, keyword, "stream id")?, keyword, "stream id")?;
                let status = token(&mut tokens, keyword, "status")?.to_string();
                let circuit =
                    number(token(&mut tokens, keyword, "circuit id")?, keyword, "circuit id")?;
                let target = token(&mut tokens, keyword, "target")?.to_string();
                Event::StreamStatus(StreamStatus {
                    status,
                    id,
                    circuit,
                    target,
                })
            }
            EventCategory::OrConn => {
                let target = token(&mut tokens, keyword, "target")?.to_string();
                let status = token(&mut tokens, keyword, "status")?.to_string();
                Event::OrConnStatus(OrConnStatus { status, target })
            }
            EventCategory::Bandwidth => {
                let read = number(token(&mut tokens, keyword, "bytes read")?, keyword, "bytes read")?;
                let written = number(
                    token(&mut tokens, keyword, "bytes written")?,
                    keyword,
                    "bytes written",
                )?;
                Event::Bandwidth(Bandwidth { read, written })
            }
            EventCategory::NewDesc => Event::NewDescriptor(NewDescriptor {
                identities: tokens.map(str::to_string).collect(),
            }),
            EventCategory::AddrMap => {
                // The expiry may be quoted and contain a space, so only the
                // addresses are split off as words
                let (from, rest) = split_word(rest, keyword, "source address")?;
                let (to, rest) = split_word(rest, keyword, "target address")?;
                Event::AddressMapped(AddressMapped {
                    from: from.to_string(),
                    to: to.to_string(),
                    expiry: parse_expiry(rest)?,
                })
            }
            EventCategory::Debug
            | EventCategory::Info
            | EventCategory::Notice
            | EventCategory::Warn
            | EventCategory::Err => Event::LogMessage(LogMessage {
                severity: Severity::from_category(category).unwrap_or(Severity::Notice),
                message: rest.to_string(),
            }),
        };

        Ok(event)
    }

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>> {
        let keyword = command.name();

        let line = match command {
            Command::Authenticate(Credential::None) => keyword.to_string(),
            Command::Authenticate(Credential::Password(secret)) => {
                check_argument(secret, "password")?;
                format!("{keyword} {}", quote(secret))
            }
            Command::Authenticate(Credential::Cookie(cookie)) => {
                format!("{keyword} {}", hex::encode(cookie))
            }
            Command::GetInfo(keys) | Command::GetConf(keys) => {
                for key in keys {
                    check_argument(key, "key")?;
                }
                format!("{keyword} {}", keys.join(" "))
            }
            Command::SetConf(pairs) => {
                let mut line = keyword.to_string();
                for (key, value) in pairs {
                    check_argument(key, "key")?;
                    line.push(' ');
                    line.push_str(key);
                    if let Some(value) = value {
                        check_argument(value, "value")?;
                        line.push('=');
                        line.push_str(&quote(value));
                    }
                }
                line
            }
            Command::SetEvents(categories) => {
                let mut line = keyword.to_string();
                for category in categories {
                    line.push(' ');
                    line.push_str(category.keyword());
                }
                line
            }
            Command::SaveConf => keyword.to_string(),
            Command::Signal(signal) => format!("{keyword} {signal}"),
            Command::MapAddress(pairs) => {
                let mut line = keyword.to_string();
                for (from, to) in pairs {
                    check_argument(from, "address")?;
                    check_argument(to, "address")?;
                    line.push_str(&format!(" {from}={to}"));
                }
                line
            }
            Command::ExtendCircuit { circuit, path } => {
                let path = path.join(",");
                check_argument(&path, "path")?;
                if path.is_empty() {
                    format!("{keyword} {circuit}")
                } else {
                    format!("{keyword} {circuit} {path}")
                }
            }
            Command::AttachStream { stream, circuit } => format!("{keyword} {stream} {circuit}"),
            Command::RedirectStream { stream, address } => {
                check_argument(address, "address")?;
                format!("{keyword} {stream} {address}")
            }
            Command::CloseStream { stream, reason } => format!("{keyword} {stream} {reason}"),
            Command::CloseCircuit { circuit, if_unused } => {
                if *if_unused {
                    format!("{keyword} {circuit} IfUnused")
                } else {
                    format!("{keyword} {circuit}")
                }
            }
            Command::PostDescriptor(descriptor) => {
                let mut out = format!("+{keyword}\r\n");
                for line in descriptor.lines() {
                    if line.starts_with('.') {
                        out.push('.');
                    }
                    out.push_str(line);
                    out.push_str("\r\n");
                }
                out.push_str(".\r\n");
                return Ok(out.into_bytes());
            }
        };

        Ok(format!("{line}\r\n").into_bytes())
    }

    fn check_reply(&self, frame: Frame) -> Result<Reply> {
        let code = match &frame {
            Frame::Text { lines } if !lines.is_empty() => frame.code(),
            Frame::Text { .. } => return Err(ControlError::protocol("reply has no lines")),
            Frame::Binary { .. } => {
                return Err(ControlError::protocol("binary frame on a text connection"));
            }
        };

        if (400..600).contains(&code) {
            let reply = Reply::new(frame);
            return Err(ControlError::ErrorReply {
                code,
                message: reply.message(),
            });
        }

        Ok(Reply::new(frame))
    }

    fn info_values(&self, reply: &Reply) -> Result<Vec<(String, String)>> {
        Self::key_values(reply)
            .map(|(line, pair)| {
                let (key, value) = pair.ok_or_else(|| {
                    ControlError::protocol(format!("GETINFO reply line {:?} has no value", line.text))
                })?;
                let value = line.data.as_deref().unwrap_or(value);
                Ok((key.to_string(), value.to_string()))
            })
            .collect()
    }

    fn conf_values(&self, reply: &Reply) -> Result<Vec<(String, String)>> {
        Ok(Self::key_values(reply)
            .map(|(line, pair)| match pair {
                Some((key, value)) => (key.to_string(), unquote(value)),
                None => (line.text.clone(), String::new()),
            })
            .collect())
    }

    fn extended_circuit(&self, reply: &Reply) -> Result<u32> {
        let line = Self::final_line(reply)?;
        let mut tokens = line.text.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(word), Some(id)) if word.eq_ignore_ascii_case("EXTENDED") => id
                .parse()
                .map_err(|_| ControlError::protocol(format!("bad circuit id {id:?}"))),
            _ => Err(ControlError::protocol(format!(
                "EXTENDCIRCUIT reply {:?} carries no circuit id",
                line.text
            ))),
        }
    }

    fn mapped_addresses(&self, reply: &Reply) -> Result<Vec<(String, String)>> {
        Self::key_values(reply)
            .map(|(line, pair)| {
                pair.map(|(from, to)| (from.to_string(), to.to_string()))
                    .ok_or_else(|| {
                        ControlError::protocol(format!(
                            "MAPADDRESS reply line {:?} is not an address pair",
                            line.text
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::command::ProcessSignal;

    const MAX: usize = 1024 * 1024;

    fn frame(buf: &str) -> (Frame, usize) {
        TextCodec.parse_frame(buf.as_bytes(), MAX).unwrap().unwrap()
    }

    fn event(line: &str) -> Result<Event> {
        TextCodec.decode_event_body(line.as_bytes())
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("250 OK").unwrap(), (250, ' ', "OK".to_string()));
        assert_eq!(
            parse_line("250-version=0.4").unwrap(),
            (250, '-', "version=0.4".to_string())
        );
        assert!(parse_line("25").is_err());
        assert!(parse_line("2x0 OK").is_err());
        assert!(parse_line("250*OK").is_err());
    }

    #[test]
    fn test_single_line_reply() {
        let (frame, used) = frame("250 OK\r\n");
        assert_eq!(used, 8);
        assert_eq!(
            frame,
            Frame::Text {
                lines: vec![ReplyLine::new(250, "OK")]
            }
        );
    }

    #[test]
    fn test_incomplete_reply_waits() {
        let buf = b"250-version=0.4.8\r\n250 O";
        assert_eq!(TextCodec.parse_frame(buf, MAX).unwrap(), None);
        assert_eq!(TextCodec.parse_frame(b"250 OK\r", MAX).unwrap(), None);
    }

    #[test]
    fn test_bare_lf_tolerated() {
        let (frame, used) = frame("250-a=1\n250 OK\n");
        assert_eq!(used, 15);
        assert_eq!(frame.code(), 250);
    }

    #[test]
    fn test_multi_line_with_data_block() {
        let buf = "250+desc=\r\nrouter moria1\r\n..hidden\r\n.\r\n250 OK\r\n650 BW 1 2\r\n";
        let (frame, used) = frame(buf);
        assert_eq!(&buf[used..], "650 BW 1 2\r\n");
        assert_eq!(
            frame,
            Frame::Text {
                lines: vec![
                    ReplyLine::new(250, "desc=").with_data("router moria1\n.hidden"),
                    ReplyLine::new(250, "OK"),
                ]
            }
        );
    }

    #[test]
    fn test_unterminated_data_block_waits() {
        let buf = b"250+desc=\r\nrouter moria1\r\n";
        assert_eq!(TextCodec.parse_frame(buf, MAX).unwrap(), None);
    }

    #[test]
    fn test_status_code_mismatch() {
        let result = TextCodec.parse_frame(b"250-a=1\r\n251 OK\r\n", MAX);
        assert!(matches!(result, Err(ControlError::Protocol(_))));
    }

    #[test]
    fn test_empty_line_is_protocol_error() {
        let result = TextCodec.parse_frame(b"\r\n250 OK\r\n", MAX);
        assert!(matches!(result, Err(ControlError::Protocol(_))));
    }

    #[test]
    fn test_oversized_reply() {
        let buf = format!("250 {}", "x".repeat(64));
        assert!(TextCodec.parse_frame(buf.as_bytes(), 32).is_err());
        let buf = format!("250 {}\r\n", "x".repeat(64));
        assert!(TextCodec.parse_frame(buf.as_bytes(), 32).is_err());
    }

    #[test]
    fn test_event_classification() {
        let (frame, _) = frame("650 BW 1024 2048\r\n");
        assert!(TextCodec.is_event(&frame));
        assert_eq!(
            TextCodec.decode_event(&frame).unwrap(),
            Event::Bandwidth(Bandwidth {
                read: 1024,
                written: 2048
            })
        );

        let (reply, _) = self::frame("250 OK\r\n");
        assert!(!TextCodec.is_event(&reply));
    }

    #[test]
    fn test_decode_circ() {
        assert_eq!(
            event("CIRC 14 BUILT $AAAA,$BBBB,$CCCC").unwrap(),
            Event::CircuitStatus(CircuitStatus {
                status: "BUILT".to_string(),
                id: 14,
                path: vec!["$AAAA".into(), "$BBBB".into(), "$CCCC".into()],
            })
        );

        let Event::CircuitStatus(circuit) = event("circ 3 LAUNCHED PURPOSE=GENERAL").unwrap() else {
            panic!("expected circuit status");
        };
        assert!(circuit.path.is_empty());

        assert!(matches!(event("CIRC abc BUILT"), Err(ControlError::Protocol(_))));
        assert!(matches!(event("CIRC 14"), Err(ControlError::Protocol(_))));
    }

    #[test]
    fn test_decode_stream_and_orconn() {
        assert_eq!(
            event("STREAM 9 SUCCEEDED 14 example.com:443").unwrap(),
            Event::StreamStatus(StreamStatus {
                status: "SUCCEEDED".to_string(),
                id: 9,
                circuit: 14,
                target: "example.com:443".to_string(),
            })
        );
        assert!(event("STREAM 9 SUCCEEDED 14").is_err());

        assert_eq!(
            event("ORCONN $ABCD CONNECTED").unwrap(),
            Event::OrConnStatus(OrConnStatus {
                status: "CONNECTED".to_string(),
                target: "$ABCD".to_string(),
            })
        );
    }

    #[test]
    fn test_bandwidth_never_zero_filled() {
        assert!(matches!(event("BW 1024"), Err(ControlError::Protocol(_))));
        assert!(matches!(event("BW"), Err(ControlError::Protocol(_))));
        assert!(matches!(event("BW 1 two"), Err(ControlError::Protocol(_))));
    }

    #[test]
    fn test_decode_log_and_newdesc() {
        assert_eq!(
            event("WARN Clock skew detected").unwrap(),
            Event::LogMessage(LogMessage {
                severity: Severity::Warn,
                message: "Clock skew detected".to_string(),
            })
        );
        assert_eq!(
            event("NEWDESC $AAAA $BBBB").unwrap(),
            Event::NewDescriptor(NewDescriptor {
                identities: vec!["$AAAA".into(), "$BBBB".into()],
            })
        );
    }

    #[test]
    fn test_decode_addrmap() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 2)
            .and_then(|date| date.and_hms_opt(3, 4, 5))
            .unwrap();
        assert_eq!(
            event("ADDRMAP example.com 10.0.0.1 \"2026-01-02 03:04:05\"").unwrap(),
            Event::AddressMapped(AddressMapped {
                from: "example.com".to_string(),
                to: "10.0.0.1".to_string(),
                expiry: Some(expected),
            })
        );

        let Event::AddressMapped(mapped) = event("ADDRMAP a.com b.onion NEVER").unwrap() else {
            panic!("expected address mapping");
        };
        assert_eq!(mapped.expiry, None);

        assert!(event("ADDRMAP a.com b.onion \"yesterday\"").is_err());
        assert!(event("ADDRMAP a.com b.onion").is_err());
    }

    #[test]
    fn test_addrmap_fields_are_never_empty() {
        assert!(matches!(
            event("ADDRMAP example.com  NEVER"),
            Err(ControlError::Protocol(_))
        ));
        assert!(matches!(event("ADDRMAP  "), Err(ControlError::Protocol(_))));

        let Event::AddressMapped(mapped) = event("ADDRMAP  a.com   b.onion  NEVER").unwrap() else {
            panic!("expected address mapping");
        };
        assert_eq!(mapped.from, "a.com");
        assert_eq!(mapped.to, "b.onion");
        assert_eq!(mapped.expiry, None);
    }

    #[test]
    fn test_unknown_keyword() {
        assert_eq!(
            event("STATUS_GENERAL NOTICE CIRCUIT_ESTABLISHED").unwrap(),
            Event::Unknown(UnknownEvent {
                kind: "STATUS_GENERAL".to_string(),
                body: b"NOTICE CIRCUIT_ESTABLISHED".to_vec(),
            })
        );
    }

    #[test]
    fn test_encode_authenticate() {
        let wire = TextCodec
            .encode_command(&Command::Authenticate(Credential::Password(
                "se\"cr\\et".to_string(),
            )))
            .unwrap();
        assert_eq!(wire, b"AUTHENTICATE \"se\\\"cr\\\\et\"\r\n".to_vec());

        let wire = TextCodec
            .encode_command(&Command::Authenticate(Credential::Cookie(vec![0xAB, 0x01])))
            .unwrap();
        assert_eq!(wire, b"AUTHENTICATE ab01\r\n".to_vec());

        let wire = TextCodec
            .encode_command(&Command::Authenticate(Credential::None))
            .unwrap();
        assert_eq!(wire, b"AUTHENTICATE\r\n".to_vec());
    }

    #[test]
    fn test_encode_commands() {
        let encode = |command: Command| String::from_utf8(TextCodec.encode_command(&command).unwrap()).unwrap();

        assert_eq!(
            encode(Command::SetEvents(vec![EventCategory::Bandwidth, EventCategory::Circ])),
            "SETEVENTS BW CIRC\r\n"
        );
        assert_eq!(
            encode(Command::SetConf(vec![
                ("Nickname".into(), Some("relay one".into())),
                ("SocksPort".into(), None),
            ])),
            "SETCONF Nickname=\"relay one\" SocksPort\r\n"
        );
        assert_eq!(encode(Command::Signal(ProcessSignal::Reload)), "SIGNAL RELOAD\r\n");
        assert_eq!(
            encode(Command::CloseCircuit {
                circuit: 7,
                if_unused: true
            }),
            "CLOSECIRCUIT 7 IfUnused\r\n"
        );
        assert_eq!(
            encode(Command::PostDescriptor("router x\n.dot".to_string())),
            "+POSTDESCRIPTOR\r\nrouter x\r\n..dot\r\n.\r\n"
        );
    }

    #[test]
    fn test_encode_rejects_line_breaks() {
        let result = TextCodec.encode_command(&Command::GetInfo(vec!["version\r\nSIGNAL HALT".into()]));
        assert!(matches!(result, Err(ControlError::Unsupported(_))));
    }

    #[test]
    fn test_error_reply() {
        let (frame, _) = frame("515 Authentication failed: Password did not match\r\n");
        let result = TextCodec.check_reply(frame);
        assert!(matches!(
            result,
            Err(ControlError::ErrorReply { code: 515, ref message })
                if message == "Authentication failed: Password did not match"
        ));
    }

    #[test]
    fn test_info_values() {
        let (frame, _) = frame("250-version=0.4.8.9\r\n250+desc=\r\nline\r\n.\r\n250 OK\r\n");
        let reply = TextCodec.check_reply(frame).unwrap();
        assert_eq!(
            TextCodec.info_values(&reply).unwrap(),
            vec![
                ("version".to_string(), "0.4.8.9".to_string()),
                ("desc".to_string(), "line".to_string()),
            ]
        );
    }

    #[test]
    fn test_conf_values() {
        let (frame, _) = frame("250-Nickname=\"relay one\"\r\n250 SocksPort\r\n");
        let reply = TextCodec.check_reply(frame).unwrap();
        assert_eq!(
            TextCodec.conf_values(&reply).unwrap(),
            vec![
                ("Nickname".to_string(), "relay one".to_string()),
                ("SocksPort".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_extended_circuit_and_mappings() {
        let (frame, _) = frame("250 EXTENDED 17\r\n");
        let reply = TextCodec.check_reply(frame).unwrap();
        assert_eq!(TextCodec.extended_circuit(&reply).unwrap(), 17);

        let (frame, _) = self::frame("250 OK\r\n");
        let reply = TextCodec.check_reply(frame).unwrap();
        assert!(TextCodec.extended_circuit(&reply).is_err());

        let (frame, _) = self::frame("250-0.0.0.0=10.1.2.3\r\n250 a.com=b.com\r\n");
        let reply = TextCodec.check_reply(frame).unwrap();
        assert_eq!(
            TextCodec.mapped_addresses(&reply).unwrap(),
            vec![
                ("0.0.0.0".to_string(), "10.1.2.3".to_string()),
                ("a.com".to_string(), "b.com".to_string()),
            ]
        );
    }

    #[test]
    fn test_quote_round_trip() {
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(unquote(&quote("a\"b\\c")), "a\"b\\c");
        assert_eq!(unquote("plain"), "plain");
    }
}
