//! Command parser and data-phase reader: turns tokenized, CRLF-terminated lines
//! into `Command`s, and gates storage commands on their data block actually
//! having arrived.
//!
//! This module does no I/O and holds no buffers of its own - it is handed a byte
//! slice and a `HandlerState` to update, and reports back how many bytes it
//! consumed and what it found. That split makes the parser indifferent to how the
//! bytes were chunked off the wire: feeding the same bytes through in any chunking
//! drives this function the same number of times with the same net effect.

use crate::config::Limits;
use crate::error::ProtocolError;
use crate::lexer::{find_line, tokenize, Line};
use crate::protocol::{
    ArithmeticCommand, ArithmeticKind, Command, DeleteCommand, StorageCommand, StorageCommandType,
};

/// Per-connection parsing state carried across reads: whether a storage command's
/// data block is still pending, and if so, the command it belongs to.
#[derive(Default)]
pub struct HandlerState {
    pending: Option<StorageCommand>,
}

impl HandlerState {
    pub fn new() -> HandlerState {
        HandlerState::default()
    }
}

pub enum ParseOutcome {
    /// Not enough bytes yet; read more from the socket before calling again.
    NeedMoreBytes,
    /// A reply-worthy error was found; the caller should stage `error.to_wire()`.
    Error(ProtocolError),
    /// A fully-parsed command, ready for dispatch.
    Command(Command),
}

/// Parse as much as `rbuf` allows, advancing `state` across calls for storage
/// commands whose data block hasn't arrived yet. Returns the number of bytes
/// consumed from the front of `rbuf` and the outcome.
pub fn parse_next(rbuf: &[u8], state: &mut HandlerState, limits: &Limits) -> (usize, ParseOutcome) {
    let mut offset = 0usize;
    loop {
        if let Some(pending) = state.pending.take() {
            let bytes = pending.byte_count as usize;
            let rest = &rbuf[offset..];
            if rest.len() < bytes + 2 {
                state.pending = Some(pending);
                return (offset, ParseOutcome::NeedMoreBytes);
            }
            if &rest[bytes..bytes + 2] != b"\r\n" {
                return (offset + bytes + 2, ParseOutcome::Error(ProtocolError::BadDataChunk));
            }
            let mut cmd = pending;
            cmd.data = rest[..bytes].to_vec();
            return (offset + bytes + 2, ParseOutcome::Command(Command::Storage(cmd)));
        }

        match find_line(&rbuf[offset..]) {
            Line::Partial => return (offset, ParseOutcome::NeedMoreBytes),
            Line::Malformed { consumed } => {
                return (offset + consumed, ParseOutcome::Error(ProtocolError::Malformed))
            }
            Line::Complete { line, consumed } => {
                let tokens = tokenize(line);
                match parse_command_line(&tokens, limits) {
                    Err(e) => return (offset + consumed, ParseOutcome::Error(e)),
                    Ok(LineOutcome::Done(command)) => {
                        return (offset + consumed, ParseOutcome::Command(command))
                    }
                    Ok(LineOutcome::NeedData(header)) => {
                        offset += consumed;
                        state.pending = Some(header);
                        // Loop back around: if the data block already arrived in
                        // the same read, this picks it up immediately; otherwise
                        // the next iteration returns NeedMoreBytes above.
                    }
                }
            }
        }
    }
}

enum LineOutcome {
    Done(Command),
    NeedData(StorageCommand),
}

fn parse_command_line(tokens: &[&[u8]], limits: &Limits) -> Result<LineOutcome, ProtocolError> {
    let (&command, rest) = tokens.split_first().ok_or(ProtocolError::Malformed)?;

    match command {
        b"quit" => no_more_tokens(rest).map(|_| LineOutcome::Done(Command::Quit)),
        b"shutdown" => no_more_tokens(rest).map(|_| LineOutcome::Done(Command::Shutdown)),
        b"get" => parse_get(rest, limits, false),
        b"gets" => parse_get(rest, limits, true),
        b"delete" => parse_delete(rest, limits),
        b"incr" => parse_arithmetic(rest, limits, ArithmeticKind::Incr),
        b"decr" => parse_arithmetic(rest, limits, ArithmeticKind::Decr),
        _ => {
            if let Some(kind) = StorageCommandType::from_bytes(command) {
                parse_storage(kind, rest, limits)
            } else {
                Err(ProtocolError::Malformed)
            }
        }
    }
}

fn no_more_tokens(rest: &[&[u8]]) -> Result<(), ProtocolError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::Malformed)
    }
}

fn parse_key(raw: &[u8], limits: &Limits) -> Result<String, ProtocolError> {
    if raw.is_empty() || raw.len() > limits.max_key_len {
        return Err(ProtocolError::Malformed);
    }
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::Malformed)
}

fn parse_u32(raw: &[u8]) -> Result<u32, ProtocolError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProtocolError::Malformed)
}

fn parse_u64(raw: &[u8]) -> Result<u64, ProtocolError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProtocolError::Malformed)
}

fn parse_get(rest: &[&[u8]], limits: &Limits, is_gets: bool) -> Result<LineOutcome, ProtocolError> {
    if is_gets {
        // CAS-token retrieval is intentionally not supported.
        return Err(ProtocolError::Unimplemented);
    }
    if rest.is_empty() {
        return Err(ProtocolError::Malformed);
    }
    if rest.len() > limits.max_ops_in_request {
        return Err(ProtocolError::TooManyKeys);
    }
    let keys = rest
        .iter()
        .map(|k| parse_key(k, limits))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LineOutcome::Done(Command::Get { keys }))
}

fn parse_delete(rest: &[&[u8]], limits: &Limits) -> Result<LineOutcome, ProtocolError> {
    let (&key_raw, rest) = rest.split_first().ok_or(ProtocolError::Malformed)?;
    let key = parse_key(key_raw, limits)?;

    let (hold_time, no_reply) = match rest {
        [] => (0, false),
        [b"noreply"] => (0, true),
        [time] => (parse_u32_or_unimplemented(time)?, false),
        [time, b"noreply"] => (parse_u32_or_unimplemented(time)?, true),
        _ => return Err(ProtocolError::Malformed),
    };

    Ok(LineOutcome::Done(Command::Delete(DeleteCommand {
        key,
        hold_time,
        no_reply,
    })))
}

/// An unparsable `delete` time field is reported as Unimplemented rather than
/// Malformed, matching the legacy server's behavior for this field.
fn parse_u32_or_unimplemented(raw: &[u8]) -> Result<u32, ProtocolError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProtocolError::Unimplemented)
}

fn parse_arithmetic(
    rest: &[&[u8]],
    limits: &Limits,
    kind: ArithmeticKind,
) -> Result<LineOutcome, ProtocolError> {
    let (&key_raw, rest) = rest.split_first().ok_or(ProtocolError::Malformed)?;
    let key = parse_key(key_raw, limits)?;
    let (&delta_raw, rest) = rest.split_first().ok_or(ProtocolError::Malformed)?;
    let delta = parse_u64(delta_raw)?;
    let no_reply = match rest {
        [] => false,
        [b"noreply"] => true,
        _ => return Err(ProtocolError::Malformed),
    };
    Ok(LineOutcome::Done(Command::Arithmetic(ArithmeticCommand {
        kind,
        key,
        delta,
        no_reply,
    })))
}

fn parse_storage(
    command: StorageCommandType,
    rest: &[&[u8]],
    limits: &Limits,
) -> Result<LineOutcome, ProtocolError> {
    let mut iter = rest.iter();
    let key_raw = iter.next().ok_or(ProtocolError::Malformed)?;
    let key = parse_key(key_raw, limits)?;
    let flags = parse_u32(iter.next().ok_or(ProtocolError::Malformed)?)?;
    let exp_time = parse_u32(iter.next().ok_or(ProtocolError::Malformed)?)?;
    let byte_count = parse_u32(iter.next().ok_or(ProtocolError::Malformed)?)?;
    if byte_count > limits.max_value_len {
        return Err(ProtocolError::Malformed);
    }

    let cas_unique = if command == StorageCommandType::Cas {
        Some(parse_u64(iter.next().ok_or(ProtocolError::Malformed)?)?)
    } else {
        None
    };

    let no_reply = match iter.next() {
        None => false,
        Some(&b"noreply") => true,
        Some(_) => return Err(ProtocolError::Malformed),
    };
    if iter.next().is_some() {
        return Err(ProtocolError::Malformed);
    }

    Ok(LineOutcome::NeedData(StorageCommand {
        command,
        key,
        flags,
        exp_time,
        cas_unique,
        no_reply,
        byte_count,
        data: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            max_key_len: 250,
            max_value_len: 1024 * 1024,
            max_ops_in_request: 8,
            max_response_len: 1024 * 1024,
        }
    }

    fn parse(bytes: &[u8]) -> (usize, ParseOutcome) {
        let mut state = HandlerState::new();
        parse_next(bytes, &mut state, &limits())
    }

    #[test]
    fn parses_storage_header_then_needs_data() {
        let (consumed, outcome) = parse(b"set key 0 60 4\r\n");
        assert_eq!(consumed, 16);
        assert!(matches!(outcome, ParseOutcome::NeedMoreBytes));
    }

    #[test]
    fn parses_full_storage_command_in_one_call() {
        let (consumed, outcome) = parse(b"set key 0 60 5\r\nhello\r\n");
        assert_eq!(consumed, b"set key 0 60 5\r\nhello\r\n".len());
        match outcome {
            ParseOutcome::Command(Command::Storage(cmd)) => {
                assert_eq!(cmd.key, "key");
                assert_eq!(cmd.data, b"hello");
                assert_eq!(cmd.flags, 0);
                assert_eq!(cmd.exp_time, 60);
            }
            _ => panic!("expected a parsed storage command"),
        }
    }

    #[test]
    fn bad_data_chunk_is_reported_and_consumed() {
        let (consumed, outcome) = parse(b"set k 0 0 3\r\nabcXX");
        assert_eq!(consumed, b"set k 0 0 3\r\n".len() + 5);
        assert!(matches!(outcome, ParseOutcome::Error(ProtocolError::BadDataChunk)));
    }

    #[test]
    fn get_with_no_keys_is_malformed() {
        let (_, outcome) = parse(b"get\r\n");
        assert!(matches!(outcome, ParseOutcome::Error(ProtocolError::Malformed)));
    }

    #[test]
    fn gets_is_unimplemented() {
        let (_, outcome) = parse(b"gets k\r\n");
        assert!(matches!(outcome, ParseOutcome::Error(ProtocolError::Unimplemented)));
    }

    #[test]
    fn too_many_keys_is_reported() {
        let line = format!("get {}\r\n", (0..9).map(|i| format!("k{i}")).collect::<Vec<_>>().join(" "));
        let (_, outcome) = parse(line.as_bytes());
        assert!(matches!(outcome, ParseOutcome::Error(ProtocolError::TooManyKeys)));
    }

    #[test]
    fn unknown_command_is_malformed() {
        let (_, outcome) = parse(b"bogus\r\n");
        assert!(matches!(outcome, ParseOutcome::Error(ProtocolError::Malformed)));
    }

    #[test]
    fn incr_parses_typed_delta() {
        let (_, outcome) = parse(b"incr k 5\r\n");
        match outcome {
            ParseOutcome::Command(Command::Arithmetic(cmd)) => {
                assert_eq!(cmd.delta, 5);
                assert_eq!(cmd.kind, ArithmeticKind::Incr);
            }
            _ => panic!("expected arithmetic command"),
        }
    }

    #[test]
    fn delete_with_unparsable_time_is_unimplemented() {
        let (_, outcome) = parse(b"delete k notanumber\r\n");
        assert!(matches!(outcome, ParseOutcome::Error(ProtocolError::Unimplemented)));
    }
}
