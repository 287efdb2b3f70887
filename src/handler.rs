//! Per-connection handler state machine: drives the parser to completion over
//! whatever bytes are currently in `rbuf`, dispatches resolved commands across the
//! message hub, and renders completions into `sbuf`.

use tokio::sync::oneshot;

use crate::config::Limits;
use crate::error::ProtocolError;
use crate::parser::{parse_next, HandlerState, ParseOutcome};
use crate::protocol::{
    ArithmeticCommand, ArithmeticKind, Command, DeleteCommand, StorageCommand, StorageCommandType,
};
use crate::request::{await_in_order, NumericResult, SetKind, WorkItem, WorkResult};
use crate::shard::Hub;

/// What the connection driver (`connection.rs`) should do after a call to
/// [`process`] returns.
pub enum Control {
    /// The buffer held no complete command; go read more bytes from the socket.
    NeedMoreData,
    /// `quit` was accepted; flush `sbuf` (if non-empty) then close the connection.
    Quit,
    /// `shutdown` was accepted; flush `sbuf`, trigger process shutdown, then close.
    Shutdown,
}

/// Drain every complete command currently available in `rbuf`, appending replies
/// to `sbuf` as they're produced, until the buffer is exhausted or a control
/// command is seen. When a storage command's header and its data block both land
/// in the same read, this naturally loops straight through to the next command
/// instead of waiting on a socket read that would never come.
pub async fn process(
    rbuf: &mut Vec<u8>,
    sbuf: &mut Vec<u8>,
    state: &mut HandlerState,
    hub: &Hub,
    limits: &Limits,
) -> Control {
    loop {
        let (consumed, outcome) = parse_next(rbuf, state, limits);
        if consumed > 0 {
            rbuf.drain(..consumed);
        }
        match outcome {
            ParseOutcome::NeedMoreBytes => return Control::NeedMoreData,
            ParseOutcome::Error(err) => sbuf.extend_from_slice(err.to_wire()),
            ParseOutcome::Command(Command::Quit) => return Control::Quit,
            ParseOutcome::Command(Command::Shutdown) => return Control::Shutdown,
            ParseOutcome::Command(command) => dispatch(command, hub, limits, sbuf).await,
        }
    }
}

async fn dispatch(command: Command, hub: &Hub, limits: &Limits, sbuf: &mut Vec<u8>) {
    match command {
        Command::Get { keys } => get(keys, hub, limits, sbuf).await,
        Command::Storage(cmd) => storage(cmd, hub, sbuf).await,
        Command::Arithmetic(cmd) => arithmetic(cmd, hub, sbuf).await,
        Command::Delete(cmd) => delete(cmd, hub, sbuf).await,
        Command::Quit | Command::Shutdown => {
            unreachable!("control commands are handled by process() before dispatch")
        }
    }
}

async fn get(keys: Vec<String>, hub: &Hub, limits: &Limits, sbuf: &mut Vec<u8>) {
    let mut receivers = Vec::with_capacity(keys.len());
    for key in &keys {
        let (reply, rx) = oneshot::channel();
        hub.submit(WorkItem::BtreeGet {
            key: key.clone(),
            reply,
        })
        .await;
        receivers.push(rx);
    }
    let results = await_in_order(receivers).await;

    let mut body = Vec::new();
    for (key, result) in keys.iter().zip(results) {
        match result {
            Some(WorkResult::Value(Some(value))) => {
                body.extend_from_slice(b"VALUE ");
                body.extend_from_slice(key.as_bytes());
                body.extend_from_slice(format!(" {} {}\r\n", value.flags, value.data.len()).as_bytes());
                body.extend_from_slice(&value.data);
                body.extend_from_slice(b"\r\n");
            }
            Some(WorkResult::Value(None)) | None => {}
            Some(_) => unreachable!("shard returned a non-Value result for a BtreeGet"),
        }
    }
    body.extend_from_slice(b"END\r\n");

    if body.len() > limits.max_response_len {
        sbuf.extend_from_slice(ProtocolError::ResponseTooLarge.to_wire());
    } else {
        sbuf.extend_from_slice(&body);
    }
}

async fn storage(cmd: StorageCommand, hub: &Hub, sbuf: &mut Vec<u8>) {
    let no_reply = cmd.no_reply;
    let kind = match cmd.command {
        StorageCommandType::Set => SetKind::Set,
        StorageCommandType::Add => SetKind::Add,
        StorageCommandType::Replace => SetKind::Replace,
        StorageCommandType::Append => SetKind::Append,
        StorageCommandType::Prepend => SetKind::Prepend,
        StorageCommandType::Cas => SetKind::Cas {
            cas_unique: cmd
                .cas_unique
                .expect("parser only produces Cas commands with a cas_unique"),
        },
    };
    let (reply, rx) = oneshot::channel();
    hub.submit(WorkItem::BtreeSet {
        key: cmd.key,
        kind,
        flags: cmd.flags,
        exp_time: cmd.exp_time,
        data: cmd.data,
        reply,
    })
    .await;

    match rx.await {
        Ok(WorkResult::Stored(resp)) => {
            if !no_reply {
                sbuf.extend_from_slice(resp.to_wire());
            }
        }
        Ok(_) => unreachable!("shard returned a non-Stored result for a BtreeSet storage command"),
        Err(_) => {} // shard gone during shutdown; drop the reply, nothing leaked
    }
}

async fn arithmetic(cmd: ArithmeticCommand, hub: &Hub, sbuf: &mut Vec<u8>) {
    let kind = match cmd.kind {
        ArithmeticKind::Incr => SetKind::Incr { delta: cmd.delta },
        ArithmeticKind::Decr => SetKind::Decr { delta: cmd.delta },
    };
    let (reply, rx) = oneshot::channel();
    hub.submit(WorkItem::BtreeSet {
        key: cmd.key,
        kind,
        flags: 0,
        exp_time: 0,
        data: Vec::new(),
        reply,
    })
    .await;

    match rx.await {
        Ok(WorkResult::Numeric(result)) => {
            if !cmd.no_reply {
                match result {
                    NumericResult::Ok(v) => {
                        sbuf.extend_from_slice(v.to_string().as_bytes());
                        sbuf.extend_from_slice(b"\r\n");
                    }
                    NumericResult::NotFound => sbuf.extend_from_slice(b"NOT_FOUND\r\n"),
                    NumericResult::NotNumeric => sbuf.extend_from_slice(ProtocolError::NotNumeric.to_wire()),
                }
            }
        }
        Ok(_) => unreachable!("shard returned a non-Numeric result for a BtreeSet arithmetic command"),
        Err(_) => {}
    }
}

async fn delete(cmd: DeleteCommand, hub: &Hub, sbuf: &mut Vec<u8>) {
    let (reply, rx) = oneshot::channel();
    hub.submit(WorkItem::BtreeDelete {
        key: cmd.key,
        reply,
    })
    .await;

    match rx.await {
        Ok(WorkResult::Deleted(found)) => {
            if !cmd.no_reply {
                sbuf.extend_from_slice(if found { b"DELETED\r\n" } else { b"NOT_FOUND\r\n" });
            }
        }
        Ok(_) => unreachable!("shard returned a non-Deleted result for a BtreeDelete"),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            max_key_len: 250,
            max_value_len: 1024 * 1024,
            max_ops_in_request: 32,
            max_response_len: 1024 * 1024,
        }
    }

    async fn run(rbuf: &mut Vec<u8>, state: &mut HandlerState, hub: &Hub) -> (Control, Vec<u8>) {
        let mut sbuf = Vec::new();
        let control = process(rbuf, &mut sbuf, state, hub, &limits()).await;
        (control, sbuf)
    }

    #[tokio::test]
    async fn set_then_get_round_trip() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();

        let mut rbuf = b"set k 0 0 3\r\nabc\r\nget k\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"STORED\r\nVALUE k 0 3\r\nabc\r\nEND\r\n");
        assert!(rbuf.is_empty());
    }

    #[tokio::test]
    async fn get_missing_key() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut rbuf = b"get missing\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"END\r\n");
    }

    #[tokio::test]
    async fn delete_then_delete_again() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();

        let mut rbuf = b"set k 0 0 1\r\nx\r\ndelete k\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"STORED\r\nDELETED\r\n");

        let mut rbuf = b"delete k\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"NOT_FOUND\r\n");
    }

    #[tokio::test]
    async fn noreply_suppresses_stored_line() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut rbuf = b"set k 0 0 3 noreply\r\nabc\r\nget k\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"VALUE k 0 3\r\nabc\r\nEND\r\n");
    }

    #[tokio::test]
    async fn incr_on_fresh_and_missing_key() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();

        let mut rbuf = b"set k 0 0 2\r\n10\r\nincr k 1\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"STORED\r\n11\r\n");

        let mut rbuf = b"incr missing 1\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"NOT_FOUND\r\n");
    }

    #[tokio::test]
    async fn malformed_command_then_recovers() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();

        let mut rbuf = b"bogus\r\nset k 0 0 1\r\nx\r\nget k\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"ERROR\r\nSTORED\r\nVALUE k 0 1\r\nx\r\nEND\r\n");
    }

    #[tokio::test]
    async fn bad_data_chunk_is_client_error() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut rbuf = b"set k 0 0 3\r\nabcXX".to_vec();
        let (control, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert!(matches!(control, Control::NeedMoreData));
        assert_eq!(sbuf, b"CLIENT_ERROR bad data chunk\r\n");
    }

    #[tokio::test]
    async fn flags_round_trip_through_get() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut rbuf = b"set k 9 0 3\r\nabc\r\nget k\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"STORED\r\nVALUE k 9 3\r\nabc\r\nEND\r\n");
    }

    #[tokio::test]
    async fn gets_is_unimplemented() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut rbuf = b"gets k\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(sbuf, b"SERVER_ERROR functionality not supported\r\n");
    }

    #[tokio::test]
    async fn multi_key_get_preserves_wire_order() {
        let hub = Hub::spawn(4, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut rbuf = b"set a 0 0 1\r\n1\r\nset b 0 0 1\r\n2\r\nset c 0 0 1\r\n3\r\nget c a b\r\n".to_vec();
        let (_, sbuf) = run(&mut rbuf, &mut state, &hub).await;
        assert_eq!(
            sbuf,
            b"STORED\r\nSTORED\r\nSTORED\r\nVALUE c 0 1\r\n3\r\nVALUE a 0 1\r\n1\r\nVALUE b 0 1\r\n2\r\nEND\r\n"
        );
    }

    #[tokio::test]
    async fn chunked_delivery_matches_single_chunk() {
        let full = b"set k 0 0 5\r\nhello\r\nget k\r\n".to_vec();

        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut rbuf = full.clone();
        let (_, whole_sbuf) = run(&mut rbuf, &mut state, &hub).await;

        let hub = Hub::spawn(2, 1024 * 1024);
        let mut state = HandlerState::new();
        let mut sbuf = Vec::new();
        let mut rbuf = Vec::new();
        for byte in full {
            rbuf.push(byte);
            let control = process(&mut rbuf, &mut sbuf, &mut state, &hub, &limits()).await;
            assert!(matches!(control, Control::NeedMoreData));
        }
        assert_eq!(sbuf, whole_sbuf);
    }
}
