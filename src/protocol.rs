//! Wire-level data types shared by the parser, dispatcher and response builder.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Above this many seconds, memcached treats `exptime` as a Unix timestamp instead
/// of a seconds-from-now offset.
const THIRTY_DAYS_SECS: u32 = 60 * 60 * 24 * 30;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StorageCommandType {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StorageCommandType {
    pub fn from_bytes(s: &[u8]) -> Option<StorageCommandType> {
        match s {
            b"set" => Some(StorageCommandType::Set),
            b"add" => Some(StorageCommandType::Add),
            b"replace" => Some(StorageCommandType::Replace),
            b"append" => Some(StorageCommandType::Append),
            b"prepend" => Some(StorageCommandType::Prepend),
            b"cas" => Some(StorageCommandType::Cas),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageCommand {
    pub command: StorageCommandType,
    pub key: String,
    pub flags: u32,
    pub exp_time: u32,
    pub cas_unique: Option<u64>,
    pub no_reply: bool,
    pub byte_count: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticKind {
    Incr,
    Decr,
}

#[derive(Debug, Clone)]
pub struct ArithmeticCommand {
    pub kind: ArithmeticKind,
    pub key: String,
    pub delta: u64,
    pub no_reply: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteCommand {
    pub key: String,
    #[allow(dead_code)] // accepted for wire compatibility, not enforced by the store
    pub hold_time: u32,
    pub no_reply: bool,
}

#[derive(Debug, Clone)]
pub enum Command {
    Storage(StorageCommand),
    Arithmetic(ArithmeticCommand),
    Get { keys: Vec<String> },
    Delete(DeleteCommand),
    Quit,
    Shutdown,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StorageCommandResponse {
    Stored,
    NotStored,
    Exists,
    NotFound,
}

impl StorageCommandResponse {
    pub fn to_wire(self) -> &'static [u8] {
        match self {
            StorageCommandResponse::Stored => b"STORED\r\n",
            StorageCommandResponse::NotStored => b"NOT_STORED\r\n",
            StorageCommandResponse::Exists => b"EXISTS\r\n",
            StorageCommandResponse::NotFound => b"NOT_FOUND\r\n",
        }
    }
}

/// A stored value: opaque bytes plus the flags and cas token memcached clients expect
/// to round-trip unchanged.
#[derive(Debug, Clone)]
pub struct Value {
    pub flags: u32,
    pub cas: u64,
    pub data: Vec<u8>,
}

/// Translate a wire `exptime` into a TTL from now, following the memcached
/// convention: `0` never expires, `<= 30 days` is seconds-from-now, anything larger
/// is a Unix timestamp.
pub fn exptime_to_duration(exp_time: u32) -> Option<Duration> {
    if exp_time == 0 {
        return None;
    }
    if exp_time <= THIRTY_DAYS_SECS {
        return Some(Duration::from_secs(exp_time as u64));
    }
    let target = UNIX_EPOCH + Duration::from_secs(exp_time as u64);
    let now = SystemTime::now();
    Some(target.duration_since(now).unwrap_or(Duration::ZERO))
}
