use thiserror::Error;

/// Non-fatal protocol-level errors. These never abort the connection; the caller
/// renders them to their wire-specified reply and keeps parsing.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    #[error("malformed command line")]
    Malformed,

    #[error("bad data chunk")]
    BadDataChunk,

    #[error("functionality not supported")]
    Unimplemented,

    #[error("too many keys")]
    TooManyKeys,

    #[error("response too large")]
    ResponseTooLarge,

    #[error("cannot increment or decrement non-numeric value")]
    NotNumeric,
}

impl ProtocolError {
    /// The exact bytes staged into `sbuf` for this error, CRLF included.
    pub fn to_wire(&self) -> &'static [u8] {
        match self {
            ProtocolError::Malformed => b"ERROR\r\n",
            ProtocolError::BadDataChunk => b"CLIENT_ERROR bad data chunk\r\n",
            ProtocolError::Unimplemented => b"SERVER_ERROR functionality not supported\r\n",
            ProtocolError::TooManyKeys => b"SERVER_ERROR too many keys\r\n",
            ProtocolError::ResponseTooLarge => b"SERVER_ERROR response too large\r\n",
            ProtocolError::NotNumeric => {
                b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n"
            }
        }
    }
}
