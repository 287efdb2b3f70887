//! Socket I/O glue: owns the growable read/write buffers and drives the handler's
//! parse loop over them.

use tokio::io::{AsyncReadExt, AsyncWriteExt, Result};
use tokio::net::TcpStream;

use crate::config::Limits;
use crate::handler::{process, Control};
use crate::parser::HandlerState;
use crate::shard::Hub;

const READ_CHUNK: usize = 4096;

pub(crate) struct Connection {
    stream: TcpStream,
    rbuf: Vec<u8>,
    sbuf: Vec<u8>,
    state: HandlerState,
}

/// What `Connection::run` found when it stopped driving the handler loop.
pub(crate) enum Outcome {
    /// The peer closed the socket (or sent `quit`) before the next command arrived.
    Closed,
    /// The in-protocol `shutdown` command was accepted.
    Shutdown,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream) -> Connection {
        Connection {
            stream,
            rbuf: Vec::with_capacity(READ_CHUNK),
            sbuf: Vec::new(),
            state: HandlerState::new(),
        }
    }

    /// Run the read-parse-dispatch-write cycle until the connection closes, `quit`
    /// is accepted, or `shutdown` is accepted.
    pub(crate) async fn run(&mut self, hub: &Hub, limits: &Limits) -> Result<Outcome> {
        loop {
            match process(&mut self.rbuf, &mut self.sbuf, &mut self.state, hub, limits).await {
                Control::NeedMoreData => {
                    self.flush().await?;
                    if !self.fill().await? {
                        return Ok(Outcome::Closed);
                    }
                }
                Control::Quit => {
                    self.flush().await?;
                    return Ok(Outcome::Closed);
                }
                Control::Shutdown => {
                    self.flush().await?;
                    return Ok(Outcome::Shutdown);
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.sbuf.is_empty() {
            self.stream.write_all(&self.sbuf).await?;
            self.sbuf.clear();
        }
        Ok(())
    }

    /// Read more bytes from the socket into `rbuf`. Returns `false` on EOF.
    async fn fill(&mut self) -> Result<bool> {
        let start = self.rbuf.len();
        self.rbuf.resize(start + READ_CHUNK, 0);
        let n = self.stream.read(&mut self.rbuf[start..]).await?;
        self.rbuf.truncate(start + n);
        Ok(n > 0)
    }
}
