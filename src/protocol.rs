//! Wire protocol.
//!
//! Every message is a JSON document terminated by a single `\n`. JSON escapes newlines inside string
//! values, so the line terminator is the only framing needed. A batch of strings goes out as one array
//! and comes back sorted as one array; the exchange is strictly request/response per connection.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Message terminator.
pub const DELIMITER: u8 = b'\n';

/// Wire protocol error. Any of these means the link is no longer trusted.
#[derive(Debug)]
pub enum ProtocolError {
    /// Stream read/write error (including read deadline expiry).
    IO(io::Error),
    /// Message serialization error.
    Serialization(serde_json::Error),
    /// Malformed message.
    Deserialization(serde_json::Error),
    /// Peer closed the stream before a full message was read.
    ConnectionClosed,
    /// Peer answered a batch with a result of a different length.
    LengthMismatch { sent: usize, received: usize },
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            ProtocolError::IO(err) => Some(err),
            ProtocolError::Serialization(err) => Some(err),
            ProtocolError::Deserialization(err) => Some(err),
            ProtocolError::ConnectionClosed => None,
            ProtocolError::LengthMismatch { .. } => None,
        }
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ProtocolError::IO(err) => write!(f, "I/O operation failed: {}", err),
            ProtocolError::Serialization(err) => write!(f, "message serialization error: {}", err),
            ProtocolError::Deserialization(err) => write!(f, "malformed message: {}", err),
            ProtocolError::ConnectionClosed => write!(f, "connection closed by peer"),
            ProtocolError::LengthMismatch { sent, received } => {
                write!(f, "result length mismatch (sent: {}, received: {})", sent, received)
            }
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        ProtocolError::IO(err)
    }
}

/// Encodes a message as a single newline-terminated line.
pub fn encode<T>(message: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: serde::ser::Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(message).map_err(ProtocolError::Serialization)?;
    line.push(DELIMITER);

    return Ok(line);
}

/// Decodes a single line (with or without its terminator).
pub fn decode<T>(line: &[u8]) -> Result<T, ProtocolError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_slice(line).map_err(ProtocolError::Deserialization)
}

/// Writes one message to the stream and flushes it.
pub fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: Write,
    T: serde::ser::Serialize + ?Sized,
{
    writer.write_all(&encode(message)?)?;
    writer.flush()?;

    return Ok(());
}

/// Reads one message from the stream.
/// A stream that ends before the terminator is reported as [`ProtocolError::ConnectionClosed`].
pub fn read_message<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: BufRead,
    T: serde::de::DeserializeOwned,
{
    let mut line = Vec::new();
    reader.read_until(DELIMITER, &mut line)?;

    if line.last() != Some(&DELIMITER) {
        return Err(ProtocolError::ConnectionClosed);
    }

    decode(&line)
}

/// A framed, bidirectional connection over a TCP stream.
///
/// The read half is buffered once for the whole lifetime of the connection, so bytes that arrive
/// ahead of the current message are never lost between messages.
pub struct Connection {
    reader: io::BufReader<TcpStream>,
    writer: TcpStream,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr().ok();
        let reader = io::BufReader::new(stream.try_clone()?);

        return Ok(Connection {
            reader,
            writer: stream,
            peer,
        });
    }

    /// Remote address, if it was known when the connection was created.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Sets the deadline applied to every subsequent receive. `None` blocks indefinitely.
    pub fn set_receive_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.writer.set_read_timeout(timeout)
    }

    pub fn send<T>(&mut self, message: &T) -> Result<(), ProtocolError>
    where
        T: serde::ser::Serialize + ?Sized,
    {
        write_message(&mut self.writer, message)
    }

    pub fn send_raw(&mut self, line: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(line)?;
        self.writer.flush()?;

        return Ok(());
    }

    pub fn receive<T>(&mut self) -> Result<T, ProtocolError>
    where
        T: serde::de::DeserializeOwned,
    {
        read_message(&mut self.reader)
    }

    /// Shuts both directions down. Errors are ignored: the peer may already be gone.
    pub fn close(&self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}
