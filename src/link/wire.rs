//! Wire format and framing
//!
//! All traffic to and from the device uses length-prefixed framing:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ JSON or Postcard binary  │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! The same layout is used on the TCP telemetry stream, on outbound UDP
//! datagrams and on the one-shot request channel.
//!
//! - Maximum payload size: 1 MiB; an oversized length prefix closes the
//!   connection
//! - A payload that fails to deserialize is reported as an error so the
//!   caller can count and drop it without touching link state

use crate::error::{Result, SarathiError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::net::TcpStream;

/// Maximum accepted payload size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum WireFormat {
    /// Binary format using postcard - fast and compact
    Postcard,
    /// JSON format - human-readable for debugging
    #[default]
    Json,
}

impl WireFormat {
    /// Parse the config string form; unknown values fall back to JSON
    pub fn from_config(name: &str) -> Self {
        match name {
            "postcard" => WireFormat::Postcard,
            _ => WireFormat::Json,
        }
    }
}

/// Serializer that can handle both formats
#[derive(Clone, Copy)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// Serialize a message to bytes
    pub fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>> {
        match self.format {
            WireFormat::Postcard => {
                postcard::to_allocvec(msg).map_err(|e| SarathiError::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::to_vec(msg).map_err(|e| SarathiError::Serialization(e.to_string()))
            }
        }
    }

    /// Deserialize bytes to a message
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self.format {
            WireFormat::Postcard => {
                postcard::from_bytes(bytes).map_err(|e| SarathiError::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| SarathiError::Serialization(e.to_string()))
            }
        }
    }

    /// Build a length-prefixed datagram into a reusable buffer
    pub fn encode_datagram<T: Serialize>(&self, msg: &T, buffer: &mut Vec<u8>) -> Result<()> {
        let payload = self.encode(msg)?;
        let len = (payload.len() as u32).to_be_bytes();
        buffer.clear();
        buffer.extend_from_slice(&len);
        buffer.extend_from_slice(&payload);
        Ok(())
    }
}

/// Write one length-prefixed frame to a stream
pub fn write_frame<W: Write>(stream: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Read one length-prefixed frame from a TCP stream.
///
/// Returns `Ok(None)` when the read timed out before a frame arrived, so the
/// caller's loop can check its shutdown flag. EOF and other I/O failures are
/// returned as errors; an oversized length prefix is a protocol error and
/// the caller is expected to drop the connection.
pub fn read_frame(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<Option<usize>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
        Err(e) => return Err(SarathiError::Connection(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(SarathiError::Protocol(format!(
            "Frame too large: {} bytes",
            len
        )));
    }

    buffer.clear();
    buffer.resize(len, 0);
    stream.read_exact(buffer)?;
    Ok(Some(len))
}

/// Decode a length-prefixed datagram received in one read
pub fn split_datagram(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 4 {
        return Err(SarathiError::Protocol("Datagram shorter than prefix".into()));
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len > MAX_FRAME_SIZE || data.len() < 4 + len {
        return Err(SarathiError::Protocol(format!(
            "Incomplete datagram: prefix {} bytes, got {}",
            len,
            data.len().saturating_sub(4)
        )));
    }
    Ok(&data[4..4 + len])
}
