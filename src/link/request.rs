//! One-shot request channel.
//!
//! Infrequent request/response exchanges (destination confirmation, mode
//! changes) go over a short-lived TCP connection instead of the streaming
//! socket: they are idempotent, tolerate independent retry, and must not
//! block the telemetry read loop. Each exchange is one framed request, one
//! framed reply, then close.

use crate::error::{Result, SarathiError};
use crate::link::messages::{OneShotReply, OneShotRequest};
use crate::link::wire::{read_frame, write_frame, Serializer};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Client for the device's request port
pub struct RequestClient {
    serializer: Serializer,
    timeout: Duration,
}

impl RequestClient {
    pub fn new(serializer: Serializer, timeout: Duration) -> Self {
        Self {
            serializer,
            timeout,
        }
    }

    /// Send one request and wait for its reply
    pub fn send(&self, addr: &str, request: &OneShotRequest) -> Result<OneShotReply> {
        let sock_addr = addr
            .to_socket_addrs()
            .map_err(SarathiError::Connection)?
            .next()
            .ok_or_else(|| SarathiError::Config(format!("Invalid address: {}", addr)))?;

        let mut stream = TcpStream::connect_timeout(&sock_addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let payload = self.serializer.encode(request)?;
        write_frame(&mut stream, &payload)?;
        debug!("One-shot request sent to {}: {:?}", addr, request);

        let mut buffer = Vec::new();
        match read_frame(&mut stream, &mut buffer)? {
            Some(len) => self.serializer.decode(&buffer[..len]),
            None => Err(SarathiError::Protocol(
                "Request timed out waiting for reply".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::wire::WireFormat;
    use crate::link::messages::GeoPoint;
    use std::net::TcpListener;

    #[test]
    fn request_reply_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let serializer = Serializer::new(WireFormat::Json);

        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            let mut buffer = Vec::new();
            let len = read_frame(&mut conn, &mut buffer).unwrap().unwrap();
            let request: OneShotRequest = serializer.decode(&buffer[..len]).unwrap();
            assert!(matches!(request, OneShotRequest::ConfirmDestination { .. }));

            let reply = serializer
                .encode(&OneShotReply {
                    ok: true,
                    message: None,
                })
                .unwrap();
            write_frame(&mut conn, &reply).unwrap();
        });

        let client = RequestClient::new(serializer, Duration::from_secs(2));
        let reply = client
            .send(
                &addr.to_string(),
                &OneShotRequest::ConfirmDestination {
                    point: GeoPoint {
                        lat: 37.56,
                        lon: 126.97,
                    },
                    name: Some("City Hall".into()),
                },
            )
            .unwrap();

        assert!(reply.ok);
        server.join().unwrap();
    }

    #[test]
    fn unreachable_device_is_a_connection_error() {
        let serializer = Serializer::new(WireFormat::Json);
        let client = RequestClient::new(serializer, Duration::from_millis(200));
        // Port 1 on localhost is assumed closed
        let err = client
            .send(
                "127.0.0.1:1",
                &OneShotRequest::SetMode {
                    mode: "auto".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, SarathiError::Connection(_)));
    }
}
