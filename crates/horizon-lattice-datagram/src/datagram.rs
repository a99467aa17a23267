//! Values that flow through the server pipeline.

use std::net::SocketAddr;
use std::time::Instant;

/// A datagram as it came off the socket.
#[derive(Clone, Debug)]
pub struct RawDatagram {
    /// The datagram payload.
    pub data: Vec<u8>,
    /// The source address of the datagram.
    pub source: SocketAddr,
    /// When the reader received it.
    pub received_at: Instant,
}

impl RawDatagram {
    /// Create a new datagram stamped with the current time.
    pub fn new(data: Vec<u8>, source: SocketAddr) -> Self {
        Self {
            data,
            source,
            received_at: Instant::now(),
        }
    }
}

/// A request handed to [`RequestHandler::process`](crate::RequestHandler::process).
#[derive(Clone, Debug)]
pub struct Request {
    /// The request payload.
    pub data: Vec<u8>,
    /// The peer that sent it.
    pub source: SocketAddr,
    /// When the underlying datagram was received.
    pub received_at: Instant,
}

impl Request {
    /// Build a response addressed back to the sender of this request.
    pub fn reply(&self, data: impl Into<Vec<u8>>) -> Response {
        Response::new(self.source, data)
    }
}

impl From<RawDatagram> for Request {
    fn from(datagram: RawDatagram) -> Self {
        Self {
            data: datagram.data,
            source: datagram.source,
            received_at: datagram.received_at,
        }
    }
}

/// An outbound reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Where to send the payload.
    pub destination: SocketAddr,
    /// The payload.
    pub data: Vec<u8>,
}

impl Response {
    /// Create a new response.
    pub fn new(destination: SocketAddr, data: impl Into<Vec<u8>>) -> Self {
        Self {
            destination,
            data: data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_targets_sender() {
        let source: SocketAddr = "192.168.1.100:5000".parse().unwrap();
        let request = Request::from(RawDatagram::new(vec![1, 2, 3], source));

        let response = request.reply(&b"ack"[..]);
        assert_eq!(response.destination, source);
        assert_eq!(response.data, b"ack");
    }

    #[test]
    fn test_request_keeps_receive_time() {
        let datagram = RawDatagram::new(vec![9], "127.0.0.1:1".parse().unwrap());
        let received_at = datagram.received_at;

        let request = Request::from(datagram);
        assert_eq!(request.received_at, received_at);
        assert_eq!(request.data, vec![9]);
    }
}
