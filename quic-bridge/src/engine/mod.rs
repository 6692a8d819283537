// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The seam between this crate and the QUIC engine that does the real work.
//!
//! Handshakes, packet framing, loss recovery and TLS are provided by an
//! external engine implementing [`QuicEngine`]. The crate never inspects the
//! engine's state: connections and streams are referred to through the
//! opaque [`ConnectionHandle`] and [`StreamHandle`] values the engine hands
//! out, and every call into the engine goes through one internal adapter.
//!
//! All futures returned by the engine are driven on the engine runtime (see
//! [`engine_runtime`]), never on the host's event loop.

pub(crate) mod adapter;
mod runtime;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::result::BridgeError;
use crate::result::BridgeResult;
use crate::settings::ClientAuthentication;

pub use self::runtime::engine_runtime;

/// [Result] alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Opaque reference to a connection owned by the engine.
///
/// Only the engine assigns meaning to the raw value. Host code never sees
/// handles; they are passed back to the engine unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// Opaque reference to a stream owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// A QUIC application error code.
///
/// Error codes travel as variable-length integers, so only values up to
/// [`ErrorCode::MAX`] can be sent to the peer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorCode(u64);

impl ErrorCode {
    /// Largest value representable as a QUIC varint.
    pub const MAX: u64 = (1 << 62) - 1;
    /// The conventional "no error" code.
    pub const NO_ERROR: Self = Self(0);

    pub fn new(code: u64) -> BridgeResult<Self> {
        if code > Self::MAX {
            return Err(BridgeError::InvalidErrorCode(code));
        }
        Ok(Self(code))
    }

    #[inline]
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for ErrorCode {
    type Error = BridgeError;

    fn try_from(code: u64) -> BridgeResult<Self> {
        Self::new(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the engine needs to dial a server.
#[derive(Clone)]
pub struct ConnectRequest {
    /// Address to route packets to. Name resolution already happened.
    pub remote: SocketAddr,
    /// Name used for TLS server-name indication and certificate matching.
    /// This is independent of `remote`.
    pub server_name: String,
    /// Wire-encoded ALPN protocols. `None` keeps the engine's default.
    pub alpn_protocols: Option<Vec<Vec<u8>>>,
    /// Additional trust anchors, each one a certificate in PEM or DER form.
    pub certificate_authorities: Vec<Vec<u8>>,
    /// Identity presented for mutual TLS.
    pub client_authentication: Option<ClientAuthentication>,
    /// Keep-alive interval the engine should apply.
    pub keep_alive_interval: Option<Duration>,
    /// Idle timeout the engine should apply. `None` keeps its default.
    pub max_idle_timeout: Option<Duration>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid printing the client identity since it contains the private
        // key.
        f.debug_struct("ConnectRequest")
            .field("remote", &self.remote)
            .field("server_name", &self.server_name)
            .field("alpn_protocols", &self.alpn_protocols)
            .field(
                "certificate_authorities",
                &self.certificate_authorities.len(),
            )
            .field(
                "client_authentication",
                &self.client_authentication.is_some(),
            )
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("max_idle_timeout", &self.max_idle_timeout)
            .finish()
    }
}

/// A stream opened by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingStream {
    pub stream: StreamHandle,
    /// Unidirectional streams can only be read from.
    pub unidirectional: bool,
}

/// Immutable metadata of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDetails {
    /// Stream ID assigned by the engine.
    pub id: u64,
    /// Whether data on this stream arrived before the handshake was
    /// confirmed. Such data may be replayed by an attacker.
    pub is_0rtt: bool,
}

/// Failures reported by a [`QuicEngine`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// TLS, ALPN or certificate validation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The connection was closed by the peer, timed out or was reset.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The connection was closed by this endpoint.
    #[error("connection closed locally")]
    LocallyClosed,
    /// The stream was already finished or stopped.
    #[error("stream closed")]
    StreamClosed,
    /// The peer reset the stream with the given application error code.
    #[error("stream reset by peer with code {0}")]
    StreamReset(u64),
    /// The peer's flow-control limits were violated.
    #[error("flow control violation: {0}")]
    FlowControl(String),
    /// Data sent in 0-RTT was rejected by the server.
    #[error("0-RTT data rejected")]
    ZeroRttRejected,
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether the error merely reports that the connection has ended.
    pub fn is_connection_closure(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::LocallyClosed)
    }

    /// Whether the error marks the regular end of a stream's receive side.
    pub fn ends_stream(&self) -> bool {
        self.is_connection_closure() ||
            matches!(self, Self::StreamClosed | Self::StreamReset(_))
    }
}

/// Operations offered by the external QUIC engine.
///
/// Implementations must not block: synchronous methods are expected to
/// return immediately and asynchronous ones to yield while waiting for the
/// network. Every future is polled on the engine runtime.
pub trait QuicEngine: Send + Sync + 'static {
    /// Performs the transport and TLS handshake with a server.
    fn connect(
        &self, request: ConnectRequest,
    ) -> BoxFuture<'static, EngineResult<ConnectionHandle>>;

    /// Waits for the peer to open a new stream.
    fn accept_stream(
        &self, connection: ConnectionHandle,
    ) -> BoxFuture<'static, EngineResult<IncomingStream>>;

    /// Opens a new bidirectional stream.
    fn open_stream(
        &self, connection: ConnectionHandle,
    ) -> BoxFuture<'static, EngineResult<StreamHandle>>;

    /// Reads up to `max_len` bytes. Resolves to `None` once the peer has
    /// finished the stream.
    fn read(
        &self, stream: StreamHandle, max_len: usize,
    ) -> BoxFuture<'static, EngineResult<Option<Bytes>>>;

    /// Writes a prefix of `data` and resolves to its length.
    ///
    /// The future waits for flow-control capacity instead of accepting zero
    /// bytes.
    fn write(
        &self, stream: StreamHandle, data: Bytes,
    ) -> BoxFuture<'static, EngineResult<usize>>;

    /// Finishes the send side of a stream.
    fn finish(&self, stream: StreamHandle) -> EngineResult<()>;

    /// Stops the receive side of a stream, discarding unread data.
    fn stop(&self, stream: StreamHandle, error_code: ErrorCode)
        -> EngineResult<()>;

    /// Closes the connection and every stream on it.
    fn close_connection(
        &self, connection: ConnectionHandle, error_code: ErrorCode,
        reason: &[u8],
    );

    /// Resolves with a human-readable reason once the connection is closed.
    fn closed(&self, connection: ConnectionHandle) -> BoxFuture<'static, String>;

    fn stream_details(&self, stream: StreamHandle) -> EngineResult<StreamDetails>;

    fn remote_address(
        &self, connection: ConnectionHandle,
    ) -> EngineResult<SocketAddr>;

    /// Called once no host object refers to `stream` anymore.
    fn release_stream(&self, stream: StreamHandle) {
        let _ = stream;
    }

    /// Called once no host object refers to `connection` anymore.
    fn release_connection(&self, connection: ConnectionHandle) {
        let _ = connection;
    }
}
