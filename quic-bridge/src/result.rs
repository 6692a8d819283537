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

use tokio::task::JoinError;

use crate::engine::EngineError;

/// Errors surfaced to host code by connections, streams, and the event loop.
///
/// Failures of asynchronous operations are returned to the awaiting caller.
/// Failures without a pending caller (a later stream reset, say) are handed
/// to the object's `on_error`/`on_close` callback instead.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The remote address could not be turned into a socket address.
    #[error("invalid remote address: {0}")]
    AddressResolution(String),
    /// TLS, ALPN or certificate validation failed while connecting.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The operation was attempted after the connection was torn down.
    #[error("connection closed")]
    ConnectionClosed,
    /// The operation was attempted on a stream that can no longer send.
    #[error("stream closed")]
    StreamClosed,
    /// A [`PartialStream`](crate::PartialStream) was initialized twice.
    #[error("stream already initialized")]
    AlreadyInitialized,
    /// An inbound stream was not initialized by the `on_stream` handler. The
    /// stream has been closed and its buffered data dropped. `stream_id` is
    /// `None` if the engine could no longer describe the stream.
    #[error("inbound stream was not initialized by the on_stream handler")]
    UninitializedStream { stream_id: Option<u64> },
    /// QUIC error codes are variable-length integers below `2^62`.
    #[error("error code {0} exceeds the QUIC varint range")]
    InvalidErrorCode(u64),
    /// The connect options were rejected before reaching the engine.
    #[error("invalid connect options: {0}")]
    InvalidOptions(String),
    /// The engine runtime could not be started or an engine task failed.
    #[error("engine runtime failure: {0}")]
    Runtime(String),
    /// Opaque failure reported by the QUIC engine.
    #[error(transparent)]
    Engine(EngineError),
}

/// [Result] alias based on [`BridgeError`] for this crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<EngineError> for BridgeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Handshake(reason) => Self::Handshake(reason),
            EngineError::ConnectionLost(_) | EngineError::LocallyClosed =>
                Self::ConnectionClosed,
            EngineError::StreamClosed | EngineError::StreamReset(_) =>
                Self::StreamClosed,
            other => Self::Engine(other),
        }
    }
}

impl From<JoinError> for BridgeError {
    fn from(err: JoinError) -> Self {
        Self::Runtime(err.to_string())
    }
}
