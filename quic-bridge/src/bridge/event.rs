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

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::engine::EngineError;
use crate::engine::IncomingStream;

/// Identity of a host object within one bridge. Identities are never
/// reused, so an event addressed to a retired object cannot reach a newer
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ObjectId(u64);

impl ObjectId {
    #[inline]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notification produced on the engine runtime for a host object.
#[derive(Debug)]
pub(crate) enum BridgeEvent {
    IncomingStream {
        connection: ObjectId,
        stream: IncomingStream,
    },
    ConnectionError {
        connection: ObjectId,
        error: EngineError,
    },
    ConnectionClosed {
        connection: ObjectId,
        reason: String,
    },
    StreamData {
        stream: ObjectId,
        data: Bytes,
    },
    StreamError {
        stream: ObjectId,
        error: EngineError,
    },
    StreamClosed {
        stream: ObjectId,
        reason: String,
    },
}

impl BridgeEvent {
    pub(crate) fn target(&self) -> ObjectId {
        match self {
            Self::IncomingStream { connection, .. } |
            Self::ConnectionError { connection, .. } |
            Self::ConnectionClosed { connection, .. } => *connection,
            Self::StreamData { stream, .. } |
            Self::StreamError { stream, .. } |
            Self::StreamClosed { stream, .. } => *stream,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::IncomingStream { .. } => "incoming_stream",
            Self::ConnectionError { .. } => "connection_error",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::StreamData { .. } => "stream_data",
            Self::StreamError { .. } => "stream_error",
            Self::StreamClosed { .. } => "stream_closed",
        }
    }
}

pub(crate) type EventSender = mpsc::UnboundedSender<BridgeEvent>;
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<BridgeEvent>;
