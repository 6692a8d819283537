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

use bytes::Bytes;

use crate::result::BridgeError;
use crate::Connection;
use crate::PartialStream;
use crate::Stream;

pub type OnStream = Box<dyn FnMut(&Connection, &PartialStream)>;
pub type OnConnectionClose = Box<dyn FnOnce(&Connection, String)>;
pub type OnConnectionError = Box<dyn FnMut(&Connection, BridgeError)>;

pub type OnData = Box<dyn FnMut(&Stream, Bytes)>;
pub type OnStreamClose = Box<dyn FnOnce(&Stream, String)>;
pub type OnStreamError = Box<dyn FnMut(&Stream, BridgeError)>;

fn hook_status<T>(val: &Option<T>) -> &'static str {
    match val {
        Some(_) => "enabled",
        None => "disabled",
    }
}

/// Callbacks attached to a [`Connection`].
///
/// Every callback receives the connection it belongs to as its first
/// argument and runs on the host's event loop.
#[derive(Default)]
pub struct ConnectionCallbacks {
    pub(crate) on_stream: Option<OnStream>,
    pub(crate) on_close: Option<OnConnectionClose>,
    pub(crate) on_error: Option<OnConnectionError>,
}

impl ConnectionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every stream opened by the peer.
    ///
    /// The handler must call [`PartialStream::initialize`] before it
    /// returns. Otherwise the stream is closed and its data discarded.
    pub fn on_stream(
        mut self, f: impl FnMut(&Connection, &PartialStream) + 'static,
    ) -> Self {
        self.on_stream = Some(Box::new(f));
        self
    }

    /// Called once with a human-readable reason when the connection ends.
    pub fn on_close(mut self, f: impl FnOnce(&Connection, String) + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    /// Called for failures that have no pending caller to report to.
    pub fn on_error(
        mut self, f: impl FnMut(&Connection, BridgeError) + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ConnectionCallbacks")
            .field("on_stream", &hook_status(&self.on_stream))
            .field("on_close", &hook_status(&self.on_close))
            .field("on_error", &hook_status(&self.on_error))
            .finish()
    }
}

/// Callbacks attached to a [`Stream`] when it is initialized.
///
/// Missing callbacks behave like no-ops: data arriving without an `on_data`
/// handler is dropped.
#[derive(Default)]
pub struct StreamCallbacks {
    pub(crate) on_data: Option<OnData>,
    pub(crate) on_close: Option<OnStreamClose>,
    pub(crate) on_error: Option<OnStreamError>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with every chunk read from the stream, in order.
    pub fn on_data(mut self, f: impl FnMut(&Stream, Bytes) + 'static) -> Self {
        self.on_data = Some(Box::new(f));
        self
    }

    /// Called once when the stream ends. The reason is `"closed"` for a
    /// regular end of stream.
    pub fn on_close(mut self, f: impl FnOnce(&Stream, String) + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    /// Called when reading fails for a reason other than the stream or its
    /// connection ending. No further events follow.
    pub fn on_error(mut self, f: impl FnMut(&Stream, BridgeError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_data", &hook_status(&self.on_data))
            .field("on_close", &hook_status(&self.on_close))
            .field("on_error", &hook_status(&self.on_error))
            .finish()
    }
}
