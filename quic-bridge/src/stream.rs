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

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::rc::Weak;
use std::sync::Arc;

use bytes::Bytes;
use foundations::telemetry::log;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::tasks;
use crate::bridge::ObjectId;
use crate::engine::adapter::EngineAdapter;
use crate::engine::ErrorCode;
use crate::engine::StreamDetails;
use crate::engine::StreamHandle;
use crate::result::BridgeError;
use crate::result::BridgeResult;
use crate::settings::StreamCallbacks;
use crate::Connection;

/// A stream that has been accepted but not yet attached to callbacks.
///
/// Inbound streams are handed to the connection's `on_stream` handler as a
/// [`PartialStream`]. The handler must call [`PartialStream::initialize`]
/// before it returns; a stream left uninitialized is closed and its data
/// discarded.
pub struct PartialStream {
    connection: Connection,
    pending: Cell<Option<StreamHandle>>,
    unidirectional: bool,
}

impl PartialStream {
    pub(crate) fn new(
        connection: Connection, handle: StreamHandle, unidirectional: bool,
    ) -> Self {
        Self {
            connection,
            pending: Cell::new(Some(handle)),
            unidirectional,
        }
    }

    /// Attaches `callbacks` and starts reading from the stream.
    ///
    /// Succeeds exactly once. Later calls fail with
    /// [`BridgeError::AlreadyInitialized`].
    pub fn initialize(&self, callbacks: StreamCallbacks) -> BridgeResult<Stream> {
        let handle = self
            .pending
            .take()
            .ok_or(BridgeError::AlreadyInitialized)?;

        Stream::attach(
            self.connection.clone(),
            handle,
            self.unidirectional,
            callbacks,
        )
    }

    /// Whether the peer opened the stream for sending only.
    #[inline]
    pub fn is_unidirectional(&self) -> bool {
        self.unidirectional
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.pending.get().is_none()
    }

    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn take_pending(&self) -> Option<StreamHandle> {
        self.pending.take()
    }
}

impl fmt::Debug for PartialStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialStream")
            .field("connection", &self.connection)
            .field("unidirectional", &self.unidirectional)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// A QUIC stream attached to host callbacks.
///
/// A stream keeps its [`Connection`] alive. Callbacks only fire while the
/// host holds a handle: dropping the last one stops reading, finishes the
/// send side if it is still open and releases the engine stream.
#[derive(Clone)]
pub struct Stream {
    inner: Rc<StreamInner>,
}

pub(crate) struct StreamInner {
    id: ObjectId,
    handle: StreamHandle,
    details: StreamDetails,
    connection: Connection,
    unidirectional: bool,
    /// Never reset once set.
    write_closed: Cell<bool>,
    closed: Cell<bool>,
    /// Tells the read pump that the stream was closed locally.
    read_closed: CancellationToken,
    pump: Cell<Option<AbortHandle>>,
}

impl Stream {
    /// Creates the host object for `handle` and starts its read pump.
    fn attach(
        connection: Connection, handle: StreamHandle, unidirectional: bool,
        callbacks: StreamCallbacks,
    ) -> BridgeResult<Self> {
        let bridge = Rc::clone(connection.bridge());
        let adapter = bridge.adapter();

        let details = match adapter.stream_details(handle) {
            Ok(details) => details,
            Err(error) => {
                adapter.discard_stream(handle);
                return Err(error);
            },
        };

        let id = bridge.next_id();
        let read_closed = CancellationToken::new();
        let stream = Self {
            inner: Rc::new(StreamInner {
                id,
                handle,
                details,
                connection,
                unidirectional,
                write_closed: Cell::new(unidirectional),
                closed: Cell::new(false),
                read_closed: read_closed.clone(),
                pump: Cell::new(None),
            }),
        };
        bridge.register_stream(&stream, callbacks);

        let pump = tasks::pump_stream(
            Arc::clone(adapter.engine()),
            handle,
            id,
            bridge.settings().read_buffer_size.max(1),
            read_closed,
            bridge.events().clone(),
        );

        match stream
            .connection()
            .killswitch()
            .spawn_task(adapter.runtime(), pump)
        {
            Some(pump) => stream.inner.pump.set(Some(pump)),
            // Dropping `stream` unregisters it again.
            None => return Err(BridgeError::ConnectionClosed),
        }

        log::debug!("stream initialized";
            "stream" => %id,
            "stream_id" => details.id,
            "unidirectional" => unidirectional,
            "is_0rtt" => details.is_0rtt
        );

        Ok(stream)
    }

    #[inline]
    pub(crate) fn from_inner(inner: Rc<StreamInner>) -> Self {
        Self { inner }
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> Weak<StreamInner> {
        Rc::downgrade(&self.inner)
    }

    #[inline]
    pub(crate) fn object_id(&self) -> ObjectId {
        self.inner.id
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> StreamHandle {
        self.inner.handle
    }

    #[inline]
    fn adapter(&self) -> &EngineAdapter {
        self.inner.connection.adapter()
    }

    /// Writes all of `data` to the stream.
    ///
    /// Resolves once the engine has accepted every byte. An empty buffer is
    /// accepted without contacting the engine.
    pub async fn write(&self, data: &[u8]) -> BridgeResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.inner.closed.get() || self.inner.write_closed.get() {
            return Err(BridgeError::StreamClosed);
        }
        if self.inner.connection.is_closed() {
            return Err(BridgeError::ConnectionClosed);
        }

        self.adapter()
            .write(self.inner.handle, Bytes::copy_from_slice(data))
            .await
    }

    /// Closes both directions of the stream and discards unread data.
    ///
    /// The stream's close callback fires with `"closed"` unless it already
    /// ended. Closing an already closed stream does nothing.
    pub fn close(&self, error_code: u64) -> BridgeResult<()> {
        let error_code = ErrorCode::new(error_code)?;

        if self.inner.closed.replace(true) {
            return Ok(());
        }

        log::debug!("closing stream"; "stream" => %self.inner.id, "error_code" => error_code.into_inner());

        self.inner.write_closed.set(true);
        self.inner.read_closed.cancel();
        self.adapter().close_stream(self.inner.handle, error_code)
    }

    /// Finishes the send side of the stream. Does nothing if it is already
    /// closed.
    pub fn close_write(&self) -> BridgeResult<()> {
        if self.inner.write_closed.get() {
            return Ok(());
        }

        self.adapter().close_write(self.inner.handle)?;
        self.inner.write_closed.set(true);

        Ok(())
    }

    /// The connection this stream belongs to.
    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Stream ID assigned by the engine.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.details.id
    }

    /// Whether the stream carries 0-RTT data, which a network attacker can
    /// replay.
    #[inline]
    pub fn is_0rtt(&self) -> bool {
        self.inner.details.is_0rtt
    }

    #[inline]
    pub fn is_unidirectional(&self) -> bool {
        self.inner.unidirectional
    }

    #[inline]
    pub fn write_is_closed(&self) -> bool {
        self.inner.write_closed.get()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("is_0rtt", &self.is_0rtt())
            .field("unidirectional", &self.is_unidirectional())
            .field("write_closed", &self.write_is_closed())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let adapter = self.connection.adapter();
        if !self.write_closed.get() && !self.connection.is_closed() {
            if let Err(error) = adapter.close_write(self.handle) {
                log::debug!("failed to finish dropped stream"; "stream" => %self.id, "error" => %error);
            }
        }

        self.connection.bridge().forget_stream(self.id);
        adapter.release_stream(self.handle);
    }
}
