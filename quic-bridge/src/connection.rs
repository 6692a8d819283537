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
use std::net::IpAddr;
use std::net::SocketAddr;
use std::rc::Rc;
use std::rc::Weak;
use std::sync::Arc;

use foundations::telemetry::log;
use task_killswitch::TaskKillswitch;

use crate::bridge::tasks;
use crate::bridge::Bridge;
use crate::bridge::ObjectId;
use crate::engine::adapter::EngineAdapter;
use crate::engine::ConnectionHandle;
use crate::engine::ErrorCode;
use crate::result::BridgeError;
use crate::result::BridgeResult;
use crate::settings::ConnectionCallbacks;
use crate::settings::StreamCallbacks;
use crate::PartialStream;
use crate::Stream;

/// An established QUIC connection.
///
/// Cloning a [`Connection`] yields another handle to the same connection.
/// Every [`Stream`] keeps its connection alive. Once the last handle and the
/// last stream are dropped, the connection is closed with error code 0 and
/// all of its engine-side tasks are stopped.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    id: ObjectId,
    handle: ConnectionHandle,
    bridge: Rc<Bridge>,
    /// Stops the close watcher, the accept loop and every read pump of this
    /// connection.
    killswitch: TaskKillswitch,
    closed: Cell<bool>,
}

impl Connection {
    /// Wraps a freshly established engine connection and starts delivering
    /// its events.
    pub(crate) fn establish(
        bridge: &Rc<Bridge>, handle: ConnectionHandle,
        callbacks: ConnectionCallbacks,
    ) -> Self {
        let id = bridge.next_id();
        let connection = Self {
            inner: Rc::new(ConnectionInner {
                id,
                handle,
                bridge: Rc::clone(bridge),
                killswitch: TaskKillswitch::new(),
                closed: Cell::new(false),
            }),
        };
        bridge.register_connection(&connection, callbacks);

        let adapter = bridge.adapter();
        let engine = adapter.engine();
        let killswitch = &connection.inner.killswitch;

        killswitch.spawn_task(
            adapter.runtime(),
            tasks::watch_connection(
                Arc::clone(engine),
                handle,
                id,
                bridge.events().clone(),
            ),
        );
        killswitch.spawn_task(
            adapter.runtime(),
            tasks::accept_streams(
                Arc::clone(engine),
                handle,
                id,
                bridge.events().clone(),
            ),
        );

        connection
    }

    #[inline]
    pub(crate) fn from_inner(inner: Rc<ConnectionInner>) -> Self {
        Self { inner }
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Rc::downgrade(&self.inner)
    }

    #[inline]
    pub(crate) fn object_id(&self) -> ObjectId {
        self.inner.id
    }

    #[inline]
    pub(crate) fn handle(&self) -> ConnectionHandle {
        self.inner.handle
    }

    #[inline]
    pub(crate) fn bridge(&self) -> &Rc<Bridge> {
        &self.inner.bridge
    }

    #[inline]
    pub(crate) fn adapter(&self) -> &EngineAdapter {
        self.inner.bridge.adapter()
    }

    #[inline]
    pub(crate) fn killswitch(&self) -> &TaskKillswitch {
        &self.inner.killswitch
    }

    /// Records that the engine closed the connection.
    pub(crate) fn mark_closed(&self) {
        self.inner.closed.set(true);
        self.inner.killswitch.activate();
    }

    /// Opens a new bidirectional stream.
    ///
    /// Fails with [`BridgeError::ConnectionClosed`] once the connection has
    /// been closed.
    pub async fn create_stream(
        &self, callbacks: StreamCallbacks,
    ) -> BridgeResult<Stream> {
        if self.is_closed() {
            return Err(BridgeError::ConnectionClosed);
        }

        let handle = self.adapter().open_stream(self.handle()).await?;

        if self.is_closed() {
            // Closed while the engine was opening the stream.
            self.adapter().discard_stream(handle);
            return Err(BridgeError::ConnectionClosed);
        }

        PartialStream::new(self.clone(), handle, false).initialize(callbacks)
    }

    /// Closes the connection and every stream on it.
    ///
    /// `reason` is sent to the peer as is. Closing an already closed
    /// connection does nothing. Streams still reading receive their close
    /// callback once the engine reports the connection as closed.
    pub fn close(&self, error_code: u64, reason: &[u8]) -> BridgeResult<()> {
        let error_code = ErrorCode::new(error_code)?;

        if self.inner.closed.replace(true) {
            return Ok(());
        }

        log::info!("closing connection";
            "connection" => %self.inner.id,
            "error_code" => error_code.into_inner(),
            "reason_len" => reason.len()
        );
        self.adapter()
            .close_connection(self.handle(), error_code, reason);

        Ok(())
    }

    /// Whether [`Connection::close`] was called or the engine reported the
    /// connection as closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Current address of the peer.
    pub fn remote_address(&self) -> BridgeResult<SocketAddr> {
        self.adapter().remote_address(self.handle())
    }

    pub fn remote_ip(&self) -> BridgeResult<IpAddr> {
        self.remote_address().map(|addr| addr.ip())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        log::trace!("finalizing connection";
            "connection" => %self.id,
            "engine_tasks" => self.killswitch.active_tasks()
        );
        self.killswitch.activate();

        let adapter = self.bridge.adapter();
        if !self.closed.replace(true) {
            log::debug!("closing dropped connection"; "connection" => %self.id);
            adapter.close_connection(self.handle, ErrorCode::NO_ERROR, &[]);
        }

        self.bridge.forget_connection(self.id);
        adapter.release_connection(self.handle);
    }
}
