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

//! Delivery of engine events to host objects.
//!
//! Engine tasks never touch host objects. They address events by
//! [`ObjectId`] and push them onto a queue that the host drains on its own
//! event loop. The registry maps each id to the host object it belongs to
//! together with that object's callbacks, so every callback is invoked with
//! the exact object it was attached to.

mod event;
pub(crate) mod tasks;

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::rc::Weak;

use bytes::Bytes;
use foundations::telemetry::log;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

pub(crate) use self::event::BridgeEvent;
pub(crate) use self::event::EventReceiver;
pub(crate) use self::event::EventSender;
pub(crate) use self::event::ObjectId;

use crate::connection::ConnectionInner;
use crate::engine::adapter::EngineAdapter;
use crate::engine::IncomingStream;
use crate::result::BridgeError;
use crate::result::BridgeResult;
use crate::settings::BridgeSettings;
use crate::settings::ConnectionCallbacks;
use crate::settings::StreamCallbacks;
use crate::stream::StreamInner;
use crate::Connection;
use crate::PartialStream;
use crate::Stream;

struct ConnectionSlot {
    // Weak so that dropping the last host reference finalizes the
    // connection.
    connection: Weak<ConnectionInner>,
    callbacks: ConnectionCallbacks,
    /// Child streams that still expect a terminal event, in creation order.
    streams: BTreeSet<ObjectId>,
}

struct StreamSlot {
    // Weak like connections: once the host drops its last handle the stream
    // is finalized and its slot forgotten.
    stream: Weak<StreamInner>,
    connection: ObjectId,
    callbacks: StreamCallbacks,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ObjectId, ConnectionSlot>,
    streams: HashMap<ObjectId, StreamSlot>,
}

/// Host-side half of the bridge. Lives on the host's event loop and is
/// shared by every [`Connection`] and [`Stream`] created through it.
pub(crate) struct Bridge {
    adapter: EngineAdapter,
    settings: BridgeSettings,
    // Never borrowed while host callbacks run.
    registry: RefCell<Registry>,
    next_object: Cell<u64>,
    events: EventSender,
    inbox: Mutex<EventReceiver>,
}

impl Bridge {
    pub(crate) fn new(adapter: EngineAdapter, settings: BridgeSettings) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();

        Self {
            adapter,
            settings,
            registry: RefCell::default(),
            next_object: Cell::new(0),
            events,
            inbox: Mutex::new(inbox),
        }
    }

    #[inline]
    pub(crate) fn adapter(&self) -> &EngineAdapter {
        &self.adapter
    }

    #[inline]
    pub(crate) fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    #[inline]
    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    pub(crate) fn next_id(&self) -> ObjectId {
        let id = self.next_object.get() + 1;
        self.next_object.set(id);
        ObjectId::new(id)
    }

    pub(crate) fn register_connection(
        &self, connection: &Connection, callbacks: ConnectionCallbacks,
    ) {
        let slot = ConnectionSlot {
            connection: connection.downgrade(),
            callbacks,
            streams: BTreeSet::new(),
        };
        self.registry
            .borrow_mut()
            .connections
            .insert(connection.object_id(), slot);
    }

    pub(crate) fn register_stream(
        &self, stream: &Stream, callbacks: StreamCallbacks,
    ) {
        let id = stream.object_id();
        let parent = stream.connection().object_id();
        let mut registry = self.registry.borrow_mut();

        if let Some(slot) = registry.connections.get_mut(&parent) {
            slot.streams.insert(id);
        }
        registry.streams.insert(id, StreamSlot {
            stream: stream.downgrade(),
            connection: parent,
            callbacks,
        });
    }

    /// Removes a stream so that no further events reach it.
    ///
    /// Returns the stream if the host still holds it. The callbacks may own
    /// host objects, so they are returned for the caller to drop once the
    /// registry is no longer borrowed.
    #[must_use]
    fn unregister_stream(
        &self, id: ObjectId,
    ) -> Option<(Option<Stream>, StreamCallbacks)> {
        let slot = {
            let mut registry = self.registry.borrow_mut();
            let slot = registry.streams.remove(&id)?;
            if let Some(parent) = registry.connections.get_mut(&slot.connection) {
                parent.streams.remove(&id);
            }
            slot
        };

        let stream = slot.stream.upgrade().map(Stream::from_inner);
        Some((stream, slot.callbacks))
    }

    /// Forgets a stream that is being finalized.
    pub(crate) fn forget_stream(&self, id: ObjectId) {
        // As with connections, a slot that cannot be removed here is found
        // dead and removed by the next dispatch for it.
        let slot = match self.registry.try_borrow_mut() {
            Ok(mut registry) => {
                let slot = registry.streams.remove(&id);
                if let Some(slot) = &slot {
                    if let Some(parent) =
                        registry.connections.get_mut(&slot.connection)
                    {
                        parent.streams.remove(&id);
                    }
                }
                slot
            },
            Err(_) => None,
        };
        drop(slot);
    }

    /// Forgets a connection that is being finalized.
    pub(crate) fn forget_connection(&self, id: ObjectId) {
        // The registry may already be borrowed if this runs from a drop
        // inside the bridge. Dispatch removes stale slots lazily then.
        let slot = match self.registry.try_borrow_mut() {
            Ok(mut registry) => registry.connections.remove(&id),
            Err(_) => None,
        };
        drop(slot);
    }

    /// Retires the bridge when its host goes away.
    ///
    /// Connections and streams the application still holds stay usable for
    /// writes and closes, but their engine tasks are stopped and no event is
    /// queued for them anymore.
    pub(crate) fn shutdown(&self) {
        let registry = std::mem::take(&mut *self.registry.borrow_mut());
        log::debug!("shutting down bridge";
            "connections" => registry.connections.len(),
            "streams" => registry.streams.len()
        );

        if let Ok(mut inbox) = self.inbox.try_lock() {
            inbox.close();
        }

        for slot in registry.connections.values() {
            if let Some(inner) = slot.connection.upgrade() {
                Connection::from_inner(inner).killswitch().activate();
            }
        }

        drop(registry);
    }

    /// Waits for the next event from the engine runtime and dispatches it.
    pub(crate) async fn dispatch_next(&self) -> BridgeResult<()> {
        let event = {
            let mut inbox = self.inbox.lock().await;
            inbox.recv().await
        };

        match event {
            Some(event) => self.dispatch(event),
            // Only once the bridge has been shut down.
            None => Err(BridgeError::Runtime("event queue closed".to_string())),
        }
    }

    pub(crate) fn dispatch(&self, event: BridgeEvent) -> BridgeResult<()> {
        log::trace!("dispatching event"; "target" => %event.target(), "event" => event.kind());

        match event {
            BridgeEvent::IncomingStream { connection, stream } =>
                return self.on_incoming_stream(connection, stream),
            BridgeEvent::ConnectionError { connection, error } =>
                self.on_connection_error(connection, error.into()),
            BridgeEvent::ConnectionClosed { connection, reason } =>
                self.on_connection_closed(connection, reason),
            BridgeEvent::StreamData { stream, data } =>
                self.on_stream_data(stream, data),
            BridgeEvent::StreamError { stream, error } =>
                self.on_stream_error(stream, error.into()),
            BridgeEvent::StreamClosed { stream, reason } =>
                self.on_stream_closed(stream, reason),
        }

        Ok(())
    }

    fn connection(&self, id: ObjectId) -> Option<Connection> {
        let connection = self
            .registry
            .borrow()
            .connections
            .get(&id)
            .and_then(|slot| slot.connection.upgrade());

        connection.map(Connection::from_inner)
    }

    fn on_incoming_stream(
        &self, id: ObjectId, incoming: IncomingStream,
    ) -> BridgeResult<()> {
        let connection = self.connection(id).filter(|conn| !conn.is_closed());
        let Some(connection) = connection else {
            log::debug!("discarding stream opened on a closed connection"; "connection" => %id);
            self.adapter.discard_stream(incoming.stream);
            return Ok(());
        };

        let partial = PartialStream::new(
            connection.clone(),
            incoming.stream,
            incoming.unidirectional,
        );

        let on_stream = self
            .registry
            .borrow_mut()
            .connections
            .get_mut(&id)
            .and_then(|slot| slot.callbacks.on_stream.take());

        if let Some(mut on_stream) = on_stream {
            on_stream(&connection, &partial);

            if let Some(slot) = self.registry.borrow_mut().connections.get_mut(&id)
            {
                slot.callbacks.on_stream = Some(on_stream);
            }
        }

        let Some(handle) = partial.take_pending() else {
            return Ok(());
        };

        // The handler did not take the stream. Close it rather than let the
        // engine buffer data nobody will read.
        let stream_id = match self.adapter.stream_details(handle) {
            Ok(details) => Some(details.id),
            Err(error) => {
                log::debug!("failed to query uninitialized stream"; "connection" => %id, "error" => %error);
                None
            },
        };
        self.adapter.discard_stream(handle);

        log::warn!("closed inbound stream that was not initialized";
            "connection" => %id,
            "stream_id" => ?stream_id
        );
        Err(BridgeError::UninitializedStream { stream_id })
    }

    fn on_connection_error(&self, id: ObjectId, error: BridgeError) {
        let Some(connection) = self.connection(id) else {
            log::debug!("dropping error for retired connection"; "connection" => %id, "error" => %error);
            return;
        };

        let on_error = self
            .registry
            .borrow_mut()
            .connections
            .get_mut(&id)
            .and_then(|slot| slot.callbacks.on_error.take());

        let Some(mut on_error) = on_error else {
            log::debug!("connection error without handler"; "connection" => %id, "error" => %error);
            return;
        };

        on_error(&connection, error);

        if let Some(slot) = self.registry.borrow_mut().connections.get_mut(&id) {
            slot.callbacks.on_error = Some(on_error);
        }
    }

    /// Ends a connection and every stream still attached to it.
    ///
    /// Streams receive their close callback first, in creation order, then
    /// the connection does. No event for any of them is dispatched after
    /// this.
    fn on_connection_closed(&self, id: ObjectId, reason: String) {
        let slot = self.registry.borrow_mut().connections.remove(&id);
        let Some(slot) = slot else {
            log::debug!("dropping close for retired connection"; "connection" => %id);
            return;
        };

        let connection = slot.connection.upgrade().map(Connection::from_inner);
        if let Some(connection) = &connection {
            connection.mark_closed();
        }

        log::info!("connection closed"; "connection" => %id, "reason" => &reason);

        for stream_id in slot.streams {
            let Some((stream, callbacks)) = self.unregister_stream(stream_id)
            else {
                continue;
            };

            if let (Some(stream), Some(on_close)) = (stream, callbacks.on_close) {
                on_close(&stream, reason.clone());
            }
        }

        if let (Some(connection), Some(on_close)) =
            (connection, slot.callbacks.on_close)
        {
            on_close(&connection, reason);
        }
    }

    /// Looks up a live stream, forgetting its slot if the host dropped it.
    fn stream(&self, id: ObjectId) -> Option<Stream> {
        let stream = self
            .registry
            .borrow()
            .streams
            .get(&id)
            .map(|slot| slot.stream.upgrade());

        match stream? {
            Some(inner) => Some(Stream::from_inner(inner)),
            None => {
                let stale = self.unregister_stream(id);
                drop(stale);
                None
            },
        }
    }

    fn on_stream_data(&self, id: ObjectId, data: Bytes) {
        let Some(stream) = self.stream(id) else {
            log::debug!("dropping data for retired stream"; "stream" => %id, "len" => data.len());
            return;
        };

        let on_data = self
            .registry
            .borrow_mut()
            .streams
            .get_mut(&id)
            .and_then(|slot| slot.callbacks.on_data.take());

        let Some(mut on_data) = on_data else {
            log::trace!("stream has no data handler"; "stream" => %id);
            return;
        };

        on_data(&stream, data);

        // Dropped once the registry is released again.
        let unused = match self.registry.borrow_mut().streams.get_mut(&id) {
            Some(slot) => slot.callbacks.on_data.replace(on_data),
            None => Some(on_data),
        };
        drop(unused);
    }

    fn on_stream_error(&self, id: ObjectId, error: BridgeError) {
        let Some((Some(stream), callbacks)) = self.unregister_stream(id) else {
            log::debug!("dropping error for retired stream"; "stream" => %id, "error" => %error);
            return;
        };

        log::debug!("stream failed"; "stream" => %id, "error" => %error);
        if let Some(mut on_error) = callbacks.on_error {
            on_error(&stream, error);
        }
    }

    fn on_stream_closed(&self, id: ObjectId, reason: String) {
        let Some((Some(stream), callbacks)) = self.unregister_stream(id) else {
            log::debug!("dropping close for retired stream"; "stream" => %id);
            return;
        };

        log::debug!("stream closed"; "stream" => %id, "reason" => &reason);
        if let Some(on_close) = callbacks.on_close {
            on_close(&stream, reason);
        }
    }
}
