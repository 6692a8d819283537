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

//! An in-memory [`QuicEngine`] driven by the test, plus helpers to run the
//! host side.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::engine::ConnectRequest;
use crate::engine::ConnectionHandle;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::ErrorCode;
use crate::engine::IncomingStream;
use crate::engine::QuicEngine;
use crate::engine::StreamDetails;
use crate::engine::StreamHandle;
use crate::settings::ConnectOptions;
use crate::settings::ConnectionCallbacks;
use crate::BridgeSettings;
use crate::Host;

pub(crate) const LOCAL_CLOSE_REASON: &str = "closed by application";

type Incoming = mpsc::UnboundedReceiver<EngineResult<IncomingStream>>;
type Inbound = mpsc::UnboundedReceiver<EngineResult<Option<Bytes>>>;

struct ScriptedConnection {
    remote: SocketAddr,
    close_reason: watch::Sender<Option<String>>,
    incoming_tx: mpsc::UnboundedSender<EngineResult<IncomingStream>>,
    incoming_rx: Arc<tokio::sync::Mutex<Incoming>>,
    next_local_bidi: u64,
    next_remote_bidi: u64,
    next_remote_uni: u64,
}

struct ScriptedStream {
    connection: ConnectionHandle,
    details: StreamDetails,
    inbound_tx: mpsc::UnboundedSender<EngineResult<Option<Bytes>>>,
    inbound_rx: Arc<tokio::sync::Mutex<(Inbound, Bytes)>>,
    finished: bool,
    details_hidden: bool,
}

#[derive(Default)]
struct Journal {
    connects: Vec<ConnectRequest>,
    writes: Vec<(StreamHandle, Bytes)>,
    finishes: Vec<StreamHandle>,
    stops: Vec<(StreamHandle, ErrorCode)>,
    closes: Vec<(ConnectionHandle, ErrorCode, Vec<u8>)>,
    released_streams: Vec<StreamHandle>,
    released_connections: Vec<ConnectionHandle>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    connections: HashMap<ConnectionHandle, ScriptedConnection>,
    streams: HashMap<StreamHandle, ScriptedStream>,
    journal: Journal,
}

impl State {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn connection(
        &mut self, handle: ConnectionHandle,
    ) -> EngineResult<&mut ScriptedConnection> {
        self.connections
            .get_mut(&handle)
            .ok_or_else(|| EngineError::Other("unknown connection".into()))
    }

    fn stream(&mut self, handle: StreamHandle) -> EngineResult<&mut ScriptedStream> {
        self.streams
            .get_mut(&handle)
            .ok_or_else(|| EngineError::Other("unknown stream".into()))
    }

    /// Fails if the stream's connection is closed.
    fn check_open(&self, connection: ConnectionHandle) -> EngineResult<()> {
        match self.connections.get(&connection) {
            Some(conn) => match &*conn.close_reason.borrow() {
                Some(reason) if reason == LOCAL_CLOSE_REASON =>
                    Err(EngineError::LocallyClosed),
                Some(reason) => Err(EngineError::ConnectionLost(reason.clone())),
                None => Ok(()),
            },
            None => Err(EngineError::Other("unknown connection".into())),
        }
    }

    fn add_stream(
        &mut self, connection: ConnectionHandle, id: u64,
    ) -> StreamHandle {
        let handle = StreamHandle::from_raw(self.next_handle());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        self.streams.insert(handle, ScriptedStream {
            connection,
            details: StreamDetails { id, is_0rtt: false },
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new((inbound_rx, Bytes::new()))),
            finished: false,
            details_hidden: false,
        });
        handle
    }
}

/// Resolves once the connection has a close reason.
async fn wait_closed(mut reason: watch::Receiver<Option<String>>) -> String {
    if reason.wait_for(Option::is_some).await.is_err() {
        return "engine dropped".to_string();
    }
    let current = reason.borrow().clone();
    current.unwrap_or_default()
}

fn closure_error(reason: String) -> EngineError {
    if reason == LOCAL_CLOSE_REASON {
        EngineError::LocallyClosed
    } else {
        EngineError::ConnectionLost(reason)
    }
}

/// A [`QuicEngine`] whose peer is scripted by the test.
///
/// Client-initiated streams get IDs 0, 4, 8, ...; streams pushed with
/// [`ScriptedEngine::push_incoming`] get the matching server-initiated IDs.
pub(crate) struct ScriptedEngine {
    state: Mutex<State>,
    supported_alpn: Vec<Vec<u8>>,
    max_write_chunk: Option<usize>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::with_options(None))
    }

    /// Accepts at most `max_write_chunk` bytes per engine write.
    pub(crate) fn with_options(max_write_chunk: Option<usize>) -> Self {
        Self {
            state: Mutex::default(),
            supported_alpn: vec![b"h3".to_vec()],
            max_write_chunk,
        }
    }

    pub(crate) fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().journal.connects.clone()
    }

    /// Simulates the peer opening a stream.
    pub(crate) fn push_incoming(
        &self, connection: ConnectionHandle, unidirectional: bool,
    ) -> StreamHandle {
        self.push_incoming_with(connection, unidirectional, false)
    }

    pub(crate) fn push_incoming_with(
        &self, connection: ConnectionHandle, unidirectional: bool, is_0rtt: bool,
    ) -> StreamHandle {
        let mut state = self.state.lock();
        let conn = state.connection(connection).expect("unknown connection");
        let id = if unidirectional {
            let id = conn.next_remote_uni;
            conn.next_remote_uni += 4;
            id
        } else {
            let id = conn.next_remote_bidi;
            conn.next_remote_bidi += 4;
            id
        };
        let incoming_tx = conn.incoming_tx.clone();

        let handle = state.add_stream(connection, id);
        state.streams.get_mut(&handle).expect("just added").details.is_0rtt =
            is_0rtt;

        incoming_tx
            .send(Ok(IncomingStream {
                stream: handle,
                unidirectional,
            }))
            .expect("accept queue closed");
        handle
    }

    /// Makes the next accept on `connection` fail with `error`.
    pub(crate) fn fail_accept(&self, connection: ConnectionHandle, error: EngineError) {
        let mut state = self.state.lock();
        let conn = state.connection(connection).expect("unknown connection");
        conn.incoming_tx.send(Err(error)).expect("accept queue closed");
    }

    /// Makes [`QuicEngine::stream_details`] fail for `stream`.
    pub(crate) fn hide_details(&self, stream: StreamHandle) {
        self.state.lock().stream(stream).expect("unknown stream").details_hidden =
            true;
    }

    /// Simulates data arriving from the peer.
    pub(crate) fn push_data(&self, stream: StreamHandle, data: &[u8]) {
        self.push_read(stream, Ok(Some(Bytes::copy_from_slice(data))));
    }

    /// Simulates the peer finishing its side of the stream.
    pub(crate) fn push_fin(&self, stream: StreamHandle) {
        self.push_read(stream, Ok(None));
    }

    pub(crate) fn push_read_error(&self, stream: StreamHandle, error: EngineError) {
        self.push_read(stream, Err(error));
    }

    fn push_read(
        &self, stream: StreamHandle, read: EngineResult<Option<Bytes>>,
    ) {
        let mut state = self.state.lock();
        let stream = state.stream(stream).expect("unknown stream");
        let _ = stream.inbound_tx.send(read);
    }

    /// Simulates the peer closing the connection.
    pub(crate) fn close_from_peer(&self, connection: ConnectionHandle, reason: &str) {
        let mut state = self.state.lock();
        let conn = state.connection(connection).expect("unknown connection");
        conn.close_reason
            .send_replace(Some(reason.to_string()));
    }

    /// Every chunk the engine accepted for `stream`, one entry per engine
    /// write.
    pub(crate) fn writes(&self, stream: StreamHandle) -> Vec<Bytes> {
        let state = self.state.lock();
        state
            .journal
            .writes
            .iter()
            .filter(|(handle, _)| *handle == stream)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub(crate) fn total_writes(&self) -> usize {
        self.state.lock().journal.writes.len()
    }

    pub(crate) fn finishes(&self, stream: StreamHandle) -> usize {
        let state = self.state.lock();
        state
            .journal
            .finishes
            .iter()
            .filter(|handle| **handle == stream)
            .count()
    }

    pub(crate) fn stops(&self, stream: StreamHandle) -> Vec<ErrorCode> {
        let state = self.state.lock();
        state
            .journal
            .stops
            .iter()
            .filter(|(handle, _)| *handle == stream)
            .map(|(_, code)| *code)
            .collect()
    }

    pub(crate) fn closes(&self) -> Vec<(ConnectionHandle, ErrorCode, Vec<u8>)> {
        self.state.lock().journal.closes.clone()
    }

    pub(crate) fn is_released(&self, stream: StreamHandle) -> bool {
        self.state.lock().journal.released_streams.contains(&stream)
    }

    pub(crate) fn is_connection_released(&self, connection: ConnectionHandle) -> bool {
        self.state
            .lock()
            .journal
            .released_connections
            .contains(&connection)
    }
}

impl QuicEngine for ScriptedEngine {
    fn connect(
        &self, request: ConnectRequest,
    ) -> BoxFuture<'static, EngineResult<ConnectionHandle>> {
        let mut state = self.state.lock();
        state.journal.connects.push(request.clone());

        if let Some(offered) = &request.alpn_protocols {
            if !offered.iter().any(|p| self.supported_alpn.contains(p)) {
                let error =
                    EngineError::Handshake("no application protocol".into());
                return async move { Err(error) }.boxed();
            }
        }

        let handle = ConnectionHandle::from_raw(state.next_handle());
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (close_reason, _) = watch::channel(None);

        state.connections.insert(handle, ScriptedConnection {
            remote: request.remote,
            close_reason,
            incoming_tx,
            incoming_rx: Arc::new(tokio::sync::Mutex::new(incoming_rx)),
            next_local_bidi: 0,
            next_remote_bidi: 1,
            next_remote_uni: 3,
        });

        async move { Ok(handle) }.boxed()
    }

    fn accept_stream(
        &self, connection: ConnectionHandle,
    ) -> BoxFuture<'static, EngineResult<IncomingStream>> {
        let mut state = self.state.lock();
        let conn = match state.connection(connection) {
            Ok(conn) => conn,
            Err(error) => return async move { Err(error) }.boxed(),
        };
        let incoming = Arc::clone(&conn.incoming_rx);
        let closed = conn.close_reason.subscribe();

        async move {
            let mut incoming = incoming.lock().await;
            tokio::select! {
                reason = wait_closed(closed) => Err(closure_error(reason)),
                stream = incoming.recv() => stream.unwrap_or_else(|| {
                    Err(EngineError::Other("accept queue closed".into()))
                }),
            }
        }
        .boxed()
    }

    fn open_stream(
        &self, connection: ConnectionHandle,
    ) -> BoxFuture<'static, EngineResult<StreamHandle>> {
        let mut state = self.state.lock();
        let opened = state.check_open(connection).and_then(|()| {
            let conn = state.connection(connection)?;
            let id = conn.next_local_bidi;
            conn.next_local_bidi += 4;
            Ok(state.add_stream(connection, id))
        });

        async move { opened }.boxed()
    }

    fn read(
        &self, stream: StreamHandle, max_len: usize,
    ) -> BoxFuture<'static, EngineResult<Option<Bytes>>> {
        let mut state = self.state.lock();
        let (inbound, connection) = match state.stream(stream) {
            Ok(s) => (Arc::clone(&s.inbound_rx), s.connection),
            Err(error) => return async move { Err(error) }.boxed(),
        };
        let closed = match state.connection(connection) {
            Ok(conn) => conn.close_reason.subscribe(),
            Err(error) => return async move { Err(error) }.boxed(),
        };

        async move {
            let mut inbound = inbound.lock().await;
            let (queue, leftover) = &mut *inbound;

            if leftover.is_empty() {
                let next = tokio::select! {
                    reason = wait_closed(closed) => Err(closure_error(reason)),
                    read = queue.recv() => read.unwrap_or(Err(EngineError::StreamClosed)),
                };
                match next? {
                    Some(data) => *leftover = data,
                    None => return Ok(None),
                }
            }

            let len = leftover.len().min(max_len);
            EngineResult::Ok(Some(leftover.split_to(len)))
        }
        .boxed()
    }

    fn write(
        &self, stream: StreamHandle, data: Bytes,
    ) -> BoxFuture<'static, EngineResult<usize>> {
        let mut state = self.state.lock();
        let result = state.stream(stream).and_then(|s| {
            if s.finished {
                return Err(EngineError::StreamClosed);
            }
            Ok(s.connection)
        });
        let result = result
            .and_then(|connection| state.check_open(connection))
            .map(|()| {
                let len = self
                    .max_write_chunk
                    .map_or(data.len(), |max| data.len().min(max));
                state.journal.writes.push((stream, data.slice(..len)));
                len
            });

        async move { result }.boxed()
    }

    fn finish(&self, stream: StreamHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        let connection = state.stream(stream)?.connection;
        state.check_open(connection)?;

        let s = state.stream(stream)?;
        if s.finished {
            return Err(EngineError::StreamClosed);
        }
        s.finished = true;
        state.journal.finishes.push(stream);
        Ok(())
    }

    fn stop(&self, stream: StreamHandle, error_code: ErrorCode) -> EngineResult<()> {
        let mut state = self.state.lock();
        let connection = state.stream(stream)?.connection;

        state.check_open(connection)?;
        state.journal.stops.push((stream, error_code));
        Ok(())
    }

    fn close_connection(
        &self, connection: ConnectionHandle, error_code: ErrorCode, reason: &[u8],
    ) {
        let mut state = self.state.lock();
        state
            .journal
            .closes
            .push((connection, error_code, reason.to_vec()));

        if let Ok(conn) = state.connection(connection) {
            conn.close_reason.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(LOCAL_CLOSE_REASON.to_string());
                true
            });
        }
    }

    fn closed(&self, connection: ConnectionHandle) -> BoxFuture<'static, String> {
        let mut state = self.state.lock();
        match state.connection(connection) {
            Ok(conn) => wait_closed(conn.close_reason.subscribe()).boxed(),
            Err(_) => async { "unknown connection".to_string() }.boxed(),
        }
    }

    fn stream_details(&self, stream: StreamHandle) -> EngineResult<StreamDetails> {
        let mut state = self.state.lock();
        let stream = state.stream(stream)?;
        if stream.details_hidden {
            return Err(EngineError::StreamClosed);
        }
        Ok(stream.details)
    }

    fn remote_address(
        &self, connection: ConnectionHandle,
    ) -> EngineResult<SocketAddr> {
        Ok(self.state.lock().connection(connection)?.remote)
    }

    fn release_stream(&self, stream: StreamHandle) {
        self.state.lock().journal.released_streams.push(stream);
    }

    fn release_connection(&self, connection: ConnectionHandle) {
        self.state
            .lock()
            .journal
            .released_connections
            .push(connection);
    }
}

pub(crate) fn options(callbacks: ConnectionCallbacks) -> ConnectOptions {
    ConnectOptions::new("example.org", "192.0.2.10", 443, callbacks)
}

pub(crate) fn host(engine: &Arc<ScriptedEngine>) -> Host {
    Host::new(Arc::clone(engine) as Arc<dyn QuicEngine>, BridgeSettings::default())
        .expect("engine runtime should start")
}

/// Dispatches events until `done` returns true.
pub(crate) async fn dispatch_until(host: &Host, mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            host.dispatch_next().await.expect("dispatch should succeed");
        }
    })
    .await
    .expect("condition should be reached in time");
}

/// Dispatches whatever arrives within a short grace period.
pub(crate) async fn drain_events(host: &Host) {
    while let Ok(result) =
        tokio::time::timeout(Duration::from_millis(100), host.dispatch_next()).await
    {
        result.expect("dispatch should succeed");
    }
}
