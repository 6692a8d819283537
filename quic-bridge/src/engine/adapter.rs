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

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Buf;
use bytes::Bytes;
use foundations::telemetry::log;
use tokio::runtime::Handle;

use super::ConnectRequest;
use super::ConnectionHandle;
use super::EngineError;
use super::EngineResult;
use super::ErrorCode;
use super::QuicEngine;
use super::StreamDetails;
use super::StreamHandle;
use crate::result::BridgeResult;

/// The only caller of [`QuicEngine`].
///
/// Asynchronous operations are spawned onto the engine runtime and awaited
/// from the host, so engine futures never run on the host's event loop.
#[derive(Clone)]
pub(crate) struct EngineAdapter {
    engine: Arc<dyn QuicEngine>,
    runtime: Handle,
}

impl EngineAdapter {
    pub(crate) fn new(engine: Arc<dyn QuicEngine>, runtime: Handle) -> Self {
        Self { engine, runtime }
    }

    #[inline]
    pub(crate) fn engine(&self) -> &Arc<dyn QuicEngine> {
        &self.engine
    }

    #[inline]
    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Starts `fut` on the engine runtime right away and returns a future
    /// that resolves with its output.
    fn spawn<T>(
        &self, fut: impl Future<Output = EngineResult<T>> + Send + 'static,
    ) -> impl Future<Output = BridgeResult<T>>
    where
        T: Send + 'static,
    {
        let task = self.runtime.spawn(fut);
        async move {
            let output = task.await??;
            BridgeResult::Ok(output)
        }
    }

    pub(crate) fn open_connection(
        &self, request: ConnectRequest,
    ) -> impl Future<Output = BridgeResult<ConnectionHandle>> {
        log::debug!("starting handshake"; "remote" => %request.remote, "server_name" => &request.server_name);
        self.spawn(self.engine.connect(request))
    }

    pub(crate) fn open_stream(
        &self, connection: ConnectionHandle,
    ) -> impl Future<Output = BridgeResult<StreamHandle>> {
        self.spawn(self.engine.open_stream(connection))
    }

    /// Writes all of `data`, resolving once the engine accepted every byte.
    ///
    /// A zero-length buffer never reaches the engine.
    pub(crate) fn write(
        &self, stream: StreamHandle, mut data: Bytes,
    ) -> impl Future<Output = BridgeResult<()>> {
        let engine = Arc::clone(&self.engine);

        self.spawn(async move {
            while data.has_remaining() {
                let written = engine.write(stream, data.clone()).await?;
                if written == 0 || written > data.len() {
                    return Err(EngineError::Other(format!(
                        "engine accepted {written} of {} bytes",
                        data.len()
                    )));
                }
                data.advance(written);
            }
            Ok(())
        })
    }

    /// Half-closes the send side of `stream`.
    pub(crate) fn close_write(&self, stream: StreamHandle) -> BridgeResult<()> {
        Ok(self.engine.finish(stream)?)
    }

    /// Closes both directions of `stream`, discarding unread data.
    ///
    /// Failures caused by the stream or its connection having ended already
    /// are ignored.
    pub(crate) fn close_stream(
        &self, stream: StreamHandle, error_code: ErrorCode,
    ) -> BridgeResult<()> {
        if let Err(error) = self.engine.finish(stream) {
            log::trace!("finish before stop failed"; "stream" => stream.into_raw(), "error" => %error);
        }

        match self.engine.stop(stream, error_code) {
            Err(error) if !error.ends_stream() => Err(error.into()),
            _ => Ok(()),
        }
    }

    pub(crate) fn close_connection(
        &self, connection: ConnectionHandle, error_code: ErrorCode, reason: &[u8],
    ) {
        self.engine.close_connection(connection, error_code, reason)
    }

    #[inline]
    pub(crate) fn stream_details(
        &self, stream: StreamHandle,
    ) -> BridgeResult<StreamDetails> {
        Ok(self.engine.stream_details(stream)?)
    }

    #[inline]
    pub(crate) fn remote_address(
        &self, connection: ConnectionHandle,
    ) -> BridgeResult<SocketAddr> {
        Ok(self.engine.remote_address(connection)?)
    }

    /// Closes and releases a stream no host object was created for.
    pub(crate) fn discard_stream(&self, stream: StreamHandle) {
        if let Err(error) = self.close_stream(stream, ErrorCode::NO_ERROR) {
            log::debug!("failed to close discarded stream"; "stream" => stream.into_raw(), "error" => %error);
        }
        self.engine.release_stream(stream);
    }

    #[inline]
    pub(crate) fn release_stream(&self, stream: StreamHandle) {
        self.engine.release_stream(stream)
    }

    #[inline]
    pub(crate) fn release_connection(&self, connection: ConnectionHandle) {
        self.engine.release_connection(connection)
    }
}
