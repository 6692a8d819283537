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

use std::convert::Infallible;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use foundations::telemetry::log;
use tokio::runtime::Handle;

use crate::bridge::Bridge;
use crate::engine::adapter::EngineAdapter;
use crate::engine::engine_runtime;
use crate::engine::QuicEngine;
use crate::result::BridgeResult;
use crate::settings::BridgeSettings;
use crate::settings::ConnectOptions;
use crate::Connection;

/// Entry point for a host event loop.
///
/// A [`Host`] and every object created through it must stay on the thread
/// that created them, typically inside a current-thread tokio runtime or a
/// `LocalSet`. Engine work runs on a separate multi-threaded runtime, and
/// callbacks only ever run from [`Host::dispatch_next`] or
/// [`Host::run_until`].
pub struct Host {
    bridge: Rc<Bridge>,
}

impl Host {
    /// Creates a host whose engine tasks run on the process-wide engine
    /// runtime, starting it on first use.
    pub fn new(
        engine: Arc<dyn QuicEngine>, settings: BridgeSettings,
    ) -> BridgeResult<Self> {
        let runtime = engine_runtime()?;
        Ok(Self::with_runtime(engine, settings, runtime.handle().clone()))
    }

    /// Creates a host whose engine tasks run on `runtime`.
    pub fn with_runtime(
        engine: Arc<dyn QuicEngine>, settings: BridgeSettings, runtime: Handle,
    ) -> Self {
        let adapter = EngineAdapter::new(engine, runtime);

        Self {
            bridge: Rc::new(Bridge::new(adapter, settings)),
        }
    }

    #[inline]
    pub fn settings(&self) -> &BridgeSettings {
        self.bridge.settings()
    }

    /// Establishes a connection.
    ///
    /// The returned [`Connection`] is already wired to its callbacks. They
    /// fire once the host dispatches events.
    pub async fn connect(&self, options: ConnectOptions) -> BridgeResult<Connection> {
        let (request, callbacks) = options.into_request(self.bridge.settings())?;
        let remote = request.remote;
        let server_name = request.server_name.clone();

        let handle = self.bridge.adapter().open_connection(request).await?;
        let connection = Connection::establish(&self.bridge, handle, callbacks);

        log::info!("connection established";
            "connection" => %connection.object_id(),
            "remote" => %remote,
            "server_name" => server_name
        );

        Ok(connection)
    }

    /// Waits for the next engine event and runs the callbacks it targets.
    ///
    /// Fails with [`BridgeError::UninitializedStream`] if an `on_stream`
    /// handler returned without initializing its stream.
    ///
    /// [`BridgeError::UninitializedStream`]: crate::BridgeError::UninitializedStream
    pub async fn dispatch_next(&self) -> BridgeResult<()> {
        self.bridge.dispatch_next().await
    }

    /// Drives `fut` to completion while dispatching engine events.
    ///
    /// Dispatch failures have no caller to report to while `fut` runs, so
    /// they are logged.
    pub async fn run_until<F: Future>(&self, fut: F) -> F::Output {
        tokio::select! {
            biased;

            output = fut => output,
            never = self.dispatch_forever() => match never {},
        }
    }

    async fn dispatch_forever(&self) -> Infallible {
        loop {
            if let Err(error) = self.dispatch_next().await {
                log::error!("event dispatch failed"; "error" => %error);
            }
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.bridge.shutdown();
    }
}
