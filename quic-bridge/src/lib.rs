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

//! Callback-driven QUIC connections and streams for single-threaded hosts.
//!
//! quic-bridge sits between a QUIC engine and an application that runs all
//! of its logic on one cooperative event loop. The engine is any
//! implementation of [`QuicEngine`]; its futures run on a separate
//! multi-threaded runtime. Events the engine produces (new streams, data,
//! errors, closes) are queued and handed to host callbacks only when the
//! host dispatches them, so callbacks never run concurrently and always see
//! the exact [`Connection`] or [`Stream`] they were registered for.
//!
//! # Connecting
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! use quic_bridge::engine::QuicEngine;
//! use quic_bridge::settings::BridgeSettings;
//! use quic_bridge::settings::ConnectOptions;
//! use quic_bridge::settings::ConnectionCallbacks;
//! use quic_bridge::settings::StreamCallbacks;
//! use quic_bridge::Host;
//!
//! # async fn example(engine: Arc<dyn QuicEngine>) -> quic_bridge::BridgeResult<()> {
//! let host = Host::new(engine, BridgeSettings::default())?;
//! let inbound = Rc::new(RefCell::new(Vec::new()));
//!
//! let accepted = Rc::clone(&inbound);
//! let callbacks = ConnectionCallbacks::new()
//!     .on_stream(move |_conn, partial| {
//!         // Inbound streams must be initialized before the handler returns,
//!         // and only deliver events while a handle to them is kept.
//!         let stream = partial.initialize(
//!             StreamCallbacks::new().on_data(|stream, data| {
//!                 println!("stream {} received {} bytes", stream.id(), data.len());
//!             }),
//!         );
//!         if let Ok(stream) = stream {
//!             accepted.borrow_mut().push(stream);
//!         }
//!     })
//!     .on_close(|_conn, reason| println!("connection closed: {reason}"));
//!
//! let options = ConnectOptions::new("example.org", "192.0.2.1", 443, callbacks)
//!     .with_alpn_protocols(["h3"]);
//! let connection = host.connect(options).await?;
//!
//! let stream = connection.create_stream(StreamCallbacks::new()).await?;
//! host.run_until(async {
//!     stream.write(b"hello").await?;
//!     stream.close_write()
//! })
//! .await?;
//!
//! connection.close(0, b"")?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod connection;
pub mod engine;
mod host;
mod result;
pub mod settings;
mod stream;

pub use crate::connection::Connection;
pub use crate::engine::QuicEngine;
pub use crate::host::Host;
pub use crate::result::BridgeError;
pub use crate::result::BridgeResult;
pub use crate::settings::BridgeSettings;
pub use crate::settings::ConnectOptions;
pub use crate::stream::PartialStream;
pub use crate::stream::Stream;

#[cfg(test)]
mod test_utils;
