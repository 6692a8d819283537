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

//! Tasks running on the engine runtime on behalf of host objects. They only
//! ever talk to the host through the event queue.

use std::sync::Arc;

use foundations::telemetry::log;
use tokio_util::sync::CancellationToken;

use super::event::BridgeEvent;
use super::event::EventSender;
use super::event::ObjectId;
use crate::engine::ConnectionHandle;
use crate::engine::QuicEngine;
use crate::engine::StreamHandle;

/// Reason reported when a stream ends regularly.
pub(crate) const CLOSED_REASON: &str = "closed";

/// Reports the connection's close reason once the engine has closed it.
pub(crate) async fn watch_connection(
    engine: Arc<dyn QuicEngine>, handle: ConnectionHandle, id: ObjectId,
    events: EventSender,
) {
    let reason = engine.closed(handle).await;
    log::debug!("engine reported connection close"; "connection" => %id, "reason" => &reason);

    let _ = events.send(BridgeEvent::ConnectionClosed {
        connection: id,
        reason,
    });
}

/// Forwards streams opened by the peer until the connection goes away.
///
/// Errors that merely report the end of the connection are left to
/// [`watch_connection`]; any other failure is reported once and ends the
/// loop.
pub(crate) async fn accept_streams(
    engine: Arc<dyn QuicEngine>, handle: ConnectionHandle, id: ObjectId,
    events: EventSender,
) {
    loop {
        let event = match engine.accept_stream(handle).await {
            Ok(stream) => BridgeEvent::IncomingStream {
                connection: id,
                stream,
            },
            Err(error) if error.is_connection_closure() => {
                log::trace!("accept loop finished"; "connection" => %id, "error" => %error);
                return;
            },
            Err(error) => {
                let _ = events.send(BridgeEvent::ConnectionError {
                    connection: id,
                    error,
                });
                return;
            },
        };

        if let Err(rejected) = events.send(event) {
            // The host is gone, so nobody will ever take this stream.
            if let BridgeEvent::IncomingStream { stream, .. } = rejected.0 {
                engine.release_stream(stream.stream);
            }
            return;
        }
    }
}

/// Reads `stream` until it ends, is closed locally or fails.
///
/// Every read is delivered as its own data event. The last event sent for
/// the stream is always either a close or an error.
pub(crate) async fn pump_stream(
    engine: Arc<dyn QuicEngine>, handle: StreamHandle, id: ObjectId,
    read_size: usize, closed: CancellationToken, events: EventSender,
) {
    let terminal = loop {
        let read = tokio::select! {
            biased;

            _ = closed.cancelled() => break BridgeEvent::StreamClosed {
                stream: id,
                reason: CLOSED_REASON.to_string(),
            },
            read = engine.read(handle, read_size) => read,
        };

        match read {
            Ok(Some(data)) => {
                if data.is_empty() {
                    continue;
                }
                if events
                    .send(BridgeEvent::StreamData { stream: id, data })
                    .is_err()
                {
                    return;
                }
            },
            Ok(None) => break BridgeEvent::StreamClosed {
                stream: id,
                reason: CLOSED_REASON.to_string(),
            },
            Err(error) if error.ends_stream() => break BridgeEvent::StreamClosed {
                stream: id,
                reason: error.to_string(),
            },
            Err(error) => break BridgeEvent::StreamError { stream: id, error },
        }
    };

    log::trace!("read pump finished"; "stream" => %id, "event" => terminal.kind());
    let _ = events.send(terminal);
}
