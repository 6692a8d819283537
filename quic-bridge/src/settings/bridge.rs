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

use foundations::settings::settings;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;
use std::time::Duration;

/// Process-level configuration of the bridge.
///
/// Values that describe transport policy (keep-alive, idle timeout) are
/// forwarded to the engine with every connect request; the bridge itself
/// never enforces a timeout.
#[serde_as]
#[settings]
#[non_exhaustive]
pub struct BridgeSettings {
    /// Maximum number of bytes requested from the engine per stream read.
    /// Each successful read is delivered as one `on_data` call.
    ///
    /// Defaults to 2048 bytes.
    #[serde(default = "BridgeSettings::default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Interval at which the engine should send keep-alive packets, in
    /// milliseconds.
    ///
    /// Defaults to 1 second.
    #[serde(
        rename = "keep_alive_interval_ms",
        default = "BridgeSettings::default_keep_alive_interval"
    )]
    #[serde_as(as = "Option<DurationMilliSeconds>")]
    pub keep_alive_interval: Option<Duration>,

    /// Idle timeout requested from the engine, in milliseconds.
    ///
    /// Disabled by default, which leaves the engine's own default in place.
    #[serde(rename = "max_idle_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds>")]
    pub max_idle_timeout: Option<Duration>,
}

impl BridgeSettings {
    #[inline]
    fn default_read_buffer_size() -> usize {
        2048
    }

    #[inline]
    fn default_keep_alive_interval() -> Option<Duration> {
        Some(Duration::from_secs(1))
    }
}
