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

//! Configuration for the bridge and the connections it creates.

mod bridge;
mod callbacks;
mod tls;

use std::net::IpAddr;
use std::net::SocketAddr;

pub use self::bridge::*;
pub use self::callbacks::*;
pub use self::tls::*;

use crate::engine::ConnectRequest;
use crate::result::BridgeError;
use crate::result::BridgeResult;

/// Everything needed to establish one connection.
///
/// Construct it with [`ConnectOptions::new`]; the optional fields can be
/// modified freely afterwards.
#[non_exhaustive] // force use of constructor functions
pub struct ConnectOptions {
    /// Name used for TLS server-name indication and certificate matching.
    pub server_name: String,
    /// Numeric IP address to dial. Hostname resolution happens before this
    /// layer, so `server_name` and `address` are independent.
    pub address: String,
    pub port: u16,
    /// Application protocols to negotiate. `None` keeps the engine default.
    pub alpn_protocols: Option<Vec<String>>,
    /// Trust anchors in addition to the system roots, one certificate each.
    pub certificate_authorities: Vec<Vec<u8>>,
    /// Identity to present for mutual TLS.
    pub client_authentication: Option<ClientAuthentication>,
    pub callbacks: ConnectionCallbacks,
}

impl ConnectOptions {
    #[inline]
    pub fn new(
        server_name: impl Into<String>, address: impl Into<String>, port: u16,
        callbacks: ConnectionCallbacks,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            address: address.into(),
            port,
            alpn_protocols: None,
            certificate_authorities: Vec::new(),
            client_authentication: None,
            callbacks,
        }
    }

    pub fn with_alpn_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alpn_protocols =
            Some(protocols.into_iter().map(Into::into).collect());
        self
    }

    /// Validates the options and splits them into the engine request and the
    /// host-side callbacks.
    pub(crate) fn into_request(
        self, settings: &BridgeSettings,
    ) -> BridgeResult<(ConnectRequest, ConnectionCallbacks)> {
        let remote = parse_remote(&self.address, self.port)?;
        let alpn_protocols = self
            .alpn_protocols
            .map(|protocols| encode_alpn(&protocols))
            .transpose()?;

        if let Some(auth) = &self.client_authentication {
            auth.validate()?;
        }

        let request = ConnectRequest {
            remote,
            server_name: self.server_name,
            alpn_protocols,
            certificate_authorities: self.certificate_authorities,
            client_authentication: self.client_authentication,
            keep_alive_interval: settings.keep_alive_interval,
            max_idle_timeout: settings.max_idle_timeout,
        };

        Ok((request, self.callbacks))
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("server_name", &self.server_name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("alpn_protocols", &self.alpn_protocols)
            .field(
                "certificate_authorities",
                &self.certificate_authorities.len(),
            )
            .field("client_authentication", &self.client_authentication)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

fn parse_remote(address: &str, port: u16) -> BridgeResult<SocketAddr> {
    // Accept bracketed IPv6 literals as they appear in URLs.
    let literal = address
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(address);

    literal
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|_| BridgeError::AddressResolution(address.to_string()))
}

fn encode_alpn(protocols: &[String]) -> BridgeResult<Vec<Vec<u8>>> {
    protocols
        .iter()
        .map(|proto| match proto.len() {
            1..=255 => Ok(proto.as_bytes().to_vec()),
            len => Err(BridgeError::InvalidOptions(format!(
                "ALPN protocol must be 1 to 255 bytes long, got {len}"
            ))),
        })
        .collect()
}
