// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration types for the certificate probe.
//!
//! [`ProbeConfig`] holds everything a run needs: which store to walk, the
//! expiry horizon, which EKU selects the client certificate, and where the
//! authenticated request goes. It is assembled with [`ProbeConfigBuilder`],
//! usually starting from a TOML file (see [`file`]) and then overridden by
//! command-line flags.

pub mod file;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use const_oid::ObjectIdentifier;
use rustls::sign::CertifiedKey;
use url::Url;

use crate::error::{ProbeError, Result};
use crate::inspector::DEFAULT_EXPIRY_HORIZON_DAYS;
use crate::properties::oids;
use crate::store::StoreLocation;

pub use file::{ConfigLoader, FileConfig};

/// Default HTTPS port.
pub const DEFAULT_PORT: u16 = 443;

/// Default store name (the personal store).
pub const DEFAULT_STORE_NAME: &str = "My";

/// Host and port of the request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host name or IP address (IPv6 without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Target {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Config`] for an empty host or an invalid port.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| ProbeError::config(format!("Invalid target '{}': missing ']'", s)))?;
            match after {
                "" => (host, None),
                _ => match after.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(ProbeError::config(format!(
                            "Invalid target '{}': unexpected text after ']'",
                            s
                        )))
                    }
                },
            }
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(ProbeError::config(format!("Invalid target '{}': empty host", s)));
        }

        let port = match port {
            None => DEFAULT_PORT,
            Some(p) => match p.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    return Err(ProbeError::config(format!(
                        "Invalid target '{}': bad port '{}'",
                        s, p
                    )))
                }
            },
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The `https://` URL for the target's root path.
    pub fn url(&self) -> Result<Url> {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        Ok(Url::parse(&format!("https://{}:{}/", host, self.port))?)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Configuration for a probe run.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Store to walk and search (default "My").
    pub store_name: String,

    /// Store location (default CurrentUser).
    pub store_location: StoreLocation,

    /// Certificates expiring within this many days are only reported as
    /// expiring (default 31).
    pub expiry_horizon_days: u32,

    /// Flags passed to the EKU query (default 0).
    pub eku_flags: u32,

    /// EKU OID that selects the client certificate.
    pub client_auth_oid: String,

    /// Request target (default localhost:443).
    pub target: Target,

    /// Request timeout.
    pub timeout: Duration,

    /// Trust anchors for the server certificate.
    pub trust_anchors: TrustAnchors,

    /// Exit non-zero when the request path fails.
    pub strict_exit: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            store_name: DEFAULT_STORE_NAME.to_string(),
            store_location: StoreLocation::CurrentUser,
            expiry_horizon_days: DEFAULT_EXPIRY_HORIZON_DAYS,
            eku_flags: 0,
            client_auth_oid: oids::CLIENT_AUTH.to_string(),
            target: Target::default(),
            timeout: Duration::from_secs(30),
            trust_anchors: TrustAnchors::WebPki,
            strict_exit: false,
        }
    }
}

impl ProbeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProbeConfigBuilder {
        ProbeConfigBuilder::new()
    }

    /// URL the authenticated GET goes to.
    pub fn request_url(&self) -> Result<Url> {
        self.target.url()
    }
}

/// Builder for [`ProbeConfig`]. Unset fields keep their defaults.
#[derive(Debug, Default)]
pub struct ProbeConfigBuilder {
    store_name: Option<String>,
    store_location: Option<StoreLocation>,
    expiry_horizon_days: Option<u32>,
    eku_flags: Option<u32>,
    client_auth_oid: Option<String>,
    target: Option<Target>,
    timeout: Option<Duration>,
    trust_anchors: Option<TrustAnchors>,
    strict_exit: Option<bool>,
}

impl ProbeConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the values of a loaded configuration file.
    ///
    /// # Errors
    ///
    /// Fails if a location string is unknown or the CA bundle cannot be read.
    pub fn from_file(file: &FileConfig) -> Result<Self> {
        let mut builder = Self::new();

        if let Some(ref name) = file.store.name {
            builder = builder.store_name(name);
        }
        if let Some(ref location) = file.store.location {
            builder = builder.store_location_str(location)?;
        }
        if let Some(days) = file.store.expiry_horizon_days {
            builder = builder.expiry_horizon_days(days);
        }
        if let Some(flags) = file.store.eku_flags {
            builder = builder.eku_flags(flags);
        }

        if let Some(ref target) = file.request.target {
            builder = builder.target_str(target)?;
        }
        if let Some(ref oid) = file.request.client_auth_oid {
            builder = builder.client_auth_oid(oid);
        }
        if let Some(secs) = file.request.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(strict) = file.request.strict_exit {
            builder = builder.strict_exit(strict);
        }

        builder.trust_anchors = Some(file.trust.to_trust_anchors()?);
        Ok(builder)
    }

    /// Set the store name.
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    /// Set the store location.
    pub fn store_location(mut self, location: StoreLocation) -> Self {
        self.store_location = Some(location);
        self
    }

    /// Set the store location from a string such as "LocalMachine".
    pub fn store_location_str(self, location: &str) -> Result<Self> {
        let parsed = StoreLocation::parse(location).ok_or_else(|| {
            ProbeError::config(format!(
                "Invalid store location '{}': expected LocalMachine or CurrentUser",
                location
            ))
        })?;
        Ok(self.store_location(parsed))
    }

    /// Set the expiry horizon in days.
    pub fn expiry_horizon_days(mut self, days: u32) -> Self {
        self.expiry_horizon_days = Some(days);
        self
    }

    /// Set the EKU query flags.
    pub fn eku_flags(mut self, flags: u32) -> Self {
        self.eku_flags = Some(flags);
        self
    }

    /// Set the EKU OID used to select the client certificate.
    pub fn client_auth_oid(mut self, oid: impl Into<String>) -> Self {
        self.client_auth_oid = Some(oid.into());
        self
    }

    /// Set the request target.
    pub fn target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the request target from `host[:port]`.
    pub fn target_str(self, target: &str) -> Result<Self> {
        Ok(self.target(Target::parse(target)?))
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use the bundled WebPKI roots for server verification.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Use explicit PEM CA certificates for server verification.
    pub fn trust_explicit(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_certs));
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn trust_any_insecure(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::InsecureAcceptAny);
        self
    }

    /// Exit non-zero when the request path fails.
    pub fn strict_exit(mut self, strict: bool) -> Self {
        self.strict_exit = Some(strict);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Config`] if the store name is empty or the
    /// client-auth OID is not a dotted OID.
    pub fn build(self) -> Result<ProbeConfig> {
        let defaults = ProbeConfig::default();

        let store_name = self.store_name.unwrap_or(defaults.store_name);
        if store_name.trim().is_empty() {
            return Err(ProbeError::config("store name must not be empty"));
        }

        let client_auth_oid = self.client_auth_oid.unwrap_or(defaults.client_auth_oid);
        ObjectIdentifier::new(&client_auth_oid).map_err(|e| {
            ProbeError::config(format!("Invalid client auth OID '{}': {}", client_auth_oid, e))
        })?;

        let timeout = self.timeout.unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            return Err(ProbeError::config("timeout must be greater than zero"));
        }

        Ok(ProbeConfig {
            store_name,
            store_location: self.store_location.unwrap_or(defaults.store_location),
            expiry_horizon_days: self
                .expiry_horizon_days
                .unwrap_or(defaults.expiry_horizon_days),
            eku_flags: self.eku_flags.unwrap_or(defaults.eku_flags),
            client_auth_oid,
            target: self.target.unwrap_or(defaults.target),
            timeout,
            trust_anchors: self.trust_anchors.unwrap_or(defaults.trust_anchors),
            strict_exit: self.strict_exit.unwrap_or(defaults.strict_exit),
        })
    }
}

/// Client identity for TLS client certificate authentication.
#[derive(Clone)]
pub enum ClientIdentity {
    /// PEM-encoded certificate chain (client certificate first) and private
    /// key held in memory.
    Pem {
        /// Certificate chain.
        cert_pem: Vec<u8>,
        /// PKCS#8, PKCS#1 or SEC1 private key.
        key_pem: Vec<u8>,
    },

    /// Certificate chain whose private key signs in place and is never
    /// exported.
    Signer(Arc<CertifiedKey>),
}

impl ClientIdentity {
    /// Create a new client identity from PEM-encoded data.
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self::Pem {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem { cert_pem, .. } => f
                .debug_struct("Pem")
                .field("cert_pem", &format_args!("{} bytes", cert_pem.len()))
                .field("key_pem", &"<redacted>")
                .finish(),
            Self::Signer(key) => f
                .debug_struct("Signer")
                .field("chain", &format_args!("{} certificate(s)", key.cert.len()))
                .finish(),
        }
    }
}

/// Trust anchor configuration for server certificate verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use the WebPKI root store bundled with the TLS stack.
    WebPki,

    /// Use explicit CA certificates (PEM-encoded).
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate (insecure, for testing only).
    ///
    /// **WARNING**: This disables all server certificate verification.
    InsecureAcceptAny,
}

impl fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}
