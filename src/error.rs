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

//! Error types for certificate inspection and client-authenticated requests.
//!
//! Errors fall into two groups. Structural failures (the store cannot be
//! opened, a property query breaks, a key provider misbehaves) abort the whole
//! inspection run. Per-record conditions such as a missing CNG key are
//! reported and the walk moves on; see [`ProbeError::is_fatal`].

use std::fmt;

use thiserror::Error;

/// Result type alias using [`ProbeError`].
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Raw status code reported by a platform API call.
///
/// On Windows this is an `HRESULT` / `SECURITY_STATUS` value. The in-memory
/// backend uses the same codes so both paths classify failures identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformStatus(pub i32);

impl PlatformStatus {
    /// `CRYPT_E_NOT_FOUND`: the requested property is not set.
    pub const NOT_FOUND: Self = Self(0x8009_2004_u32 as i32);
    /// `NTE_BAD_KEYSET`: the key container does not exist.
    pub const BAD_KEYSET: Self = Self(0x8009_0016_u32 as i32);
    /// `NTE_PROV_DLL_NOT_FOUND`: the storage provider is not installed.
    pub const PROVIDER_NOT_FOUND: Self = Self(0x8009_001E_u32 as i32);
    /// `NTE_SILENT_CONTEXT`: the key needs UI but silent mode was requested.
    pub const SILENT_CONTEXT: Self = Self(0x8009_0022_u32 as i32);
    /// `HRESULT_FROM_WIN32(ERROR_MORE_DATA)`: the buffer is too small.
    pub const MORE_DATA: Self = Self(0x8007_00EA_u32 as i32);
    /// `HRESULT_FROM_WIN32(ERROR_ACCESS_DENIED)`.
    pub const ACCESS_DENIED: Self = Self(0x8007_0005_u32 as i32);
    /// `HRESULT_FROM_WIN32(ERROR_FILE_NOT_FOUND)`: no such system store.
    pub const FILE_NOT_FOUND: Self = Self(0x8007_0002_u32 as i32);

    /// Raw code as an unsigned value, the way Windows tools print it.
    pub fn code(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.code())
    }
}

/// Broad classification of a [`ProbeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The certificate store could not be opened.
    StoreUnavailable,
    /// A certificate property query failed unexpectedly.
    PropertyQueryFailed,
    /// The key storage provider could not be opened.
    ProviderOpenFailed,
    /// The key container does not exist.
    KeyNotFound,
    /// The key exists but could not be opened.
    KeyOpenFailed,
    /// No certificate with the client-auth EKU was found.
    NoClientAuthCertificate,
    /// The HTTPS request failed (transport, TLS or status).
    HttpFailure,
    /// Configuration, parsing or I/O problems outside the walk.
    Other,
}

/// Errors that can occur while probing certificates.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The certificate store could not be opened.
    #[error("Failed to open certificate store {location}\\{name}: error {status}")]
    StoreUnavailable {
        /// Store location (CurrentUser, LocalMachine).
        location: String,
        /// Store name (e.g. "My").
        name: String,
        /// Platform status.
        status: PlatformStatus,
    },

    /// A certificate property query failed for a reason other than absence.
    #[error("Certificate property query '{property}' failed: {reason}")]
    PropertyQueryFailed {
        /// The property being queried.
        property: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// The key storage provider could not be opened.
    #[error("Failed to open key storage provider '{provider}': error {status}")]
    ProviderOpenFailed {
        /// Provider name.
        provider: String,
        /// Platform status.
        status: PlatformStatus,
    },

    /// The key container does not exist in the provider.
    #[error("Key '{key}' not found in provider '{provider}'")]
    KeyNotFound {
        /// Provider name.
        provider: String,
        /// Key container name.
        key: String,
    },

    /// Opening the key failed for a reason other than absence.
    #[error("Failed to open key '{key}' in provider '{provider}': error {status}")]
    KeyOpenFailed {
        /// Provider name.
        provider: String,
        /// Key container name.
        key: String,
        /// Platform status.
        status: PlatformStatus,
    },

    /// No certificate matching the client-auth query was found.
    #[error("No clientAuth certificate found in {store}")]
    NoClientAuthCertificate {
        /// Store that was searched.
        store: String,
    },

    /// HTTP transport or TLS handshake error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("Server error {status}: {message}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// TLS identity or trust configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate could not be decoded.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// A failure while inspecting one certificate.
    #[error("Cert: {subject}: {source}")]
    InRecord {
        /// Subject of the certificate being inspected.
        subject: String,
        /// What went wrong.
        #[source]
        source: Box<ProbeError>,
    },

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Create a store-unavailable error.
    pub fn store_unavailable(
        location: impl fmt::Display,
        name: impl Into<String>,
        status: PlatformStatus,
    ) -> Self {
        Self::StoreUnavailable {
            location: location.to_string(),
            name: name.into(),
            status,
        }
    }

    /// Attach the subject of the certificate being inspected.
    pub fn in_record(subject: impl Into<String>, source: ProbeError) -> Self {
        Self::InRecord {
            subject: subject.into(),
            source: Box::new(source),
        }
    }

    /// Create a property query error.
    pub fn property_query(property: &'static str, reason: impl Into<String>) -> Self {
        Self::PropertyQueryFailed {
            property,
            reason: reason.into(),
        }
    }

    /// Create a no-client-auth-certificate error.
    pub fn no_client_auth_certificate(store: impl Into<String>) -> Self {
        Self::NoClientAuthCertificate {
            store: store.into(),
        }
    }

    /// Create an HTTP status error.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            message: message.into(),
        }
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::PropertyQueryFailed { .. } => ErrorKind::PropertyQueryFailed,
            Self::ProviderOpenFailed { .. } => ErrorKind::ProviderOpenFailed,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::KeyOpenFailed { .. } => ErrorKind::KeyOpenFailed,
            Self::NoClientAuthCertificate { .. } => ErrorKind::NoClientAuthCertificate,
            Self::InRecord { source, .. } => source.kind(),
            Self::Http(_) | Self::HttpStatus { .. } | Self::Tls(_) => ErrorKind::HttpFailure,
            Self::Config(_)
            | Self::CertificateParsing(_)
            | Self::Url(_)
            | Self::Io(_) => ErrorKind::Other,
        }
    }

    /// Returns true if this error must abort the whole inspection walk.
    ///
    /// Only a missing key is a per-record condition; everything else that can
    /// surface from the walk means the store or provider is in a state we do
    /// not continue past.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::KeyNotFound
    }
}
