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

//! # cert-probe
//!
//! Inspect the certificates in a Windows certificate store, check that their
//! CNG private keys can be opened, and make a client-authenticated HTTPS
//! request with the first client-auth certificate found.
//!
//! ## Features
//!
//! - **Store walk** over `CurrentUser\My` (or any system store) with a
//!   lending walker that keeps exactly one record open at a time
//! - **Expiry check** against a configurable horizon (31 days by default)
//! - **Key check** that opens each certificate's CNG key silently and
//!   releases it again
//! - **mTLS GET** using the selected certificate as the TLS client identity
//! - **In-memory platform** for tests and non-Windows hosts
//!
//! ## Quick Start
//!
//! ```no_run
//! use cert_probe::inspector::CertificateInspector;
//! use cert_probe::memory::{MemoryCertificate, MemoryPlatform};
//! use cert_probe::store::{CertStoreWalker, StoreLocation};
//!
//! # fn main() -> cert_probe::Result<()> {
//! let platform = MemoryPlatform::new();
//! platform.add_certificate(
//!     StoreLocation::CurrentUser,
//!     "My",
//!     MemoryCertificate::builder("client.example").build(),
//! );
//!
//! let mut walker = CertStoreWalker::open(&platform, StoreLocation::CurrentUser, "My")?;
//! let summary = CertificateInspector::new(platform.keys())
//!     .inspect(&mut walker, |report| println!("{}", report))?;
//! println!("{} certificates inspected", summary.inspected);
//! # Ok(())
//! # }
//! ```
//!
//! ## Client-Authenticated Request
//!
//! ```no_run
//! use cert_probe::client::fetch_with_client_auth;
//! use cert_probe::{DefaultPlatform, ProbeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProbeConfig::builder().target_str("server.example:443")?.build()?;
//! let response = fetch_with_client_auth(&DefaultPlatform::default(), &config).await?;
//! println!("Client certificate: {}", response.certificate.subject);
//! # Ok(())
//! # }
//! ```
//!
//! ## Platforms
//!
//! On Windows, [`DefaultPlatform`] is the native certificate store and CNG
//! backend. Elsewhere it is an empty [`memory::MemoryPlatform`], so every
//! store is reported as unavailable.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod expiry;
pub mod inspector;
pub mod keys;
pub mod logging;
pub mod memory;
pub mod properties;
pub mod selector;
pub mod store;
pub mod tls;

#[cfg(windows)]
pub mod windows;

// Re-export main types at crate root for convenience
pub use client::{fetch_as, fetch_with_client_auth, AuthenticatedResponse, WebClient};
pub use config::{
    ClientIdentity, ConfigLoader, FileConfig, ProbeConfig, ProbeConfigBuilder, Target,
    TrustAnchors,
};
pub use error::{ErrorKind, PlatformStatus, ProbeError, Result};
pub use inspector::{CertificateInspector, CertificateReport, InspectionSummary, KeyStatus};
pub use selector::{CertificateQuery, ClientAuthSelector, ClientCertificate, QueryFilter};
pub use store::{CertStoreWalker, StoreLocation};

/// Platform backend used by the command-line tool.
#[cfg(windows)]
pub type DefaultPlatform = windows::WindowsPlatform;

/// Platform backend used by the command-line tool.
#[cfg(not(windows))]
pub type DefaultPlatform = memory::MemoryPlatform;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("cert-probe/", env!("CARGO_PKG_VERSION"));
