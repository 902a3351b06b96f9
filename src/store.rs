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

//! Certificate store enumeration.
//!
//! A system certificate store is opened by location and name, and walked one
//! record at a time. The walker owns at most one live record: advancing
//! releases the previous record, and dropping the walker releases the current
//! record before the store itself is closed.
//!
//! # Store Locations
//!
//! - **CurrentUser**: per-user certificates, no elevation required
//! - **LocalMachine**: system-wide certificates, writes require admin
//!
//! # Example
//!
//! ```no_run
//! use cert_probe::memory::MemoryPlatform;
//! use cert_probe::store::{CertStoreWalker, StoreLocation};
//!
//! # fn example() -> cert_probe::Result<()> {
//! let platform = MemoryPlatform::new();
//! let mut walker = CertStoreWalker::open(&platform, StoreLocation::CurrentUser, "My")?;
//! while let Some(record) = walker.next() {
//!     let info = cert_probe::properties::certificate_info(record)?;
//!     println!("{}", info.subject);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;

use crate::error::{PlatformStatus, Result};
use crate::expiry::ValidityWindow;
use crate::properties::{EncodingType, KeyProviderInfo, PropertyId};

/// Location of a system certificate store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreLocation {
    /// Current user store - per-user, no elevation required.
    #[default]
    CurrentUser,
    /// Local machine store - system-wide.
    LocalMachine,
}

impl StoreLocation {
    /// Parse a store location from a string like "LocalMachine" or "CurrentUser".
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "currentuser" | "current_user" | "current-user" | "user" => Some(Self::CurrentUser),
            "localmachine" | "local_machine" | "local-machine" | "machine" => {
                Some(Self::LocalMachine)
            }
            _ => None,
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentUser => write!(f, "CurrentUser"),
            Self::LocalMachine => write!(f, "LocalMachine"),
        }
    }
}

/// Raw per-certificate queries offered by a platform.
///
/// The sized queries follow the platform convention: called with no buffer
/// they write the required size into `len`; called with a buffer they fill
/// it and write the number of bytes used. [`crate::properties`] wraps this
/// protocol so callers never see it.
pub trait CertificateRecord {
    /// Encoding of the certificate blob, needed to render the subject.
    fn encoding_type(&self) -> EncodingType;

    /// Subject rendered as a simple display name.
    fn subject_name(&self) -> std::result::Result<String, PlatformStatus>;

    /// Validity window from the certificate body.
    fn validity(&self) -> ValidityWindow;

    /// Query a context property (hash, key provider info, ...).
    fn query_property(
        &self,
        id: PropertyId,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<(), PlatformStatus>;

    /// Query the enhanced key usage list.
    fn query_enhanced_key_usage(
        &self,
        flags: u32,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<(), PlatformStatus>;

    /// Decode an enhanced key usage buffer filled by
    /// [`query_enhanced_key_usage`](Self::query_enhanced_key_usage).
    fn decode_enhanced_key_usage(&self, buffer: &[u8]) -> Result<Vec<String>>;

    /// Decode a key provider info buffer filled by
    /// [`query_property`](Self::query_property).
    fn decode_key_provider_info(&self, buffer: &[u8]) -> Result<KeyProviderInfo>;
}

/// An opened certificate store.
///
/// Dropping the value closes the store. Dropping a record releases it.
pub trait CertificateStore {
    /// Record type produced by this store.
    type Record: CertificateRecord;

    /// Release `previous` (if any) and return the next record, or `None` at
    /// the end of the store.
    fn next_record(&mut self, previous: Option<Self::Record>) -> Option<Self::Record>;
}

/// Opens certificate stores.
pub trait StoreProvider {
    /// Store type produced by this provider.
    type Store: CertificateStore;

    /// Open the named store at the given location.
    fn open_store(&self, location: StoreLocation, name: &str) -> Result<Self::Store>;
}

/// One-directional walk over a certificate store.
///
/// Not restartable: once [`next`](Self::next) has returned `None`, every later
/// call returns `None`. Open a new walker to enumerate again.
pub struct CertStoreWalker<S: CertificateStore> {
    // Field order matters: the current record is dropped before the store.
    current: Option<S::Record>,
    store: S,
    location: StoreLocation,
    name: String,
    exhausted: bool,
    records_seen: usize,
}

impl<S: CertificateStore> CertStoreWalker<S> {
    /// Open a store through `provider` and position the walker before the
    /// first record.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StoreUnavailable`](crate::error::ProbeError::StoreUnavailable)
    /// if the store cannot be opened.
    pub fn open<P>(provider: &P, location: StoreLocation, name: &str) -> Result<Self>
    where
        P: StoreProvider<Store = S>,
    {
        let store = provider.open_store(location, name)?;
        tracing::debug!("Opened certificate store {}\\{}", location, name);
        Ok(Self::from_store(store, location, name))
    }

    /// Wrap an already opened store.
    pub fn from_store(store: S, location: StoreLocation, name: &str) -> Self {
        Self {
            current: None,
            store,
            location,
            name: name.to_string(),
            exhausted: false,
            records_seen: 0,
        }
    }

    /// Advance to the next record.
    ///
    /// The previously returned record is released before this returns, which
    /// the borrow on `self` enforces at compile time.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&S::Record> {
        if self.exhausted {
            return None;
        }

        let previous = self.current.take();
        self.current = self.store.next_record(previous);

        match self.current {
            Some(_) => self.records_seen += 1,
            None => {
                self.exhausted = true;
                tracing::debug!(
                    "Finished walking {}\\{} ({} records)",
                    self.location,
                    self.name,
                    self.records_seen
                );
            }
        }

        self.current.as_ref()
    }

    /// Store location.
    pub fn location(&self) -> StoreLocation {
        self.location
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of records produced so far.
    pub fn records_seen(&self) -> usize {
        self.records_seen
    }

    /// Returns true once the end of the store has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Release the current record and close the store.
    pub fn close(self) {
        drop(self);
    }
}

impl<S: CertificateStore> fmt::Debug for CertStoreWalker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertStoreWalker")
            .field("location", &self.location)
            .field("name", &self.name)
            .field("exhausted", &self.exhausted)
            .field("records_seen", &self.records_seen)
            .finish()
    }
}
