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

//! Windows platform backend.
//!
//! # Overview
//!
//! - **Certificate stores**: [`WindowsPlatform`] opens system stores with
//!   `CertOpenStore` and walks them with `CertEnumCertificatesInStore`.
//!   Property reads go straight to `CertGetCertificateContextProperty` and
//!   `CertGetEnhancedKeyUsage`.
//!
//! - **CNG keys**: [`WindowsKeyStorage`] opens storage providers and
//!   persisted keys with `NCryptOpenStorageProvider` / `NCryptOpenKey`.
//!
//! - **Client-auth selection**: [`WindowsPlatform`] also implements
//!   [`CertificateQuery`](crate::selector::CertificateQuery) using
//!   `CertFindCertificateInStore`. The chosen certificate's key signs the
//!   TLS handshake through rustls-cng and never leaves its provider.
//!
//! # Security Considerations
//!
//! - Stores are opened read-only and only if they already exist
//! - Keys are opened with `NCRYPT_SILENT_FLAG`; a key that needs a PIN or
//!   consent prompt fails instead of blocking
//! - Client keys are used in place; nothing is exported
//!
//! # Example
//!
//! ```no_run
//! use cert_probe::inspector::CertificateInspector;
//! use cert_probe::store::{CertStoreWalker, StoreLocation};
//! use cert_probe::windows::WindowsPlatform;
//!
//! # fn example() -> cert_probe::Result<()> {
//! let platform = WindowsPlatform::new();
//! let mut walker = CertStoreWalker::open(&platform, StoreLocation::CurrentUser, "My")?;
//! let inspector = CertificateInspector::new(platform.keys());
//! inspector.inspect(&mut walker, |report| println!("{}", report))?;
//! # Ok(())
//! # }
//! ```

pub mod certstore;
pub mod cng;
pub mod query;

pub use certstore::{WindowsRecord, WindowsStore};
pub use cng::{WindowsKeyHandle, WindowsKeyStorage, WindowsProviderHandle};

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use windows::Win32::Foundation::GetLastError;

use crate::error::PlatformStatus;

/// Handle to the native certificate stores and key storage providers.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsPlatform {
    keys: WindowsKeyStorage,
}

impl WindowsPlatform {
    /// Create a platform handle. Nothing is opened until a store or key is
    /// requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// CNG key storage.
    pub fn keys(&self) -> &WindowsKeyStorage {
        &self.keys
    }
}

impl From<windows::core::Error> for PlatformStatus {
    fn from(err: windows::core::Error) -> Self {
        Self(err.code().0)
    }
}

/// Status of the last failed Win32 call on this thread.
pub(crate) fn last_error() -> PlatformStatus {
    let code = unsafe { GetLastError() };
    PlatformStatus(code.to_hresult().0)
}

/// Convert to a NUL-terminated UTF-16 string.
pub(crate) fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}
