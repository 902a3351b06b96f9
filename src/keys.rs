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

//! Private key accessibility checks.
//!
//! A certificate's key provider info names a key storage provider and a key
//! container. [`verify_accessible`] opens both, in silent mode so no PIN or
//! consent prompt can appear, and releases them again. Nothing is read from
//! the key; the check only confirms that it exists and can be opened.
//!
//! # Key Storage Providers
//!
//! - **Microsoft Software Key Storage Provider**: software-based key storage
//! - **Microsoft Smart Card Key Storage Provider**: smart card/token-based storage
//! - **Microsoft Platform Crypto Provider**: TPM 2.0-based storage

use crate::error::{PlatformStatus, ProbeError, Result};

/// Well-known CNG key storage provider names.
pub mod providers {
    /// Microsoft Software Key Storage Provider.
    pub const SOFTWARE: &str = "Microsoft Software Key Storage Provider";

    /// Microsoft Smart Card Key Storage Provider.
    pub const SMART_CARD: &str = "Microsoft Smart Card Key Storage Provider";

    /// Microsoft Platform Crypto Provider (TPM 2.0).
    pub const PLATFORM: &str = "Microsoft Platform Crypto Provider";
}

/// `NCRYPT_SILENT_FLAG`: fail instead of showing UI.
pub const NCRYPT_SILENT_FLAG: u32 = 0x0000_0040;

/// Access to key storage providers.
///
/// Handles are released when dropped. Implementations must make each drop
/// release exactly one platform handle.
pub trait KeyStorage {
    /// Open provider handle.
    type Provider;
    /// Open key handle.
    type Key;

    /// Open a key storage provider by name.
    fn open_provider(&self, name: &str) -> std::result::Result<Self::Provider, PlatformStatus>;

    /// Open a persisted key by container name.
    fn open_key(
        &self,
        provider: &Self::Provider,
        key_name: &str,
        key_spec: u32,
        flags: u32,
    ) -> std::result::Result<Self::Key, PlatformStatus>;
}

/// Confirm that a key exists in a provider and can be opened without UI.
///
/// # Errors
///
/// - [`ProbeError::ProviderOpenFailed`] if the provider cannot be opened
/// - [`ProbeError::KeyNotFound`] if the provider reports no such key
/// - [`ProbeError::KeyOpenFailed`] for any other key open failure
///
/// Every handle opened here is released before returning, on all paths.
pub fn verify_accessible<K>(
    storage: &K,
    provider_name: &str,
    key_name: &str,
    key_spec: u32,
) -> Result<()>
where
    K: KeyStorage + ?Sized,
{
    let provider =
        storage
            .open_provider(provider_name)
            .map_err(|status| ProbeError::ProviderOpenFailed {
                provider: provider_name.to_string(),
                status,
            })?;

    let key = match storage.open_key(&provider, key_name, key_spec, NCRYPT_SILENT_FLAG) {
        Ok(key) => key,
        Err(status) if status == PlatformStatus::BAD_KEYSET => {
            tracing::debug!("Key '{}' not found in '{}'", key_name, provider_name);
            return Err(ProbeError::KeyNotFound {
                provider: provider_name.to_string(),
                key: key_name.to_string(),
            });
        }
        Err(status) => {
            return Err(ProbeError::KeyOpenFailed {
                provider: provider_name.to_string(),
                key: key_name.to_string(),
                status,
            });
        }
    };

    tracing::debug!("Opened key '{}' in '{}'", key_name, provider_name);

    // Key first, then provider.
    drop(key);
    drop(provider);
    Ok(())
}
