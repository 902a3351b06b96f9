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

//! Windows CNG (Cryptography Next Generation) key storage.

use windows::core::PCWSTR;
use windows::Win32::Security::Cryptography::{
    NCryptFreeObject, NCryptOpenKey, NCryptOpenStorageProvider, CERT_KEY_SPEC, NCRYPT_FLAGS,
    NCRYPT_HANDLE, NCRYPT_KEY_HANDLE, NCRYPT_PROV_HANDLE,
};

use super::wide;
use crate::error::PlatformStatus;
use crate::keys::KeyStorage;

/// CNG key storage providers on this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsKeyStorage;

/// Open `NCRYPT_PROV_HANDLE`, freed on drop.
#[derive(Debug)]
pub struct WindowsProviderHandle(NCRYPT_PROV_HANDLE);

impl Drop for WindowsProviderHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = NCryptFreeObject(NCRYPT_HANDLE(self.0 .0));
        }
    }
}

/// Open `NCRYPT_KEY_HANDLE`, freed on drop.
#[derive(Debug)]
pub struct WindowsKeyHandle(NCRYPT_KEY_HANDLE);

impl Drop for WindowsKeyHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = NCryptFreeObject(NCRYPT_HANDLE(self.0 .0));
        }
    }
}

impl KeyStorage for WindowsKeyStorage {
    type Provider = WindowsProviderHandle;
    type Key = WindowsKeyHandle;

    fn open_provider(&self, name: &str) -> std::result::Result<WindowsProviderHandle, PlatformStatus> {
        let wide_name = wide(name);
        let mut handle = NCRYPT_PROV_HANDLE::default();

        unsafe { NCryptOpenStorageProvider(&mut handle, PCWSTR(wide_name.as_ptr()), 0) }?;

        Ok(WindowsProviderHandle(handle))
    }

    fn open_key(
        &self,
        provider: &WindowsProviderHandle,
        key_name: &str,
        key_spec: u32,
        flags: u32,
    ) -> std::result::Result<WindowsKeyHandle, PlatformStatus> {
        let wide_name = wide(key_name);
        let mut handle = NCRYPT_KEY_HANDLE::default();

        unsafe {
            NCryptOpenKey(
                provider.0,
                &mut handle,
                PCWSTR(wide_name.as_ptr()),
                CERT_KEY_SPEC(key_spec),
                NCRYPT_FLAGS(flags),
            )
        }?;

        Ok(WindowsKeyHandle(handle))
    }
}
