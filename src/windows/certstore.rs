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

//! Windows Certificate Store access.
//!
//! A [`WindowsStore`] owns one `HCERTSTORE`. Each [`WindowsRecord`] owns one
//! `CERT_CONTEXT` reference. `CertEnumCertificatesInStore` releases the
//! previous context itself, so a record handed back to
//! [`CertificateStore::next_record`] gives up its pointer without freeing it.

use std::ffi::c_void;
use std::mem::{self, ManuallyDrop};
use std::ptr;

use windows::core::PCWSTR;
use windows::Win32::Security::Cryptography::{
    CertCloseStore, CertEnumCertificatesInStore, CertFreeCertificateContext,
    CertGetCertificateContextProperty, CertGetEnhancedKeyUsage, CertNameToStrW, CertOpenStore,
    CERT_CONTEXT, CERT_OPEN_STORE_FLAGS, CERT_QUERY_ENCODING_TYPE, CERT_SIMPLE_NAME_STR,
    CERT_STORE_OPEN_EXISTING_FLAG, CERT_STORE_PROV_SYSTEM_W, CERT_STORE_READONLY_FLAG,
    CERT_SYSTEM_STORE_CURRENT_USER, CERT_SYSTEM_STORE_LOCAL_MACHINE, CRYPT_KEY_PROV_INFO,
    CTL_USAGE, HCERTSTORE,
};

use super::{last_error, wide, WindowsPlatform};
use crate::error::{PlatformStatus, ProbeError, Result};
use crate::expiry::{FileTime, ValidityWindow};
use crate::properties::{EncodingType, KeyProviderInfo, PropertyId, ProviderType};
use crate::store::{CertificateRecord, CertificateStore, StoreLocation, StoreProvider};

impl StoreLocation {
    fn to_flags(self) -> u32 {
        match self {
            Self::CurrentUser => CERT_SYSTEM_STORE_CURRENT_USER,
            Self::LocalMachine => CERT_SYSTEM_STORE_LOCAL_MACHINE,
        }
    }
}

/// An open system certificate store.
pub struct WindowsStore {
    handle: HCERTSTORE,
}

impl WindowsStore {
    /// Open an existing system store read-only.
    pub fn open(location: StoreLocation, name: &str) -> Result<Self> {
        let wide_name = wide(name);
        let flags = location.to_flags()
            | CERT_STORE_OPEN_EXISTING_FLAG.0
            | CERT_STORE_READONLY_FLAG.0;

        let handle = unsafe {
            CertOpenStore(
                CERT_STORE_PROV_SYSTEM_W,
                CERT_QUERY_ENCODING_TYPE(0),
                None,
                CERT_OPEN_STORE_FLAGS(flags),
                Some(wide_name.as_ptr() as *const c_void),
            )
        };

        match handle {
            Ok(h) if !h.is_invalid() => Ok(Self { handle: h }),
            Ok(_) => Err(ProbeError::store_unavailable(location, name, last_error())),
            Err(e) => Err(ProbeError::store_unavailable(
                location,
                name,
                PlatformStatus::from(e),
            )),
        }
    }

    pub(crate) fn handle(&self) -> HCERTSTORE {
        self.handle
    }
}

impl CertificateStore for WindowsStore {
    type Record = WindowsRecord;

    fn next_record(&mut self, previous: Option<WindowsRecord>) -> Option<WindowsRecord> {
        let previous = previous.map(WindowsRecord::into_raw);
        let context = unsafe { CertEnumCertificatesInStore(self.handle, previous) };
        unsafe { WindowsRecord::from_raw(context) }
    }
}

impl Drop for WindowsStore {
    fn drop(&mut self) {
        unsafe {
            let _ = CertCloseStore(self.handle, 0);
        }
    }
}

impl StoreProvider for WindowsPlatform {
    type Store = WindowsStore;

    fn open_store(&self, location: StoreLocation, name: &str) -> Result<WindowsStore> {
        WindowsStore::open(location, name)
    }
}

/// One certificate context reference.
pub struct WindowsRecord {
    context: *const CERT_CONTEXT,
}

impl WindowsRecord {
    /// Take ownership of a context reference. Returns `None` for null.
    ///
    /// # Safety
    ///
    /// `context` must be null or a context reference the caller owns.
    pub(crate) unsafe fn from_raw(context: *const CERT_CONTEXT) -> Option<Self> {
        if context.is_null() {
            None
        } else {
            Some(Self { context })
        }
    }

    /// Give up ownership without freeing.
    pub(crate) fn into_raw(self) -> *const CERT_CONTEXT {
        let this = ManuallyDrop::new(self);
        this.context
    }

    /// DER encoding of the certificate.
    pub fn der(&self) -> Vec<u8> {
        unsafe {
            let context = &*self.context;
            std::slice::from_raw_parts(context.pbCertEncoded, context.cbCertEncoded as usize)
                .to_vec()
        }
    }
}

impl Drop for WindowsRecord {
    fn drop(&mut self) {
        unsafe {
            let _ = CertFreeCertificateContext(Some(self.context));
        }
    }
}

impl CertificateRecord for WindowsRecord {
    fn encoding_type(&self) -> EncodingType {
        EncodingType(unsafe { (*self.context).dwCertEncodingType.0 })
    }

    fn subject_name(&self) -> std::result::Result<String, PlatformStatus> {
        unsafe {
            let context = &*self.context;
            let subject = &(*context.pCertInfo).Subject;

            let required = CertNameToStrW(
                context.dwCertEncodingType,
                subject,
                CERT_SIMPLE_NAME_STR,
                None,
            );
            if required == 0 {
                return Err(last_error());
            }

            let mut name = vec![0u16; required as usize];
            let written = CertNameToStrW(
                context.dwCertEncodingType,
                subject,
                CERT_SIMPLE_NAME_STR,
                Some(&mut name),
            );
            if written == 0 {
                return Err(last_error());
            }

            // Drop the terminator.
            name.truncate(written as usize - 1);
            Ok(String::from_utf16_lossy(&name))
        }
    }

    fn validity(&self) -> ValidityWindow {
        unsafe {
            let info = &*(*self.context).pCertInfo;
            ValidityWindow::new(
                FileTime::from_parts(info.NotBefore.dwLowDateTime, info.NotBefore.dwHighDateTime),
                FileTime::from_parts(info.NotAfter.dwLowDateTime, info.NotAfter.dwHighDateTime),
            )
        }
    }

    fn query_property(
        &self,
        id: PropertyId,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<(), PlatformStatus> {
        if let Some(buf) = &buffer {
            *len = (*len).min(buf.len() as u32);
        }
        let data = buffer.map(|buf| buf.as_mut_ptr() as *mut c_void);
        unsafe { CertGetCertificateContextProperty(self.context, id.raw(), data, len) }
            .map_err(PlatformStatus::from)
    }

    fn query_enhanced_key_usage(
        &self,
        flags: u32,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<(), PlatformStatus> {
        if let Some(buf) = &buffer {
            *len = (*len).min(buf.len() as u32);
        }
        let usage = buffer.map(|buf| buf.as_mut_ptr() as *mut CTL_USAGE);
        unsafe { CertGetEnhancedKeyUsage(self.context, flags, usage, len) }
            .map_err(PlatformStatus::from)
    }

    fn decode_enhanced_key_usage(&self, buffer: &[u8]) -> Result<Vec<String>> {
        if buffer.len() < mem::size_of::<CTL_USAGE>() {
            return Err(ProbeError::property_query(
                "enhanced key usage",
                "buffer is truncated",
            ));
        }

        // The identifier pointers point back into `buffer`.
        let usage = unsafe { ptr::read_unaligned(buffer.as_ptr() as *const CTL_USAGE) };
        (0..usage.cUsageIdentifier as usize)
            .map(|i| {
                let oid = unsafe { ptr::read_unaligned(usage.rgpszUsageIdentifier.add(i)) };
                unsafe { oid.to_string() }.map_err(|e| {
                    ProbeError::property_query("enhanced key usage", format!("bad OID string: {}", e))
                })
            })
            .collect()
    }

    fn decode_key_provider_info(&self, buffer: &[u8]) -> Result<KeyProviderInfo> {
        let property = PropertyId::KeyProviderInfo.name();
        if buffer.len() < mem::size_of::<CRYPT_KEY_PROV_INFO>() {
            return Err(ProbeError::property_query(property, "buffer is truncated"));
        }

        let info = unsafe { ptr::read_unaligned(buffer.as_ptr() as *const CRYPT_KEY_PROV_INFO) };
        let read = |s: windows::core::PWSTR| -> Result<String> {
            if s.is_null() {
                return Ok(String::new());
            }
            unsafe { PCWSTR(s.0).to_string() }
                .map_err(|e| ProbeError::property_query(property, format!("bad string: {}", e)))
        };

        Ok(KeyProviderInfo {
            provider_name: read(info.pwszProvName)?,
            container_name: read(info.pwszContainerName)?,
            provider_type: ProviderType::from_raw(info.dwProvType),
            key_spec: info.dwKeySpec,
        })
    }
}
