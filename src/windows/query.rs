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

//! Client-auth certificate search through `CertFindCertificateInStore`.
//!
//! The TLS identity for a selected certificate is a rustls-cng signing key,
//! so TPM, smart-card and non-exportable software keys sign the handshake
//! without leaving their provider.

use std::ffi::{c_void, CString};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls_cng::signer::CngSigningKey;
use rustls_cng::store::{CertStore, CertStoreType};
use windows::core::PSTR;
use windows::Win32::Security::Cryptography::{
    CertFindCertificateInStore, CERT_FIND_ENHKEY_USAGE, CERT_FIND_EXT_ONLY_ENHKEY_USAGE_FLAG,
    CERT_QUERY_ENCODING_TYPE, CTL_USAGE, PKCS_7_ASN_ENCODING, X509_ASN_ENCODING,
};

use super::certstore::{WindowsRecord, WindowsStore};
use super::WindowsPlatform;
use crate::config::ClientIdentity;
use crate::error::{PlatformStatus, ProbeError, Result};
use crate::properties::{certificate_info, thumbprint};
use crate::selector::{CertificateQuery, ClientCertificate, QueryFilter};
use crate::store::StoreLocation;

fn encoding() -> CERT_QUERY_ENCODING_TYPE {
    CERT_QUERY_ENCODING_TYPE(X509_ASN_ENCODING.0 | PKCS_7_ASN_ENCODING.0)
}

fn open_for_query(location: StoreLocation, name: &str) -> Result<Option<WindowsStore>> {
    match WindowsStore::open(location, name) {
        Ok(store) => Ok(Some(store)),
        Err(ProbeError::StoreUnavailable {
            status: PlatformStatus::FILE_NOT_FOUND,
            ..
        }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn to_client_certificate(record: &WindowsRecord, filter: &QueryFilter) -> Result<ClientCertificate> {
    Ok(ClientCertificate {
        subject: certificate_info(record)?.subject,
        thumbprint: thumbprint(record)?,
        der: record.der(),
        location: filter.location,
        store_name: filter.store_name.clone(),
    })
}

/// Walk `filter`'s store with `CERT_FIND_ENHKEY_USAGE`, handing each match to
/// `visit` until it returns false.
fn for_each_match<F>(filter: &QueryFilter, mut visit: F) -> Result<()>
where
    F: FnMut(&WindowsRecord) -> Result<bool>,
{
    let Some(store) = open_for_query(filter.location, &filter.store_name)? else {
        return Ok(());
    };

    let oids = filter
        .enhanced_key_usages
        .iter()
        .map(|oid| CString::new(oid.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProbeError::config(format!("Invalid OID: {}", e)))?;
    let mut identifiers: Vec<PSTR> = oids
        .iter()
        .map(|oid| PSTR(oid.as_ptr() as *mut u8))
        .collect();
    let usage = CTL_USAGE {
        cUsageIdentifier: identifiers.len() as u32,
        rgpszUsageIdentifier: identifiers.as_mut_ptr(),
    };

    let mut previous: Option<WindowsRecord> = None;
    loop {
        let context = unsafe {
            CertFindCertificateInStore(
                store.handle(),
                encoding(),
                CERT_FIND_EXT_ONLY_ENHKEY_USAGE_FLAG,
                CERT_FIND_ENHKEY_USAGE,
                Some(&usage as *const CTL_USAGE as *const c_void),
                previous.take().map(WindowsRecord::into_raw),
            )
        };
        let Some(record) = (unsafe { WindowsRecord::from_raw(context) }) else {
            return Ok(());
        };
        if !visit(&record)? {
            return Ok(());
        }
        previous = Some(record);
    }
}

fn store_type(location: StoreLocation) -> CertStoreType {
    match location {
        StoreLocation::CurrentUser => CertStoreType::CurrentUser,
        StoreLocation::LocalMachine => CertStoreType::LocalMachine,
    }
}

impl CertificateQuery for WindowsPlatform {
    fn find_all(&self, filter: &QueryFilter) -> Result<Vec<ClientCertificate>> {
        let mut found = Vec::new();
        for_each_match(filter, |record| {
            found.push(to_client_certificate(record, filter)?);
            Ok(true)
        })?;
        Ok(found)
    }

    fn first_match(&self, filter: &QueryFilter) -> Result<Option<ClientCertificate>> {
        let mut first = None;
        for_each_match(filter, |record| {
            first = Some(to_client_certificate(record, filter)?);
            Ok(false)
        })?;
        Ok(first)
    }

    fn client_identity(&self, certificate: &ClientCertificate) -> Result<ClientIdentity> {
        let subject = &certificate.subject;
        let thumb = certificate.thumbprint.as_ref().ok_or_else(|| {
            ProbeError::tls(format!("Certificate '{}' has no thumbprint", subject))
        })?;

        let store = CertStore::open(store_type(certificate.location), &certificate.store_name)
            .map_err(|e| {
                ProbeError::tls(format!(
                    "Failed to reopen {}\\{}: {}",
                    certificate.location, certificate.store_name, e
                ))
            })?;
        let context = store
            .find_by_sha1(thumb.as_bytes())
            .map_err(|e| ProbeError::tls(format!("Lookup of '{}' failed: {}", subject, e)))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProbeError::tls(format!("Certificate '{}' is no longer present", subject))
            })?;

        let key = context.acquire_key().map_err(|e| {
            ProbeError::tls(format!("Private key for '{}' is not usable: {}", subject, e))
        })?;
        let signing_key = CngSigningKey::new(key).map_err(|e| {
            ProbeError::tls(format!("Private key for '{}' cannot sign: {}", subject, e))
        })?;

        let chain = match context.as_chain_der() {
            Ok(chain) => chain.into_iter().map(CertificateDer::from).collect(),
            Err(e) => {
                tracing::debug!("No chain for '{}' ({}); sending the leaf only", subject, e);
                vec![CertificateDer::from(context.as_der().to_vec())]
            }
        };
        tracing::debug!("Client identity for '{}' has {} certificate(s)", subject, chain.len());

        Ok(ClientIdentity::Signer(Arc::new(CertifiedKey::new(
            chain,
            Arc::new(signing_key),
        ))))
    }
}
