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

//! Typed certificate metadata.
//!
//! Platform property queries use a two-call protocol: ask for the size, then
//! ask again with a buffer. [`query_sized`] hides that protocol behind one
//! call returning an owned buffer, or `None` when the property is not set.
//! A size change between the two calls is treated as a failure rather than
//! retried.

use std::fmt;

use crate::error::{PlatformStatus, ProbeError, Result};
use crate::expiry::ValidityWindow;
use crate::store::CertificateRecord;

/// Well-known extended key usage OIDs.
pub mod oids {
    /// TLS Web Server Authentication.
    pub const SERVER_AUTH: &str = "1.3.6.1.5.5.7.3.1";
    /// TLS Web Client Authentication.
    pub const CLIENT_AUTH: &str = "1.3.6.1.5.5.7.3.2";
    /// Code Signing.
    pub const CODE_SIGNING: &str = "1.3.6.1.5.5.7.3.3";
    /// Email Protection.
    pub const EMAIL_PROTECTION: &str = "1.3.6.1.5.5.7.3.4";
    /// Smart Card Logon.
    pub const SMART_CARD_LOGON: &str = "1.3.6.1.4.1.311.20.2.2";
}

/// Certificate encoding type flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingType(pub u32);

impl EncodingType {
    /// `X509_ASN_ENCODING`.
    pub const X509_ASN: Self = Self(0x0000_0001);
    /// `PKCS_7_ASN_ENCODING`.
    pub const PKCS_7_ASN: Self = Self(0x0001_0000);
    /// The usual combination for certificates in system stores.
    pub const DEFAULT: Self = Self(Self::X509_ASN.0 | Self::PKCS_7_ASN.0);
}

/// Context property identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyId {
    /// `CERT_HASH_PROP_ID`: SHA-1 hash of the encoded certificate.
    Hash,
    /// `CERT_KEY_PROV_INFO_PROP_ID`: associated private key reference.
    KeyProviderInfo,
}

impl PropertyId {
    /// Numeric property id used by the platform API.
    pub fn raw(self) -> u32 {
        match self {
            Self::Hash => 3,
            Self::KeyProviderInfo => 2,
        }
    }

    /// Short name for error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::KeyProviderInfo => "key provider info",
        }
    }
}

/// Attributes read from a certificate record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject as a simple display name.
    pub subject: String,
    /// Validity window.
    pub validity: ValidityWindow,
    /// Encoding type of the certificate blob.
    pub encoding: EncodingType,
}

/// Certificate thumbprint (SHA-1 digest of the encoded certificate).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Thumbprint(Vec<u8>);

impl Thumbprint {
    /// Wrap raw digest bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse lowercase or uppercase hex, optionally separated by colons or spaces.
    pub fn from_hex(s: &str) -> Result<Self> {
        let clean = s.replace([':', ' ', '-'], "");
        if clean.is_empty() || clean.len() % 2 != 0 {
            return Err(ProbeError::certificate_parsing(format!(
                "Invalid thumbprint '{}': expected an even number of hex digits",
                s
            )));
        }
        hex::decode(&clean)
            .map(Self)
            .map_err(|e| ProbeError::certificate_parsing(format!("Invalid thumbprint: {}", e)))
    }

    /// Lowercase hex, two characters per byte.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes (20 for SHA-1).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the thumbprint holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Key provider model behind a certificate's private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    /// Cryptography Next Generation key storage provider (raw type 0).
    Cng,
    /// Legacy CryptoAPI provider with the given `PROV_*` type.
    Legacy(u32),
}

impl ProviderType {
    /// Classify a raw `dwProvType` value.
    pub fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            Self::Cng
        } else {
            Self::Legacy(raw)
        }
    }

    /// Raw `dwProvType` value.
    pub fn raw(self) -> u32 {
        match self {
            Self::Cng => 0,
            Self::Legacy(raw) => raw,
        }
    }
}

/// Reference to the private key associated with a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProviderInfo {
    /// Key storage provider name.
    pub provider_name: String,
    /// Key container name.
    pub container_name: String,
    /// Provider model.
    pub provider_type: ProviderType,
    /// Legacy key specifier (`AT_KEYEXCHANGE`, `AT_SIGNATURE`, or 0).
    pub key_spec: u32,
}

impl KeyProviderInfo {
    /// Returns true if the key lives in a CNG key storage provider.
    pub fn is_cng(&self) -> bool {
        self.provider_type == ProviderType::Cng
    }
}

/// Run a two-phase sized query.
///
/// `query` is called first without a buffer to learn the size, then with a
/// buffer of that size. Returns `Ok(None)` if the first call reports
/// [`PlatformStatus::NOT_FOUND`] or a zero size.
pub fn query_sized<F>(property: &'static str, mut query: F) -> Result<Option<Vec<u8>>>
where
    F: FnMut(Option<&mut [u8]>, &mut u32) -> std::result::Result<(), PlatformStatus>,
{
    let mut len = 0u32;
    match query(None, &mut len) {
        Ok(()) => {}
        Err(status) if status == PlatformStatus::NOT_FOUND => return Ok(None),
        Err(status) => {
            return Err(ProbeError::property_query(
                property,
                format!("size query failed with error {}", status),
            ))
        }
    }

    if len == 0 {
        return Ok(None);
    }

    let expected = len;
    let mut buffer = vec![0u8; expected as usize];
    query(Some(buffer.as_mut_slice()), &mut len).map_err(|status| {
        ProbeError::property_query(property, format!("data query failed with error {}", status))
    })?;

    if len != expected {
        return Err(ProbeError::property_query(
            property,
            format!("size changed between queries ({} -> {} bytes)", expected, len),
        ));
    }

    Ok(Some(buffer))
}

/// Read subject, validity and encoding from a record.
pub fn certificate_info<R: CertificateRecord + ?Sized>(record: &R) -> Result<CertificateInfo> {
    let subject = record
        .subject_name()
        .map_err(|status| ProbeError::property_query("subject", format!("error {}", status)))?;

    Ok(CertificateInfo {
        subject,
        validity: record.validity(),
        encoding: record.encoding_type(),
    })
}

/// Read the certificate thumbprint, or `None` if the property is not set.
pub fn thumbprint<R: CertificateRecord + ?Sized>(record: &R) -> Result<Option<Thumbprint>> {
    let id = PropertyId::Hash;
    Ok(query_sized(id.name(), |buf, len| record.query_property(id, buf, len))?.map(Thumbprint))
}

/// Read the extended key usage OIDs.
///
/// An empty list covers both "no EKU extension" and "EKU extension with no
/// usages"; the platform query does not tell them apart.
pub fn enhanced_key_usages<R: CertificateRecord + ?Sized>(
    record: &R,
    flags: u32,
) -> Result<Vec<String>> {
    match query_sized("enhanced key usage", |buf, len| {
        record.query_enhanced_key_usage(flags, buf, len)
    })? {
        Some(buffer) => record.decode_enhanced_key_usage(&buffer),
        None => Ok(Vec::new()),
    }
}

/// Read the key provider reference, or `None` if the certificate has no
/// associated private key.
pub fn key_provider_info<R: CertificateRecord + ?Sized>(
    record: &R,
) -> Result<Option<KeyProviderInfo>> {
    let id = PropertyId::KeyProviderInfo;
    match query_sized(id.name(), |buf, len| record.query_property(id, buf, len))? {
        Some(buffer) => record.decode_key_provider_info(&buffer).map(Some),
        None => Ok(None),
    }
}
