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

//! In-process certificate store and key storage.
//!
//! This backend implements every platform trait without touching the
//! operating system. Certificates are either described directly through
//! [`MemoryCertificateBuilder`] or parsed from DER. Every handle the backend
//! hands out is counted in a [`HandleLedger`], so tests can assert that a
//! walk or a key check left nothing open.
//!
//! On non-Windows hosts this is also the backend the binary runs against,
//! in which case the stores are empty.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use der::Decode;
use sha1::{Digest, Sha1};
use x509_cert::ext::pkix::ExtendedKeyUsage;
use x509_cert::name::Name;
use x509_cert::Certificate;

use crate::config::ClientIdentity;
use crate::error::{PlatformStatus, ProbeError, Result};
use crate::expiry::{FileTime, ValidityWindow, SECONDS_PER_DAY};
use crate::keys::KeyStorage;
use crate::properties::{EncodingType, KeyProviderInfo, PropertyId, ProviderType, Thumbprint};
use crate::selector::{CertificateQuery, ClientCertificate, QueryFilter};
use crate::store::{CertificateRecord, CertificateStore, StoreLocation, StoreProvider};

/// Kind of handle tracked by a [`HandleLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Opened certificate store.
    Store,
    /// Certificate record produced by a store walk.
    Record,
    /// Key storage provider.
    Provider,
    /// Key handle.
    Key,
}

impl HandleKind {
    /// Lowercase name used in release traces.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Record => "record",
            Self::Provider => "provider",
            Self::Key => "key",
        }
    }
}

#[derive(Debug, Default)]
struct Counter {
    opened: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Debug, Default)]
struct LedgerState {
    stores: Counter,
    records: Counter,
    providers: Counter,
    keys: Counter,
    releases: Mutex<Vec<HandleKind>>,
}

/// Counts handles opened and released by the in-memory backend.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct HandleLedger {
    state: Arc<LedgerState>,
}

impl HandleLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: HandleKind) -> &Counter {
        match kind {
            HandleKind::Store => &self.state.stores,
            HandleKind::Record => &self.state.records,
            HandleKind::Provider => &self.state.providers,
            HandleKind::Key => &self.state.keys,
        }
    }

    fn acquire(&self, kind: HandleKind) -> HandleGuard {
        self.counter(kind).opened.fetch_add(1, Ordering::SeqCst);
        HandleGuard {
            ledger: self.clone(),
            kind,
        }
    }

    fn release(&self, kind: HandleKind) {
        self.counter(kind).released.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.releases).push(kind);
    }

    /// Total handles of `kind` ever opened.
    pub fn opened(&self, kind: HandleKind) -> usize {
        self.counter(kind).opened.load(Ordering::SeqCst)
    }

    /// Total handles of `kind` ever released.
    pub fn released(&self, kind: HandleKind) -> usize {
        self.counter(kind).released.load(Ordering::SeqCst)
    }

    /// Handles of `kind` currently open.
    pub fn open(&self, kind: HandleKind) -> usize {
        self.opened(kind).saturating_sub(self.released(kind))
    }

    /// Stores currently open.
    pub fn open_stores(&self) -> usize {
        self.open(HandleKind::Store)
    }

    /// Records currently open.
    pub fn open_records(&self) -> usize {
        self.open(HandleKind::Record)
    }

    /// Providers currently open.
    pub fn open_providers(&self) -> usize {
        self.open(HandleKind::Provider)
    }

    /// Keys currently open.
    pub fn open_keys(&self) -> usize {
        self.open(HandleKind::Key)
    }

    /// Returns true if every handle opened so far was released exactly once.
    pub fn is_balanced(&self) -> bool {
        [
            HandleKind::Store,
            HandleKind::Record,
            HandleKind::Provider,
            HandleKind::Key,
        ]
        .into_iter()
        .all(|kind| self.opened(kind) == self.released(kind))
    }

    /// Kinds of handles in the order they were released.
    pub fn release_order(&self) -> Vec<&'static str> {
        lock(&self.state.releases)
            .iter()
            .map(|kind| kind.as_str())
            .collect()
    }
}

/// Releases one ledger entry when dropped.
struct HandleGuard {
    ledger: HandleLedger,
    kind: HandleKind,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.ledger.release(self.kind);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Certificates
// ============================================================================

#[derive(Debug)]
struct CertificateData {
    subject: String,
    validity: ValidityWindow,
    encoding: EncodingType,
    der: Vec<u8>,
    thumbprint: Option<Vec<u8>>,
    enhanced_key_usages: Option<Vec<String>>,
    key: Option<KeyProviderInfo>,
    private_key_pem: Option<String>,
    property_faults: HashMap<PropertyId, PlatformStatus>,
    eku_fault: Option<PlatformStatus>,
    size_drift: Vec<PropertyId>,
}

/// A certificate held by the in-memory backend.
///
/// Cheap to clone; clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryCertificate {
    data: Arc<CertificateData>,
}

impl MemoryCertificate {
    /// Start describing a certificate with the given subject display name.
    pub fn builder(subject: impl Into<String>) -> MemoryCertificateBuilder {
        MemoryCertificateBuilder::new(subject)
    }

    /// Subject display name.
    pub fn subject(&self) -> &str {
        &self.data.subject
    }

    /// DER encoding, empty for certificates described without one.
    pub fn der(&self) -> &[u8] {
        &self.data.der
    }

    /// Thumbprint, if the certificate carries one.
    pub fn thumbprint(&self) -> Option<Thumbprint> {
        self.data.thumbprint.clone().map(Thumbprint::new)
    }

    /// Extended key usages as stored, `None` if the extension is absent.
    pub fn enhanced_key_usages(&self) -> Option<&[String]> {
        self.data.enhanced_key_usages.as_deref()
    }

    /// A record for this certificate that is not tied to any store.
    pub fn detached_record(&self) -> MemoryRecord {
        MemoryRecord {
            certificate: self.clone(),
            _guard: HandleLedger::new().acquire(HandleKind::Record),
        }
    }

    fn to_client_certificate(&self, location: StoreLocation, store_name: &str) -> ClientCertificate {
        ClientCertificate {
            subject: self.data.subject.clone(),
            thumbprint: self.thumbprint(),
            der: self.data.der.clone(),
            location,
            store_name: store_name.to_string(),
        }
    }

    fn is(&self, certificate: &ClientCertificate) -> bool {
        match (&certificate.thumbprint, &self.data.thumbprint) {
            (Some(wanted), Some(ours)) => wanted.as_bytes() == ours.as_slice(),
            _ => !certificate.der.is_empty() && certificate.der == self.data.der,
        }
    }
}

/// Builder for [`MemoryCertificate`].
#[derive(Debug)]
pub struct MemoryCertificateBuilder {
    subject: String,
    validity: ValidityWindow,
    encoding: EncodingType,
    der: Vec<u8>,
    thumbprint: Option<Vec<u8>>,
    derive_thumbprint: bool,
    enhanced_key_usages: Option<Vec<String>>,
    key: Option<KeyProviderInfo>,
    private_key_pem: Option<String>,
    property_faults: HashMap<PropertyId, PlatformStatus>,
    eku_fault: Option<PlatformStatus>,
    size_drift: Vec<PropertyId>,
}

impl MemoryCertificateBuilder {
    /// Describe a certificate valid from one day ago for a year.
    ///
    /// Without an explicit thumbprint the SHA-1 of the DER encoding is used,
    /// or of the subject when there is no encoding.
    pub fn new(subject: impl Into<String>) -> Self {
        let now = FileTime::now();
        Self {
            subject: subject.into(),
            validity: ValidityWindow::new(
                now.saturating_sub_seconds(SECONDS_PER_DAY),
                now.saturating_add_days(365),
            ),
            encoding: EncodingType::DEFAULT,
            der: Vec::new(),
            thumbprint: None,
            derive_thumbprint: true,
            enhanced_key_usages: None,
            key: None,
            private_key_pem: None,
            property_faults: HashMap::new(),
            eku_fault: None,
            size_drift: Vec::new(),
        }
    }

    /// Parse subject, validity and extended key usages from a DER certificate.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::CertificateParsing`] if the DER is malformed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = Certificate::from_der(der).map_err(|e| {
            ProbeError::certificate_parsing(format!("Failed to decode certificate: {}", e))
        })?;
        let tbs = &cert.tbs_certificate;

        let validity = ValidityWindow::new(
            FileTime::from_unix_seconds(tbs.validity.not_before.to_unix_duration().as_secs() as i64),
            FileTime::from_unix_seconds(tbs.validity.not_after.to_unix_duration().as_secs() as i64),
        );

        let mut enhanced_key_usages = None;
        for ext in tbs.extensions.iter().flatten() {
            if ext.extn_id == const_oid::db::rfc5280::ID_CE_EXT_KEY_USAGE {
                let eku = ExtendedKeyUsage::from_der(ext.extn_value.as_bytes()).map_err(|e| {
                    ProbeError::certificate_parsing(format!("Invalid EKU extension: {}", e))
                })?;
                enhanced_key_usages = Some(eku.0.iter().map(|oid| oid.to_string()).collect());
            }
        }

        let mut builder = Self::new(simple_name(&tbs.subject));
        builder.validity = validity;
        builder.der = der.to_vec();
        builder.enhanced_key_usages = enhanced_key_usages;
        Ok(builder)
    }

    /// Set the validity window.
    pub fn validity(mut self, not_before: FileTime, not_after: FileTime) -> Self {
        self.validity = ValidityWindow::new(not_before, not_after);
        self
    }

    /// Set the end of the validity window.
    pub fn not_after(mut self, not_after: FileTime) -> Self {
        self.validity.not_after = not_after;
        self
    }

    /// Use an explicit thumbprint.
    pub fn thumbprint(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.thumbprint = Some(bytes.into());
        self.derive_thumbprint = false;
        self
    }

    /// Leave the hash property unset.
    pub fn without_thumbprint(mut self) -> Self {
        self.thumbprint = None;
        self.derive_thumbprint = false;
        self
    }

    /// Set the extended key usage list. An empty iterator models an EKU
    /// extension that lists nothing.
    pub fn enhanced_key_usages<I, S>(mut self, oids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enhanced_key_usages = Some(oids.into_iter().map(Into::into).collect());
        self
    }

    /// Associate a CNG key.
    pub fn cng_key(mut self, provider: impl Into<String>, container: impl Into<String>) -> Self {
        self.key = Some(KeyProviderInfo {
            provider_name: provider.into(),
            container_name: container.into(),
            provider_type: ProviderType::Cng,
            key_spec: 0,
        });
        self
    }

    /// Associate a legacy CryptoAPI key.
    pub fn legacy_key(
        mut self,
        provider: impl Into<String>,
        container: impl Into<String>,
        provider_type: u32,
        key_spec: u32,
    ) -> Self {
        self.key = Some(KeyProviderInfo {
            provider_name: provider.into(),
            container_name: container.into(),
            provider_type: ProviderType::from_raw(provider_type),
            key_spec,
        });
        self
    }

    /// PEM private key used as the TLS client identity.
    pub fn private_key_pem(mut self, pem: impl Into<String>) -> Self {
        self.private_key_pem = Some(pem.into());
        self
    }

    /// Make queries for `property` fail with `status`.
    pub fn property_fault(mut self, property: PropertyId, status: PlatformStatus) -> Self {
        self.property_faults.insert(property, status);
        self
    }

    /// Make the enhanced key usage query fail with `status`.
    pub fn enhanced_key_usage_fault(mut self, status: PlatformStatus) -> Self {
        self.eku_fault = Some(status);
        self
    }

    /// Make `property` grow between the size query and the data query.
    pub fn property_size_drift(mut self, property: PropertyId) -> Self {
        self.size_drift.push(property);
        self
    }

    /// Finish the certificate.
    pub fn build(self) -> MemoryCertificate {
        let thumbprint = if self.derive_thumbprint {
            let digest = if self.der.is_empty() {
                Sha1::digest(self.subject.as_bytes())
            } else {
                Sha1::digest(&self.der)
            };
            Some(digest.to_vec())
        } else {
            self.thumbprint
        };

        MemoryCertificate {
            data: Arc::new(CertificateData {
                subject: self.subject,
                validity: self.validity,
                encoding: self.encoding,
                der: self.der,
                thumbprint,
                enhanced_key_usages: self.enhanced_key_usages,
                key: self.key,
                private_key_pem: self.private_key_pem,
                property_faults: self.property_faults,
                eku_fault: self.eku_fault,
                size_drift: self.size_drift,
            }),
        }
    }
}

/// Render a distinguished name as its attribute values joined by ", ".
fn simple_name(name: &Name) -> String {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .map(|atv| {
            let rendered = atv.to_string();
            match rendered.split_once('=') {
                Some((_, value)) => value.to_string(),
                None => rendered,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// Property buffers: little-endian u32 fields and length-prefixed UTF-8.

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn encode_key_provider_info(info: &KeyProviderInfo) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&info.provider_type.raw().to_le_bytes());
    out.extend_from_slice(&info.key_spec.to_le_bytes());
    push_str(&mut out, &info.provider_name);
    push_str(&mut out, &info.container_name);
    out
}

fn encode_enhanced_key_usages(oids: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(oids.len() as u32).to_le_bytes());
    for oid in oids {
        push_str(&mut out, oid);
    }
    out
}

struct Reader<'a> {
    property: &'static str,
    buffer: &'a [u8],
}

impl<'a> Reader<'a> {
    fn truncated(&self) -> ProbeError {
        ProbeError::property_query(self.property, "truncated buffer")
    }

    fn u32(&mut self) -> Result<u32> {
        let buffer = self.buffer;
        let (head, rest) = buffer
            .split_first_chunk::<4>()
            .ok_or_else(|| self.truncated())?;
        self.buffer = rest;
        Ok(u32::from_le_bytes(*head))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let buffer = self.buffer;
        if buffer.len() < len {
            return Err(self.truncated());
        }
        let (head, rest) = buffer.split_at(len);
        self.buffer = rest;
        String::from_utf8(head.to_vec())
            .map_err(|_| ProbeError::property_query(self.property, "invalid UTF-8"))
    }
}

/// Copy `payload` into the caller's buffer following the sized-query protocol.
fn fill(
    payload: &[u8],
    buffer: Option<&mut [u8]>,
    len: &mut u32,
    drift: bool,
) -> std::result::Result<(), PlatformStatus> {
    let required = payload.len() as u32;
    match buffer {
        None => {
            *len = required;
            Ok(())
        }
        Some(_) if drift => {
            *len = required + 8;
            Err(PlatformStatus::MORE_DATA)
        }
        Some(buf) if buf.len() < payload.len() => {
            *len = required;
            Err(PlatformStatus::MORE_DATA)
        }
        Some(buf) => {
            buf[..payload.len()].copy_from_slice(payload);
            *len = required;
            Ok(())
        }
    }
}

/// A certificate record produced by a [`MemoryStore`] walk.
pub struct MemoryRecord {
    certificate: MemoryCertificate,
    _guard: HandleGuard,
}

impl MemoryRecord {
    /// The certificate behind this record.
    pub fn certificate(&self) -> &MemoryCertificate {
        &self.certificate
    }
}

impl fmt::Debug for MemoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecord")
            .field("subject", &self.certificate.data.subject)
            .finish()
    }
}

impl CertificateRecord for MemoryRecord {
    fn encoding_type(&self) -> EncodingType {
        self.certificate.data.encoding
    }

    fn subject_name(&self) -> std::result::Result<String, PlatformStatus> {
        Ok(self.certificate.data.subject.clone())
    }

    fn validity(&self) -> ValidityWindow {
        self.certificate.data.validity
    }

    fn query_property(
        &self,
        id: PropertyId,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<(), PlatformStatus> {
        let data = &self.certificate.data;
        if let Some(status) = data.property_faults.get(&id) {
            return Err(*status);
        }

        let payload = match id {
            PropertyId::Hash => data.thumbprint.clone(),
            PropertyId::KeyProviderInfo => data.key.as_ref().map(encode_key_provider_info),
        }
        .ok_or(PlatformStatus::NOT_FOUND)?;

        fill(&payload, buffer, len, data.size_drift.contains(&id))
    }

    // Flags are accepted and not interpreted.
    fn query_enhanced_key_usage(
        &self,
        _flags: u32,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<(), PlatformStatus> {
        let data = &self.certificate.data;
        if let Some(status) = data.eku_fault {
            return Err(status);
        }
        let oids = data
            .enhanced_key_usages
            .as_ref()
            .ok_or(PlatformStatus::NOT_FOUND)?;
        fill(&encode_enhanced_key_usages(oids), buffer, len, false)
    }

    fn decode_enhanced_key_usage(&self, buffer: &[u8]) -> Result<Vec<String>> {
        let mut reader = Reader {
            property: "enhanced key usage",
            buffer,
        };
        let count = reader.u32()?;
        (0..count).map(|_| reader.string()).collect()
    }

    fn decode_key_provider_info(&self, buffer: &[u8]) -> Result<KeyProviderInfo> {
        let mut reader = Reader {
            property: PropertyId::KeyProviderInfo.name(),
            buffer,
        };
        let provider_type = ProviderType::from_raw(reader.u32()?);
        let key_spec = reader.u32()?;
        let provider_name = reader.string()?;
        let container_name = reader.string()?;
        Ok(KeyProviderInfo {
            provider_name,
            container_name,
            provider_type,
            key_spec,
        })
    }
}

// ============================================================================
// Stores
// ============================================================================

/// An opened in-memory store. Holds a snapshot of the certificates present
/// when it was opened.
pub struct MemoryStore {
    certificates: Vec<MemoryCertificate>,
    position: usize,
    ledger: HandleLedger,
    _guard: HandleGuard,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("certificates", &self.certificates.len())
            .field("position", &self.position)
            .finish()
    }
}

impl CertificateStore for MemoryStore {
    type Record = MemoryRecord;

    fn next_record(&mut self, previous: Option<MemoryRecord>) -> Option<MemoryRecord> {
        drop(previous);
        let certificate = self.certificates.get(self.position)?.clone();
        self.position += 1;
        Some(MemoryRecord {
            certificate,
            _guard: self.ledger.acquire(HandleKind::Record),
        })
    }
}

#[derive(Debug, Default)]
struct StoreEntry {
    certificates: Vec<MemoryCertificate>,
    fault: Option<PlatformStatus>,
}

type StoreKey = (StoreLocation, String);

fn store_key(location: StoreLocation, name: &str) -> StoreKey {
    (location, name.to_ascii_lowercase())
}

// ============================================================================
// Keys
// ============================================================================

/// One recorded call to [`KeyStorage::open_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpen {
    /// Provider the key was opened in.
    pub provider: String,
    /// Key container name.
    pub key_name: String,
    /// Legacy key specifier passed through.
    pub key_spec: u32,
    /// Open flags.
    pub flags: u32,
}

#[derive(Debug, Default)]
struct ProviderEntry {
    fault: Option<PlatformStatus>,
    keys: HashMap<String, Option<PlatformStatus>>,
}

#[derive(Debug, Default)]
struct KeyState {
    providers: HashMap<String, ProviderEntry>,
    opens: Vec<KeyOpen>,
}

/// In-memory key storage providers.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStorage {
    state: Arc<Mutex<KeyState>>,
    ledger: HandleLedger,
}

/// Open provider handle from [`MemoryKeyStorage`].
pub struct MemoryProviderHandle {
    name: String,
    _guard: HandleGuard,
}

/// Open key handle from [`MemoryKeyStorage`].
pub struct MemoryKeyHandle {
    _guard: HandleGuard,
}

impl MemoryKeyStorage {
    /// Create key storage with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_ledger(ledger: HandleLedger) -> Self {
        Self {
            state: Arc::default(),
            ledger,
        }
    }

    /// Register a provider with no keys.
    pub fn add_provider(&self, provider: &str) {
        lock(&self.state)
            .providers
            .entry(provider.to_string())
            .or_default();
    }

    /// Register a key, creating its provider if needed.
    pub fn add_key(&self, provider: &str, key_name: &str) {
        lock(&self.state)
            .providers
            .entry(provider.to_string())
            .or_default()
            .keys
            .insert(key_name.to_string(), None);
    }

    /// Make opening the provider fail with `status`.
    pub fn fail_provider(&self, provider: &str, status: PlatformStatus) {
        lock(&self.state)
            .providers
            .entry(provider.to_string())
            .or_default()
            .fault = Some(status);
    }

    /// Make opening an existing key fail with `status`.
    pub fn fail_key(&self, provider: &str, key_name: &str, status: PlatformStatus) {
        lock(&self.state)
            .providers
            .entry(provider.to_string())
            .or_default()
            .keys
            .insert(key_name.to_string(), Some(status));
    }

    /// Every key open attempted so far.
    pub fn key_opens(&self) -> Vec<KeyOpen> {
        lock(&self.state).opens.clone()
    }

    /// Handle ledger.
    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }
}

impl KeyStorage for MemoryKeyStorage {
    type Provider = MemoryProviderHandle;
    type Key = MemoryKeyHandle;

    fn open_provider(&self, name: &str) -> std::result::Result<MemoryProviderHandle, PlatformStatus> {
        let state = lock(&self.state);
        let entry = state
            .providers
            .get(name)
            .ok_or(PlatformStatus::PROVIDER_NOT_FOUND)?;
        if let Some(status) = entry.fault {
            return Err(status);
        }
        Ok(MemoryProviderHandle {
            name: name.to_string(),
            _guard: self.ledger.acquire(HandleKind::Provider),
        })
    }

    fn open_key(
        &self,
        provider: &MemoryProviderHandle,
        key_name: &str,
        key_spec: u32,
        flags: u32,
    ) -> std::result::Result<MemoryKeyHandle, PlatformStatus> {
        let mut state = lock(&self.state);
        state.opens.push(KeyOpen {
            provider: provider.name.clone(),
            key_name: key_name.to_string(),
            key_spec,
            flags,
        });

        let outcome = state
            .providers
            .get(&provider.name)
            .and_then(|entry| entry.keys.get(key_name));
        match outcome {
            None => Err(PlatformStatus::BAD_KEYSET),
            Some(Some(status)) => Err(*status),
            Some(None) => Ok(MemoryKeyHandle {
                _guard: self.ledger.acquire(HandleKind::Key),
            }),
        }
    }
}

// ============================================================================
// Platform
// ============================================================================

/// In-memory stand-in for the system certificate stores and key storage.
///
/// Clones share the same stores, keys and ledger.
#[derive(Debug, Clone)]
pub struct MemoryPlatform {
    stores: Arc<Mutex<HashMap<StoreKey, StoreEntry>>>,
    keys: MemoryKeyStorage,
    ledger: HandleLedger,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// Create a platform with no stores.
    pub fn new() -> Self {
        let ledger = HandleLedger::new();
        Self {
            stores: Arc::default(),
            keys: MemoryKeyStorage::with_ledger(ledger.clone()),
            ledger,
        }
    }

    /// Create an empty store. Store names are case-insensitive.
    pub fn create_store(&self, location: StoreLocation, name: &str) {
        lock(&self.stores)
            .entry(store_key(location, name))
            .or_default();
    }

    /// Append a certificate to a store, creating the store if needed.
    pub fn add_certificate(&self, location: StoreLocation, name: &str, certificate: MemoryCertificate) {
        lock(&self.stores)
            .entry(store_key(location, name))
            .or_default()
            .certificates
            .push(certificate);
    }

    /// Make opening a store fail with `status`.
    pub fn fail_store(&self, location: StoreLocation, name: &str, status: PlatformStatus) {
        lock(&self.stores)
            .entry(store_key(location, name))
            .or_default()
            .fault = Some(status);
    }

    /// Key storage shared with this platform.
    pub fn keys(&self) -> &MemoryKeyStorage {
        &self.keys
    }

    /// Register a key in the platform's key storage.
    pub fn add_key(&self, provider: &str, key_name: &str) {
        self.keys.add_key(provider, key_name);
    }

    /// Handle ledger shared by stores, records, providers and keys.
    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }
}

impl StoreProvider for MemoryPlatform {
    type Store = MemoryStore;

    fn open_store(&self, location: StoreLocation, name: &str) -> Result<MemoryStore> {
        let stores = lock(&self.stores);
        let entry = stores.get(&store_key(location, name)).ok_or_else(|| {
            ProbeError::store_unavailable(location, name, PlatformStatus::FILE_NOT_FOUND)
        })?;
        if let Some(status) = entry.fault {
            return Err(ProbeError::store_unavailable(location, name, status));
        }

        Ok(MemoryStore {
            certificates: entry.certificates.clone(),
            position: 0,
            ledger: self.ledger.clone(),
            _guard: self.ledger.acquire(HandleKind::Store),
        })
    }
}

impl KeyStorage for MemoryPlatform {
    type Provider = MemoryProviderHandle;
    type Key = MemoryKeyHandle;

    fn open_provider(&self, name: &str) -> std::result::Result<MemoryProviderHandle, PlatformStatus> {
        self.keys.open_provider(name)
    }

    fn open_key(
        &self,
        provider: &MemoryProviderHandle,
        key_name: &str,
        key_spec: u32,
        flags: u32,
    ) -> std::result::Result<MemoryKeyHandle, PlatformStatus> {
        self.keys.open_key(provider, key_name, key_spec, flags)
    }
}

impl CertificateQuery for MemoryPlatform {
    fn find_all(&self, filter: &QueryFilter) -> Result<Vec<ClientCertificate>> {
        let stores = lock(&self.stores);
        let Some(entry) = stores.get(&store_key(filter.location, &filter.store_name)) else {
            return Ok(Vec::new());
        };
        if let Some(status) = entry.fault {
            return Err(ProbeError::store_unavailable(
                filter.location,
                &filter.store_name,
                status,
            ));
        }

        Ok(entry
            .certificates
            .iter()
            .filter(|cert| filter.matches(cert.enhanced_key_usages().unwrap_or_default()))
            .map(|cert| cert.to_client_certificate(filter.location, &filter.store_name))
            .collect())
    }

    fn client_identity(&self, certificate: &ClientCertificate) -> Result<ClientIdentity> {
        let stores = lock(&self.stores);
        let found = stores
            .values()
            .flat_map(|entry| entry.certificates.iter())
            .find(|cert| cert.is(certificate))
            .ok_or_else(|| {
                ProbeError::tls(format!("Certificate '{}' is no longer present", certificate.subject))
            })?;

        if found.data.der.is_empty() {
            return Err(ProbeError::tls(format!(
                "Certificate '{}' has no encoded form",
                found.data.subject
            )));
        }
        let key_pem = found.data.private_key_pem.as_ref().ok_or_else(|| {
            ProbeError::tls(format!(
                "Private key for '{}' is not exportable",
                found.data.subject
            ))
        })?;

        Ok(ClientIdentity::new(
            crate::tls::pem_encode("CERTIFICATE", &found.data.der),
            key_pem.as_bytes(),
        ))
    }
}
