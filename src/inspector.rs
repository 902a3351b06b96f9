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

//! Per-certificate inspection.
//!
//! For every record in a store the inspector reads the subject and validity,
//! stops early for certificates about to expire, and otherwise reports the
//! thumbprint, the extended key usages and the state of the associated
//! private key. CNG keys are opened silently to prove they are reachable.
//!
//! Reports are handed to a sink as soon as each record is done, so output
//! for earlier certificates is visible even if a later one aborts the walk.

use std::fmt;

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::expiry::{will_expire_within, FileTime};
use crate::keys::{verify_accessible, KeyStorage};
use crate::properties::{self, CertificateInfo, Thumbprint};
use crate::store::{CertStoreWalker, CertificateRecord, CertificateStore};

/// Default look-ahead for the expiry check, in days.
pub const DEFAULT_EXPIRY_HORIZON_DAYS: u32 = 31;

/// State of the private key behind a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    /// The certificate has no key provider info.
    NoProvider,
    /// The key lives in a legacy CryptoAPI provider and was not opened.
    NotCng {
        /// Provider name.
        provider: String,
        /// Container name.
        container: String,
    },
    /// The CNG key was opened and released.
    Accessible {
        /// Provider name.
        provider: String,
        /// Container name.
        container: String,
    },
    /// The CNG provider reports no such key.
    NotFound {
        /// Provider name.
        provider: String,
        /// Container name.
        container: String,
    },
}

impl KeyStatus {
    fn location(&self) -> Option<(&str, &str)> {
        match self {
            Self::NoProvider => None,
            Self::NotCng {
                provider,
                container,
            }
            | Self::Accessible {
                provider,
                container,
            }
            | Self::NotFound {
                provider,
                container,
            } => Some((provider, container)),
        }
    }
}

/// Result of inspecting one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateReport {
    /// Subject display name.
    pub subject: String,
    /// The certificate expires within the horizon; nothing else was checked.
    pub expiring: bool,
    /// Horizon the expiry check used.
    pub horizon_days: u32,
    /// Thumbprint, if present.
    pub thumbprint: Option<Thumbprint>,
    /// Extended key usage OIDs.
    pub enhanced_key_usages: Vec<String>,
    /// Private key state.
    pub key: KeyStatus,
}

impl fmt::Display for CertificateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cert: {}", self.subject)?;
        if self.expiring {
            return write!(f, "\n  Cert will expire within {} days.", self.horizon_days);
        }

        match &self.thumbprint {
            Some(thumbprint) => write!(f, "\n  Thumbprint: {}", thumbprint)?,
            None => write!(f, "\n  Thumbprint: (none)")?,
        }
        for oid in &self.enhanced_key_usages {
            write!(f, "\n  EKU: {}", oid)?;
        }

        if let Some((provider, container)) = self.key.location() {
            write!(f, "\n  Provider: {}\n  Container: {}", provider, container)?;
        }
        match self.key {
            KeyStatus::NoProvider => Ok(()),
            KeyStatus::NotCng { .. } => write!(f, "\n  Not a CNG type key"),
            KeyStatus::Accessible { .. } => write!(f, "\n  CNG key access succeeded"),
            KeyStatus::NotFound { .. } => write!(f, "\n  CNG key not found"),
        }
    }
}

/// Counts for one inspection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InspectionSummary {
    /// Records inspected.
    pub inspected: usize,
    /// Records expiring within the horizon.
    pub expiring: usize,
    /// CNG keys opened successfully.
    pub verified: usize,
    /// CNG keys not found.
    pub missing_key: usize,
    /// Keys in legacy providers.
    pub legacy: usize,
    /// Certificates without key provider info.
    pub no_provider: usize,
}

impl InspectionSummary {
    fn record(&mut self, report: &CertificateReport) {
        self.inspected += 1;
        if report.expiring {
            self.expiring += 1;
            return;
        }
        match report.key {
            KeyStatus::NoProvider => self.no_provider += 1,
            KeyStatus::NotCng { .. } => self.legacy += 1,
            KeyStatus::Accessible { .. } => self.verified += 1,
            KeyStatus::NotFound { .. } => self.missing_key += 1,
        }
    }
}

/// Walks a certificate store and reports on each certificate.
#[derive(Debug)]
pub struct CertificateInspector<'k, K: ?Sized> {
    keys: &'k K,
    horizon_days: u32,
    eku_flags: u32,
    reference_time: Option<FileTime>,
}

impl<'k, K: KeyStorage + ?Sized> CertificateInspector<'k, K> {
    /// Create an inspector that opens keys through `keys`.
    pub fn new(keys: &'k K) -> Self {
        Self {
            keys,
            horizon_days: DEFAULT_EXPIRY_HORIZON_DAYS,
            eku_flags: 0,
            reference_time: None,
        }
    }

    /// Create an inspector using the horizon and EKU flags from `config`.
    pub fn from_config(keys: &'k K, config: &ProbeConfig) -> Self {
        Self::new(keys)
            .with_horizon_days(config.expiry_horizon_days)
            .with_eku_flags(config.eku_flags)
    }

    /// Set the expiry horizon in days.
    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    /// Set the flags passed to the EKU query.
    pub fn with_eku_flags(mut self, flags: u32) -> Self {
        self.eku_flags = flags;
        self
    }

    /// Use a fixed reference time instead of the current time.
    pub fn with_reference_time(mut self, at: FileTime) -> Self {
        self.reference_time = Some(at);
        self
    }

    /// Inspect a single record.
    ///
    /// A missing CNG key is reported in the result; every other failure is
    /// returned as an error. Once the subject is known, errors carry it as
    /// [`ProbeError::InRecord`].
    pub fn inspect_record<R>(&self, record: &R) -> Result<CertificateReport>
    where
        R: CertificateRecord + ?Sized,
    {
        let info = properties::certificate_info(record)?;
        let subject = info.subject.clone();
        self.inspect_details(record, info)
            .map_err(|e| ProbeError::in_record(subject, e))
    }

    fn inspect_details<R>(&self, record: &R, info: CertificateInfo) -> Result<CertificateReport>
    where
        R: CertificateRecord + ?Sized,
    {
        let reference = self.reference_time.unwrap_or_else(FileTime::now);

        let mut report = CertificateReport {
            subject: info.subject,
            expiring: false,
            horizon_days: self.horizon_days,
            thumbprint: None,
            enhanced_key_usages: Vec::new(),
            key: KeyStatus::NoProvider,
        };

        if will_expire_within(&info.validity, reference, self.horizon_days) {
            tracing::debug!("'{}' expires within {} days", report.subject, self.horizon_days);
            report.expiring = true;
            return Ok(report);
        }

        report.thumbprint = properties::thumbprint(record)?;
        report.enhanced_key_usages = properties::enhanced_key_usages(record, self.eku_flags)?;

        let Some(info) = properties::key_provider_info(record)? else {
            return Ok(report);
        };

        if !info.is_cng() {
            report.key = KeyStatus::NotCng {
                provider: info.provider_name,
                container: info.container_name,
            };
            return Ok(report);
        }

        report.key = match verify_accessible(
            self.keys,
            &info.provider_name,
            &info.container_name,
            info.key_spec,
        ) {
            Ok(()) => KeyStatus::Accessible {
                provider: info.provider_name,
                container: info.container_name,
            },
            Err(e) if !e.is_fatal() => {
                tracing::warn!("'{}': {}", report.subject, e);
                KeyStatus::NotFound {
                    provider: info.provider_name,
                    container: info.container_name,
                }
            }
            Err(e) => return Err(e),
        };

        Ok(report)
    }

    /// Inspect every remaining record of `walker`, passing each report to
    /// `sink` as soon as it is complete.
    ///
    /// # Errors
    ///
    /// The first fatal error ends the walk and is returned. Reports already
    /// handed to the sink stay emitted.
    pub fn inspect<S, F>(
        &self,
        walker: &mut CertStoreWalker<S>,
        mut sink: F,
    ) -> Result<InspectionSummary>
    where
        S: CertificateStore,
        F: FnMut(&CertificateReport),
    {
        let mut summary = InspectionSummary::default();

        while let Some(record) = walker.next() {
            let report = self.inspect_record(record)?;
            summary.record(&report);
            sink(&report);
        }

        tracing::info!(
            "Inspected {} certificate(s) in {}\\{}: {} expiring, {} key(s) verified, {} missing",
            summary.inspected,
            walker.location(),
            walker.name(),
            summary.expiring,
            summary.verified,
            summary.missing_key
        );
        Ok(summary)
    }
}
