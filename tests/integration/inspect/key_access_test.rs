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

//! Integration tests for the CNG key accessibility check

use crate::integration::{fixtures, STORE};
use cert_probe::inspector::CertificateInspector;
use cert_probe::keys::{providers, NCRYPT_SILENT_FLAG};
use cert_probe::memory::MemoryPlatform;
use cert_probe::store::{CertStoreWalker, StoreLocation};
use cert_probe::{CertificateReport, ErrorKind, KeyStatus, PlatformStatus};

fn inspect_all(platform: &MemoryPlatform) -> cert_probe::Result<Vec<CertificateReport>> {
    let mut walker = CertStoreWalker::open(platform, StoreLocation::CurrentUser, STORE)?;
    let mut reports = Vec::new();
    CertificateInspector::new(platform.keys())
        .inspect(&mut walker, |report| reports.push(report.clone()))?;
    Ok(reports)
}

#[test]
fn test_accessible_key_is_opened_silently_and_released() {
    let cert = fixtures::builder(&fixtures::client_auth("ok.example", 400))
        .cng_key(providers::SOFTWARE, "ok-key")
        .build();
    let platform = fixtures::platform_with([cert]);
    platform.add_key(providers::SOFTWARE, "ok-key");

    let reports = inspect_all(&platform).expect("Inspection should succeed");
    assert!(matches!(reports[0].key, KeyStatus::Accessible { .. }));

    let opens = platform.keys().key_opens();
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].key_name, "ok-key");
    assert_eq!(opens[0].flags & NCRYPT_SILENT_FLAG, NCRYPT_SILENT_FLAG);

    let ledger = platform.ledger();
    assert!(ledger.is_balanced());
    let order = ledger.release_order();
    let key_pos = order.iter().position(|k| *k == "key").expect("Key released");
    let provider_pos = order
        .iter()
        .position(|k| *k == "provider")
        .expect("Provider released");
    assert!(key_pos < provider_pos, "Key must be released before its provider");
}

#[test]
fn test_missing_key_is_reported_and_walk_continues() {
    let missing = fixtures::builder(&fixtures::client_auth("missing.example", 400))
        .cng_key(providers::SOFTWARE, "gone")
        .build();
    let next = fixtures::builder(&fixtures::client_auth("next.example", 400)).build();
    let platform = fixtures::platform_with([missing, next]);
    platform.keys().add_provider(providers::SOFTWARE);

    let reports = inspect_all(&platform).expect("Missing keys are not fatal");

    assert_eq!(reports.len(), 2);
    assert!(matches!(reports[0].key, KeyStatus::NotFound { .. }));
    assert!(reports[0].to_string().ends_with("  CNG key not found"));
    assert_eq!(reports[1].subject, "next.example");

    assert_eq!(platform.ledger().open_providers(), 0);
    assert_eq!(platform.ledger().open_keys(), 0);
    assert!(platform.ledger().is_balanced());
}

#[test]
fn test_legacy_provider_is_not_opened() {
    let cert = fixtures::builder(&fixtures::client_auth("legacy.example", 400))
        .legacy_key("Microsoft Enhanced RSA and AES Cryptographic Provider", "le-legacy", 24, 1)
        .build();
    let platform = fixtures::platform_with([cert]);

    let reports = inspect_all(&platform).expect("Inspection should succeed");
    let rendered = reports[0].to_string();

    assert!(rendered.contains("  Provider: Microsoft Enhanced RSA and AES Cryptographic Provider"));
    assert!(rendered.contains("  Container: le-legacy"));
    assert!(rendered.ends_with("  Not a CNG type key"));
    assert!(platform.keys().key_opens().is_empty());
    assert_eq!(platform.ledger().opened(cert_probe::memory::HandleKind::Provider), 0);
}

#[test]
fn test_certificate_without_key_has_no_provider_lines() {
    let cert = fixtures::builder(&fixtures::client_auth("nokey.example", 400)).build();
    let platform = fixtures::platform_with([cert]);

    let reports = inspect_all(&platform).expect("Inspection should succeed");
    assert_eq!(reports[0].key, KeyStatus::NoProvider);
    assert!(!reports[0].to_string().contains("Provider:"));
}

#[test]
fn test_unknown_provider_is_fatal() {
    let cert = fixtures::builder(&fixtures::client_auth("noprov.example", 400))
        .cng_key("Contoso Key Storage Provider", "key")
        .build();
    let platform = fixtures::platform_with([cert]);

    let err = inspect_all(&platform).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderOpenFailed);
    assert!(platform.ledger().is_balanced());
}

#[test]
fn test_provider_open_failure_is_fatal() {
    let cert = fixtures::builder(&fixtures::client_auth("denied.example", 400))
        .cng_key(providers::SOFTWARE, "denied-key")
        .build();
    let platform = fixtures::platform_with([cert]);
    platform.add_key(providers::SOFTWARE, "denied-key");
    platform
        .keys()
        .fail_provider(providers::SOFTWARE, PlatformStatus::ACCESS_DENIED);

    let err = inspect_all(&platform).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderOpenFailed);
    assert!(err.is_fatal());
    assert!(err.to_string().starts_with("Cert: denied.example: "));
    assert!(err.to_string().contains("0x80070005"));
    // The key is never attempted once its provider fails.
    assert!(platform.keys().key_opens().is_empty());
    assert!(platform.ledger().is_balanced());
}

#[test]
fn test_key_needing_ui_is_fatal_and_released() {
    let cert = fixtures::builder(&fixtures::client_auth("pin.example", 400))
        .cng_key(providers::SMART_CARD, "card-key")
        .build();
    let platform = fixtures::platform_with([cert]);
    platform
        .keys()
        .fail_key(providers::SMART_CARD, "card-key", PlatformStatus::SILENT_CONTEXT);

    let err = inspect_all(&platform).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyOpenFailed);
    assert!(err.to_string().contains("0x80090022"));
    assert!(platform.ledger().is_balanced());
}
