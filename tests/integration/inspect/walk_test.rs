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

//! Integration tests for walking a store and reporting each certificate

use crate::integration::{fixtures, STORE};
use cert_probe::inspector::CertificateInspector;
use cert_probe::keys::providers;
use cert_probe::memory::MemoryPlatform;
use cert_probe::properties::PropertyId;
use cert_probe::store::{CertStoreWalker, StoreLocation};
use cert_probe::{CertificateReport, ErrorKind, PlatformStatus};

fn run(platform: &MemoryPlatform) -> (cert_probe::Result<cert_probe::InspectionSummary>, Vec<CertificateReport>) {
    let mut walker = CertStoreWalker::open(platform, StoreLocation::CurrentUser, STORE)
        .expect("Store should open");
    let mut reports = Vec::new();
    let result = CertificateInspector::new(platform.keys())
        .inspect(&mut walker, |report| reports.push(report.clone()));
    (result, reports)
}

#[test]
fn test_expiring_certificate_reports_only_expiry() {
    let generated = fixtures::client_auth("near.example", 5);
    let cert = fixtures::builder(&generated)
        .cng_key(providers::SOFTWARE, "near-key")
        .build();
    let platform = fixtures::platform_with([cert]);
    platform.add_key(providers::SOFTWARE, "near-key");

    let (result, reports) = run(&platform);
    let summary = result.expect("Inspection should succeed");

    assert_eq!(summary.inspected, 1);
    assert_eq!(summary.expiring, 1);
    assert_eq!(
        reports[0].to_string(),
        "Cert: near.example\n  Cert will expire within 31 days."
    );
    // Expiring certificates are not checked any further.
    assert!(platform.keys().key_opens().is_empty());
}

#[test]
fn test_long_lived_certificate_full_report() {
    let generated = fixtures::client_auth("far.example", 730);
    let cert = fixtures::builder(&generated)
        .cng_key(providers::SOFTWARE, "far-key")
        .build();
    let thumbprint = cert.thumbprint().expect("Derived thumbprint");
    let platform = fixtures::platform_with([cert]);
    platform.add_key(providers::SOFTWARE, "far-key");

    let (result, reports) = run(&platform);
    let summary = result.expect("Inspection should succeed");
    assert_eq!(summary.verified, 1);

    let expected = format!(
        "Cert: far.example\n  Thumbprint: {}\n  EKU: {}\n  Provider: {}\n  Container: far-key\n  CNG key access succeeded",
        thumbprint.to_hex(),
        fixtures::client_auth_oid(),
        providers::SOFTWARE
    );
    assert_eq!(reports[0].to_string(), expected);
}

#[test]
fn test_reports_follow_store_order() {
    let certs = ["a.example", "b.example", "c.example"]
        .iter()
        .map(|cn| fixtures::builder(&fixtures::client_auth(cn, 400)).build());
    let platform = fixtures::platform_with(certs);

    let (result, reports) = run(&platform);
    assert_eq!(result.expect("Inspection should succeed").no_provider, 3);

    let subjects: Vec<_> = reports.iter().map(|r| r.subject.as_str()).collect();
    assert_eq!(subjects, ["a.example", "b.example", "c.example"]);
}

#[test]
fn test_certificate_without_eku_has_no_eku_lines() {
    let generated = fixtures::generate("plain.example", 400, Vec::new());
    let platform = fixtures::platform_with([fixtures::builder(&generated).build()]);

    let (result, reports) = run(&platform);
    result.expect("Inspection should succeed");

    let rendered = reports[0].to_string();
    assert!(!rendered.contains("EKU:"));
    assert!(rendered.contains("Thumbprint: "));
}

#[test]
fn test_missing_thumbprint_is_not_an_error() {
    let generated = fixtures::client_auth("nothumb.example", 400);
    let cert = fixtures::builder(&generated).without_thumbprint().build();
    let platform = fixtures::platform_with([cert]);

    let (result, reports) = run(&platform);
    result.expect("Inspection should succeed");
    assert!(reports[0].to_string().contains("  Thumbprint: (none)"));
}

#[test]
fn test_missing_store_is_fatal() {
    let platform = MemoryPlatform::new();
    let err = CertStoreWalker::open(&platform, StoreLocation::LocalMachine, "Nope").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(err.is_fatal());
    assert!(platform.ledger().is_balanced());
}

#[test]
fn test_property_failure_aborts_walk() {
    let first = fixtures::builder(&fixtures::client_auth("first.example", 400)).build();
    let broken = fixtures::builder(&fixtures::client_auth("broken.example", 400))
        .property_fault(PropertyId::KeyProviderInfo, PlatformStatus::ACCESS_DENIED)
        .build();
    let never = fixtures::builder(&fixtures::client_auth("never.example", 400)).build();
    let platform = fixtures::platform_with([first, broken, never]);

    let (result, reports) = run(&platform);
    let err = result.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PropertyQueryFailed);
    assert!(err.is_fatal());
    assert!(err.to_string().starts_with("Cert: broken.example: "));
    // Reports emitted before the failure stay emitted.
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].subject, "first.example");
    assert!(platform.ledger().is_balanced());
}

#[test]
fn test_eku_query_failure_aborts_walk() {
    let first = fixtures::builder(&fixtures::client_auth("first.example", 400)).build();
    let broken = fixtures::builder(&fixtures::client_auth("eku.example", 400))
        .enhanced_key_usage_fault(PlatformStatus::ACCESS_DENIED)
        .build();
    let platform = fixtures::platform_with([first, broken]);

    let (result, reports) = run(&platform);
    let err = result.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PropertyQueryFailed);
    assert!(err.to_string().starts_with("Cert: eku.example: "));
    assert!(err.to_string().contains("0x80070005"));
    assert_eq!(reports.len(), 1);
    assert!(platform.ledger().is_balanced());
}

#[test]
fn test_size_change_between_queries_aborts_walk() {
    let cert = fixtures::builder(&fixtures::client_auth("drift.example", 400))
        .property_size_drift(PropertyId::Hash)
        .build();
    let platform = fixtures::platform_with([cert]);

    let (result, reports) = run(&platform);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::PropertyQueryFailed);
    assert!(reports.is_empty());
}

#[test]
fn test_dropping_walker_early_releases_everything() {
    let certs = (0..4).map(|i| {
        fixtures::builder(&fixtures::client_auth(&format!("early-{i}.example"), 400)).build()
    });
    let platform = fixtures::platform_with(certs);

    {
        let mut walker = CertStoreWalker::open(&platform, StoreLocation::CurrentUser, STORE)
            .expect("Store should open");
        assert!(walker.next().is_some());
        assert!(walker.next().is_some());
        assert_eq!(platform.ledger().open_records(), 1);
        assert_eq!(platform.ledger().open_stores(), 1);
    }

    assert!(platform.ledger().is_balanced());
}
