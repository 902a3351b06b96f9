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

//! Client certificate authentication over a real TLS handshake

use std::sync::Arc;

use crate::integration::{fixtures, HandshakeOutcome, MutualTlsServer};
use cert_probe::client::{fetch_url_with_client_auth, WebClient};
use cert_probe::{ClientIdentity, ErrorKind, ProbeConfig, ProbeError};
use rcgen::ExtendedKeyUsagePurpose;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;

fn trusting(pki: &fixtures::TestPki) -> ProbeConfig {
    ProbeConfig::builder()
        .trust_explicit(vec![pki.ca_pem().into_bytes()])
        .build()
        .expect("Valid config")
}

#[tokio::test]
async fn test_client_certificate_is_presented() {
    let pki = fixtures::TestPki::new();
    let client = pki.issue("mtls-client.example", vec![ExtendedKeyUsagePurpose::ClientAuth]);
    let platform = fixtures::platform_with([fixtures::exportable(&client)]);
    let server = MutualTlsServer::start(&pki, "authenticated").await;

    let response = fetch_url_with_client_auth(&platform, &trusting(&pki), &server.url())
        .await
        .expect("Request should succeed");
    assert_eq!(response.certificate.subject, "mtls-client.example");
    assert_eq!(response.body, "authenticated");

    match server.outcome().await {
        HandshakeOutcome::Accepted { client_chain } => {
            assert_eq!(client_chain.first(), Some(&client.der));
        }
        other => panic!("Expected accepted handshake, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_untrusted_client_certificate_is_http_failure() {
    let pki = fixtures::TestPki::new();
    // Self-signed, so the server's CA never vouches for it.
    let stranger = fixtures::client_auth("stranger.example", 30);
    let platform = fixtures::platform_with([fixtures::exportable(&stranger)]);
    let server = MutualTlsServer::start(&pki, "unreachable").await;

    let err = fetch_url_with_client_auth(&platform, &trusting(&pki), &server.url())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpFailure);
    assert!(matches!(err, ProbeError::Http(_)), "Unexpected error: {:?}", err);

    assert!(matches!(server.outcome().await, HandshakeOutcome::Rejected(_)));
}

#[tokio::test]
async fn test_signing_identity_completes_handshake() {
    let pki = fixtures::TestPki::new();
    let client = pki.issue("signer.example", vec![ExtendedKeyUsagePurpose::ClientAuth]);
    let key = PrivateKeyDer::Pkcs8(client.key_der.clone().into());
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key).expect("Signing key");
    let identity = ClientIdentity::Signer(Arc::new(CertifiedKey::new(
        vec![CertificateDer::from(client.der.clone())],
        signing_key,
    )));
    let server = MutualTlsServer::start(&pki, "signed").await;

    let body = WebClient::new(&trusting(&pki), Some(&identity))
        .expect("Client creation failed")
        .get_text(&server.url())
        .await
        .expect("Request should succeed");
    assert_eq!(body, "signed");

    match server.outcome().await {
        HandshakeOutcome::Accepted { client_chain } => {
            assert_eq!(client_chain, vec![client.der.clone()]);
        }
        other => panic!("Expected accepted handshake, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_server_outside_trust_anchors_is_rejected() {
    let pki = fixtures::TestPki::new();
    let other_ca = fixtures::TestPki::new();
    let client = pki.issue("mtls-client.example", vec![ExtendedKeyUsagePurpose::ClientAuth]);
    let platform = fixtures::platform_with([fixtures::exportable(&client)]);
    let server = MutualTlsServer::start(&pki, "unreachable").await;

    let err = fetch_url_with_client_auth(&platform, &trusting(&other_ca), &server.url())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpFailure);
}
