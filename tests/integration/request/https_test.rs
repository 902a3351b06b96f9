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

//! Integration tests for the client-authenticated GET

use crate::integration::{fixtures, MockWebServer};
use cert_probe::client::{fetch_url_with_client_auth, WebClient};
use cert_probe::memory::MemoryPlatform;
use cert_probe::{ErrorKind, ProbeConfig, ProbeError};

fn config() -> ProbeConfig {
    ProbeConfig::builder()
        .trust_any_insecure() // OK for testing
        .build()
        .expect("Valid config")
}

#[tokio::test]
async fn test_successful_request_returns_body() {
    let mock = MockWebServer::start().await;
    mock.mock_get("/", 200, "hello from the server").await;

    let generated = fixtures::client_auth("requester.example", 400);
    let platform = fixtures::platform_with([fixtures::exportable(&generated)]);

    let response = fetch_url_with_client_auth(&platform, &config(), &mock.url_for("/"))
        .await
        .expect("Request should succeed");

    assert_eq!(response.certificate.subject, "requester.example");
    assert_eq!(response.body, "hello from the server");
}

#[tokio::test]
async fn test_first_client_auth_certificate_is_used() {
    let mock = MockWebServer::start().await;
    mock.mock_get("/", 200, "ok").await;

    let server_only = fixtures::generate(
        "server.example",
        400,
        vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth],
    );
    let first = fixtures::client_auth("first-client.example", 400);
    let second = fixtures::client_auth("second-client.example", 400);
    let platform = fixtures::platform_with([
        fixtures::exportable(&server_only),
        fixtures::exportable(&first),
        fixtures::exportable(&second),
    ]);

    let response = fetch_url_with_client_auth(&platform, &config(), &mock.url_for("/"))
        .await
        .expect("Request should succeed");
    assert_eq!(response.certificate.subject, "first-client.example");
}

#[tokio::test]
async fn test_forbidden_status_is_http_failure() {
    let mock = MockWebServer::start().await;
    mock.mock_get("/", 403, "client certificate rejected").await;

    let generated = fixtures::client_auth("denied.example", 400);
    let platform = fixtures::platform_with([fixtures::exportable(&generated)]);

    let err = fetch_url_with_client_auth(&platform, &config(), &mock.url_for("/"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HttpFailure);
    match err {
        ProbeError::HttpStatus { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "client certificate rejected");
        }
        other => panic!("Expected HttpStatus, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_without_body_uses_reason() {
    let mock = MockWebServer::start().await;
    mock.mock_get("/", 500, "").await;

    let client = WebClient::new(&config(), None).expect("Client creation failed");
    let err = client.get_text(&mock.url_for("/")).await.unwrap_err();

    assert!(
        matches!(err, ProbeError::HttpStatus { status: 500, ref message } if message == "Internal Server Error"),
        "Unexpected error: {:?}",
        err
    );
}

#[tokio::test]
async fn test_no_certificate_sends_no_request() {
    let mock = MockWebServer::start().await;
    mock.mock_get("/", 200, "should not be reached").await;

    let platform = fixtures::platform_with(std::iter::empty());
    let err = fetch_url_with_client_auth(&platform, &config(), &mock.url_for("/"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoClientAuthCertificate);
    let received = mock.inner().received_requests().await.unwrap_or_default();
    assert!(received.is_empty(), "No request may be sent without a certificate");
}

#[tokio::test]
async fn test_missing_store_means_no_certificate() {
    let mock = MockWebServer::start().await;
    let platform = MemoryPlatform::new();

    let err = fetch_url_with_client_auth(&platform, &config(), &mock.url_for("/"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoClientAuthCertificate);
}

#[tokio::test]
async fn test_non_exportable_key_is_tls_error() {
    let mock = MockWebServer::start().await;
    mock.mock_get("/", 200, "should not be reached").await;

    let generated = fixtures::client_auth("locked.example", 400);
    let platform = fixtures::platform_with([fixtures::builder(&generated).build()]);

    let err = fetch_url_with_client_auth(&platform, &config(), &mock.url_for("/"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProbeError::Tls(_)), "Unexpected error: {:?}", err);
    let received = mock.inner().received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}
