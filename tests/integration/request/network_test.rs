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

//! Integration tests for network error handling

use crate::integration::fixtures;
use cert_probe::client::fetch_with_client_auth;
use cert_probe::{ErrorKind, ProbeConfig, ProbeError};
use std::time::Duration;

#[tokio::test]
async fn test_connection_refused() {
    let generated = fixtures::client_auth("refused.example", 400);
    let platform = fixtures::platform_with([fixtures::exportable(&generated)]);

    // Use localhost with a port that's likely not listening
    let config = ProbeConfig::builder()
        .target_str("127.0.0.1:19999")
        .expect("Valid target")
        .timeout(Duration::from_secs(1))
        .trust_any_insecure()
        .build()
        .expect("Valid config");

    let err = fetch_with_client_auth(&platform, &config).await.unwrap_err();

    assert!(matches!(err, ProbeError::Http(_)), "Should be HTTP error, got: {:?}", err);
    assert_eq!(err.kind(), ErrorKind::HttpFailure);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_connection_timeout() {
    let generated = fixtures::client_auth("timeout.example", 400);
    let platform = fixtures::platform_with([fixtures::exportable(&generated)]);

    // 192.0.2.0/24 is reserved for documentation (TEST-NET-1)
    let config = ProbeConfig::builder()
        .target_str("192.0.2.1:8443")
        .expect("Valid target")
        .timeout(Duration::from_millis(100))
        .trust_any_insecure()
        .build()
        .expect("Valid config");

    let err = fetch_with_client_auth(&platform, &config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpFailure);
}
