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

//! Integration test utilities and helpers
//!
//! This module provides common test infrastructure: generated client
//! certificates, an in-memory platform seeded with them, a mock web server,
//! and a TLS server that requires client certificates.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cert_probe::memory::{MemoryCertificate, MemoryCertificateBuilder, MemoryPlatform};
use cert_probe::properties::oids;
use cert_probe::store::StoreLocation;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Store every test seeds.
pub const STORE: &str = "My";

/// Mock web server for request tests
pub struct MockWebServer {
    server: MockServer,
}

impl MockWebServer {
    /// Create a new mock server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Base URL of the mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Parsed URL for `path`
    pub fn url_for(&self, path: &str) -> url::Url {
        url::Url::parse(&self.server.uri())
            .and_then(|base| base.join(path))
            .expect("Valid mock URL")
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Answer GET `route` with `status` and a plain-text `body`
    pub async fn mock_get(&self, route: &str, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .insert_header("Content-Type", "text/plain"),
            )
            .mount(&self.server)
            .await;
    }
}

/// What the TLS server saw from its single client
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Handshake finished; the client's certificate chain, leaf first
    Accepted { client_chain: Vec<Vec<u8>> },
    /// Handshake failed on the server side
    Rejected(String),
}

/// HTTPS server that requires a client certificate issued by `pki`'s CA and
/// answers exactly one request
pub struct MutualTlsServer {
    addr: SocketAddr,
    outcome: oneshot::Receiver<HandshakeOutcome>,
}

impl MutualTlsServer {
    /// Start the server with a certificate for 127.0.0.1 issued by `pki`
    pub async fn start(pki: &fixtures::TestPki, body: &str) -> Self {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots
            .add(CertificateDer::from(pki.ca_der()))
            .expect("CA certificate");
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .expect("Client verifier");

        let server_cert = pki.issue(
            "127.0.0.1",
            vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth],
        );
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("Protocol versions")
            .with_client_cert_verifier(verifier)
            .with_single_cert(
                vec![CertificateDer::from(server_cert.der.clone())],
                PrivateKeyDer::Pkcs8(server_cert.key_der.clone().into()),
            )
            .expect("Server config");
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Bind");
        let addr = listener.local_addr().expect("Local address");
        let (tx, rx) = oneshot::channel();
        let body = body.to_string();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let outcome = match acceptor.accept(stream).await {
                Ok(mut tls) => {
                    let client_chain = tls
                        .get_ref()
                        .1
                        .peer_certificates()
                        .map(|chain| chain.iter().map(|c| c.to_vec()).collect())
                        .unwrap_or_default();

                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }

                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                    HandshakeOutcome::Accepted { client_chain }
                }
                Err(e) => HandshakeOutcome::Rejected(e.to_string()),
            };
            let _ = tx.send(outcome);
        });

        Self { addr, outcome: rx }
    }

    /// Root URL of the server
    pub fn url(&self) -> url::Url {
        url::Url::parse(&format!("https://127.0.0.1:{}/", self.addr.port())).expect("Valid URL")
    }

    /// Wait for the server's view of the connection
    pub async fn outcome(self) -> HandshakeOutcome {
        tokio::time::timeout(Duration::from_secs(10), self.outcome)
            .await
            .expect("Server finished in time")
            .expect("Server reported an outcome")
    }
}

/// Test fixture helpers
pub mod fixtures {
    use super::*;
    use rcgen::{
        BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
        ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    };
    use time::{Duration, OffsetDateTime};

    /// A generated certificate and its private key
    pub struct GeneratedCert {
        pub der: Vec<u8>,
        pub cert_pem: String,
        pub key_pem: String,
        pub key_der: Vec<u8>,
    }

    impl GeneratedCert {
        fn new(cert: &Certificate, key_pair: &KeyPair) -> Self {
            Self {
                der: cert.der().to_vec(),
                cert_pem: cert.pem(),
                key_pem: key_pair.serialize_pem(),
                key_der: key_pair.serialize_der(),
            }
        }
    }

    fn params(common_name: &str, days: i64, usages: Vec<ExtendedKeyUsagePurpose>) -> CertificateParams {
        let mut params =
            CertificateParams::new(vec![common_name.to_string()]).expect("Valid SAN");
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
        params.not_after = OffsetDateTime::now_utc() + Duration::days(days);
        params.extended_key_usages = usages;
        params
    }

    /// Generate a self-signed certificate valid for `days` more days
    pub fn generate(common_name: &str, days: i64, usages: Vec<ExtendedKeyUsagePurpose>) -> GeneratedCert {
        let key_pair = KeyPair::generate().expect("Key generation failed");
        let cert = params(common_name, days, usages)
            .self_signed(&key_pair)
            .expect("Self-signing failed");
        GeneratedCert::new(&cert, &key_pair)
    }

    /// A throwaway CA for TLS tests
    pub struct TestPki {
        ca: Certificate,
        ca_key: KeyPair,
    }

    impl TestPki {
        /// Create a new self-signed CA
        pub fn new() -> Self {
            let ca_key = KeyPair::generate().expect("Key generation failed");
            let mut params = params("cert-probe test CA", 30, Vec::new());
            params.subject_alt_names = Vec::new();
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
            let ca = params.self_signed(&ca_key).expect("CA self-signing failed");
            Self { ca, ca_key }
        }

        /// DER encoding of the CA certificate
        pub fn ca_der(&self) -> Vec<u8> {
            self.ca.der().to_vec()
        }

        /// PEM bundle holding the CA certificate
        pub fn ca_pem(&self) -> String {
            self.ca.pem()
        }

        /// Issue a certificate for `name` signed by the CA
        pub fn issue(&self, name: &str, usages: Vec<ExtendedKeyUsagePurpose>) -> GeneratedCert {
            let key_pair = KeyPair::generate().expect("Key generation failed");
            let cert = params(name, 30, usages)
                .signed_by(&key_pair, &self.ca, &self.ca_key)
                .expect("Signing failed");
            GeneratedCert::new(&cert, &key_pair)
        }
    }

    /// Generate a clientAuth certificate
    pub fn client_auth(common_name: &str, days: i64) -> GeneratedCert {
        generate(common_name, days, vec![ExtendedKeyUsagePurpose::ClientAuth])
    }

    /// Builder seeded from a generated certificate
    pub fn builder(cert: &GeneratedCert) -> MemoryCertificateBuilder {
        MemoryCertificateBuilder::from_der(&cert.der).expect("Valid certificate DER")
    }

    /// Memory certificate with an exportable key, ready for requests
    pub fn exportable(cert: &GeneratedCert) -> MemoryCertificate {
        builder(cert).private_key_pem(cert.key_pem.clone()).build()
    }

    /// A platform whose CurrentUser\My store holds `certs`
    pub fn platform_with(certs: impl IntoIterator<Item = MemoryCertificate>) -> MemoryPlatform {
        let platform = MemoryPlatform::new();
        platform.create_store(StoreLocation::CurrentUser, STORE);
        for cert in certs {
            platform.add_certificate(StoreLocation::CurrentUser, STORE, cert);
        }
        platform
    }

    /// The clientAuth OID, for assertions
    pub fn client_auth_oid() -> String {
        oids::CLIENT_AUTH.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockWebServer::start().await;
        assert!(!mock_server.url().is_empty());
        assert!(mock_server.url().starts_with("http://"));
    }

    #[test]
    fn test_generated_certificate_parses() {
        let generated = fixtures::client_auth("fixture.example", 30);
        let cert = fixtures::builder(&generated).build();

        assert_eq!(cert.subject(), "fixture.example");
        assert_eq!(
            cert.enhanced_key_usages(),
            Some(&[fixtures::client_auth_oid()][..])
        );
        assert_eq!(cert.thumbprint().map(|t| t.len()), Some(20));
    }
}
