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

//! TLS configuration helpers for the HTTPS client.
//!
//! The client always runs on a rustls [`ClientConfig`] built here and handed
//! to reqwest as-is. A PEM identity is installed as a fixed certificate and
//! key; a [`ClientIdentity::Signer`] is offered through a resolver, so keys
//! that cannot leave their provider still sign the handshake.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::config::{ClientIdentity, ProbeConfig, TrustAnchors};
use crate::error::{ProbeError, Result};

/// Build a reqwest Client for the probe request.
pub fn build_http_client(
    config: &ProbeConfig,
    identity: Option<&ClientIdentity>,
) -> Result<reqwest::Client> {
    let tls_config = build_rustls_config(config, identity)?;

    reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .use_preconfigured_tls(tls_config)
        .build()
        .map_err(|e| ProbeError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Build the rustls client configuration.
///
/// TLS 1.2 is the minimum accepted version.
pub fn build_rustls_config(
    config: &ProbeConfig,
    identity: Option<&ClientIdentity>,
) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| ProbeError::tls(format!("Unsupported TLS versions: {}", e)))?;

    let builder = match &config.trust_anchors {
        TrustAnchors::InsecureAcceptAny => {
            tracing::warn!("Server certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        }
        anchors => builder.with_root_certificates(build_root_store(anchors)?),
    };

    match identity {
        None => Ok(builder.with_no_client_auth()),
        Some(ClientIdentity::Pem { cert_pem, key_pem }) => {
            let certs = parse_pem_certificates(cert_pem)?;
            let key = parse_pem_private_key(key_pem)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ProbeError::tls(format!("Failed to configure client auth: {}", e)))
        }
        Some(ClientIdentity::Signer(key)) => {
            Ok(builder.with_client_cert_resolver(Arc::new(SingleClientCert(key.clone()))))
        }
    }
}

fn build_root_store(trust_anchors: &TrustAnchors) -> Result<rustls::RootCertStore> {
    let mut root_store = rustls::RootCertStore::empty();

    match trust_anchors {
        TrustAnchors::WebPki => {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        TrustAnchors::Explicit(bundles) => {
            for ca_pem in bundles {
                for cert in parse_pem_certificates(ca_pem)? {
                    root_store.add(cert).map_err(|e| {
                        ProbeError::tls(format!("Failed to parse CA certificate: {}", e))
                    })?;
                }
            }
        }
        TrustAnchors::InsecureAcceptAny => {}
    }

    Ok(root_store)
}

/// Offers one certificate chain whenever the server asks for a client
/// certificate and accepts one of the key's signature schemes.
#[derive(Debug)]
struct SingleClientCert(Arc<CertifiedKey>);

impl ResolvesClientCert for SingleClientCert {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        if self.0.key.choose_scheme(sigschemes).is_none() {
            tracing::warn!(
                "Client key supports none of the server's signature schemes: {:?}",
                sigschemes
            );
            return None;
        }
        Some(self.0.clone())
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Skips chain and name checks but still verifies handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Encode DER bytes as a PEM block with 64-character lines.
pub fn pem_encode(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for chunk in body.as_bytes().chunks(64) {
        // Base64 output is ASCII.
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

/// Parse every `CERTIFICATE` block in `pem_data`.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem_data[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProbeError::tls(format!("Failed to parse PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(ProbeError::tls("No certificates found in PEM data"));
    }
    Ok(certs)
}

/// Parse the first PKCS#8, PKCS#1 or SEC1 private key in `pem_data`.
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem_data[..])
        .map_err(|e| ProbeError::tls(format!("Failed to parse PEM: {}", e)))?
        .ok_or_else(|| ProbeError::tls("No private key found in PEM data"))
}
