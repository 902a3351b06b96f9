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

//! Client-authenticated HTTPS requests.
//!
//! The request path is independent of the store inspection: it selects the
//! first client-auth certificate through a [`CertificateQuery`], presents it
//! as the TLS client identity, and issues a single GET.
//!
//! # Example
//!
//! ```no_run
//! use cert_probe::client::fetch_with_client_auth;
//! use cert_probe::memory::MemoryPlatform;
//! use cert_probe::ProbeConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = MemoryPlatform::new();
//! let config = ProbeConfig::builder().target_str("server.example:8443")?.build()?;
//!
//! let response = fetch_with_client_auth(&platform, &config).await?;
//! println!("Client certificate: {}", response.certificate.subject);
//! println!("{}", response.body);
//! # Ok(())
//! # }
//! ```

use url::Url;

use crate::config::{ClientIdentity, ProbeConfig};
use crate::error::{ProbeError, Result};
use crate::selector::{CertificateQuery, ClientAuthSelector, ClientCertificate, QueryFilter};
use crate::tls::build_http_client;

/// HTTPS client carrying an optional TLS client identity.
#[derive(Debug, Clone)]
pub struct WebClient {
    http: reqwest::Client,
}

impl WebClient {
    /// Create a client for `config`, presenting `identity` when the server
    /// asks for a client certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity or trust anchors are unusable.
    pub fn new(config: &ProbeConfig, identity: Option<&ClientIdentity>) -> Result<Self> {
        let http = build_http_client(config, identity)?;
        Ok(Self { http })
    }

    /// GET `url` and return the body as text.
    ///
    /// # Errors
    ///
    /// - [`ProbeError::Http`] for transport and TLS failures
    /// - [`ProbeError::HttpStatus`] for a non-success status
    pub async fn get_text(&self, url: &Url) -> Result<String> {
        tracing::debug!("GET {}", url);

        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("Server error").to_string()
            } else {
                body
            };
            return Err(ProbeError::http_status(status.as_u16(), message));
        }

        let body = response.text().await?;
        tracing::debug!("Received {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

/// Outcome of a client-authenticated request.
#[derive(Debug, Clone)]
pub struct AuthenticatedResponse {
    /// The certificate presented to the server.
    pub certificate: ClientCertificate,
    /// Response body.
    pub body: String,
}

/// Select a client certificate and GET the configured target's root path.
pub async fn fetch_with_client_auth<Q>(query: &Q, config: &ProbeConfig) -> Result<AuthenticatedResponse>
where
    Q: CertificateQuery + ?Sized,
{
    let url = config.request_url()?;
    fetch_url_with_client_auth(query, config, &url).await
}

/// Select a client certificate and GET `url`.
///
/// No request is sent unless a certificate was found and its TLS identity
/// built.
pub async fn fetch_url_with_client_auth<Q>(
    query: &Q,
    config: &ProbeConfig,
    url: &Url,
) -> Result<AuthenticatedResponse>
where
    Q: CertificateQuery + ?Sized,
{
    let selector = ClientAuthSelector::new(query, QueryFilter::from_config(config));
    let certificate = selector.select()?;
    let body = fetch_as(query, config, &certificate, url).await?;

    Ok(AuthenticatedResponse { certificate, body })
}

/// GET `url` presenting `certificate`, which must have come from `query`.
pub async fn fetch_as<Q>(
    query: &Q,
    config: &ProbeConfig,
    certificate: &ClientCertificate,
    url: &Url,
) -> Result<String>
where
    Q: CertificateQuery + ?Sized,
{
    let identity = query.client_identity(certificate)?;
    let client = WebClient::new(config, Some(&identity))?;
    client.get_text(url).await
}
