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

//! Client authentication certificate selection.
//!
//! The selector asks a [`CertificateQuery`] for certificates carrying the
//! client authentication EKU in a given store and takes the first one. There
//! is no ranking beyond that: the first match in store order wins.

use crate::config::{ClientIdentity, ProbeConfig};
use crate::error::{ProbeError, Result};
use crate::properties::{oids, Thumbprint};
use crate::store::StoreLocation;

/// Criteria for a certificate query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    /// Every listed OID must be present in the certificate's EKU extension.
    pub enhanced_key_usages: Vec<String>,
    /// Store name (e.g. "My").
    pub store_name: String,
    /// Store location.
    pub location: StoreLocation,
}

impl QueryFilter {
    /// Filter for client authentication certificates in a store.
    pub fn client_auth(store_name: impl Into<String>, location: StoreLocation) -> Self {
        Self {
            enhanced_key_usages: vec![oids::CLIENT_AUTH.to_string()],
            store_name: store_name.into(),
            location,
        }
    }

    /// Build the filter from configuration.
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            enhanced_key_usages: vec![config.client_auth_oid.clone()],
            store_name: config.store_name.clone(),
            location: config.store_location,
        }
    }

    /// Returns true if `usages` contains every OID this filter requires.
    ///
    /// A certificate without an EKU extension never matches.
    pub fn matches(&self, usages: &[String]) -> bool {
        !usages.is_empty()
            && self
                .enhanced_key_usages
                .iter()
                .all(|wanted| usages.iter().any(|have| have == wanted))
    }

    /// "Location\Name" for messages.
    pub fn store_path(&self) -> String {
        format!("{}\\{}", self.location, self.store_name)
    }
}

/// A certificate returned by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    /// Subject display name.
    pub subject: String,
    /// Thumbprint, used to find the certificate again for its private key.
    pub thumbprint: Option<Thumbprint>,
    /// DER encoding.
    pub der: Vec<u8>,
    /// Store the certificate was found in.
    pub location: StoreLocation,
    /// Name of that store.
    pub store_name: String,
}

/// Higher-level certificate search facility.
pub trait CertificateQuery {
    /// Return every certificate matching `filter`, in store order.
    ///
    /// A store that does not exist yields an empty list.
    fn find_all(&self, filter: &QueryFilter) -> Result<Vec<ClientCertificate>>;

    /// Return the first certificate matching `filter` in store order.
    fn first_match(&self, filter: &QueryFilter) -> Result<Option<ClientCertificate>> {
        Ok(self.find_all(filter)?.into_iter().next())
    }

    /// Build the TLS client identity for a certificate returned by a query.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Tls`] if the certificate is gone or its private
    /// key cannot be used.
    fn client_identity(&self, certificate: &ClientCertificate) -> Result<ClientIdentity>;
}

/// Picks the certificate used for client-authenticated requests.
#[derive(Debug)]
pub struct ClientAuthSelector<'a, Q: ?Sized> {
    query: &'a Q,
    filter: QueryFilter,
}

impl<'a, Q: CertificateQuery + ?Sized> ClientAuthSelector<'a, Q> {
    /// Create a selector over `query` with the given filter.
    pub fn new(query: &'a Q, filter: QueryFilter) -> Self {
        Self { query, filter }
    }

    /// The filter in use.
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// Return the first matching certificate.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::NoClientAuthCertificate`] if nothing matches.
    pub fn select(&self) -> Result<ClientCertificate> {
        let first = self.query.first_match(&self.filter)?.ok_or_else(|| {
            ProbeError::no_client_auth_certificate(self.filter.store_path())
        })?;

        tracing::info!(
            "Selected client certificate '{}' from {} ({:?})",
            first.subject,
            self.filter.store_path(),
            self.filter.enhanced_key_usages
        );
        Ok(first)
    }
}
