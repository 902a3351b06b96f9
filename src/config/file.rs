// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! TOML configuration file schema and discovery.
//!
//! Every field is optional; anything left out keeps the built-in default.
//!
//! ```toml
//! [store]
//! name = "My"
//! location = "CurrentUser"
//! expiry_horizon_days = 31
//! eku_flags = 0
//!
//! [request]
//! target = "${PROBE_HOST}:443"
//! client_auth_oid = "1.3.6.1.5.5.7.3.2"
//! timeout_seconds = 30
//! strict_exit = false
//!
//! [trust]
//! # "webpki", "explicit" or "insecure"
//! mode = "explicit"
//! ca_bundle_path = "C:\\ProgramData\\cert-probe\\ca.pem"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! String values may reference environment variables as `${NAME}`. Unknown
//! variables are left unchanged.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::TrustAnchors;
use crate::error::{ProbeError, Result};
use crate::logging::{LogConfig, LogLevel};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "CERT_PROBE_CONFIG";

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = "cert-probe.toml";

/// Complete configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Store selection and inspection settings.
    #[serde(default)]
    pub store: StoreSection,

    /// Client-authenticated request settings.
    #[serde(default)]
    pub request: RequestSection,

    /// Server trust settings.
    #[serde(default)]
    pub trust: TrustSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Store name.
    #[serde(default)]
    pub name: Option<String>,

    /// "CurrentUser" or "LocalMachine".
    #[serde(default)]
    pub location: Option<String>,

    /// Expiry look-ahead in days.
    #[serde(default)]
    pub expiry_horizon_days: Option<u32>,

    /// Flags for the EKU query.
    #[serde(default)]
    pub eku_flags: Option<u32>,
}

/// `[request]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSection {
    /// `host[:port]`.
    #[serde(default)]
    pub target: Option<String>,

    /// EKU OID that selects the client certificate.
    #[serde(default)]
    pub client_auth_oid: Option<String>,

    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Exit non-zero when the request fails.
    #[serde(default)]
    pub strict_exit: Option<bool>,
}

/// `[trust]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustSection {
    /// Verification mode.
    #[serde(default)]
    pub mode: TrustMode,

    /// PEM bundle, required when mode is "explicit".
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
}

/// Server verification mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrustMode {
    /// Bundled WebPKI roots.
    #[default]
    #[serde(rename = "webpki", alias = "web_pki")]
    WebPki,

    /// CA certificates from `ca_bundle_path`.
    Explicit,

    /// Accept any certificate (INSECURE - testing only).
    Insecure,
}

impl TrustSection {
    /// Resolve into [`TrustAnchors`], reading the CA bundle if needed.
    pub fn to_trust_anchors(&self) -> Result<TrustAnchors> {
        match self.mode {
            TrustMode::WebPki => Ok(TrustAnchors::WebPki),
            TrustMode::Insecure => Ok(TrustAnchors::InsecureAcceptAny),
            TrustMode::Explicit => {
                let path = self.ca_bundle_path.as_ref().ok_or_else(|| {
                    ProbeError::config("trust.ca_bundle_path is required when mode is 'explicit'")
                })?;
                let pem = std::fs::read(path).map_err(|e| {
                    ProbeError::config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Ok(TrustAnchors::Explicit(vec![pem]))
            }
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// "trace", "debug", "info", "warn" or "error".
    #[serde(default)]
    pub level: Option<String>,

    /// Emit JSON lines.
    #[serde(default)]
    pub json: Option<bool>,
}

impl LoggingSection {
    /// Resolve into a [`LogConfig`].
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let mut config = LogConfig::default();
        if let Some(ref level) = self.level {
            config.level = LogLevel::parse(level)
                .ok_or_else(|| ProbeError::config(format!("Invalid log level '{}'", level)))?;
        }
        if let Some(json) = self.json {
            config.json_format = json;
        }
        Ok(config)
    }
}

impl FileConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| ProbeError::config(format!("Invalid TOML: {e}")))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ProbeError::config(format!("TOML serialize: {e}")))
    }

    /// Expand `${NAME}` references in string values.
    pub fn expand_variables(&mut self) {
        expand_opt(&mut self.store.name);
        expand_opt(&mut self.store.location);
        expand_opt(&mut self.request.target);
        if let Some(ref mut path) = self.trust.ca_bundle_path {
            if let Some(s) = path.to_str() {
                *path = PathBuf::from(expand_variables(s));
            }
        }
    }
}

fn expand_opt(value: &mut Option<String>) {
    if let Some(ref mut s) = value {
        *s = expand_variables(s);
    }
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
pub fn expand_variables(input: &str) -> String {
    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let absolute_start = start + var_start;

        let Some(var_end) = result[absolute_start..].find('}') else {
            break;
        };
        let absolute_end = absolute_start + var_end;
        let var_name = &result[absolute_start + 2..absolute_end];

        match std::env::var(var_name) {
            Ok(value) => {
                result.replace_range(absolute_start..absolute_end + 1, &value);
                start = absolute_start + value.len();
            }
            Err(_) => start = absolute_end + 1,
        }
    }

    result
}

/// Locates and loads the configuration file.
///
/// # Search Order
///
/// 1. Explicit path (if set via `with_path()`)
/// 2. Environment variable `CERT_PROBE_CONFIG`
/// 3. `./cert-probe.toml`
///
/// A missing file at steps 1 or 2 is an error. If step 3 finds nothing the
/// defaults are used.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
    env_var_name: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader with the default search order.
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            env_var_name: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Use this file and nothing else.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override the environment variable consulted.
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var_name = name.into();
        self
    }

    /// Find the configuration file, if any.
    pub fn find_config_file(&self) -> Result<Option<PathBuf>> {
        if let Some(ref path) = self.explicit_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ProbeError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        if let Ok(env_path) = std::env::var(&self.env_var_name) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(ProbeError::config(format!(
                "Configuration file from {} not found: {}",
                self.env_var_name, env_path
            )));
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        Ok(local.exists().then_some(local))
    }

    /// Load the configuration, or the defaults if no file is found.
    pub fn load(&self) -> Result<FileConfig> {
        match self.find_config_file()? {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    ProbeError::config(format!("Failed to read {}: {e}", path.display()))
                })?;
                self.load_from_str(&content)
            }
            None => Ok(FileConfig::default()),
        }
    }

    /// Load configuration from a TOML string.
    pub fn load_from_str(&self, toml_content: &str) -> Result<FileConfig> {
        let mut config = FileConfig::from_toml(toml_content)?;
        config.expand_variables();
        Ok(config)
    }
}
