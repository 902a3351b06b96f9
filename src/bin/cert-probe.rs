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

//! Certificate store probe.
//!
//! Walks a certificate store, reports each certificate's expiry, thumbprint,
//! extended key usages and CNG key status, then makes one HTTPS GET using the
//! first client-auth certificate as the TLS client identity.
//!
//! # Usage
//!
//! ```text
//! cert-probe [OPTIONS] [HOST[:PORT]]
//!
//! Arguments:
//!   [HOST[:PORT]]          Server to request (default: localhost:443)
//!
//! Options:
//!   -c, --config <PATH>    Path to configuration file
//!       --store <NAME>     Certificate store name (default: My)
//!       --location <LOC>   Store location: CurrentUser or LocalMachine
//!       --days <N>         Expiry warning horizon in days (default: 31)
//!       --skip-inspect     Do not walk the store
//!       --skip-request     Do not make the HTTPS request
//!       --strict-exit      Exit with status 1 when the request fails
//!   -v, --verbose...       Increase log verbosity
//!   -q, --quiet            Only log errors
//!   -h, --help             Print help
//!   -V, --version          Print version
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Inspect CurrentUser\My and request https://localhost/
//! cert-probe
//!
//! # Machine store, 60 day horizon, no request
//! cert-probe --location LocalMachine --days 60 --skip-request
//!
//! # Request a specific server and fail the run if it does not answer
//! cert-probe server.example:8443 --strict-exit
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use cert_probe::client::fetch_as;
use cert_probe::inspector::CertificateInspector;
use cert_probe::logging::{self, LogLevel};
use cert_probe::selector::{ClientAuthSelector, QueryFilter};
use cert_probe::store::CertStoreWalker;
use cert_probe::{ConfigLoader, DefaultPlatform, ProbeConfig, ProbeConfigBuilder, Result};

/// Certificate store probe
#[derive(Parser)]
#[command(name = "cert-probe")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect store certificates and make a client-authenticated request", long_about = None)]
struct Cli {
    /// Server to request, as host[:port]
    #[arg(value_name = "HOST[:PORT]")]
    target: Option<String>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Certificate store name
    #[arg(long, value_name = "NAME")]
    store: Option<String>,

    /// Store location (CurrentUser or LocalMachine)
    #[arg(long, value_name = "LOC")]
    location: Option<String>,

    /// Expiry warning horizon in days
    #[arg(long, value_name = "N")]
    days: Option<u32>,

    /// Do not walk the store
    #[arg(long)]
    skip_inspect: bool,

    /// Do not make the HTTPS request
    #[arg(long)]
    skip_request: bool,

    /// Exit with status 1 when the request fails
    #[arg(long)]
    strict_exit: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, log_config) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&log_config) {
        eprintln!("ERROR: {}", e);
    }

    let platform = DefaultPlatform::default();

    if !cli.skip_inspect {
        if let Err(e) = inspect(&platform, &config) {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if !cli.skip_request {
        if let Err(e) = request(&platform, &config) {
            eprintln!("ERROR: {}", e);
            if config.strict_exit {
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Merge the configuration file, if any, with command-line overrides.
fn load_config(cli: &Cli) -> Result<(ProbeConfig, logging::LogConfig)> {
    let mut loader = ConfigLoader::new();
    if let Some(ref path) = cli.config {
        loader = loader.with_path(path);
    }
    let file = loader.load()?;

    let mut log_config = file.logging.to_log_config()?;
    if cli.verbose > 0 || cli.quiet {
        log_config.level = LogLevel::from_verbosity(cli.verbose, cli.quiet);
    }

    let mut builder = ProbeConfigBuilder::from_file(&file)?;
    if let Some(ref target) = cli.target {
        builder = builder.target_str(target)?;
    }
    if let Some(ref store) = cli.store {
        builder = builder.store_name(store);
    }
    if let Some(ref location) = cli.location {
        builder = builder.store_location_str(location)?;
    }
    if let Some(days) = cli.days {
        builder = builder.expiry_horizon_days(days);
    }
    if cli.strict_exit {
        builder = builder.strict_exit(true);
    }

    Ok((builder.build()?, log_config))
}

fn inspect(platform: &DefaultPlatform, config: &ProbeConfig) -> Result<()> {
    let mut walker = CertStoreWalker::open(platform, config.store_location, &config.store_name)?;
    let inspector = CertificateInspector::from_config(platform.keys(), config);

    inspector.inspect(&mut walker, |report| println!("{}", report))?;
    walker.close();
    Ok(())
}

fn request(platform: &DefaultPlatform, config: &ProbeConfig) -> Result<()> {
    let url = config.request_url()?;
    let selector = ClientAuthSelector::new(platform, QueryFilter::from_config(config));
    let certificate = selector.select()?;
    println!("Client certificate: {}", certificate.subject);

    let runtime = tokio::runtime::Runtime::new()?;
    let body = runtime.block_on(fetch_as(platform, config, &certificate, &url))?;
    println!("{}", body);
    Ok(())
}
