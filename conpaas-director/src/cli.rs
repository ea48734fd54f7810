// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{self, Config};

/// Provision ConPaaS service managers.
///
/// For every new manager, this tool reads the cloud bootstrap script and the manager's scripts
/// and configuration from the ConPaaS installation directory, issues a certificate signed by
/// the ConPaaS certificate authority, and combines them into a single shell script (the
/// context file) which the instance runs on first boot.
///
/// Log configuration is provided using the "CONPAAS_DIRECTOR_LOG"
/// environment variable with one or more comma-separated directives. In short,
/// filters can be plain verbosity levels ("trace", "debug", "info", "warn",
/// "error"), or more complex filtering at the span or event level.
///
/// The complete format is documented at
/// https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/filter/struct.EnvFilter.html#directives.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// If no path is provided, the defaults are used. To view the
    /// defaults, run the `config` subcommand.
    #[arg(long, short, env = "CONPAAS_DIRECTOR_CONFIG", value_parser = config::load)]
    pub config: Option<Config>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Generate the context file for a new service manager.
    ///
    /// A fresh key pair and certificate are issued on every invocation.
    Context {
        /// The service type, such as "php" or "selenium".
        ///
        /// Service-specific configuration and start scripts are picked by this name.
        service_name: String,
        /// The identifier of the service the manager runs.
        service_id: u64,
        /// The identifier of the user who owns the service.
        user_id: u64,
        /// Write the context file to this path rather than standard output.
        ///
        /// An existing file is never overwritten.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Issue a manager certificate without generating a context file.
    ///
    /// The certificate, private key, and certificate authority's certificate are written to
    /// "cert.pem", "key.pem", and "ca_cert.pem" in the output directory.
    Certificate {
        /// The identifier of the service the manager runs.
        service_id: u64,
        /// The identifier of the user who owns the service.
        user_id: u64,
        /// The directory to write the certificate and keys to; it must exist.
        #[arg(long, short, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Create a new self-signed certificate authority.
    ///
    /// The certificate and key are written to the locations in the configuration's
    /// "certificate_authority" section. Existing files are never overwritten.
    InitCa {
        /// The common name of the certificate authority.
        #[arg(long, default_value = "ConPaaS")]
        common_name: String,
        /// The organization of the certificate authority.
        #[arg(long, default_value = "ConPaaS")]
        organization: String,
        /// The number of days the certificate authority is valid for.
        #[arg(long, default_value_t = 3650)]
        days: u32,
    },
    /// Print the current configuration to standard output.
    ///
    /// If no config file is provided, the defaults are printed. For complete details on each
    /// setting, refer to the `config` module documentation.
    Config,
}
