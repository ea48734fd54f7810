// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The configuration format for `conpaas-director`.
//!
//! Configuration is provided via a command-line argument or environment
//! variable (`CONPAAS_DIRECTOR_CONFIG`). The configuration should be in TOML format.
//!
//! The [`Config`] has several top-level settings, the [`CertificateAuthority`] used to
//! issue manager certificates, the subject of those certificates ([`ManagerCertificate`]),
//! and the [`Iaas`] the managers are started on.
//!
//! There is no configuration merging: a configuration file must contain
//! settings for _all_ required fields.
//!
//! To validate your configuration, refer to the `conpaas-director config` command.

use std::{collections::BTreeMap, num::NonZeroU64, path::PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// The smallest RSA modulus, in bits, accepted for manager keys.
pub const MIN_KEY_BITS: u32 = 2048;

/// The configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The total length of time (in seconds) to wait for a context file to be generated.
    ///
    /// Key generation is the slow part of provisioning; if it takes longer than this, the
    /// request fails and no instance is created.
    pub request_timeout_secs: NonZeroU64,

    /// The ConPaaS installation directory.
    ///
    /// Cloud bootstrap scripts are read from `scripts/cloud/`, cloud connection settings from
    /// `config/cloud/`, and manager scripts and configuration from `scripts/manager/` and
    /// `config/manager/` respectively.
    pub root_dir: PathBuf,

    /// The base URL of the frontend; managers use it to call back to the director.
    ///
    /// This is substituted for the `%FRONTEND_URL%` placeholder in manager scripts and
    /// configuration.
    pub frontend_url: String,

    /// The certificate authority used to sign manager certificates.
    pub certificate_authority: CertificateAuthority,

    /// The subject given to manager certificates.
    pub manager_certificate: ManagerCertificate,

    /// The cloud managers are started on.
    pub iaas: Iaas,
}

/// Location of the certificate authority's certificate and private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateAuthority {
    /// The directory holding the CA material.
    ///
    /// If this is a relative path, it is relative to [`Config::root_dir`].
    pub cert_dir: PathBuf,
    /// The name of the PEM-encoded CA certificate in `cert_dir`.
    pub certificate: PathBuf,
    /// The name of the PEM-encoded CA private key in `cert_dir`.
    ///
    /// The key is only ever read. It should not be readable by other users on the host.
    pub private_key: PathBuf,
}

impl Default for CertificateAuthority {
    fn default() -> Self {
        Self {
            cert_dir: "certs".into(),
            certificate: "ca_cert.pem".into(),
            private_key: "ca_key.pem".into(),
        }
    }
}

/// The subject and key parameters for manager certificates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerCertificate {
    /// The email address placed in the certificate subject.
    pub email: String,
    /// The common name placed in the certificate subject.
    pub common_name: String,
    /// The organization placed in the certificate subject.
    pub organization: String,
    /// The RSA modulus size for manager keys; must be at least 2048.
    pub key_bits: u32,
}

impl Default for ManagerCertificate {
    fn default() -> Self {
        Self {
            email: "info@conpaas.eu".into(),
            common_name: "ConPaaS".into(),
            organization: "Contrail".into(),
            key_bits: MIN_KEY_BITS,
        }
    }
}

/// The infrastructure provider managers run on.
///
/// Besides the `driver`, any number of credentials may be provided. They override the
/// values in the driver's cloud connection file (`config/cloud/<driver>.cfg`) when it is
/// embedded in the manager's configuration.
///
/// # Example
///
/// ```toml
/// [iaas]
/// driver = "ec2"
/// user = "AKIAEXAMPLE"
/// password = "secret"
/// image_id = "ami-12345"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iaas {
    /// The cloud driver; this selects `scripts/cloud/<driver>` and `config/cloud/<driver>.cfg`.
    pub driver: String,
    /// Credentials merged into the cloud connection configuration.
    #[serde(flatten)]
    pub credentials: BTreeMap<String, String>,
}

impl Default for Iaas {
    fn default() -> Self {
        Self {
            driver: "ec2".into(),
            credentials: BTreeMap::new(),
        }
    }
}

impl Iaas {
    /// Merge the configured credentials into the cloud connection configuration.
    ///
    /// Every `KEY = value` line whose key matches a credential (case-insensitively) has its
    /// value replaced. Credentials without a matching line are appended as `KEY = value`.
    /// All other lines are kept as they are.
    pub fn merge_credentials(&self, cloud_config: &str) -> String {
        let mut unused: BTreeMap<String, &str> = self
            .credentials
            .iter()
            .map(|(key, value)| (key.to_uppercase(), value.as_str()))
            .collect();

        let mut merged = String::with_capacity(cloud_config.len());
        for line in cloud_config.split_inclusive('\n') {
            let key = line
                .split_once('=')
                .map(|(key, _)| key.trim().to_uppercase());
            match key.and_then(|key| unused.remove_entry(&key)) {
                Some((key, value)) => {
                    tracing::debug!(key = %key, "Overriding cloud configuration value");
                    merged.push_str(&format!("{key} = {value}"));
                    if line.ends_with('\n') {
                        merged.push('\n');
                    }
                }
                None => merged.push_str(line),
            }
        }

        for (key, value) in unused {
            if !merged.is_empty() && !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(&format!("{key} = {value}\n"));
        }

        merged
    }
}

impl Config {
    /// The directory containing the CA material, resolved against [`Config::root_dir`].
    pub fn cert_dir(&self) -> PathBuf {
        self.root_dir.join(&self.certificate_authority.cert_dir)
    }

    /// The path to the CA certificate.
    pub fn ca_certificate_path(&self) -> PathBuf {
        self.cert_dir().join(&self.certificate_authority.certificate)
    }

    /// The path to the CA private key.
    pub fn ca_private_key_path(&self) -> PathBuf {
        self.cert_dir().join(&self.certificate_authority.private_key)
    }

    /// Check the configuration file for validity.
    ///
    /// An error is returned if the installation directory does not exist, or if any of the
    /// settings contain invalid values. The CA files are not checked here since `init-ca`
    /// may not have been run yet.
    #[doc(hidden)]
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.root_dir.is_dir() {
            return Err(anyhow!(
                "The root directory '{}' does not exist",
                self.root_dir.display()
            ));
        }

        if !(self.frontend_url.starts_with("https://") || self.frontend_url.starts_with("http://"))
        {
            return Err(anyhow!(
                "frontend_url must be an http or https URL, got '{}'",
                self.frontend_url
            ));
        }

        if self.manager_certificate.key_bits < MIN_KEY_BITS {
            return Err(anyhow!(
                "key_bits must be at least {MIN_KEY_BITS}, got {}",
                self.manager_certificate.key_bits
            ));
        }

        validate_file_name(&self.iaas.driver)
            .with_context(|| format!("iaas driver '{}' is invalid", self.iaas.driver))?;

        Ok(())
    }
}

/// Ensure a name used to build a file name can't escape its directory.
pub(crate) fn validate_file_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        return Err(anyhow!("name must not be empty"));
    }
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') || name.contains("..") {
        return Err(anyhow!("name must not contain path separators or '..'"));
    }
    Ok(())
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            toml::ser::to_string_pretty(&self).unwrap_or_default()
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: NonZeroU64::new(60).expect("Don't set the default to 0"),
            root_dir: PathBuf::from("/etc/conpaas"),
            frontend_url: "https://localhost:5555".into(),
            certificate_authority: CertificateAuthority::default(),
            manager_certificate: ManagerCertificate::default(),
            iaas: Iaas::default(),
        }
    }
}

pub(crate) fn load(path: &str) -> anyhow::Result<Config> {
    let config = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read from path {path:?}"))?;
    tracing::info!(%path, "Read from configuration file");
    toml::from_str(&config)
        .inspect_err(|error| {
            eprintln!("Failed to parse configuration loaded from {path:?}:\n{error}");
            eprintln!("Example config file:\n\n{}", Config::default());
        })
        .context("configuration file is invalid")
}
