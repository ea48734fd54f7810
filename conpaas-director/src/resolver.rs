// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Locate the scripts and configuration files that make up a context file.
//!
//! Files live under the ConPaaS installation directory:
//!
//! * `scripts/cloud/<driver>` - the cloud's bootstrap script.
//! * `config/cloud/<driver>.cfg` - the cloud connection settings.
//! * `scripts/<role>/<role>-setup` - the role's setup script.
//! * `config/<role>/default-<role>.cfg`, optionally followed by `config/<role>/<service>-<role>.cfg`.
//! * `scripts/<role>/<service>-<role>-start`, or `scripts/<role>/default-<role>-start`.
//!
//! Placeholders are left untouched here; [`crate::context`] substitutes them.

use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::instrument;

use crate::{config, error::Error};

/// The variant name used when no service-specific file exists.
pub const DEFAULT_VARIANT: &str = "default";

/// The role area for service managers.
pub const MANAGER_ROLE: &str = "manager";

/// The file contents a context file is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFileSet {
    /// The cloud-specific bootstrap script.
    pub cloud_script: String,
    /// The manager setup script.
    pub manager_setup: String,
    /// The cloud connection configuration.
    pub cloud_config: String,
    /// The default manager configuration followed by the service's additions, if any.
    pub manager_config: String,
    /// The service's manager start script, or the default one.
    pub manager_start_script: String,
}

/// Resolves files for a single cloud driver under a ConPaaS installation directory.
#[derive(Debug, Clone)]
pub struct Resolver {
    root_dir: PathBuf,
    cloud: String,
}

impl Resolver {
    /// Create a resolver for files under `root_dir`, using the bootstrap files for `cloud`.
    pub fn new(root_dir: impl Into<PathBuf>, cloud: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            cloud: cloud.into(),
        }
    }

    /// Read every file needed to build a context file for `service_name` in `role`.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigNotFound`] if a required file is missing or a name can't be used as
    /// part of a file name, [`Error::Io`] if a file exists but can't be read.
    #[instrument(skip(self), fields(cloud = %self.cloud), err)]
    pub fn resolve(&self, service_name: &str, role: &str) -> Result<ResolvedFileSet, Error> {
        let cloud_scripts_dir = self.root_dir.join("scripts").join("cloud");
        let cloud_config_dir = self.root_dir.join("config").join("cloud");
        let role_scripts_dir = self.root_dir.join("scripts").join(role);
        let role_config_dir = self.root_dir.join("config").join(role);

        checked_name(&cloud_scripts_dir, &self.cloud)?;
        checked_name(&role_scripts_dir, role)?;
        checked_name(&role_config_dir, service_name)?;

        // Cloud files have no default: without them the instance never reports back.
        let cloud_script = read_required(&cloud_scripts_dir.join(&self.cloud))?;
        let cloud_config = read_required(&cloud_config_dir.join(format!("{}.cfg", self.cloud)))?;
        let manager_setup = read_required(&role_scripts_dir.join(format!("{role}-setup")))?;

        let config_suffix = format!("-{role}.cfg");
        let default_config = variant(&role_config_dir, DEFAULT_VARIANT, &config_suffix);
        let mut manager_config = read_required(&default_config)?;
        let service_config = specific_or_default(&role_config_dir, service_name, &config_suffix);
        if service_config != default_config {
            tracing::debug!(path = ?service_config, "Appending service-specific configuration");
            manager_config.push_str(&read_required(&service_config)?);
        }

        let start_script = specific_or_default(
            &role_scripts_dir,
            service_name,
            &format!("-{role}-start"),
        );
        tracing::debug!(path = ?start_script, "Using start script");
        let manager_start_script = read_required(&start_script)?;

        Ok(ResolvedFileSet {
            cloud_script,
            manager_setup,
            cloud_config,
            manager_config,
            manager_start_script,
        })
    }
}

fn variant(dir: &Path, name: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{name}{suffix}"))
}

/// Pick `<service><suffix>` if it exists, `default<suffix>` otherwise.
fn specific_or_default(dir: &Path, service_name: &str, suffix: &str) -> PathBuf {
    let specific = variant(dir, service_name, suffix);
    if specific.is_file() {
        specific
    } else {
        variant(dir, DEFAULT_VARIANT, suffix)
    }
}

fn checked_name(dir: &Path, name: &str) -> Result<(), Error> {
    config::validate_file_name(name).map_err(|error| {
        tracing::error!(name, %error, "Refusing to use name as part of a file name");
        Error::ConfigNotFound {
            path: dir.join(name),
        }
    })
}

fn read_required(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|error| match error.kind() {
        io::ErrorKind::NotFound => {
            tracing::error!(?path, "Required file is missing");
            Error::ConfigNotFound {
                path: path.to_owned(),
            }
        }
        _ => {
            tracing::error!(?path, ?error, "Failed to read required file");
            Error::Io(error)
        }
    })
}
