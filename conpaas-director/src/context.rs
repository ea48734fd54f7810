// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Assemble the context file handed to a new manager instance.
//!
//! The context file is a shell script the hypervisor runs top to bottom when the instance
//! boots. It consists of, in order:
//!
//! 1. The cloud's bootstrap script.
//! 2. Three here-documents writing the manager's certificate, private key, and the CA
//!    certificate to [`CERTIFICATE_PATH`], [`PRIVATE_KEY_PATH`], and [`CA_CERTIFICATE_PATH`].
//! 3. The manager setup script.
//! 4. A here-document writing the cloud configuration followed by the manager configuration
//!    to [`CONFIG_PATH`].
//! 5. The manager start script.
//!
//! Placeholders are replaced literally; there are no loops or conditionals, so the scripts stay
//! plain shell. Every here-document is terminated by a quoted [`HEREDOC_DELIMITER`], so the shell
//! writes embedded documents byte for byte without expanding `$`, backticks, or backslashes.
//! Embedded documents are not escaped: if one contains a line equal to the delimiter, assembly
//! fails instead.

use tracing::instrument;

use crate::{ca::IssuedCertificate, error::Error, resolver::ResolvedFileSet};

/// Replaced with the frontend's base URL.
pub const FRONTEND_URL: &str = "%FRONTEND_URL%";
/// Replaced with the service type, for example `php`.
pub const SERVICE_TYPE: &str = "%CONPAAS_SERVICE_TYPE%";
/// Replaced with the numeric service id.
pub const SERVICE_ID: &str = "%CONPAAS_SERVICE_ID%";
/// Replaced with the numeric id of the service's owner.
pub const USER_ID: &str = "%CONPAAS_USER_ID%";
/// Replaced with the cloud driver name.
pub const CLOUD: &str = "%CLOUD%";

/// Any `%CONPAAS_...%` token is reserved; one that survives substitution is an error.
const RESERVED_PREFIX: &str = "%CONPAAS_";

/// Terminates every here-document in the context file.
pub const HEREDOC_DELIMITER: &str = "CONPAAS_CONTEXT_EOF";

/// Where the manager's certificate is written.
pub const CERTIFICATE_PATH: &str = "/tmp/cert.pem";
/// Where the manager's private key is written.
pub const PRIVATE_KEY_PATH: &str = "/tmp/key.pem";
/// Where the CA certificate is written.
pub const CA_CERTIFICATE_PATH: &str = "/tmp/ca_cert.pem";
/// Where the merged configuration is written; `ROOT_DIR` is set by the cloud bootstrap script.
pub const CONFIG_PATH: &str = "$ROOT_DIR/config.cfg";

/// Values substituted into the resolved scripts and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    /// The frontend's base URL.
    pub frontend_url: String,
    /// The service type.
    pub service_name: String,
    /// The service id.
    pub service_id: u64,
    /// The id of the user owning the service.
    pub user_id: u64,
    /// The cloud driver the instance runs on.
    pub cloud: String,
}

impl Placeholders {
    /// Replace every placeholder in `text` in a single pass.
    ///
    /// Substituted values are never themselves searched for placeholders.
    pub fn substitute(&self, text: &str) -> String {
        let service_id = self.service_id.to_string();
        let user_id = self.user_id.to_string();
        let replacements = [
            (FRONTEND_URL, self.frontend_url.as_str()),
            (SERVICE_TYPE, self.service_name.as_str()),
            (SERVICE_ID, service_id.as_str()),
            (USER_ID, user_id.as_str()),
            (CLOUD, self.cloud.as_str()),
        ];

        let mut substituted = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find('%') {
            substituted.push_str(&rest[..start]);
            rest = &rest[start..];
            match replacements
                .iter()
                .find(|(token, _)| rest.starts_with(token))
            {
                Some((token, value)) => {
                    substituted.push_str(value);
                    rest = &rest[token.len()..];
                }
                None => {
                    substituted.push('%');
                    rest = &rest[1..];
                }
            }
        }
        substituted.push_str(rest);

        substituted
    }
}

/// Build the context file from the resolved files and the manager's certificate.
///
/// # Errors
///
/// [`Error::AssemblyIncomplete`] if any input is empty, if a placeholder remains after
/// substitution, or if an embedded document would terminate its here-document early.
#[instrument(skip_all, fields(service = %placeholders.service_name, service_id = placeholders.service_id), err)]
pub fn assemble(
    resolved: &ResolvedFileSet,
    certificate: &IssuedCertificate,
    placeholders: &Placeholders,
) -> Result<String, Error> {
    required("frontend URL", &placeholders.frontend_url)?;
    required("service name", &placeholders.service_name)?;
    required("cloud driver", &placeholders.cloud)?;
    required("cloud script", &resolved.cloud_script)?;
    required("manager setup script", &resolved.manager_setup)?;
    required("cloud configuration", &resolved.cloud_config)?;
    required("manager configuration", &resolved.manager_config)?;
    required("manager start script", &resolved.manager_start_script)?;
    required("manager certificate", &certificate.certificate_pem)?;
    required("manager private key", &certificate.private_key_pem)?;
    required("CA certificate", &certificate.ca_certificate_pem)?;

    let configuration = format!(
        "{}\n{}",
        placeholders.substitute(&resolved.cloud_config),
        placeholders.substitute(&resolved.manager_config)
    );
    let blocks = [
        placeholders.substitute(&resolved.cloud_script),
        here_document(CERTIFICATE_PATH, &certificate.certificate_pem)?,
        here_document(PRIVATE_KEY_PATH, &certificate.private_key_pem)?,
        here_document(CA_CERTIFICATE_PATH, &certificate.ca_certificate_pem)?,
        placeholders.substitute(&resolved.manager_setup),
        here_document(CONFIG_PATH, &configuration)?,
        placeholders.substitute(&resolved.manager_start_script),
    ];
    let context = blocks.join("\n\n");

    if let Some(token) = unresolved_placeholder(&context) {
        tracing::error!(token, "Placeholder survived substitution");
        return Err(Error::AssemblyIncomplete(format!(
            "placeholder {token} was not substituted"
        )));
    }

    tracing::debug!(bytes = context.len(), "Assembled context file");
    Ok(context)
}

fn required(name: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        tracing::error!(input = name, "Required context file input is empty");
        return Err(Error::AssemblyIncomplete(format!("the {name} is empty")));
    }
    Ok(())
}

fn here_document(path: &str, body: &str) -> Result<String, Error> {
    if body.lines().any(|line| line == HEREDOC_DELIMITER) {
        return Err(Error::AssemblyIncomplete(format!(
            "the document written to {path} contains the delimiter {HEREDOC_DELIMITER}"
        )));
    }
    Ok(format!(
        "cat <<'{HEREDOC_DELIMITER}' > {path}\n{body}\n{HEREDOC_DELIMITER}"
    ))
}

/// Find a recognized or reserved placeholder in `text`.
fn unresolved_placeholder(text: &str) -> Option<&str> {
    for token in [FRONTEND_URL, SERVICE_TYPE, SERVICE_ID, USER_ID, CLOUD] {
        if text.contains(token) {
            return Some(token);
        }
    }

    text.match_indices(RESERVED_PREFIX).find_map(|(start, _)| {
        let name_start = start + RESERVED_PREFIX.len();
        let name_len = text[name_start..]
            .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(text.len() - name_start);
        let end = name_start + name_len;
        (name_len > 0 && text[end..].starts_with('%')).then(|| &text[start..=end])
    })
}
