// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Errors that might occur while provisioning a service manager.

use std::path::PathBuf;

/// Errors returned while building a manager's context file.
///
/// None of these errors are retryable with different defaults: a partially configured manager
/// is worse than a failed provisioning attempt, so callers must not create an instance when
/// any of them is returned.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required script or configuration file does not exist.
    ///
    /// This is also returned when the requested service name cannot name a file, for example
    /// because it contains a path separator.
    #[error("required file '{}' was not found", path.display())]
    ConfigNotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The certificate authority's certificate or private key could not be used.
    ///
    /// The files might be missing, unreadable, not valid PEM, or the private key might not
    /// belong to the certificate. Issuance cannot proceed without a trust root.
    #[error("certificate authority material at '{}' is unusable: {reason}", path.display())]
    CertificateAuthorityUnavailable {
        /// The file that could not be used.
        path: PathBuf,
        /// A description of what was wrong with it.
        reason: String,
    },

    /// Key generation or signing failed in OpenSSL.
    ///
    /// No partial certificate is ever returned alongside this error.
    #[error("cryptographic operation failed: {0}")]
    CryptoOperationFailed(#[from] openssl::error::ErrorStack),

    /// The context file could not be fully assembled.
    ///
    /// Either a required input was empty, a placeholder survived substitution, or an embedded
    /// document contains the here-document delimiter.
    #[error("context file assembly is incomplete: {0}")]
    AssemblyIncomplete(String),

    /// A required file exists but could not be read.
    #[error("an I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error indicating provisioning could not complete, for example because it timed
    /// out or the instance controller failed.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}
