// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Issue identity certificates for service managers.
//!
//! Each manager gets a fresh RSA key and a certificate signed by the director's certificate
//! authority. The certificate subject carries the standard organization, common name, and email
//! fields as well as three identity attributes the frontend checks when a manager calls back:
//!
//! * [`USER_ID_OID`]: the owning user's numeric id.
//! * [`SERVICE_LOCATOR_OID`]: the service's numeric id.
//! * [`ROLE_OID`]: always [`MANAGER_ROLE`](crate::resolver::MANAGER_ROLE).
//!
//! The CA's private key is only read; it never leaves this module.

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use nix::sys::stat::Mode;
use openssl::{
    asn1::{Asn1Integer, Asn1Object, Asn1Time},
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectKeyIdentifier,
        },
        X509Builder, X509NameBuilder, X509NameRef, X509Req, X509ReqBuilder, X509Ref, X509,
    },
};
use tracing::instrument;

use crate::{
    config::{Config, MIN_KEY_BITS},
    error::Error,
    resolver::MANAGER_ROLE,
};

/// The `userId` attribute (RFC 4519) holding the owning user's id.
pub const USER_ID_OID: &str = "0.9.2342.19200300.100.1.1";

/// The `role` attribute (RFC 4519) holding the certificate holder's role.
pub const ROLE_OID: &str = "2.5.4.72";

/// The attribute holding the service id the manager was started for.
pub const SERVICE_LOCATOR_OID: &str = "2.25.267705555042631629989684697102076563510";

/// How long an issued manager certificate is valid for.
pub const VALIDITY_DAYS: i64 = 365;

const SECONDS_PER_DAY: i64 = 60 * 60 * 24;

/// Serial numbers are 159 random bits so they stay positive and within 20 octets.
const SERIAL_BITS: i32 = 159;

/// The identity of the service a manager is being provisioned for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// The service type, for example `php`.
    pub service_name: String,
    /// The service's numeric id in the frontend.
    pub service_id: u64,
    /// The numeric id of the user owning the service.
    pub user_id: u64,
}

/// A freshly issued certificate, its private key, and the issuing CA's certificate.
///
/// All three are PEM-encoded. This is what a manager needs to establish mutually-authenticated
/// TLS with the frontend.
#[derive(Clone)]
pub struct IssuedCertificate {
    /// The manager's certificate.
    pub certificate_pem: String,
    /// The manager's PKCS#8 private key.
    pub private_key_pem: String,
    /// The certificate of the CA that signed `certificate_pem`.
    pub ca_certificate_pem: String,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .field("ca_certificate_pem", &self.ca_certificate_pem)
            .finish()
    }
}

/// The identity attributes found in a manager certificate's subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    /// The owning user's id.
    pub user_id: u64,
    /// The service id.
    pub service_id: u64,
    /// The holder's role.
    pub role: String,
}

impl CertificateIdentity {
    /// Read the identity attributes from a PEM-encoded certificate.
    pub fn from_pem(certificate_pem: &str) -> Result<Self, Error> {
        let certificate = X509::from_pem(certificate_pem.as_bytes())?;
        Self::from_certificate(&certificate)
    }

    /// Read the identity attributes from a certificate.
    pub fn from_certificate(certificate: &X509Ref) -> Result<Self, Error> {
        let subject = certificate.subject_name();
        let user_id = subject_entry(subject, USER_ID_OID)?;
        let service_id = subject_entry(subject, SERVICE_LOCATOR_OID)?;
        let role = subject_entry(subject, ROLE_OID)?;

        Ok(Self {
            user_id: user_id
                .parse()
                .map_err(|_| anyhow!("user id '{user_id}' is not a number"))?,
            service_id: service_id
                .parse()
                .map_err(|_| anyhow!("service locator '{service_id}' is not a number"))?,
            role,
        })
    }
}

fn subject_entry(subject: &X509NameRef, oid: &str) -> Result<String, Error> {
    // Unregistered OIDs print in dotted form, registered ones by name; either way the two
    // renderings of the same OID agree.
    let wanted = Asn1Object::from_str(oid)?.to_string();
    let entry = subject
        .entries()
        .find(|entry| entry.object().to_string() == wanted)
        .ok_or_else(|| anyhow!("certificate subject has no {oid} attribute"))?;
    let data = entry.data().as_slice();
    if data.contains(&0) {
        return Err(anyhow!("certificate subject {oid} attribute contains a NUL byte").into());
    }
    Ok(std::str::from_utf8(data)
        .map_err(|error| anyhow!("certificate subject {oid} attribute is not UTF-8: {error}"))?
        .to_string())
}

/// A certificate authority loaded from disk.
pub struct CertificateAuthority {
    certificate: X509,
    private_key: PKey<Private>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("subject", &self.certificate.subject_name())
            .finish()
    }
}

impl CertificateAuthority {
    /// Load the CA certificate and private key from PEM files.
    ///
    /// # Errors
    ///
    /// [`Error::CertificateAuthorityUnavailable`] if either file can't be read or parsed, or if
    /// the private key doesn't belong to the certificate.
    #[instrument(err)]
    pub fn load(certificate_path: &Path, private_key_path: &Path) -> Result<Self, Error> {
        let certificate = X509::from_pem(&read_ca_file(certificate_path)?)
            .map_err(|error| unavailable(certificate_path, error))?;

        warn_if_exposed(private_key_path);
        let private_key = PKey::private_key_from_pem(&read_ca_file(private_key_path)?)
            .map_err(|error| unavailable(private_key_path, error))?;

        let public_key = certificate
            .public_key()
            .map_err(|error| unavailable(certificate_path, error))?;
        if !public_key.public_eq(&private_key) {
            return Err(unavailable(
                private_key_path,
                "the private key does not match the CA certificate",
            ));
        }

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// The CA certificate.
    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    /// Issue a certificate for the subject and public key in `request`.
    ///
    /// The request's signature is checked first to prove the requester holds the private key.
    /// The certificate is valid for exactly [`VALIDITY_DAYS`] days starting now.
    pub fn sign_request(&self, request: &X509Req) -> Result<X509, Error> {
        let public_key = request.public_key()?;
        if !request.verify(&public_key)? {
            return Err(
                anyhow!("certificate request signature does not match its public key").into(),
            );
        }

        let (not_before, not_after) = validity()?;
        let serial = random_serial()?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(request.subject_name())?;
        builder.set_issuer_name(self.certificate.subject_name())?;
        builder.set_pubkey(&public_key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().client_auth().server_auth().build()?)?;
        let subject_key_id = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(Some(&*self.certificate), None))?;
        builder.append_extension(subject_key_id)?;
        let authority_key_id = AuthorityKeyIdentifier::new()
            .keyid(false)
            .issuer(false)
            .build(&builder.x509v3_context(Some(&*self.certificate), None))?;
        builder.append_extension(authority_key_id)?;

        builder.sign(&self.private_key, MessageDigest::sha256())?;
        let certificate = builder.build();
        tracing::info!(
            serial = serial.to_bn()?.to_hex_str()?.to_string(),
            "Issued certificate"
        );

        Ok(certificate)
    }
}

/// Issues manager certificates using the CA files from the director configuration.
#[derive(Debug, Clone)]
pub struct CertificateAuthorityClient {
    certificate_path: PathBuf,
    private_key_path: PathBuf,
    key_bits: u32,
}

impl CertificateAuthorityClient {
    /// Create a client using the CA certificate and key at the given paths.
    ///
    /// Manager keys are RSA keys with a `key_bits` modulus.
    pub fn new(
        certificate_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
        key_bits: u32,
    ) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
            key_bits,
        }
    }

    /// Create a client for the CA described in the director configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ca_certificate_path(),
            config.ca_private_key_path(),
            config.manager_certificate.key_bits,
        )
    }

    /// Generate a key pair and a CA-signed certificate for a manager of the given service.
    ///
    /// This is CPU-intensive and blocks the calling thread; async callers should run it with
    /// [`tokio::task::spawn_blocking`].
    ///
    /// # Errors
    ///
    /// [`Error::CertificateAuthorityUnavailable`] if the CA can't be loaded, and
    /// [`Error::CryptoOperationFailed`] if key generation or signing fails.
    #[instrument(skip_all, fields(service_id = identity.service_id, user_id = identity.user_id), err)]
    pub fn issue(
        &self,
        identity: &ServiceIdentity,
        email: &str,
        common_name: &str,
        organization: &str,
    ) -> Result<IssuedCertificate, Error> {
        // The CA is checked before the expensive key generation.
        let authority = CertificateAuthority::load(&self.certificate_path, &self.private_key_path)?;

        let private_key = PKey::from_rsa(Rsa::generate(self.key_bits)?)?;
        tracing::debug!(bits = self.key_bits, "Generated manager key pair");

        let mut subject = X509NameBuilder::new()?;
        subject.append_entry_by_text("O", organization)?;
        subject.append_entry_by_text("CN", common_name)?;
        subject.append_entry_by_text("emailAddress", email)?;
        subject.append_entry_by_text(USER_ID_OID, &identity.user_id.to_string())?;
        subject.append_entry_by_text(SERVICE_LOCATOR_OID, &identity.service_id.to_string())?;
        subject.append_entry_by_text(ROLE_OID, MANAGER_ROLE)?;
        let subject = subject.build();

        let mut request = X509ReqBuilder::new()?;
        request.set_version(0)?;
        request.set_subject_name(&subject)?;
        request.set_pubkey(&private_key)?;
        request.sign(&private_key, MessageDigest::sha256())?;
        let request = request.build();

        let certificate = authority.sign_request(&request)?;

        Ok(IssuedCertificate {
            certificate_pem: pem_string(certificate.to_pem()?)?,
            private_key_pem: pem_string(private_key.private_key_to_pem_pkcs8()?)?,
            ca_certificate_pem: pem_string(authority.certificate().to_pem()?)?,
        })
    }
}

/// Create a self-signed certificate authority.
///
/// Returns the PEM-encoded certificate and PKCS#8 private key, in that order. Keys smaller than
/// [`MIN_KEY_BITS`] are refused.
#[instrument(err)]
pub fn generate_root(
    common_name: &str,
    organization: &str,
    days: u32,
    key_bits: u32,
) -> Result<(String, String), Error> {
    if key_bits < MIN_KEY_BITS {
        return Err(anyhow!(
            "certificate authority keys must be at least {MIN_KEY_BITS} bits, got {key_bits}"
        )
        .into());
    }
    let private_key = PKey::from_rsa(Rsa::generate(key_bits)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("O", organization)?;
    name.append_entry_by_text("CN", common_name)?;
    let name = name.build();

    let now = unix_now()?;
    let serial = random_serial()?;
    let not_before = Asn1Time::from_unix(now)?;
    let not_after = Asn1Time::from_unix(now + i64::from(days) * SECONDS_PER_DAY)?;
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&private_key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .build()?,
    )?;
    let subject_key_id =
        SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(subject_key_id)?;
    builder.sign(&private_key, MessageDigest::sha256())?;

    Ok((
        pem_string(builder.build().to_pem()?)?,
        pem_string(private_key.private_key_to_pem_pkcs8()?)?,
    ))
}

fn read_ca_file(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(|error| unavailable(path, error))
}

fn unavailable(path: &Path, reason: impl std::fmt::Display) -> Error {
    tracing::error!(?path, %reason, "Certificate authority material is unusable");
    Error::CertificateAuthorityUnavailable {
        path: path.to_owned(),
        reason: reason.to_string(),
    }
}

fn warn_if_exposed(private_key_path: &Path) {
    if let Ok(metadata) = std::fs::metadata(private_key_path) {
        if metadata.permissions().mode() & Mode::S_IRWXO.bits() != 0 {
            tracing::warn!(
                path = ?private_key_path,
                mode = format!("{:o}", metadata.permissions().mode()),
                "Other users have access to the CA private key, adjust its permissions!"
            );
        }
    }
}

fn unix_now() -> Result<i64, Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is set before the Unix epoch: {error}"))?;
    Ok(i64::try_from(now.as_secs()).map_err(anyhow::Error::from)?)
}

fn validity() -> Result<(Asn1Time, Asn1Time), Error> {
    let now = unix_now()?;
    Ok((
        Asn1Time::from_unix(now)?,
        Asn1Time::from_unix(now + VALIDITY_DAYS * SECONDS_PER_DAY)?,
    ))
}

fn random_serial() -> Result<Asn1Integer, Error> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}

fn pem_string(pem: Vec<u8>) -> Result<String, Error> {
    Ok(String::from_utf8(pem).map_err(anyhow::Error::from)?)
}
