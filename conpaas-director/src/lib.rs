// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

#![doc = include_str!("../README.md")]

pub mod ca;
#[doc(hidden)]
pub mod cli;
pub mod config;
pub mod context;
pub mod controller;
mod error;
pub mod provision;
pub mod resolver;

pub use ca::{CertificateAuthorityClient, IssuedCertificate, ServiceIdentity};
pub use config::Config;
pub use controller::{stop_manager, CloudController, Instance};
pub use error::Error;
pub use provision::Provisioner;
pub use resolver::{ResolvedFileSet, Resolver};
