// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{
    fs::OpenOptions,
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::Path,
};

use anyhow::Context;
use clap::Parser;
use conpaas_director::{
    ca,
    cli::{self, Command},
    config::Config,
    Provisioner,
};
use tracing_subscriber::{
    filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("CONPAAS_DIRECTOR_LOG")
                .from_env_lossy(),
        );
    tracing::subscriber::set_global_default(registry)
        .expect("Programming error: set_global_default should only be called once.");

    let opts = cli::Cli::parse();
    let config = opts.config.unwrap_or_default();
    match opts.command {
        Command::Config => {
            println!("{config}");
            Ok(())
        }
        Command::Context {
            service_name,
            service_id,
            user_id,
            output,
        } => {
            config.validate()?;
            let context = Provisioner::new(config)
                .generate_context(&service_name, service_id, user_id)
                .await?;
            match output {
                Some(path) => write_new(&path, &context, 0o644),
                None => {
                    print!("{context}");
                    Ok(())
                }
            }
        }
        Command::Certificate {
            service_id,
            user_id,
            output_dir,
        } => {
            config.validate()?;
            let issued = Provisioner::new(config).issue_certificate(service_id, user_id)?;
            write_new(&output_dir.join("cert.pem"), &issued.certificate_pem, 0o644)?;
            write_new(&output_dir.join("key.pem"), &issued.private_key_pem, 0o600)?;
            write_new(
                &output_dir.join("ca_cert.pem"),
                &issued.ca_certificate_pem,
                0o644,
            )
        }
        Command::InitCa {
            common_name,
            organization,
            days,
        } => init_ca(&config, &common_name, &organization, days),
    }
}

fn init_ca(config: &Config, common_name: &str, organization: &str, days: u32) -> anyhow::Result<()> {
    let certificate_path = config.ca_certificate_path();
    let private_key_path = config.ca_private_key_path();
    for path in [&certificate_path, &private_key_path] {
        if path.exists() {
            anyhow::bail!(
                "{} already exists; remove it to create a new certificate authority",
                path.display()
            );
        }
    }

    let (certificate, private_key) = ca::generate_root(
        common_name,
        organization,
        days,
        config.manager_certificate.key_bits,
    )?;
    std::fs::create_dir_all(config.cert_dir())
        .with_context(|| format!("failed to create {}", config.cert_dir().display()))?;
    write_new(&private_key_path, &private_key, 0o600)?;
    write_new(&certificate_path, &certificate, 0o644)?;
    tracing::info!(path = ?certificate_path, "Created certificate authority");
    Ok(())
}

/// Write `contents` to a file that must not already exist.
fn write_new(path: &Path, contents: &str, mode: u32) -> anyhow::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
