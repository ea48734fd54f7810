// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::process::{Command, Stdio};

use anyhow::Result;
use assert_cmd::cargo::CommandCargoExt;

#[test]
fn config_with_default_works() -> Result<()> {
    let mut command = Command::cargo_bin("conpaas-director")?;
    let output = command
        .arg("config")
        .env_remove("CONPAAS_DIRECTOR_CONFIG")
        .stderr(Stdio::piped())
        .stdout(Stdio::piped())
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    println!("cli_stdout: {stdout}");
    assert!(output.status.success());
    for line in [
        "request_timeout_secs = 60\n",
        "root_dir = \"/etc/conpaas\"\n",
        "frontend_url = \"https://localhost:5555\"\n",
        "[certificate_authority]\ncert_dir = \"certs\"\n",
        "[manager_certificate]\nemail = \"info@conpaas.eu\"\n",
        "key_bits = 2048\n",
        "[iaas]\ndriver = \"ec2\"\n",
    ] {
        assert!(stdout.contains(line), "missing {line:?}");
    }

    Ok(())
}

#[test]
fn config_file_is_echoed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("director.toml");
    std::fs::write(
        &config_path,
        r#"
request_timeout_secs = 5
root_dir = "/srv/conpaas"
frontend_url = "https://frontend.example:5555"

[certificate_authority]
cert_dir = "/srv/ca"
certificate = "cert.pem"
private_key = "key.pem"

[manager_certificate]
email = "ops@example.com"
common_name = "Example"
organization = "Example Org"
key_bits = 3072

[iaas]
driver = "opennebula"
user = "oneadmin"
"#,
    )?;

    let output = Command::cargo_bin("conpaas-director")?
        .arg("--config")
        .arg(&config_path)
        .arg("config")
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("root_dir = \"/srv/conpaas\"\n"));
    assert!(stdout.contains("driver = \"opennebula\"\n"));
    assert!(stdout.contains("user = \"oneadmin\"\n"));

    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("director.toml");
    std::fs::write(&config_path, "root_dir = 42\n")?;

    let output = Command::cargo_bin("conpaas-director")?
        .arg("--config")
        .arg(&config_path)
        .arg("config")
        .output()?;
    assert!(!output.status.success());

    Ok(())
}
