//! Upload into the app's storage over SFTP
//!
//! The platform exposes app storage on a non-default SFTP port with the
//! login `<user>@<fqdn>@<api endpoint>`. Password auth is fed through
//! `sshpass -e`, keeping the password out of the process list.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{SftpConfig, SuiteCredentials};
use crate::error::{E2eError, E2eResult};

/// `sftp -b -` batch that puts `file_name` into `remote_dir`
pub fn batch_script(remote_dir: &str, file_name: &str) -> String {
    format!("cd {}\nput {}\nbye\n", remote_dir, file_name)
}

/// Login string for app-scoped SFTP
pub fn login(username: &str, fqdn: &str, api_endpoint: &str) -> String {
    format!("{}@{}@{}", username, fqdn, api_endpoint)
}

/// Whether a known_hosts line is keyed on `host` or `[host]:port`.
///
/// Only the host field is compared: the first token, or the second after a
/// `@cert-authority`/`@revoked` marker, split on commas. Hashed entries and
/// comments never match.
fn entry_names_host(line: &str, host: &str, port: u16) -> bool {
    let mut fields = line.split_whitespace();
    let names = match fields.next() {
        Some(marker) if marker.starts_with('@') => fields.next(),
        other => other,
    };
    match names {
        Some(names) if !names.starts_with('#') => {
            let bracketed = format!("[{}]:{}", host, port);
            names.split(',').any(|name| name == host || name == bracketed)
        }
        _ => false,
    }
}

/// Remove the entries for `host` (plain or on `port`) from a known_hosts file.
///
/// A reinstalled app gets a fresh host key under the same name. Returns the
/// number of lines removed; a missing file removes nothing.
pub fn prune_known_hosts(path: &Path, host: &str, port: u16) -> E2eResult<usize> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let kept: Vec<&str> = text
        .lines()
        .filter(|l| !entry_names_host(l, host, port))
        .collect();
    let removed = text.lines().count() - kept.len();
    if removed > 0 {
        let mut out = kept.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        std::fs::write(path, out)?;
    }
    Ok(removed)
}

fn default_known_hosts() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
}

/// Upload `local_file` into `<remote_dir>/` of the app at `fqdn`
pub async fn upload_file(
    config: &SftpConfig,
    credentials: &SuiteCredentials,
    fqdn: &str,
    api_endpoint: &str,
    local_file: &Path,
) -> E2eResult<()> {
    let file_name = local_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| E2eError::Config(format!("not a file: {}", local_file.display())))?;
    let local_dir = match local_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if config.prune_known_hosts {
        if let Some(path) = default_known_hosts() {
            let removed = prune_known_hosts(&path, fqdn, config.port)?;
            if removed > 0 {
                debug!("Removed {} known_hosts line(s) for {}", removed, fqdn);
            }
        }
    }

    let target = login(&credentials.username, fqdn, api_endpoint);
    info!(
        "Uploading {} to {}:{} (port {})",
        file_name, target, config.remote_dir, config.port
    );

    let mut child = Command::new(&config.sshpass_binary)
        .arg("-e")
        .arg(&config.sftp_binary)
        .arg("-P")
        .arg(config.port.to_string())
        .args(["-o", "StrictHostKeyChecking=no"])
        .args(["-o", "HostKeyAlgorithms=+ssh-rsa"])
        .args(["-o", "BatchMode=no"])
        .args(["-b", "-"])
        .arg(&target)
        .env("SSHPASS", &credentials.password)
        .current_dir(&local_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| E2eError::CommandFailed {
            command: format!("{} -e {}", config.sshpass_binary, config.sftp_binary),
            status: "spawn error".to_string(),
            stderr: e.to_string(),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // sftp exits before reading the batch when login fails; its status says why
        let batch = batch_script(&config.remote_dir, &file_name);
        match stdin.write_all(batch.as_bytes()).await {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => {}
        }
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(E2eError::CommandFailed {
            command: format!(
                "{} -e {} -P {} -b - {}",
                config.sshpass_binary, config.sftp_binary, config.port, target
            ),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}
