//! Deployment CLI wrapper
//!
//! Every lifecycle mutation goes through the platform's `cloudron` tool.
//! A non-zero exit is returned as [`E2eError::CommandFailed`] and is never
//! retried.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::debug;

use crate::config::CliConfig;
use crate::error::{E2eError, E2eResult};
use crate::instance::{newest_backup_id, AppInstance, InspectOutput};

/// Handle on the deployment CLI, run from the package directory
#[derive(Debug, Clone)]
pub struct DeployCli {
    program: String,
    leading_args: Vec<String>,
    workdir: PathBuf,
}

impl DeployCli {
    pub fn new(config: &CliConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            leading_args: config.leading_args.clone(),
            workdir: workdir.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(self.leading_args.iter().map(String::as_str));
        parts.extend(args.iter().copied());
        parts.join(" ")
    }

    /// Run and capture stdout
    async fn capture(&self, args: &[&str]) -> E2eResult<String> {
        let described = self.describe(args);
        debug!("Running: {}", described);

        let output = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| spawn_error(&described, e))?;

        if !output.status.success() {
            return Err(failed(
                described,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run with the CLI's progress output passed through to the terminal
    async fn stream(&self, args: &[&str]) -> E2eResult<()> {
        let described = self.describe(args);
        debug!("Running: {}", described);

        let status = self
            .command(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| spawn_error(&described, e))?;

        if !status.success() {
            return Err(failed(described, status, "see output above".to_string()));
        }
        Ok(())
    }

    /// All instances visible to the CLI plus the API endpoint
    pub async fn inspect(&self) -> E2eResult<InspectOutput> {
        let json = self.capture(&["inspect"]).await?;
        InspectOutput::parse(&json)
    }

    /// Resolve the one instance installed at `location`
    pub async fn find(&self, location: &str) -> E2eResult<(AppInstance, String)> {
        let inspect = self.inspect().await?;
        let app = inspect.app_at(location)?.clone();
        Ok((app, inspect.api_endpoint))
    }

    /// Install the package in the working directory
    pub async fn install(&self, location: &str) -> E2eResult<()> {
        self.stream(&["install", "--location", location]).await
    }

    /// Install the published app store version of `appstore_id`
    pub async fn install_from_appstore(&self, appstore_id: &str, location: &str) -> E2eResult<()> {
        self.stream(&["install", "--appstore-id", appstore_id, "--location", location])
            .await
    }

    pub async fn configure_location(&self, app_id: &str, location: &str) -> E2eResult<()> {
        self.stream(&["configure", "--location", location, "--app", app_id])
            .await
    }

    pub async fn restart(&self, app_id: &str) -> E2eResult<()> {
        self.capture(&["restart", "--app", app_id]).await.map(|_| ())
    }

    /// Create a backup and return the newest backup id for the app
    pub async fn backup_create(&self, app_id: &str) -> E2eResult<String> {
        self.stream(&["backup", "create", "--app", app_id]).await?;
        let json = self.capture(&["backup", "list", "--raw", "--app", app_id]).await?;
        newest_backup_id(&json)
    }

    pub async fn restore(&self, app_id: &str, backup_id: &str) -> E2eResult<()> {
        self.stream(&["restore", "--backup", backup_id, "--app", app_id])
            .await
    }

    /// Update in place; `app` may be an id or a location
    pub async fn update(&self, app: &str) -> E2eResult<()> {
        self.stream(&["update", "--app", app]).await
    }

    pub async fn uninstall(&self, app_id: &str) -> E2eResult<()> {
        self.stream(&["uninstall", "--app", app_id]).await
    }

    /// Copy a file out of the instance's storage
    pub async fn pull(&self, app_id: &str, remote: &str, local: &Path) -> E2eResult<()> {
        let local = local.to_string_lossy();
        self.capture(&["pull", "--app", app_id, remote, &local])
            .await
            .map(|_| ())
    }

    /// Copy a file into the instance's storage
    pub async fn push(&self, app_id: &str, local: &Path, remote: &str) -> E2eResult<()> {
        let local = local.to_string_lossy();
        self.capture(&["push", "--app", app_id, &local, remote])
            .await
            .map(|_| ())
    }
}

fn spawn_error(command: &str, e: std::io::Error) -> E2eError {
    E2eError::CommandFailed {
        command: command.to_string(),
        status: "spawn error".to_string(),
        stderr: e.to_string(),
    }
}

fn failed(command: String, status: ExitStatus, stderr: String) -> E2eError {
    E2eError::CommandFailed {
        command,
        status: status.to_string(),
        stderr,
    }
}
