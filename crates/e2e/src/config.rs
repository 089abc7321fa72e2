//! Suite configuration
//!
//! Values come from three layers, later ones winning: built-in defaults,
//! an optional TOML file, and command-line flags applied by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};

/// Environment variable holding the SFTP username
pub const USERNAME_ENV: &str = "USERNAME";

/// Environment variable holding the SFTP password
pub const PASSWORD_ENV: &str = "PASSWORD";

/// Top-level configuration for a lifecycle run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Location the app is installed at
    pub location: String,

    /// Location the app is moved to by the move step
    pub moved_location: String,

    /// Package directory the deployment CLI runs in (holds the app manifest)
    pub package_dir: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,

    /// Upper bound for every element and health wait
    pub element_timeout_secs: u64,

    /// Per-request timeout for the HTTP client
    pub http_timeout_secs: u64,

    pub cli: CliConfig,
    pub browser: BrowserConfig,
    pub sftp: SftpConfig,
    pub app: AppConfig,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            location: "test".to_string(),
            moved_location: "test2".to_string(),
            package_dir: PathBuf::from("."),
            output_dir: PathBuf::from("test-results"),
            element_timeout_secs: 50,
            http_timeout_secs: 30,
            cli: CliConfig::default(),
            browser: BrowserConfig::default(),
            sftp: SftpConfig::default(),
            app: AppConfig::default(),
        }
    }
}

impl SuiteConfig {
    /// Parse a TOML document on top of the defaults
    pub fn from_toml(text: &str) -> E2eResult<Self> {
        let config: SuiteConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> E2eResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            E2eError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.location.is_empty() || self.moved_location.is_empty() {
            return Err(E2eError::Config("location must not be empty".into()));
        }
        if self.location == self.moved_location {
            return Err(E2eError::Config(format!(
                "moved_location must differ from location ('{}')",
                self.location
            )));
        }
        if self.cli.program.is_empty() {
            return Err(E2eError::Config("cli.program must not be empty".into()));
        }
        if !matches!(self.app.scheme.as_str(), "http" | "https") {
            return Err(E2eError::Config(format!(
                "app.scheme must be http or https, got '{}'",
                self.app.scheme
            )));
        }
        if self.element_timeout_secs == 0 {
            return Err(E2eError::Config("element_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// How to invoke the deployment CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Program to run, e.g. `cloudron` or `npx`
    pub program: String,

    /// Arguments placed before every subcommand, e.g. `["cloudron"]` for npx
    pub leading_args: Vec<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            program: "cloudron".to_string(),
            leading_args: Vec::new(),
        }
    }
}

/// Browser driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Node.js binary running the Playwright driver
    pub node_binary: String,

    /// Extra module search path so the driver can `require('playwright')`
    pub node_path: Option<PathBuf>,

    /// Run this driver script instead of the built-in one
    pub driver_script: Option<PathBuf>,

    /// chromium, firefox or webkit
    pub engine: String,

    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Accept self-signed certificates, in the browser and the HTTP checks
    pub ignore_https_errors: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            node_path: None,
            driver_script: None,
            engine: "chromium".to_string(),
            headless: true,
            viewport_width: 1280,
            viewport_height: 1024,
            ignore_https_errors: false,
        }
    }
}

/// File transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SftpConfig {
    pub sshpass_binary: String,
    pub sftp_binary: String,
    pub port: u16,

    /// Directory inside the app's storage the fixture lands in
    pub remote_dir: String,

    /// Drop `known_hosts` lines for the app's fqdn before connecting
    pub prune_known_hosts: bool,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            sshpass_binary: "sshpass".to_string(),
            sftp_binary: "sftp".to_string(),
            port: 222,
            remote_dir: "public".to_string(),
            prune_known_hosts: true,
        }
    }
}

/// What the app image is expected to serve
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scheme the app is reached over
    pub scheme: String,

    /// Text shown on the placeholder welcome page
    pub welcome_text: String,

    /// Script uploaded over SFTP and requested afterwards
    pub fixture: PathBuf,

    /// Literal line printed by the fixture
    pub success_marker: String,

    /// Link text phpinfo() renders for the ionCube loader
    pub ioncube_text: String,

    pub phpmyadmin_path: String,
    pub phpmyadmin_user: String,
    pub phpmyadmin_product: String,
    pub phpmyadmin_login_file: String,

    pub php_version_file: String,
    pub php_version_key: String,

    /// Version set before the first restart (the image default)
    pub initial_php_version: String,

    /// Version switched to and expected to survive backup/restore and move
    pub changed_php_version: String,

    /// Version a fresh install reports after an update
    pub default_php_version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            welcome_text: "Cloudron LAMP App".to_string(),
            fixture: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/test.php")),
            success_marker: "this works".to_string(),
            ioncube_text: "ionCube Loader".to_string(),
            phpmyadmin_path: "/phpmyadmin".to_string(),
            phpmyadmin_user: "admin".to_string(),
            phpmyadmin_product: "phpMyAdmin".to_string(),
            phpmyadmin_login_file: "/app/data/phpmyadmin_login.txt".to_string(),
            php_version_file: "/app/data/PHP_VERSION".to_string(),
            php_version_key: "PHP_VERSION".to_string(),
            initial_php_version: "8.3".to_string(),
            changed_php_version: "8.2".to_string(),
            default_php_version: "8.3".to_string(),
        }
    }
}

impl AppConfig {
    /// File name of the fixture as served under the web root
    pub fn fixture_name(&self) -> E2eResult<String> {
        self.fixture
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                E2eError::Config(format!("fixture has no file name: {}", self.fixture.display()))
            })
    }
}

/// SFTP login for the app's storage
#[derive(Clone)]
pub struct SuiteCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SuiteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SuiteCredentials {
    /// Build credentials from optional values, failing if either is missing or empty
    pub fn from_parts(username: Option<String>, password: Option<String>) -> E2eResult<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Ok(Self { username, password })
            }
            _ => Err(E2eError::MissingEnv(format!(
                "{} and {} env vars need to be set",
                USERNAME_ENV, PASSWORD_ENV
            ))),
        }
    }

    /// Read `USERNAME` and `PASSWORD` from the environment
    pub fn from_env() -> E2eResult<Self> {
        Self::from_parts(
            std::env::var(USERNAME_ENV).ok(),
            std::env::var(PASSWORD_ENV).ok(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_packaged_app() {
        let config = SuiteConfig::default();
        assert_eq!(config.location, "test");
        assert_eq!(config.moved_location, "test2");
        assert_eq!(config.element_timeout(), Duration::from_secs(50));
        assert_eq!(config.sftp.port, 222);
        assert_eq!(config.app.fixture_name().unwrap(), "test.php");
        assert!(config.app.fixture.exists());
    }

    #[test]
    fn test_toml_overlays_defaults() {
        let config = SuiteConfig::from_toml(
            r#"
location = "lamp"
moved_location = "lamp-moved"
element_timeout_secs = 10

[cli]
program = "npx"
leading_args = ["cloudron"]

[app]
changed_php_version = "8.1"
"#,
        )
        .unwrap();

        assert_eq!(config.location, "lamp");
        assert_eq!(config.cli.program, "npx");
        assert_eq!(config.cli.leading_args, vec!["cloudron".to_string()]);
        assert_eq!(config.app.changed_php_version, "8.1");
        // untouched sections keep their defaults
        assert_eq!(config.app.welcome_text, "Cloudron LAMP App");
        assert_eq!(config.sftp.remote_dir, "public");
    }

    #[test]
    fn test_rejects_identical_locations() {
        let err = SuiteConfig::from_toml("location = \"a\"\nmoved_location = \"a\"\n").unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert_eq!(SuiteConfig::default().app.scheme, "https");
        assert!(SuiteConfig::from_toml("[app]\nscheme = \"http\"\n").is_ok());
        let err = SuiteConfig::from_toml("[app]\nscheme = \"ftp\"\n").unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
    }

    #[test]
    fn test_credentials_require_both_values() {
        assert!(SuiteCredentials::from_parts(Some("u".into()), Some("p".into())).is_ok());

        let err = SuiteCredentials::from_parts(Some("u".into()), None).unwrap_err();
        assert_eq!(err.to_string(), "USERNAME and PASSWORD env vars need to be set");

        assert!(SuiteCredentials::from_parts(None, Some("p".into())).is_err());
        assert!(SuiteCredentials::from_parts(Some(String::new()), Some("p".into())).is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = SuiteCredentials::from_parts(Some("bob".into()), Some("hunter2".into())).unwrap();
        let shown = format!("{:?}", creds);
        assert!(shown.contains("bob"));
        assert!(!shown.contains("hunter2"));
    }
}
