//! Lifecycle steps
//!
//! Each step is one action against the deployment CLI, the browser or the
//! HTTP client, followed by an assertion. Steps share a [`SuiteContext`]
//! that tracks the current instance; any step that replaces the instance
//! stores the new identity before it returns.

use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::browser::{BrowserSession, Matcher};
use crate::config::{SuiteConfig, SuiteCredentials};
use crate::credentials::LoginFile;
use crate::deploy::DeployCli;
use crate::error::{E2eError, E2eResult};
use crate::http;
use crate::instance::{AppInstance, LifecycleEvent, LifecycleState};
use crate::sftp;

/// State threaded through every step of a run
pub struct SuiteContext {
    pub config: SuiteConfig,
    pub credentials: SuiteCredentials,
    pub cli: DeployCli,
    pub http: reqwest::Client,

    /// The instance assertions run against
    pub instance: Option<AppInstance>,

    /// Location the current instance is expected at
    pub location: String,

    pub api_endpoint: Option<String>,

    /// App store id of the package, kept across uninstall for the update phase
    pub manifest_id: Option<String>,

    pub backup_id: Option<String>,
    pub state: LifecycleState,
}

impl SuiteContext {
    pub fn new(config: SuiteConfig, credentials: SuiteCredentials) -> E2eResult<Self> {
        let cli = DeployCli::new(&config.cli, &config.package_dir);
        let http = http::client(config.http_timeout(), config.browser.ignore_https_errors)?;
        Ok(Self {
            location: config.location.clone(),
            config,
            credentials,
            cli,
            http,
            instance: None,
            api_endpoint: None,
            manifest_id: None,
            backup_id: None,
            state: LifecycleState::Absent,
        })
    }

    pub fn current(&self) -> E2eResult<&AppInstance> {
        self.instance.as_ref().ok_or(E2eError::NoCurrentInstance)
    }

    /// Check `event` is allowed now; returns the state to commit once the
    /// action succeeded
    /// Address of `path` on the current instance
    pub fn app_url(&self, path: &str) -> E2eResult<String> {
        Ok(self.current()?.url(&self.config.app.scheme, path))
    }

    fn check(&self, event: LifecycleEvent) -> E2eResult<LifecycleState> {
        self.state.advance(event, self.backup_id.is_some())
    }

    fn adopt(&mut self, app: AppInstance, api_endpoint: String) {
        if let Some(id) = &app.manifest_id {
            self.manifest_id = Some(id.clone());
        }
        info!("Current app: {} ({}) at {}", app.id, app.location, app.fqdn);
        self.location = app.location.clone();
        self.api_endpoint = Some(api_endpoint);
        self.instance = Some(app);
    }
}

/// One entry of the lifecycle plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Install,
    AppInfo,
    WelcomePage,
    UploadFile,
    UploadedFileExists,
    IonCube,
    PhpMyAdmin,
    SetPhpVersion(String),
    Restart,
    CheckPhpVersion(String),
    Backup,
    Restore,
    Move(String),
    Uninstall,
    InstallFromAppstore,
    Update,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Install => write!(f, "install app"),
            Step::AppInfo => write!(f, "can get app information"),
            Step::WelcomePage => write!(f, "can view welcome page"),
            Step::UploadFile => write!(f, "can upload file with sftp"),
            Step::UploadedFileExists => write!(f, "can get uploaded file"),
            Step::IonCube => write!(f, "can access ioncube"),
            Step::PhpMyAdmin => write!(f, "can access phpmyadmin"),
            Step::SetPhpVersion(v) => write!(f, "can change PHP version to {}", v),
            Step::Restart => write!(f, "can restart app"),
            Step::CheckPhpVersion(v) => write!(f, "can check PHP version {}", v),
            Step::Backup => write!(f, "backup app"),
            Step::Restore => write!(f, "restore app"),
            Step::Move(l) => write!(f, "move to location {}", l),
            Step::Uninstall => write!(f, "uninstall app"),
            Step::InstallFromAppstore => write!(f, "can install app for update"),
            Step::Update => write!(f, "can update"),
        }
    }
}

impl Step {
    pub async fn execute(&self, ctx: &mut SuiteContext, browser: &BrowserSession) -> E2eResult<()> {
        match self {
            Step::Install => install(ctx).await.map(|_| ()),
            Step::AppInfo => {
                let location = ctx.location.clone();
                inspect(ctx, &location).await.map(|_| ())
            }
            Step::WelcomePage => welcome_page(ctx, browser).await,
            Step::UploadFile => upload_fixture(ctx).await,
            Step::UploadedFileExists => uploaded_file_exists(ctx, browser).await,
            Step::IonCube => ioncube_loaded(ctx, browser).await,
            Step::PhpMyAdmin => phpmyadmin_login(ctx).await,
            Step::SetPhpVersion(v) => set_php_version(ctx, v).await,
            Step::Restart => restart(ctx).await,
            Step::CheckPhpVersion(v) => php_version_is(ctx, browser, v).await,
            Step::Backup => backup(ctx).await.map(|_| ()),
            Step::Restore => restore(ctx).await,
            Step::Move(l) => move_to(ctx, browser, l).await.map(|_| ()),
            Step::Uninstall => uninstall(ctx).await,
            Step::InstallFromAppstore => install_from_appstore(ctx).await.map(|_| ()),
            Step::Update => update(ctx).await,
        }
    }
}

/// The full lifecycle: first install, config changes, backup/restore, move,
/// uninstall, then a fresh app store install that is updated in place
pub fn default_plan(config: &SuiteConfig) -> Vec<Step> {
    let app = &config.app;
    vec![
        Step::Install,
        Step::AppInfo,
        Step::WelcomePage,
        Step::UploadFile,
        Step::UploadedFileExists,
        Step::IonCube,
        Step::PhpMyAdmin,
        Step::SetPhpVersion(app.initial_php_version.clone()),
        Step::Restart,
        Step::UploadedFileExists,
        Step::IonCube,
        Step::PhpMyAdmin,
        Step::SetPhpVersion(app.changed_php_version.clone()),
        Step::Restart,
        Step::CheckPhpVersion(app.changed_php_version.clone()),
        Step::Backup,
        Step::Restore,
        Step::UploadedFileExists,
        Step::CheckPhpVersion(app.changed_php_version.clone()),
        Step::Move(config.moved_location.clone()),
        Step::UploadedFileExists,
        Step::PhpMyAdmin,
        Step::CheckPhpVersion(app.changed_php_version.clone()),
        Step::Uninstall,
        Step::InstallFromAppstore,
        Step::AppInfo,
        Step::WelcomePage,
        Step::UploadFile,
        Step::Update,
        Step::UploadedFileExists,
        Step::PhpMyAdmin,
        Step::IonCube,
        Step::CheckPhpVersion(app.default_php_version.clone()),
        Step::Uninstall,
    ]
}

/// Resolve the single instance at `location` and make it current
pub async fn inspect(ctx: &mut SuiteContext, location: &str) -> E2eResult<AppInstance> {
    let (app, api_endpoint) = ctx.cli.find(location).await?;
    ctx.adopt(app.clone(), api_endpoint);
    Ok(app)
}

/// Install the package at the configured location
pub async fn install(ctx: &mut SuiteContext) -> E2eResult<AppInstance> {
    let next = ctx.check(LifecycleEvent::Install)?;
    let location = ctx.config.location.clone();

    ctx.cli.install(&location).await?;
    ctx.state = next;
    inspect(ctx, &location).await
}

/// Install the published app store build of the package
pub async fn install_from_appstore(ctx: &mut SuiteContext) -> E2eResult<AppInstance> {
    let next = ctx.check(LifecycleEvent::Install)?;
    let manifest_id = ctx.manifest_id.clone().ok_or_else(|| {
        E2eError::AssertionFailed("app store id unknown; no instance was inspected yet".into())
    })?;
    let location = ctx.config.location.clone();

    ctx.cli.install_from_appstore(&manifest_id, &location).await?;
    ctx.state = next;
    inspect(ctx, &location).await
}

pub async fn welcome_page(ctx: &SuiteContext, browser: &BrowserSession) -> E2eResult<()> {
    browser
        .assert_page_contains(
            &ctx.app_url("")?,
            &Matcher::TextContains(ctx.config.app.welcome_text.clone()),
            ctx.config.element_timeout(),
        )
        .await
}

/// Put the fixture script into the app's web root over SFTP
pub async fn upload_fixture(ctx: &SuiteContext) -> E2eResult<()> {
    let app = ctx.current()?;
    let api_endpoint = ctx.api_endpoint.as_deref().ok_or(E2eError::NoCurrentInstance)?;
    sftp::upload_file(
        &ctx.config.sftp,
        &ctx.credentials,
        &app.fqdn,
        api_endpoint,
        &ctx.config.app.fixture,
    )
    .await
}

fn fixture_url(ctx: &SuiteContext) -> E2eResult<String> {
    let name = ctx.config.app.fixture_name()?;
    ctx.app_url(&format!("/{}", name))
}

/// The uploaded script runs and reports the app's own address
pub async fn uploaded_file_exists(ctx: &SuiteContext, browser: &BrowserSession) -> E2eResult<()> {
    let app = ctx.current()?;
    let timeout = ctx.config.element_timeout();

    browser
        .assert_page_contains(
            &fixture_url(ctx)?,
            &Matcher::TextEquals(ctx.config.app.success_marker.clone()),
            timeout,
        )
        .await?;
    browser
        .wait_for(&Matcher::TextEquals(app.fqdn.clone()), timeout)
        .await
}

pub async fn ioncube_loaded(ctx: &SuiteContext, browser: &BrowserSession) -> E2eResult<()> {
    browser
        .assert_page_contains(
            &fixture_url(ctx)?,
            &Matcher::LinkContains(ctx.config.app.ioncube_text.clone()),
            ctx.config.element_timeout(),
        )
        .await
}

pub async fn php_version_is(
    ctx: &SuiteContext,
    browser: &BrowserSession,
    version: &str,
) -> E2eResult<()> {
    browser
        .assert_page_contains(
            &fixture_url(ctx)?,
            &Matcher::TextContains(format!("PHP Version:{}", version)),
            ctx.config.element_timeout(),
        )
        .await
}

/// phpMyAdmin sits behind basic auth using the password from the app's login file
pub async fn phpmyadmin_login(ctx: &SuiteContext) -> E2eResult<()> {
    let app = ctx.current()?;
    let cfg = &ctx.config.app;

    let dir = tempfile::tempdir()?;
    let local = dir.path().join("phpmyadmin_login.txt");
    ctx.cli.pull(&app.id, &cfg.phpmyadmin_login_file, &local).await?;
    let login = LoginFile::parse(&std::fs::read_to_string(&local)?);

    http::verify_basic_auth_gate(
        &ctx.http,
        &ctx.app_url(&cfg.phpmyadmin_path)?,
        &cfg.phpmyadmin_user,
        login.password()?,
        &http::admin_title(&app.fqdn, &cfg.phpmyadmin_product),
    )
    .await
}

/// Push a one-line `KEY=value` file to `remote_path` on the current instance
pub async fn set_config_value(
    ctx: &mut SuiteContext,
    remote_path: &str,
    key: &str,
    value: &str,
) -> E2eResult<()> {
    let next = ctx.check(LifecycleEvent::Configure)?;
    let app_id = ctx.current()?.id.clone();

    let dir = tempfile::tempdir()?;
    let local = dir.path().join(file_name_of(remote_path));
    std::fs::write(&local, format!("{}={}\n", key, value))?;

    ctx.cli.push(&app_id, &local, remote_path).await?;
    ctx.state = next;
    Ok(())
}

fn file_name_of(remote_path: &str) -> String {
    Path::new(remote_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config".to_string())
}

/// Select the PHP version the app activates on its next restart
pub async fn set_php_version(ctx: &mut SuiteContext, version: &str) -> E2eResult<()> {
    let remote = ctx.config.app.php_version_file.clone();
    let key = ctx.config.app.php_version_key.clone();
    info!("Setting {}={}", key, version);
    set_config_value(ctx, &remote, &key, version).await
}

/// Restart and wait until the app serves requests again
pub async fn restart(ctx: &SuiteContext) -> E2eResult<()> {
    let app = ctx.current()?;
    ctx.cli.restart(&app.id).await?;
    http::wait_for_app(&ctx.http, &ctx.app_url("")?, ctx.config.element_timeout()).await
}

/// Create a backup of the current instance and remember its id
pub async fn backup(ctx: &mut SuiteContext) -> E2eResult<String> {
    let next = ctx.check(LifecycleEvent::Backup)?;
    let app_id = ctx.current()?.id.clone();

    let backup_id = ctx.cli.backup_create(&app_id).await?;
    info!("Created backup {}", backup_id);
    ctx.backup_id = Some(backup_id.clone());
    ctx.state = next;
    Ok(backup_id)
}

/// Restore the last backup onto a freshly reinstalled instance
pub async fn restore(ctx: &mut SuiteContext) -> E2eResult<()> {
    let next = ctx.check(LifecycleEvent::Restore)?;
    let backup_id = ctx
        .backup_id
        .clone()
        .ok_or_else(|| E2eError::AssertionFailed("no backup to restore".into()))?;
    let old_id = ctx.current()?.id.clone();
    let location = ctx.location.clone();

    ctx.cli.uninstall(&old_id).await?;
    ctx.instance = None;
    ctx.cli.install(&location).await?;
    let fresh = inspect(ctx, &location).await?;
    if fresh.id == old_id {
        warn!("Reinstalled app kept id {}", old_id);
    }

    ctx.cli.restore(&fresh.id, &backup_id).await?;
    ctx.state = next;
    Ok(())
}

/// Move the current instance to `new_location`; old cookies are dropped first
pub async fn move_to(
    ctx: &mut SuiteContext,
    browser: &BrowserSession,
    new_location: &str,
) -> E2eResult<AppInstance> {
    let next = ctx.check(LifecycleEvent::Move)?;
    let app_id = ctx.current()?.id.clone();

    browser.clear_cookies().await?;
    ctx.cli.configure_location(&app_id, new_location).await?;
    let moved = inspect(ctx, new_location).await?;
    ctx.state = next;
    Ok(moved)
}

/// Update the current instance in place; identity is unchanged
pub async fn update(ctx: &mut SuiteContext) -> E2eResult<()> {
    let next = ctx.check(LifecycleEvent::Update)?;
    let location = ctx.current()?.location.clone();

    ctx.cli.update(&location).await?;
    ctx.state = next;
    Ok(())
}

pub async fn uninstall(ctx: &mut SuiteContext) -> E2eResult<()> {
    let next = ctx.check(LifecycleEvent::Uninstall)?;
    let app_id = ctx.current()?.id.clone();

    ctx.cli.uninstall(&app_id).await?;
    ctx.instance = None;
    ctx.backup_id = None;
    ctx.location = ctx.config.location.clone();
    ctx.state = next;
    Ok(())
}
