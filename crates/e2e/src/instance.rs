//! App instance identity and lifecycle state

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{E2eError, E2eResult};

/// One deployed app instance as reported by `cloudron inspect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawApp")]
pub struct AppInstance {
    pub id: String,
    pub fqdn: String,
    pub location: String,
    /// App store id of the manifest the instance was installed from
    pub manifest_id: Option<String>,
}

impl AppInstance {
    /// `<scheme>://<fqdn><path>`
    pub fn url(&self, scheme: &str, path: &str) -> String {
        if path.is_empty() || path.starts_with('/') {
            format!("{}://{}{}", scheme, self.fqdn, path)
        } else {
            format!("{}://{}/{}", scheme, self.fqdn, path)
        }
    }
}

#[derive(Deserialize)]
struct RawApp {
    id: String,
    #[serde(default)]
    fqdn: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    manifest: Option<RawManifest>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    id: Option<String>,
}

impl From<RawApp> for AppInstance {
    fn from(raw: RawApp) -> Self {
        Self {
            id: raw.id,
            fqdn: raw.fqdn,
            location: raw.location,
            manifest_id: raw.manifest.and_then(|m| m.id),
        }
    }
}

/// Parsed `cloudron inspect` output
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectOutput {
    pub api_endpoint: String,
    #[serde(default)]
    pub apps: Vec<AppInstance>,
}

impl InspectOutput {
    pub fn parse(json: &str) -> E2eResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The single app at `location`; zero or several matches is an error
    pub fn app_at(&self, location: &str) -> E2eResult<&AppInstance> {
        let mut matches = self.apps.iter().filter(|a| a.location == location);
        match (matches.next(), matches.next()) {
            (Some(app), None) => Ok(app),
            (None, _) => Err(E2eError::InstanceLookup {
                location: location.to_string(),
                matches: 0,
            }),
            (Some(_), Some(_)) => Err(E2eError::InstanceLookup {
                location: location.to_string(),
                matches: self.apps.iter().filter(|a| a.location == location).count(),
            }),
        }
    }
}

/// One entry of `cloudron backup list --raw`
#[derive(Debug, Clone, Deserialize)]
pub struct BackupEntry {
    pub id: String,
}

/// Parse `backup list --raw` output, newest first, and return the newest id
pub fn newest_backup_id(json: &str) -> E2eResult<String> {
    let backups: Vec<BackupEntry> = serde_json::from_str(json)?;
    backups
        .into_iter()
        .next()
        .map(|b| b.id)
        .ok_or_else(|| E2eError::AssertionFailed("backup list is empty".into()))
}

/// Where an instance identity is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Absent,
    Installed,
    Configured,
    BackedUp,
    Restored,
    Moved,
    Updated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Installed => "installed",
            LifecycleState::Configured => "configured",
            LifecycleState::BackedUp => "backed-up",
            LifecycleState::Restored => "restored",
            LifecycleState::Moved => "moved",
            LifecycleState::Updated => "updated",
        };
        f.write_str(s)
    }
}

/// Mutations applied to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    Configure,
    Backup,
    Restore,
    Move,
    Update,
    Uninstall,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleEvent::Install => "install",
            LifecycleEvent::Configure => "configure",
            LifecycleEvent::Backup => "backup",
            LifecycleEvent::Restore => "restore",
            LifecycleEvent::Move => "move",
            LifecycleEvent::Update => "update",
            LifecycleEvent::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

impl LifecycleState {
    /// Apply `event`, rejecting transitions the lifecycle does not allow.
    ///
    /// The order is `installed -> configured* -> (backed-up -> restored)* ->
    /// moved? -> updated?`, and uninstall is allowed from any installed
    /// state. `has_backup` tells whether a backup was recorded for this run;
    /// a restore without one is invalid.
    pub fn advance(self, event: LifecycleEvent, has_backup: bool) -> E2eResult<Self> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        let next = match (self, event) {
            (S::Absent, E::Install) => S::Installed,
            (S::Absent, _) => return Err(self.invalid(event)),
            (_, E::Uninstall) => S::Absent,

            (S::Installed | S::Configured, E::Configure) => S::Configured,
            (S::Installed | S::Configured | S::Restored, E::Backup) => S::BackedUp,
            (S::BackedUp, E::Restore) if has_backup => S::Restored,
            (S::Installed | S::Configured | S::Restored, E::Move) => S::Moved,
            (S::Installed | S::Configured | S::Restored | S::Moved, E::Update) => S::Updated,
            _ => return Err(self.invalid(event)),
        };
        Ok(next)
    }

    fn invalid(self, event: LifecycleEvent) -> E2eError {
        E2eError::InvalidTransition {
            from: self.to_string(),
            event: event.to_string(),
        }
    }
}
