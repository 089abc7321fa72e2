//! LAMP App Lifecycle Validator
//!
//! Drives the deployment CLI, a browser session, an HTTP client and an SFTP
//! channel through the full lifecycle of the packaged LAMP app, asserting
//! what the app serves after every mutating step.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Lifecycle Validator (Rust)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LifecycleRunner                                            │
//! │    ├── BrowserSession::launch() -> one Playwright driver    │
//! │    ├── execute_plan(plan, &mut SuiteContext, &browser)      │
//! │    └── write_results(SuiteResult)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuiteContext (threaded through every step)                 │
//! │    ├── current AppInstance { id, fqdn, location }           │
//! │    ├── api_endpoint, manifest_id, backup_id                 │
//! │    └── LifecycleState (absent → installed → … → absent)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Collaborators                                              │
//! │    ├── DeployCli      install/inspect/backup/restore/...    │
//! │    ├── BrowserSession goto, wait_for(Matcher), cookies      │
//! │    ├── http           basic-auth gate, restart health wait  │
//! │    └── sftp           fixture upload into the web root      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod config;
pub mod credentials;
pub mod deploy;
pub mod error;
pub mod http;
pub mod instance;
pub mod poll;
pub mod runner;
pub mod sftp;
pub mod steps;

pub use config::{SuiteConfig, SuiteCredentials};
pub use error::{E2eError, E2eResult};
pub use runner::LifecycleRunner;
pub use steps::{Step, SuiteContext};
