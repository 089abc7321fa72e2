//! Runs a lifecycle plan in order and records the outcome of each step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::browser::BrowserSession;
use crate::config::{SuiteConfig, SuiteCredentials};
use crate::error::E2eResult;
use crate::steps::{default_plan, Step, SuiteContext};

/// Result of executing one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub results: Vec<StepResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Execute `plan` against `ctx`, stopping at the first failing step.
///
/// Steps after a failure are counted as skipped and not executed.
pub async fn execute_plan(
    plan: &[Step],
    ctx: &mut SuiteContext,
    browser: &BrowserSession,
) -> SuiteResult {
    let started_at = Utc::now();
    let start = Instant::now();
    let mut results = Vec::with_capacity(plan.len());

    info!("Running {} step(s)...", plan.len());

    for step in plan {
        let name = step.to_string();
        info!("▶ {}", name);
        let step_start = Instant::now();
        let outcome = step.execute(ctx, browser).await;
        let duration_ms = step_start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!("✓ {} ({} ms)", name, duration_ms);
                results.push(StepResult {
                    name,
                    success: true,
                    duration_ms,
                    error: None,
                });
            }
            Err(e) => {
                error!("✗ {} - {}", name, e);
                results.push(StepResult {
                    name,
                    success: false,
                    duration_ms,
                    error: Some(e.to_string()),
                });
                break;
            }
        }
    }

    let passed = results.iter().filter(|r| r.success).count();
    let failed = results.len() - passed;
    let skipped = plan.len() - results.len();
    let duration_ms = start.elapsed().as_millis() as u64;

    info!("");
    info!(
        "Lifecycle results: {} passed, {} failed, {} skipped ({} ms)",
        passed, failed, skipped, duration_ms
    );

    SuiteResult {
        total: plan.len(),
        passed,
        failed,
        skipped,
        duration_ms,
        started_at,
        results,
    }
}

/// Owns the configuration of a run and the browser session's lifetime
pub struct LifecycleRunner {
    config: SuiteConfig,
    credentials: SuiteCredentials,
}

impl LifecycleRunner {
    pub fn new(config: SuiteConfig, credentials: SuiteCredentials) -> Self {
        Self { config, credentials }
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn plan(&self) -> Vec<Step> {
        default_plan(&self.config)
    }

    /// Run the default plan
    pub async fn run(&self) -> E2eResult<SuiteResult> {
        let plan = self.plan();
        self.run_plan(&plan).await
    }

    /// Run `plan` with a fresh context and browser session.
    ///
    /// The browser is closed whether or not the plan passed.
    pub async fn run_plan(&self, plan: &[Step]) -> E2eResult<SuiteResult> {
        let mut ctx = SuiteContext::new(self.config.clone(), self.credentials.clone())?;
        let mut browser =
            BrowserSession::launch(&self.config.browser, self.config.element_timeout()).await?;

        let result = execute_plan(plan, &mut ctx, &browser).await;

        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Some(app) = &ctx.instance {
            if !result.success() {
                warn!("App {} at {} was left installed", app.id, app.fqdn);
            }
        }

        Ok(result)
    }

    /// Write results as JSON into the output directory
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("lifecycle-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
