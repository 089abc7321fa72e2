use std::path::PathBuf;
use std::process::Command;

use lamp_e2e::{LifecycleRunner, SuiteConfig, SuiteCredentials};

fn in_path(bin: &str) -> bool {
    Command::new("sh")
        .arg("-lc")
        .arg(format!("command -v {bin} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Full lifecycle against a real platform.
///
/// Needs `cloudron` logged in, `node` with Playwright, `sshpass`/`sftp`, and
/// USERNAME/PASSWORD set. The package directory defaults to the workspace
/// root and can be overridden with LAMP_PACKAGE_DIR.
///
/// Marked ignored because it installs and removes real apps.
#[tokio::test]
#[ignore]
async fn full_lifecycle_against_live_platform() {
    for bin in ["cloudron", "node", "sshpass", "sftp"] {
        if !in_path(bin) {
            eprintln!("Skipping: {bin} not available in PATH");
            return;
        }
    }
    let credentials = match SuiteCredentials::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Skipping: {e}");
            return;
        }
    };

    let package_dir = std::env::var_os("LAMP_PACKAGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .ancestors()
                .nth(2)
                .expect("crates/e2e sits two levels below the workspace root")
                .to_path_buf()
        });

    let config = SuiteConfig {
        package_dir,
        ..Default::default()
    };
    let runner = LifecycleRunner::new(config, credentials);
    let result = runner.run().await.expect("run lifecycle");
    runner.write_results(&result).expect("write results");

    let failures: Vec<_> = result.results.iter().filter(|r| !r.success).collect();
    assert!(result.success(), "lifecycle failed: {failures:?}");
}
