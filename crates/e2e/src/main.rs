//! Lifecycle validator entry point
//!
//! Runs the full install → configure → backup/restore → move → update →
//! uninstall sequence against a live platform.
//! Run with: USERNAME=... PASSWORD=... cargo run -p lamp-e2e -- --package-dir .

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lamp_e2e::config::{PASSWORD_ENV, USERNAME_ENV};
use lamp_e2e::{E2eError, E2eResult, LifecycleRunner, SuiteConfig, SuiteCredentials};

#[derive(Parser, Debug)]
#[command(name = "lamp-e2e")]
#[command(about = "Lifecycle validator for the LAMP app")]
struct Args {
    /// TOML config file layered over the defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the app package (the CLI runs here)
    #[arg(long)]
    package_dir: Option<PathBuf>,

    /// Location to install the app at
    #[arg(short, long)]
    location: Option<String>,

    /// Location the move step switches to
    #[arg(long)]
    moved_location: Option<String>,

    /// Deployment CLI program
    #[arg(long)]
    cli: Option<String>,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Element wait timeout in seconds
    #[arg(long)]
    element_timeout: Option<u64>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the step plan and exit
    #[arg(long)]
    list: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// SFTP username
    #[arg(long, env = USERNAME_ENV, hide_env_values = true)]
    username: Option<String>,

    /// SFTP password
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    password: Option<String>,
}

fn main() {
    let args = Args::parse();
    init_logging(args.json_logs);

    let config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if args.list {
        for (i, step) in lamp_e2e::steps::default_plan(&config).iter().enumerate() {
            println!("{:>2}. {}", i + 1, step);
        }
        return;
    }

    let credentials = match SuiteCredentials::from_parts(args.username.clone(), args.password.clone()) {
        Ok(c) => c,
        Err(e) => {
            println!("{}", e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(config, credentials)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_config(args: &Args) -> E2eResult<SuiteConfig> {
    let mut config = match &args.config {
        Some(path) => SuiteConfig::load(path)?,
        None => SuiteConfig::default(),
    };

    if let Some(dir) = &args.package_dir {
        config.package_dir = dir.clone();
    }
    if let Some(location) = &args.location {
        config.location = location.clone();
    }
    if let Some(location) = &args.moved_location {
        config.moved_location = location.clone();
    }
    if let Some(cli) = &args.cli {
        config.cli.program = cli.clone();
    }
    if let Some(engine) = &args.browser {
        config.browser.engine = engine.clone();
    }
    if args.headed {
        config.browser.headless = false;
    }
    if let Some(secs) = args.element_timeout {
        config.element_timeout_secs = secs;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }

    if !config.app.fixture.is_file() {
        return Err(E2eError::Config(format!(
            "fixture not found: {}",
            config.app.fixture.display()
        )));
    }
    config.validate()?;
    Ok(config)
}

async fn async_main(config: SuiteConfig, credentials: SuiteCredentials) -> E2eResult<bool> {
    let runner = LifecycleRunner::new(config, credentials);
    let results = runner.run().await?;
    runner.write_results(&results)?;
    Ok(results.success())
}
