//! Fakes for the external collaborators: a deployment CLI, a browser
//! driver and an `sftp` client, all plain shell scripts run through `sh`
//! from a temp directory, plus a local web server standing in for the app.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use lamp_e2e::config::{BrowserConfig, CliConfig, SftpConfig};
use lamp_e2e::{SuiteConfig, SuiteCredentials};

/// Keeps its state (current location, install counter, call log) next to itself
const FAKE_CLOUDRON: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
echo "$*" >> "$dir/calls.log"
cmd="$1"
case "$cmd" in
  install)
    n=$(cat "$dir/counter" 2>/dev/null || echo 0)
    n=$((n + 1))
    echo "$n" > "$dir/counter"
    while [ $# -gt 0 ]; do [ "$1" = "--location" ] && loc="$2"; shift; done
    echo "$loc" > "$dir/location"
    ;;
  configure)
    while [ $# -gt 0 ]; do [ "$1" = "--location" ] && loc="$2"; shift; done
    echo "$loc" > "$dir/location"
    ;;
  uninstall)
    rm -f "$dir/location"
    ;;
  inspect)
    if [ -f "$dir/location" ]; then
      loc=$(cat "$dir/location")
      n=$(cat "$dir/counter")
      fqdn="$loc.example.com"
      [ -f "$dir/fqdn-$loc" ] && fqdn=$(cat "$dir/fqdn-$loc")
      printf '{"apiEndpoint":"my.example.com","apps":[{"id":"app-%s","fqdn":"%s","location":"%s","manifest":{"id":"io.example.lamp"}},{"id":"other","fqdn":"blog.example.com","location":"blog"}]}\n' "$n" "$fqdn" "$loc"
    else
      printf '{"apiEndpoint":"my.example.com","apps":[]}\n'
    fi
    ;;
  backup)
    if [ "$2" = "list" ]; then
      printf '[{"id":"backup-2"},{"id":"backup-1"}]\n'
    fi
    ;;
  pull)
    printf '# phpMyAdmin login\n\nUser: admin\nPassword: secret\n' > "$5"
    ;;
  push)
    cp "$4" "$dir/pushed"
    ;;
  restart)
    if [ -f "$dir/restart-fails" ]; then
      echo "$cmd: no such app" >&2
      exit 3
    fi
    ;;
esac
exit 0
"#;

/// Runs as `sh -e sftp.sh <sftp args>`, i.e. in place of `sshpass -e sftp`
const FAKE_SFTP: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
echo "$*" > "$dir/sftp.args"
echo "pw=$SSHPASS" >> "$dir/sftp.args"
pwd > "$dir/sftp.cwd"
cat > "$dir/sftp.batch"
"#;

/// Answers every request; elements whose XPath mentions `nowhere` are never visible
const FAKE_DRIVER: &str = r#"#!/bin/sh
log="$(dirname "$0")/driver.log"
trap 'echo terminated > "$(dirname "$0")/terminated"; exit 0' TERM
echo 'starting fake driver'
echo '{"ready":true}'
while IFS= read -r line; do
  echo "$line" >> "$log"
  id=$(printf '%s\n' "$line" | sed -n 's/^{"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"op":"visible"'*nowhere*) echo "{\"id\":$id,\"ok\":true,\"value\":false}" ;;
    *'"op":"visible"'*) echo "{\"id\":$id,\"ok\":true,\"value\":true}" ;;
    *'"op":"close"'*) echo "{\"id\":$id,\"ok\":true,\"value\":null}"; exit 0 ;;
    *) echo "{\"id\":$id,\"ok\":true,\"value\":null}" ;;
  esac
done
"#;

pub struct FakePlatform {
    pub dir: TempDir,
}

impl FakePlatform {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cloudron.sh"), FAKE_CLOUDRON).unwrap();
        std::fs::write(dir.path().join("driver.sh"), FAKE_DRIVER).unwrap();
        std::fs::write(dir.path().join("sftp.sh"), FAKE_SFTP).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn cli_config(&self) -> CliConfig {
        CliConfig {
            program: "sh".to_string(),
            leading_args: vec![self.path().join("cloudron.sh").to_string_lossy().to_string()],
        }
    }

    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            node_binary: "sh".to_string(),
            driver_script: Some(self.path().join("driver.sh")),
            ..Default::default()
        }
    }

    /// `sh -e sftp.sh ...` stands in for `sshpass -e sftp ...`; the real
    /// known_hosts file is left alone
    pub fn sftp_config(&self) -> SftpConfig {
        SftpConfig {
            sshpass_binary: "sh".to_string(),
            sftp_binary: self.path().join("sftp.sh").to_string_lossy().to_string(),
            prune_known_hosts: false,
            ..Default::default()
        }
    }

    pub fn suite_config(&self) -> SuiteConfig {
        SuiteConfig {
            package_dir: self.path().to_path_buf(),
            output_dir: self.path().join("results"),
            element_timeout_secs: 1,
            cli: self.cli_config(),
            browser: self.browser_config(),
            sftp: self.sftp_config(),
            ..Default::default()
        }
    }

    /// Report `fqdn` for apps installed at `location`
    pub fn set_fqdn(&self, location: &str, fqdn: &str) {
        std::fs::write(self.path().join(format!("fqdn-{}", location)), fqdn).unwrap();
    }

    /// Make every `restart` exit non-zero
    pub fn fail_restarts(&self) {
        std::fs::write(self.path().join("restart-fails"), "").unwrap();
    }

    /// Arguments and `SSHPASS` of the last upload
    pub fn sftp_args(&self) -> Vec<String> {
        read_lines(&self.path().join("sftp.args"))
    }

    pub fn sftp_batch(&self) -> Option<String> {
        std::fs::read_to_string(self.path().join("sftp.batch")).ok()
    }

    pub fn sftp_cwd(&self) -> Option<String> {
        std::fs::read_to_string(self.path().join("sftp.cwd"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Deployment CLI invocations so far, one per line
    pub fn calls(&self) -> Vec<String> {
        read_lines(&self.path().join("calls.log"))
    }

    /// Requests the browser driver received
    pub fn driver_requests(&self) -> Vec<String> {
        read_lines(&self.path().join("driver.log"))
    }

    pub fn pushed(&self) -> Option<String> {
        std::fs::read_to_string(self.path().join("pushed")).ok()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(String::from).collect())
        .unwrap_or_default()
}

pub fn credentials() -> SuiteCredentials {
    SuiteCredentials::from_parts(Some("tester".into()), Some("hunter2".into())).unwrap()
}

// base64("admin:secret"), matching the login file the fake CLI pulls
const ADMIN_AUTH: &str = "Basic YWRtaW46c2VjcmV0";

/// Requests a stand-in app server answered
#[derive(Default)]
pub struct AppHits {
    pub root: AtomicUsize,
    pub admin_logins: AtomicUsize,
}

impl AppHits {
    pub fn root(&self) -> usize {
        self.root.load(Ordering::SeqCst)
    }

    pub fn admin_logins(&self) -> usize {
        self.admin_logins.load(Ordering::SeqCst)
    }
}

async fn app_root(State(hits): State<Arc<AppHits>>) -> &'static str {
    hits.root.fetch_add(1, Ordering::SeqCst);
    "Cloudron LAMP App"
}

/// phpMyAdmin titles its page after the host it was reached on
async fn app_phpmyadmin(State(hits): State<Arc<AppHits>>, headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(ADMIN_AUTH) => {
            hits.admin_logins.fetch_add(1, Ordering::SeqCst);
            Html(format!(
                "<html><head><title>{} / mysql | phpMyAdmin 5.2.1</title></head></html>",
                host
            ))
            .into_response()
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"phpMyAdmin\"")],
            "Unauthorized",
        )
            .into_response(),
    }
}

/// Start a stand-in app on a free local port; returns its `host:port`
pub async fn serve_app() -> (String, Arc<AppHits>) {
    let hits = Arc::new(AppHits::default());
    let app = Router::new()
        .route("/", get(app_root))
        .route("/phpmyadmin", get(app_phpmyadmin))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr.to_string(), hits)
}
