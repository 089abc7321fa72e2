//! Playwright browser session
//!
//! One Node.js process runs a small Playwright driver for the whole suite.
//! Rust talks to it over line-delimited JSON: each request carries an `id`
//! and the driver answers with `{"id", "ok", "value" | "error"}`. Keeping
//! one process keeps one browser context, so cookies survive between
//! steps until they are cleared explicitly.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::error::{E2eError, E2eResult};
use crate::poll::{poll_until, POLL_INTERVAL};

/// Extra time a navigation may take on top of the element timeout
const NAVIGATION_ALLOWANCE: Duration = Duration::from_secs(30);

/// How long a dropped session gives the driver to close the browser after SIGTERM
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const DRIVER_JS: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

const reply = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

(async () => {
  const config = JSON.parse(process.argv[2]);
  const browser = await playwright[config.engine].launch({ headless: config.headless });
  const context = await browser.newContext({
    viewport: { width: config.width, height: config.height },
    ignoreHTTPSErrors: config.ignoreHttpsErrors,
  });
  const page = await context.newPage();
  reply({ ready: true });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    if (!line.trim()) continue;
    let req;
    try {
      req = JSON.parse(line);
    } catch (e) {
      reply({ id: null, ok: false, error: 'bad request: ' + e.message });
      continue;
    }
    try {
      let value = null;
      switch (req.op) {
        case 'goto':
          await page.goto(req.url, { timeout: config.navigationTimeoutMs });
          break;
        case 'visible':
          value = await page.locator('xpath=' + req.xpath).first().isVisible().catch(() => false);
          break;
        case 'clear_cookies':
          await context.clearCookies();
          break;
        case 'close':
          await browser.close();
          reply({ id: req.id, ok: true, value: null });
          process.exit(0);
        default:
          throw new Error('unknown op: ' + req.op);
      }
      reply({ id: req.id, ok: true, value });
    } catch (e) {
      reply({ id: req.id, ok: false, error: e.message });
    }
  }
  await browser.close();
})().catch((e) => {
  reply({ ready: false, error: e.message });
  process.exit(1);
});
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Engine {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Engine {
    fn as_str(&self) -> &'static str {
        match self {
            Engine::Chromium => "chromium",
            Engine::Firefox => "firefox",
            Engine::Webkit => "webkit",
        }
    }
}

impl FromStr for Engine {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Engine::Chromium),
            "firefox" => Ok(Engine::Firefox),
            "webkit" => Ok(Engine::Webkit),
            other => Err(E2eError::Config(format!("unknown browser engine: {}", other))),
        }
    }
}

/// What an assertion looks for on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// An element whose own text is exactly this
    TextEquals(String),
    /// An element whose own text contains this
    TextContains(String),
    /// A link whose text contains this
    LinkContains(String),
}

impl Matcher {
    pub fn xpath(&self) -> String {
        match self {
            Matcher::TextEquals(t) => format!("//*[text()={}]", xpath_literal(t)),
            Matcher::TextContains(t) => format!("//*[contains(text(), {})]", xpath_literal(t)),
            Matcher::LinkContains(t) => format!("//a[contains(text(), {})]", xpath_literal(t)),
        }
    }
}

impl std::fmt::Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::TextEquals(t) => write!(f, "text \"{}\"", t),
            Matcher::TextContains(t) => write!(f, "text containing \"{}\"", t),
            Matcher::LinkContains(t) => write!(f, "link containing \"{}\"", t),
        }
    }
}

/// Quote `s` as an XPath 1.0 string literal
fn xpath_literal(s: &str) -> String {
    if !s.contains('"') {
        format!("\"{}\"", s)
    } else if !s.contains('\'') {
        format!("'{}'", s)
    } else {
        let parts: Vec<String> = s.split('"').map(|p| format!("\"{}\"", p)).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverOp<'a> {
    Goto { url: &'a str },
    Visible { xpath: &'a str },
    ClearCookies,
    Close,
}

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    id: u64,
    #[serde(flatten)]
    op: DriverOp<'a>,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ready: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DriverLaunch {
    engine: &'static str,
    headless: bool,
    width: u32,
    height: u32,
    ignore_https_errors: bool,
    navigation_timeout_ms: u64,
}

struct DriverIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// The suite's single browser session
pub struct BrowserSession {
    child: Child,
    io: Mutex<DriverIo>,
    next_id: AtomicU64,
    request_timeout: Duration,
    closed: bool,
    // keeps the built-in driver script on disk while node runs it
    _script_dir: Option<tempfile::TempDir>,
}

impl BrowserSession {
    /// Spawn the driver and wait until the browser is up.
    ///
    /// `element_timeout` bounds navigation inside the driver; every driver
    /// exchange is bounded by it plus a navigation allowance.
    pub async fn launch(config: &BrowserConfig, element_timeout: Duration) -> E2eResult<Self> {
        let engine = Engine::from_str(&config.engine)?;
        let request_timeout = element_timeout + NAVIGATION_ALLOWANCE;

        let (script_path, script_dir) = match &config.driver_script {
            Some(path) => (path.clone(), None),
            None => {
                let dir = tempfile::tempdir()?;
                let path = dir.path().join("driver.js");
                std::fs::write(&path, DRIVER_JS)?;
                (path, Some(dir))
            }
        };

        let launch = DriverLaunch {
            engine: engine.as_str(),
            headless: config.headless,
            width: config.viewport_width,
            height: config.viewport_height,
            ignore_https_errors: config.ignore_https_errors,
            navigation_timeout_ms: element_timeout.as_millis() as u64,
        };

        let mut cmd = Command::new(&config.node_binary);
        cmd.arg(&script_path)
            .arg(serde_json::to_string(&launch)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(node_path) = &config.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        info!("Launching {} browser via {}", engine.as_str(), config.node_binary);
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                E2eError::BrowserNotFound
            } else {
                E2eError::Browser(format!("failed to spawn driver: {}", e))
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Browser("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Browser("driver stdout unavailable".into()))?;

        let session = Self {
            child,
            io: Mutex::new(DriverIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            next_id: AtomicU64::new(1),
            request_timeout,
            closed: false,
            _script_dir: script_dir,
        };

        session.wait_ready().await?;
        Ok(session)
    }

    async fn wait_ready(&self) -> E2eResult<()> {
        let mut io = self.io.lock().await;
        let reply = tokio::time::timeout(
            self.request_timeout,
            read_reply(&mut io.stdout, |r| r.ready.is_some()),
        )
        .await
        .map_err(|_| E2eError::Timeout("browser driver startup".into()))??;

        if reply.ready == Some(true) {
            Ok(())
        } else {
            Err(E2eError::Browser(
                reply.error.unwrap_or_else(|| "driver failed to start".into()),
            ))
        }
    }

    async fn request(&self, op: DriverOp<'_>) -> E2eResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&DriverRequest { id, op })?;
        line.push('\n');

        let mut io = self.io.lock().await;
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;

        let reply = tokio::time::timeout(
            self.request_timeout,
            read_reply(&mut io.stdout, |r| r.id == Some(id)),
        )
        .await
        .map_err(|_| E2eError::Timeout(format!("browser driver reply to request {}", id)))??;

        if reply.ok {
            Ok(reply.value)
        } else {
            Err(E2eError::Browser(
                reply.error.unwrap_or_else(|| "unknown driver error".into()),
            ))
        }
    }

    pub async fn goto(&self, url: &str) -> E2eResult<()> {
        debug!("Navigating to {}", url);
        self.request(DriverOp::Goto { url }).await.map(|_| ())
    }

    /// Whether an element matching `matcher` is currently visible
    pub async fn is_visible(&self, matcher: &Matcher) -> E2eResult<bool> {
        let xpath = matcher.xpath();
        let value = self.request(DriverOp::Visible { xpath: &xpath }).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Wait, bounded by `timeout`, for `matcher` to be visible on the current page
    pub async fn wait_for(&self, matcher: &Matcher, timeout: Duration) -> E2eResult<()> {
        poll_until(&matcher.to_string(), timeout, POLL_INTERVAL, || self.is_visible(matcher)).await
    }

    /// Navigate to `url` and wait for `matcher`
    pub async fn assert_page_contains(
        &self,
        url: &str,
        matcher: &Matcher,
        timeout: Duration,
    ) -> E2eResult<()> {
        self.goto(url).await?;
        self.wait_for(matcher, timeout).await.map_err(|e| match e {
            E2eError::Timeout(what) => E2eError::Timeout(format!("{} on {}", what, url)),
            other => other,
        })
    }

    pub async fn clear_cookies(&self) -> E2eResult<()> {
        debug!("Clearing browser cookies");
        self.request(DriverOp::ClearCookies).await.map(|_| ())
    }

    /// Close the browser and reap the driver
    pub async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.request(DriverOp::Close).await.map(|_| ());
        if let Err(e) = &result {
            warn!("Browser did not close cleanly: {}", e);
            let _ = self.child.start_kill();
        }
        let _ = self.child.wait().await;
        result
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        // Ask the driver to exit first so the browser gets torn down
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                    let deadline = std::time::Instant::now() + SHUTDOWN_GRACE;
                    while std::time::Instant::now() < deadline {
                        if let Ok(Some(_)) = self.child.try_wait() {
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(20));
                    }
                }
            }
        }

        // Force kill if still running
        let _ = self.child.start_kill();
    }
}

/// Read driver output until a reply satisfies `accept`; other lines are logged
async fn read_reply<F>(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    mut accept: F,
) -> E2eResult<DriverReply>
where
    F: FnMut(&DriverReply) -> bool,
{
    loop {
        let line = stdout
            .next_line()
            .await?
            .ok_or_else(|| E2eError::Browser("driver exited".into()))?;
        match serde_json::from_str::<DriverReply>(&line) {
            Ok(reply) if accept(&reply) => return Ok(reply),
            _ => debug!("driver: {}", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Matcher::TextEquals("this works".into()), r#"//*[text()="this works"]"# ; "exact text")]
    #[test_case(Matcher::TextContains("PHP Version:8.2".into()), r#"//*[contains(text(), "PHP Version:8.2")]"# ; "contains")]
    #[test_case(Matcher::LinkContains("ionCube Loader".into()), r#"//a[contains(text(), "ionCube Loader")]"# ; "link")]
    fn test_matcher_xpath(matcher: Matcher, expected: &str) {
        assert_eq!(matcher.xpath(), expected);
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("say \"hi\""), "'say \"hi\"'");
        assert_eq!(
            xpath_literal("it's \"x\""),
            "concat(\"it's \", '\"', \"x\", '\"', \"\")"
        );
    }

    #[test]
    fn test_request_wire_format() {
        let line = serde_json::to_string(&DriverRequest {
            id: 7,
            op: DriverOp::Visible { xpath: "//a" },
        })
        .unwrap();
        assert_eq!(line, r#"{"id":7,"op":"visible","xpath":"//a"}"#);

        let line = serde_json::to_string(&DriverRequest { id: 8, op: DriverOp::ClearCookies }).unwrap();
        assert_eq!(line, r#"{"id":8,"op":"clear_cookies"}"#);
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("Chrome".parse::<Engine>().unwrap(), Engine::Chromium);
        assert_eq!("webkit".parse::<Engine>().unwrap(), Engine::Webkit);
        assert!("lynx".parse::<Engine>().is_err());
    }
}
