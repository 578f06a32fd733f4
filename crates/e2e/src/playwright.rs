//! Playwright browser automation.
//!
//! A small Node.js driver script is written to a temp dir and started once per
//! session. It owns one browser context and one page, reads newline-delimited
//! JSON commands on stdin and answers each with a JSON reply on stdout:
//!
//! ```text
//! → {"id":3,"op":"click","selector":"#login","timeout_ms":15000}
//! ← {"id":3,"ok":true,"value":null,"error":null}
//! ← {"id":4,"ok":false,"value":null,"error":{"kind":"timeout","message":"..."}}
//! ```
//!
//! The child process is killed on drop, so a session abandoned by a timeout
//! never outlives its owner.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};

use rolegate_common::{AuthError, AuthResult};

use crate::session::{BrowserSession, SessionLauncher, StorageSnapshot, WaitState};

const DRIVER_SCRIPT: &str = r#"
const playwright = require('playwright');
const readline = require('readline');

const options = JSON.parse(process.argv[2] || '{}');

function reply(id, ok, value, error) {
  process.stdout.write(JSON.stringify({
    id,
    ok,
    value: value === undefined ? null : value,
    error: error || null,
  }) + '\n');
}

function failure(err) {
  return {
    kind: err && err.name === 'TimeoutError' ? 'timeout' : 'error',
    message: String((err && err.message) || err),
  };
}

(async () => {
  const browser = await playwright[options.browser || 'chromium'].launch({
    headless: options.headless !== false,
  });
  const context = await browser.newContext({
    viewport: { width: options.width || 1280, height: options.height || 720 },
    ignoreHTTPSErrors: !!options.ignore_https_errors,
  });
  const page = await context.newPage();

  const ops = {
    goto: async (c) => {
      await page.goto(c.url, { waitUntil: 'domcontentloaded', timeout: c.timeout_ms });
      return page.url();
    },
    click: async (c) => {
      await page.click(c.selector, { timeout: c.timeout_ms });
      return null;
    },
    fill: async (c) => {
      await page.fill(c.selector, c.value, { timeout: c.timeout_ms });
      return null;
    },
    wait_for_selector: async (c) => {
      await page.waitForSelector(c.selector, { state: c.state, timeout: c.timeout_ms });
      return null;
    },
    wait_for_url: async (c) => {
      await page.waitForURL((url) => url.toString().startsWith(c.prefix), { timeout: c.timeout_ms });
      return page.url();
    },
    is_visible: async (c) => page.isVisible(c.selector),
    current_url: async () => page.url(),
    inner_text: async (c) => page.innerText(c.selector, { timeout: c.timeout_ms }),
    storage: async () => page.evaluate(() => {
      const dump = (store) => {
        const out = {};
        for (let i = 0; i < store.length; i++) {
          const key = store.key(i);
          out[key] = store.getItem(key);
        }
        return out;
      };
      return { local: dump(window.localStorage), session: dump(window.sessionStorage) };
    }),
  };

  reply(0, true, 'ready');

  const lines = readline.createInterface({ input: process.stdin });
  for await (const line of lines) {
    let cmd;
    try {
      cmd = JSON.parse(line);
    } catch (err) {
      continue;
    }
    if (cmd.op === 'close') {
      reply(cmd.id, true, null);
      break;
    }
    const op = ops[cmd.op];
    if (!op) {
      reply(cmd.id, false, null, { kind: 'error', message: 'unknown op: ' + cmd.op });
      continue;
    }
    try {
      reply(cmd.id, true, await op(cmd));
    } catch (err) {
      reply(cmd.id, false, null, failure(err));
    }
  }

  await browser.close();
})().catch((err) => {
  process.stderr.write(String((err && err.stack) || err) + '\n');
  process.exit(1);
});
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node_binary: PathBuf,
    /// `node_modules` directory that contains `playwright`
    pub node_modules: PathBuf,
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub ignore_https_errors: bool,
    /// Bound on browser start-up
    pub launch_timeout_ms: u64,
    /// Bound on page navigations
    pub navigation_timeout_ms: u64,
    /// Extra time granted to the driver beyond each command's own timeout
    pub command_grace_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            node_modules: PathBuf::from("node_modules"),
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            ignore_https_errors: true,
            launch_timeout_ms: 30_000,
            navigation_timeout_ms: 30_000,
            command_grace_ms: 5_000,
        }
    }
}

impl PlaywrightConfig {
    fn driver_options(&self) -> Value {
        json!({
            "browser": self.browser.as_str(),
            "headless": self.headless,
            "width": self.viewport_width,
            "height": self.viewport_height,
            "ignore_https_errors": self.ignore_https_errors,
        })
    }
}

/// Launches one Playwright driver process per session
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Spawn a driver and wait for its ready line
    pub async fn launch_session(&self) -> AuthResult<PlaywrightSession> {
        let script_dir = tempfile::tempdir().map_err(io_error)?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, DRIVER_SCRIPT).map_err(io_error)?;

        let node_modules = if self.config.node_modules.is_absolute() {
            self.config.node_modules.clone()
        } else {
            std::env::current_dir()
                .map_err(io_error)?
                .join(&self.config.node_modules)
        };

        debug!(
            script = %script_path.display(),
            browser = self.config.browser.as_str(),
            "starting Playwright driver"
        );

        let mut child = TokioCommand::new(&self.config.node_binary)
            .arg(&script_path)
            .arg(self.config.driver_options().to_string())
            .env("NODE_PATH", &node_modules)
            .current_dir(script_dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AuthError::Browser(format!(
                    "failed to spawn {}: {}",
                    self.config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AuthError::Browser("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AuthError::Browser("driver stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "rolegate::playwright", "{}", line);
                }
            });
        }

        let mut session = PlaywrightSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            navigation_timeout: Duration::from_millis(self.config.navigation_timeout_ms),
            command_grace: Duration::from_millis(self.config.command_grace_ms),
            closed: false,
            _script_dir: script_dir,
        };

        let launch_timeout = Duration::from_millis(self.config.launch_timeout_ms);
        match tokio::time::timeout(launch_timeout, session.read_reply(0)).await {
            Ok(Ok(_)) => {
                info!(browser = self.config.browser.as_str(), "Playwright session ready");
                Ok(session)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AuthError::timeout("launch Playwright browser", launch_timeout)),
        }
    }
}

#[async_trait]
impl SessionLauncher for PlaywrightLauncher {
    async fn launch(&self) -> AuthResult<Box<dyn BrowserSession>> {
        Ok(Box::new(self.launch_session().await?))
    }
}

/// A command sent to the driver
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Goto { url: &'a str, timeout_ms: u64 },
    Click { selector: &'a str, timeout_ms: u64 },
    Fill { selector: &'a str, value: &'a str, timeout_ms: u64 },
    WaitForSelector { selector: &'a str, state: &'static str, timeout_ms: u64 },
    WaitForUrl { prefix: &'a str, timeout_ms: u64 },
    IsVisible { selector: &'a str },
    CurrentUrl,
    InnerText { selector: &'a str, timeout_ms: u64 },
    Storage,
    Close,
}

impl DriverCommand<'_> {
    /// Loggable description; never includes filled values
    fn describe(&self) -> String {
        match self {
            DriverCommand::Goto { url, .. } => format!("navigate:{}", url),
            DriverCommand::Click { selector, .. } => format!("click:{}", selector),
            DriverCommand::Fill { selector, .. } => format!("fill:{}", selector),
            DriverCommand::WaitForSelector {
                selector, state, ..
            } => format!("wait:{}:{}", selector, state),
            DriverCommand::WaitForUrl { prefix, .. } => format!("wait-url:{}", prefix),
            DriverCommand::IsVisible { selector } => format!("visible:{}", selector),
            DriverCommand::CurrentUrl => "current-url".to_string(),
            DriverCommand::InnerText { selector, .. } => format!("text:{}", selector),
            DriverCommand::Storage => "storage".to_string(),
            DriverCommand::Close => "close".to_string(),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    command: &'a DriverCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<DriverFailure>,
}

#[derive(Debug, Deserialize)]
struct DriverFailure {
    kind: String,
    message: String,
}

impl DriverReply {
    fn into_result(self, operation: String, timeout: Duration) -> AuthResult<Value> {
        if self.ok {
            return Ok(self.value);
        }
        match self.error {
            Some(failure) if failure.kind == "timeout" => {
                Err(AuthError::timeout(operation, timeout))
            }
            Some(failure) => Err(AuthError::Browser(format!("{}: {}", operation, failure.message))),
            None => Err(AuthError::Browser(format!("{}: driver reported failure", operation))),
        }
    }
}

/// One live Playwright page
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    navigation_timeout: Duration,
    command_grace: Duration,
    closed: bool,
    _script_dir: TempDir,
}

impl PlaywrightSession {
    async fn request(
        &mut self,
        command: DriverCommand<'_>,
        timeout: Duration,
    ) -> AuthResult<Value> {
        if self.closed {
            return Err(AuthError::Browser("session already closed".to_string()));
        }

        self.next_id += 1;
        let id = self.next_id;
        let operation = command.describe();
        let mut line = serde_json::to_string(&Envelope { id, command: &command })
            .map_err(|e| AuthError::Browser(format!("encode {}: {}", operation, e)))?;
        line.push('\n');

        debug!(id, op = %operation, "driver command");
        self.stdin.write_all(line.as_bytes()).await.map_err(io_error)?;
        self.stdin.flush().await.map_err(io_error)?;

        let bound = timeout + self.command_grace;
        match tokio::time::timeout(bound, self.read_reply(id)).await {
            Ok(reply) => reply?.into_result(operation, timeout),
            Err(_) => Err(AuthError::timeout(operation, bound)),
        }
    }

    async fn read_reply(&mut self, id: u64) -> AuthResult<DriverReply> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(io_error)?
                .ok_or_else(|| AuthError::Browser("Playwright driver exited".to_string()))?;

            match serde_json::from_str::<DriverReply>(&line) {
                Ok(reply) if reply.id == id => return Ok(reply),
                Ok(reply) => debug!(expected = id, got = reply.id, "discarding stale driver reply"),
                Err(_) => debug!(target: "rolegate::playwright", "{}", line),
            }
        }
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn goto(&mut self, url: &str) -> AuthResult<()> {
        let timeout = self.navigation_timeout;
        self.request(DriverCommand::Goto { url, timeout_ms: millis(timeout) }, timeout)
            .await
            .map(|_| ())
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> AuthResult<()> {
        self.request(DriverCommand::Click { selector, timeout_ms: millis(timeout) }, timeout)
            .await
            .map(|_| ())
    }

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> AuthResult<()> {
        self.request(DriverCommand::Fill { selector, value, timeout_ms: millis(timeout) }, timeout)
            .await
            .map(|_| ())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> AuthResult<()> {
        self.request(
            DriverCommand::WaitForSelector {
                selector,
                state: state.as_str(),
                timeout_ms: millis(timeout),
            },
            timeout,
        )
        .await
        .map(|_| ())
    }

    async fn wait_for_url(&mut self, prefix: &str, timeout: Duration) -> AuthResult<String> {
        let value = self
            .request(DriverCommand::WaitForUrl { prefix, timeout_ms: millis(timeout) }, timeout)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_visible(&mut self, selector: &str) -> AuthResult<bool> {
        let timeout = self.command_grace;
        let value = self.request(DriverCommand::IsVisible { selector }, timeout).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn current_url(&mut self) -> AuthResult<String> {
        let timeout = self.command_grace;
        let value = self.request(DriverCommand::CurrentUrl, timeout).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn inner_text(&mut self, selector: &str, timeout: Duration) -> AuthResult<String> {
        let value = self
            .request(DriverCommand::InnerText { selector, timeout_ms: millis(timeout) }, timeout)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn storage(&mut self) -> AuthResult<StorageSnapshot> {
        let timeout = self.command_grace;
        let value = self.request(DriverCommand::Storage, timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| AuthError::Browser(format!("storage snapshot: {}", e)))
    }

    async fn close(&mut self) -> AuthResult<()> {
        if self.closed {
            return Ok(());
        }
        let grace = self.command_grace;
        if let Err(e) = self.request(DriverCommand::Close, grace).await {
            warn!(error = %e, "driver did not acknowledge close");
        }
        self.closed = true;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Playwright driver exited"),
            _ => {
                warn!("Playwright driver still running after close, killing");
                self.child.kill().await.map_err(io_error)?;
            }
        }
        Ok(())
    }
}

impl Drop for PlaywrightSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.child.start_kill();
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn io_error(e: std::io::Error) -> AuthError {
    AuthError::Browser(format!("driver I/O: {}", e))
}
