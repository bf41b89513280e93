//! Page objects for server-rendered forms
//!
//! Scenarios read text from rendered pages through a [`PageDriver`]. The
//! bundled [`PlaywrightDriver`] generates a small Node script per lookup and
//! runs it with the Playwright package installed in the test environment.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Reads text from the page currently under test.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Wait until `selector` is present, then return its text.
    async fn text_when_present(&self, selector: &str, timeout: Duration) -> HarnessResult<String>;
}

/// The "verify your email" page shown after registration
pub struct VerifyEmailPage<D> {
    driver: D,
    timeout: Duration,
}

impl<D: PageDriver> VerifyEmailPage<D> {
    pub const INSTRUCTION_SELECTOR: &'static str = "#kc-form-wrapper > p";
    pub const ERROR_SELECTOR: &'static str = "#kc-error-message";

    pub fn new(driver: D) -> Self {
        Self {
            driver,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Instruction paragraph, once rendered
    pub async fn instruction_text(&self) -> HarnessResult<String> {
        self.driver
            .text_when_present(Self::INSTRUCTION_SELECTOR, self.timeout)
            .await
    }

    /// Error banner, once rendered
    pub async fn error_text(&self) -> HarnessResult<String> {
        self.driver.text_when_present(Self::ERROR_SELECTOR, self.timeout).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Page the driver reads from
    pub page_url: String,
    pub browser: Browser,
    pub headless: bool,
    /// Node executable
    pub node: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            page_url: "http://localhost:8080/realms/master/account".to_string(),
            browser: Browser::Chromium,
            headless: true,
            node: PathBuf::from("node"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScriptResult {
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct PlaywrightDriver {
    config: PlaywrightConfig,
}

impl PlaywrightDriver {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Script that opens the page, waits for `selector` to be attached and
    /// prints its text as a JSON line.
    pub fn build_script(&self, selector: &str, timeout: Duration) -> HarnessResult<String> {
        Ok(format!(
            r#"
const {{ {browser} }} = require('playwright');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const page = await browser.newPage();
  try {{
    await page.goto({url});
    const element = await page.waitForSelector({selector}, {{ state: 'attached', timeout: {timeout} }});
    const text = (await element.textContent()) || '';
    console.log(JSON.stringify({{ success: true, text: text.trim() }}));
  }} catch (error) {{
    console.log(JSON.stringify({{ success: false, error: error.message }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            url = serde_json::to_string(&self.config.page_url)?,
            selector = serde_json::to_string(selector)?,
            timeout = timeout.as_millis(),
        ))
    }

    async fn run_script(&self, script: &str) -> HarnessResult<String> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("page.js");
        tokio::fs::write(&script_path, script).await?;

        debug!("Running Playwright script: {}", script_path.display());

        let output = Command::new(&self.config.node)
            .arg(&script_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HarnessError::Page(format!("cannot run {}: {}", self.config.node.display(), e)))?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Pull the result out of the script's stdout (the last non-empty line)
fn parse_result(stdout: &str, selector: &str) -> HarnessResult<String> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| HarnessError::Page(format!("no output while reading {}", selector)))?;

    let result: ScriptResult = serde_json::from_str(line)?;
    if result.success {
        Ok(result.text.unwrap_or_default())
    } else {
        Err(HarnessError::Page(format!(
            "{}: {}",
            selector,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        )))
    }
}

#[async_trait]
impl PageDriver for PlaywrightDriver {
    async fn text_when_present(&self, selector: &str, timeout: Duration) -> HarnessResult<String> {
        let script = self.build_script(selector, timeout)?;
        let stdout = self.run_script(&script).await?;
        parse_result(&stdout, selector)
    }
}
