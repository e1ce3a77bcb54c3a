//! Chrome process launch and DevTools endpoint discovery.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, Command},
};

use crate::error::BrowserError;

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// Names tried on PATH when no explicit binary is configured.
const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

#[cfg(target_os = "macos")]
const MACOS_CHROME: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

/// How to start Chrome.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit binary; searched on PATH when `None`.
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    /// Bound on waiting for the DevTools endpoint.
    pub startup_timeout: Duration,
    pub window_size: (u32, u32),
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            startup_timeout: Duration::from_secs(30),
            window_size: (1280, 900),
        }
    }
}

/// Running Chrome with its throwaway profile.
pub struct ChromeProcess {
    child: Child,
    ws_url: String,
    // Removed on drop, after the process is gone.
    _profile: TempDir,
}

impl ChromeProcess {
    /// Browser-level DevTools WebSocket URL.
    #[must_use]
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Wait briefly for a clean exit, then kill and reap.
    pub async fn shutdown(mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "Chrome exited");
                return;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait on Chrome"),
            Err(_) => tracing::debug!(?grace, "Chrome still running, killing"),
        }
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "Failed to kill Chrome");
        }
    }
}

/// Resolve the Chrome binary.
///
/// An explicit path must exist. Otherwise the usual names are looked up on
/// PATH.
///
/// # Errors
/// Returns error if no binary is found.
pub async fn resolve_chrome(explicit: Option<&Path>) -> Result<PathBuf, BrowserError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        if let Some(found) = which_async(path.as_os_str().to_string_lossy().into_owned()).await {
            return Ok(found);
        }
        return Err(BrowserError::ExecutableNotFound(path.display().to_string()));
    }

    for name in CHROME_CANDIDATES {
        if let Some(found) = which_async((*name).to_string()).await {
            return Ok(found);
        }
    }

    #[cfg(target_os = "macos")]
    if Path::new(MACOS_CHROME).is_file() {
        return Ok(PathBuf::from(MACOS_CHROME));
    }

    Err(BrowserError::ExecutableNotFound(CHROME_CANDIDATES.join(", ")))
}

async fn which_async(executable: String) -> Option<PathBuf> {
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Command-line flags for a fresh, debuggable instance.
#[must_use]
pub fn chrome_args(options: &LaunchOptions, profile: &Path) -> Vec<String> {
    let (width, height) = options.window_size;
    let mut args = vec![
        "--remote-debugging-port=0".to_string(),
        format!("--user-data-dir={}", profile.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        format!("--window-size={width},{height}"),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Start Chrome and wait for its DevTools endpoint.
///
/// # Errors
/// Returns error if Chrome cannot be found or started, or never announces an
/// endpoint.
pub async fn launch(options: &LaunchOptions) -> Result<ChromeProcess, BrowserError> {
    let program = resolve_chrome(options.chrome_path.as_deref()).await?;
    let profile = tempfile::Builder::new().prefix("chat-harvest-").tempdir()?;

    let mut child = Command::new(&program)
        .args(chrome_args(options, profile.path()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    tracing::info!(program = %program.display(), headless = options.headless, "Chrome started");

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BrowserError::Protocol("Chrome stderr was not captured".into()))?;

    let ws_url = match tokio::time::timeout(options.startup_timeout, read_endpoint(stderr)).await
    {
        Ok(Ok(url)) => url,
        Ok(Err(e)) => {
            let _ = child.kill().await;
            return Err(e);
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(BrowserError::StartupTimeout(options.startup_timeout));
        }
    };
    tracing::debug!(%ws_url, "DevTools endpoint ready");

    Ok(ChromeProcess {
        child,
        ws_url,
        _profile: profile,
    })
}

/// Read stderr until the endpoint line, then keep draining it in the
/// background so Chrome never blocks on a full pipe.
async fn read_endpoint(stderr: ChildStderr) -> Result<String, BrowserError> {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        let Some(line) = lines.next_line().await? else {
            return Err(BrowserError::NoDevToolsEndpoint);
        };
        if let Some(url) = parse_devtools_line(&line) {
            let url = url.to_string();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!(target: "chrome", "{line}");
                }
            });
            return Ok(url);
        }
        tracing::trace!(target: "chrome", "{line}");
    }
}

/// Extract the WebSocket URL from Chrome's startup banner.
#[must_use]
pub fn parse_devtools_line(line: &str) -> Option<&str> {
    let url = line.trim().strip_prefix(DEVTOOLS_PREFIX)?.trim();
    url.starts_with("ws://").then_some(url)
}

/// Page endpoint on the same DevTools server as `browser_url`.
#[must_use]
pub fn page_ws_url(browser_url: &str, target_id: &str) -> Option<String> {
    let base = &browser_url[..browser_url.find("/devtools/")?];
    Some(format!("{base}/devtools/page/{target_id}"))
}
