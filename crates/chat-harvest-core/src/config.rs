//! Harvest configuration: credentials, browser, detection and output settings.
//!
//! Loaded once from an INI file (with `CHAT_HARVEST__SECTION__KEY`
//! environment overrides) and validated before any navigation happens.

use std::{fmt, path::Path, path::PathBuf, time::Duration};

use config::{Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::{sentinel::DEFAULT_SENTINEL, types::Mode, Sentinel};

/// Environment override prefix.
pub const ENV_PREFIX: &str = "CHAT_HARVEST";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Missing credential: {0} is empty")]
    MissingCredential(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Login credentials from the `[credentials]` section.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    #[serde(alias = "Email")]
    email: String,
    #[serde(alias = "Password")]
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Both fields must be non-blank.
    ///
    /// # Errors
    /// Names the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.email.trim().is_empty() {
            return Err(ConfigError::MissingCredential("Email"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::MissingCredential("Password"));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `[browser]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub headless: bool,
    /// Chrome binary; located on PATH when unset.
    pub chrome_path: Option<PathBuf>,
    pub entry_url: String,
    pub extended_mode: bool,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            entry_url: "https://chat.deepseek.com/".to_string(),
            extended_mode: false,
        }
    }
}

/// `[detection]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    pub sentinel: String,
    pub wait_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub standard_timeout_secs: u64,
    pub extended_timeout_secs: u64,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            wait_timeout_secs: 15,
            poll_interval_secs: 2,
            standard_timeout_secs: 100,
            extended_timeout_secs: 150,
        }
    }
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub settle_secs: u64,
    pub mode_settle_secs: u64,
    pub turn_gap_secs: u64,
    pub priming_prompt: Option<String>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            settle_secs: 2,
            mode_settle_secs: 1,
            turn_gap_secs: 2,
            priming_prompt: None,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub save_responses: bool,
    pub save_transcript: bool,
    pub responses_path: PathBuf,
    pub transcript_path: PathBuf,
    pub diagnostics_dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            save_responses: true,
            save_transcript: true,
            responses_path: PathBuf::from("responses.txt"),
            transcript_path: PathBuf::from("conversation.txt"),
            diagnostics_dir: PathBuf::from("."),
        }
    }
}

/// Full configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    pub credentials: Credentials,
    #[serde(default)]
    pub browser: BrowserSection,
    #[serde(default)]
    pub detection: DetectionSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub output: OutputSection,
}

impl HarvestConfig {
    /// Load and validate an INI file, applying environment overrides.
    ///
    /// # Errors
    /// Returns error if the file is missing or malformed, a credential is
    /// empty, or the timing settings are inconsistent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Self::finish(config)
    }

    /// Parse and validate INI text, without environment overrides.
    ///
    /// # Errors
    /// Same as [`HarvestConfig::load`].
    pub fn from_ini_str(contents: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(File::from_str(contents, FileFormat::Ini))
            .build()?;
        Self::finish(config)
    }

    fn finish(config: config::Config) -> Result<Self, ConfigError> {
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        tracing::debug!(
            email = parsed.credentials.email(),
            headless = parsed.browser.headless,
            extended = parsed.browser.extended_mode,
            "Configuration loaded"
        );
        Ok(parsed)
    }

    /// Check credentials and timing consistency.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credentials.validate()?;
        self.detection_settings()?;
        if self.browser.entry_url.trim().is_empty() {
            return Err(ConfigError::Invalid("browser.entry_url is empty".into()));
        }
        Ok(())
    }

    /// Generation mode requested by the configuration.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        if self.browser.extended_mode {
            Mode::ExtendedReasoning
        } else {
            Mode::Standard
        }
    }

    /// Validated detector settings.
    ///
    /// # Errors
    /// Returns error if the sentinel is blank or the timings are inconsistent.
    pub fn detection_settings(&self) -> Result<DetectionSettings, ConfigError> {
        let d = &self.detection;
        let sentinel = Sentinel::new(d.sentinel.clone())
            .ok_or_else(|| ConfigError::Invalid("detection.sentinel is blank".into()))?;
        DetectionSettings {
            sentinel,
            wait_timeout: Duration::from_secs(d.wait_timeout_secs),
            poll_interval: Duration::from_secs(d.poll_interval_secs),
            standard_ceiling: Duration::from_secs(d.standard_timeout_secs),
            extended_ceiling: Duration::from_secs(d.extended_timeout_secs),
        }
        .validated()
    }

    /// Settings for the session manager.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            entry_url: self.browser.entry_url.clone(),
            wait_timeout: Duration::from_secs(self.detection.wait_timeout_secs),
            mode_settle: Duration::from_secs(self.run.mode_settle_secs),
            diagnostics_dir: self.output.diagnostics_dir.clone(),
        }
    }
}

/// Completion detector timing and marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionSettings {
    pub sentinel: Sentinel,
    /// Bound on every adapter-level wait (container, chat input).
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub standard_ceiling: Duration,
    pub extended_ceiling: Duration,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        let d = DetectionSection::default();
        Self {
            sentinel: Sentinel::default(),
            wait_timeout: Duration::from_secs(d.wait_timeout_secs),
            poll_interval: Duration::from_secs(d.poll_interval_secs),
            standard_ceiling: Duration::from_secs(d.standard_timeout_secs),
            extended_ceiling: Duration::from_secs(d.extended_timeout_secs),
        }
    }
}

impl DetectionSettings {
    /// Polling ceiling for a mode.
    #[must_use]
    pub const fn ceiling(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Standard => self.standard_ceiling,
            Mode::ExtendedReasoning => self.extended_ceiling,
        }
    }

    /// Enforce a non-zero interval below the standard ceiling and an extended
    /// ceiling strictly above the standard one.
    ///
    /// # Errors
    /// Returns the violated constraint.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be positive".into()));
        }
        if self.poll_interval >= self.standard_ceiling {
            return Err(ConfigError::Invalid(format!(
                "poll interval {:?} must be below the standard ceiling {:?}",
                self.poll_interval, self.standard_ceiling
            )));
        }
        if self.extended_ceiling <= self.standard_ceiling {
            return Err(ConfigError::Invalid(format!(
                "extended ceiling {:?} must exceed the standard ceiling {:?}",
                self.extended_ceiling, self.standard_ceiling
            )));
        }
        Ok(self)
    }
}

/// Session manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub entry_url: String,
    /// Bound on login-page waits and the post-login marker.
    pub wait_timeout: Duration,
    /// Delay before touching the mode toggle.
    pub mode_settle: Duration,
    /// Where diagnostic screenshots go.
    pub diagnostics_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let browser = BrowserSection::default();
        let run = RunSection::default();
        Self {
            entry_url: browser.entry_url,
            wait_timeout: Duration::from_secs(DetectionSection::default().wait_timeout_secs),
            mode_settle: Duration::from_secs(run.mode_settle_secs),
            diagnostics_dir: OutputSection::default().diagnostics_dir,
        }
    }
}
