//! Startup configuration.
//!
//! All knobs come from environment variables with defaults, optionally
//! overridden by CLI flags, and are frozen at process start. The one
//! exception is the patient flag, which is an atomic read on every protocol
//! call so tool metadata always reflects the current mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default desktop Chrome user agent sent with every context.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/85.0.4183.102 Safari/537.36";

/// Chromium flags applied to every launched browser. The random debugging
/// port avoids conflicts between concurrently running tasks.
const BROWSER_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--disable-dev-shm-usage",
    "--remote-debugging-port=0",
];

/// Immutable startup parameters shared by every component.
#[derive(Debug)]
pub struct Config {
    /// Host the SSE transport binds to.
    pub host: String,
    /// Port the SSE transport listens on.
    pub port: u16,
    /// Browser window width in pixels.
    pub window_width: u32,
    /// Browser window height in pixels.
    pub window_height: u32,
    /// Browser locale, e.g. `en-US`.
    pub locale: String,
    /// User agent sent with every browser context.
    pub user_agent: String,
    /// Extra chromium arguments for every launched browser.
    pub browser_args: Vec<String>,
    /// Path to a Chrome executable, if the bridge should not use its default.
    pub chrome_path: Option<String>,
    /// Maximum agent steps per task; the only bound on task run length.
    pub max_agent_steps: u32,
    /// How long finished tasks are kept before the janitor evicts them.
    pub task_retention: Duration,
    /// Interval between janitor sweeps.
    pub sweep_interval: Duration,
    /// Rough completion estimate reported to clients when a task starts.
    pub estimated_task_seconds: u64,
    /// Suggested seconds between result polls.
    pub poll_interval_seconds: u64,
    /// Base URL of the external automation bridge.
    pub bridge_url: String,
    patient: AtomicBool,
}

impl Config {
    /// Build a configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            window_width: env_parsed("BROWSER_WINDOW_WIDTH", 1280),
            window_height: env_parsed("BROWSER_WINDOW_HEIGHT", 1100),
            locale: env_or("BROWSER_LOCALE", "en-US"),
            user_agent: env_or("BROWSER_USER_AGENT", DEFAULT_USER_AGENT),
            browser_args: BROWSER_ARGS.iter().map(|s| s.to_string()).collect(),
            chrome_path: std::env::var("CHROME_PATH").ok(),
            max_agent_steps: env_parsed("MAX_AGENT_STEPS", 10),
            task_retention: Duration::from_secs(env_parsed("TASK_EXPIRY_MINUTES", 60u64) * 60),
            sweep_interval: Duration::from_secs(env_parsed("CLEANUP_INTERVAL_SECONDS", 3600)),
            estimated_task_seconds: env_parsed("ESTIMATED_TASK_SECONDS", 60),
            poll_interval_seconds: 5,
            bridge_url: env_or("BRIDGE_URL", "http://127.0.0.1:9712"),
            patient: AtomicBool::new(parse_bool_env("PATIENT", false)),
        }
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            anyhow::bail!(
                "Invalid window dimensions: {}x{}",
                self.window_width,
                self.window_height
            );
        }
        if self.task_retention.is_zero() {
            anyhow::bail!("Task retention window must be positive");
        }
        Ok(())
    }

    /// Whether tool calls block until the task reaches a terminal state.
    ///
    /// Read per call, never cached by callers.
    pub fn patient_mode(&self) -> bool {
        self.patient.load(Ordering::Relaxed)
    }

    /// Flip the process-wide patient flag.
    pub fn set_patient_mode(&self, patient: bool) {
        self.patient.store(patient, Ordering::Relaxed);
    }
}

/// Read an environment variable, falling back to a default.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, falling back to a default on
/// absence or parse failure.
fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("Ignoring unparseable {}={:?}", key, value);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a boolean environment variable.
pub fn parse_bool_env(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

/// Accepted truthy spellings: true, yes, 1, y, on (any case).
fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "y" | "on"
    )
}
