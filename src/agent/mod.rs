//! External automation boundary.
//!
//! The browser-automation reasoning itself lives outside this process; these
//! traits pin down exactly what the orchestration layer relies on: a factory
//! producing isolated browser/context pairs, an agent that runs an
//! instruction inside a context, and an observer fed one event per agent
//! step. The shipped implementation is [`bridge::BrowserBridge`].

mod bridge;

pub use bridge::BrowserBridge;

use async_trait::async_trait;

use crate::config::Config;

/// Browser launch/context parameters captured once from configuration.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub window_width: u32,
    pub window_height: u32,
    pub locale: String,
    pub user_agent: String,
    pub browser_args: Vec<String>,
    pub chrome_path: Option<String>,
}

impl BrowserProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_width: config.window_width,
            window_height: config.window_height,
            locale: config.locale.clone(),
            user_agent: config.user_agent.clone(),
            browser_args: config.browser_args.clone(),
            chrome_path: config.chrome_path.clone(),
        }
    }
}

/// A running browser instance owned by exactly one task.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    fn id(&self) -> &str;
    /// Release the browser. Idempotence is not required; callers close once.
    async fn close(&self) -> anyhow::Result<()>;
}

/// An isolated context within a browser, owned by the same task.
#[async_trait]
pub trait ContextHandle: Send + Sync {
    fn id(&self) -> &str;
    async fn close(&self) -> anyhow::Result<()>;
}

/// Produces the isolated session resources for one task.
///
/// Acquisition is two-phase so the caller can release exactly what was
/// acquired when the second phase fails.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn launch_browser(
        &self,
        profile: &BrowserProfile,
    ) -> anyhow::Result<Box<dyn BrowserHandle>>;

    async fn open_context(
        &self,
        browser: &dyn BrowserHandle,
        profile: &BrowserProfile,
    ) -> anyhow::Result<Box<dyn ContextHandle>>;
}

/// One agent step, reported as it completes.
#[derive(Debug, Clone)]
pub struct AgentStep {
    /// 1-based step index.
    pub number: u32,
    /// The agent's stated goal for the next step, when it exposes one.
    pub goal: Option<String>,
}

/// Final accounting reported once at agent termination.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub steps_taken: u64,
}

/// Receives progress callbacks during an agent run.
#[async_trait]
pub trait RunObserver: Send + Sync {
    /// Invoked once per completed agent step.
    async fn on_step(&self, step: AgentStep);
    /// Invoked exactly once when the agent terminates.
    async fn on_done(&self, summary: RunSummary);
}

/// The opaque automation capability.
///
/// Returns the raw result report as JSON; its shape is provider-defined and
/// only `task::runner::normalize_report` is allowed to interpret it.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(
        &self,
        instruction: &str,
        context: &dyn ContextHandle,
        max_steps: u32,
        observer: &dyn RunObserver,
    ) -> anyhow::Result<serde_json::Value>;
}

#[cfg(test)]
pub mod testing {
    //! Mock collaborators shared by runner and dispatcher tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Ordered log of lifecycle calls, shared across mock handles.
    pub type CallLog = Arc<Mutex<Vec<String>>>;

    pub struct MockBrowser {
        log: CallLog,
        fail_close: bool,
    }

    #[async_trait]
    impl BrowserHandle for MockBrowser {
        fn id(&self) -> &str {
            "mock-browser"
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("browser.close".to_string());
            if self.fail_close {
                anyhow::bail!("browser close refused");
            }
            Ok(())
        }
    }

    pub struct MockContext {
        log: CallLog,
        fail_close: bool,
    }

    #[async_trait]
    impl ContextHandle for MockContext {
        fn id(&self) -> &str {
            "mock-context"
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("context.close".to_string());
            if self.fail_close {
                anyhow::bail!("context close refused");
            }
            Ok(())
        }
    }

    /// Session factory with scriptable failure points.
    #[derive(Default)]
    pub struct MockFactory {
        pub log: CallLog,
        pub fail_browser: bool,
        pub fail_context: bool,
        pub fail_close: bool,
    }

    #[async_trait]
    impl SessionFactory for MockFactory {
        async fn launch_browser(
            &self,
            _profile: &BrowserProfile,
        ) -> anyhow::Result<Box<dyn BrowserHandle>> {
            if self.fail_browser {
                anyhow::bail!("no chromium available");
            }
            self.log.lock().unwrap().push("browser.launch".to_string());
            Ok(Box::new(MockBrowser {
                log: Arc::clone(&self.log),
                fail_close: self.fail_close,
            }))
        }

        async fn open_context(
            &self,
            _browser: &dyn BrowserHandle,
            _profile: &BrowserProfile,
        ) -> anyhow::Result<Box<dyn ContextHandle>> {
            if self.fail_context {
                anyhow::bail!("context allocation failed");
            }
            self.log.lock().unwrap().push("context.open".to_string());
            Ok(Box::new(MockContext {
                log: Arc::clone(&self.log),
                fail_close: self.fail_close,
            }))
        }
    }

    /// Agent that replays scripted steps, then either fails or returns a
    /// fixed report.
    pub struct MockAgent {
        pub steps: Vec<(u32, Option<String>)>,
        pub report: serde_json::Value,
        pub fail_with: Option<String>,
        pub invoked: Arc<AtomicBool>,
    }

    impl MockAgent {
        pub fn succeeding(report: serde_json::Value) -> Self {
            Self {
                steps: vec![(1, Some("open the page".to_string())), (2, None)],
                report,
                fail_with: None,
                invoked: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                steps: vec![(1, None)],
                report: serde_json::Value::Null,
                fail_with: Some(message.to_string()),
                invoked: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Agent for MockAgent {
        async fn run(
            &self,
            _instruction: &str,
            _context: &dyn ContextHandle,
            _max_steps: u32,
            observer: &dyn RunObserver,
        ) -> anyhow::Result<serde_json::Value> {
            self.invoked.store(true, Ordering::SeqCst);
            for (number, goal) in &self.steps {
                observer
                    .on_step(AgentStep {
                        number: *number,
                        goal: goal.clone(),
                    })
                    .await;
            }
            if let Some(message) = &self.fail_with {
                anyhow::bail!("{}", message.clone());
            }
            observer
                .on_done(RunSummary {
                    steps_taken: self.steps.len() as u64,
                })
                .await;
            Ok(self.report.clone())
        }
    }
}
