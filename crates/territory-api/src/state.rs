//! Shared application state for the HTTP API.
//!
//! Handlers hold an `Arc<AppState>`; the engine itself is stateless apart
//! from its collaborators, so requests run fully in parallel.

use std::sync::Arc;

use territory_core::LifecycleEngine;
use territory_core::config::ReportConfig;
use territory_core::notify::Notifications;

/// State shared by every handler.
#[derive(Debug)]
pub struct AppState {
    /// The lifecycle engine.
    pub engine: Arc<LifecycleEngine>,
    /// Assignment notifications; `None` disables them.
    pub notifications: Option<Notifications>,
    /// History report settings.
    pub report: ReportConfig,
}

impl AppState {
    /// State with notifications disabled and default report settings.
    pub fn new(engine: Arc<LifecycleEngine>) -> Self {
        Self {
            engine,
            notifications: None,
            report: ReportConfig::default(),
        }
    }

    /// Send a message for every successful assignment.
    #[must_use]
    pub fn with_notifications(mut self, notifications: Notifications) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Use `report` for history downloads.
    #[must_use]
    pub fn with_report_config(mut self, report: ReportConfig) -> Self {
        self.report = report;
        self
    }
}
