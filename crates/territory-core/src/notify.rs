//! Assignment notifications.
//!
//! After a successful Assign the caller hands the [`Assignment`] to
//! [`Notifications::dispatch`], which renders the message with `minijinja`
//! and sends it through a [`Notifier`] on a spawned task. Notification
//! failures are logged and never reach the caller: the assignment has
//! already been committed.
//!
//! The default message is embedded from `templates/assignment.j2`. A
//! directory holding an `assignment.j2` overrides it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{Environment, context};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::calendar::format_dmy;
use crate::engine::Assignment;

const TEMPLATE_NAME: &str = "assignment";
const TEMPLATE_FILE: &str = "assignment.j2";
const EMBEDDED_TEMPLATE: &str = include_str!("../templates/assignment.j2");

/// Errors from composing or sending a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The template could not be loaded, parsed, or rendered.
    #[error("template error: {0}")]
    Template(String),

    /// The user has no phone number on file.
    #[error("user {name} has no phone number")]
    MissingContact {
        /// Display name of the user.
        name: String,
    },

    /// The delivery channel failed.
    #[error("notification transport failed: {0}")]
    Transport(String),

    /// The delivery channel answered with a non-success status.
    #[error("notification rejected with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },
}

impl From<minijinja::Error> for NotifyError {
    fn from(e: minijinja::Error) -> Self {
        Self::Template(e.to_string())
    }
}

/// Who a message goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Display name.
    pub name: String,
    /// Phone number as entered.
    pub phone: String,
}

/// A delivery channel for rendered messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to `contact`.
    async fn send(&self, contact: &Contact, text: &str) -> Result<(), NotifyError>;
}

/// Writes messages to the log and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, contact: &Contact, text: &str) -> Result<(), NotifyError> {
        info!(to = %contact.name, phone = %contact.phone, %text, "assignment notification");
        Ok(())
    }
}

/// Renders assignment messages.
#[derive(Debug)]
pub struct MessageComposer {
    env: Environment<'static>,
}

impl MessageComposer {
    /// Composer using the built-in message.
    pub fn embedded() -> Result<Self, NotifyError> {
        Self::from_source(EMBEDDED_TEMPLATE.to_owned())
    }

    /// Composer using `assignment.j2` from `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, NotifyError> {
        let path = dir.join(TEMPLATE_FILE);
        let source = std::fs::read_to_string(&path).map_err(|e| {
            NotifyError::Template(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_source(source)
    }

    /// Composer from an optional override directory.
    pub fn load(templates_dir: Option<&Path>) -> Result<Self, NotifyError> {
        templates_dir.map_or_else(Self::embedded, Self::from_dir)
    }

    fn from_source(source: String) -> Result<Self, NotifyError> {
        let mut env = Environment::new();
        env.add_template_owned(TEMPLATE_NAME, source)?;
        Ok(Self { env })
    }

    /// Render the message for an assignment.
    pub fn compose(&self, assignment: &Assignment) -> Result<String, NotifyError> {
        let territory = &assignment.territory;
        let template = self.env.get_template(TEMPLATE_NAME)?;
        let text = template.render(context! {
            name => assignment.user.name,
            number => territory.number,
            delivered_on => format_dmy(assignment.record.delivered_on),
            due_date => territory.due_date.map(format_dmy),
            special => territory.is_special_campaign,
            comment => territory.comment,
            document_url => territory.document_url,
        })?;
        Ok(text)
    }
}

/// Composer and channel bundled for the request path.
#[derive(Clone)]
pub struct Notifications {
    composer: Arc<MessageComposer>,
    notifier: Arc<dyn Notifier>,
}

impl core::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Notifications").finish_non_exhaustive()
    }
}

impl Notifications {
    /// Bundle a composer with a channel.
    pub fn new(composer: MessageComposer, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            composer: Arc::new(composer),
            notifier,
        }
    }

    /// Compose and send on a background task. Errors are logged.
    pub fn dispatch(&self, assignment: &Assignment) -> JoinHandle<()> {
        let this = self.clone();
        let assignment = assignment.clone();
        tokio::spawn(async move {
            let number = assignment.territory.number;
            match this.deliver(&assignment).await {
                Ok(()) => debug!(number, "assignment notification sent"),
                Err(e) => warn!(number, error = %e, "assignment notification failed"),
            }
        })
    }

    /// Compose and send, returning the outcome.
    pub async fn deliver(&self, assignment: &Assignment) -> Result<(), NotifyError> {
        let user = &assignment.user;
        let phone = user
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| NotifyError::MissingContact {
                name: user.name.clone(),
            })?;
        let text = self.composer.compose(assignment)?;
        let contact = Contact {
            name: user.name.clone(),
            phone: phone.to_owned(),
        };
        self.notifier.send(&contact, &text).await
    }
}
