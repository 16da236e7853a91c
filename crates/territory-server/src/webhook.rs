//! Webhook delivery for assignment notifications.
//!
//! Posts `{phone, text, whatsapp_link}` as JSON to a configured URL. The
//! receiving side decides how to reach the user (a WhatsApp gateway, a
//! chat bot, a mail relay).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use territory_core::notify::{Contact, Notifier, NotifyError};

/// Bound on a single webhook call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Base of WhatsApp click-to-chat links.
const WHATSAPP_BASE: &str = "https://wa.me/";

/// Payload posted to the webhook.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    phone: &'a str,
    text: &'a str,
    whatsapp_link: String,
}

/// Sends notifications to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] if the HTTP client cannot be built.
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, contact: &Contact, text: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            phone: &contact.phone,
            text,
            whatsapp_link: whatsapp_link(&contact.phone, text)?.to_string(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }
        tracing::debug!(to = %contact.name, "webhook accepted notification");
        Ok(())
    }
}

/// WhatsApp click-to-chat link opening a chat with `phone` prefilled with
/// `text`. Only the digits of the phone number are kept.
///
/// # Errors
///
/// Returns [`NotifyError::MissingContact`] if the number has no digits.
pub fn whatsapp_link(phone: &str, text: &str) -> Result<Url, NotifyError> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(NotifyError::MissingContact {
            name: phone.to_owned(),
        });
    }
    Url::parse_with_params(&format!("{WHATSAPP_BASE}{digits}"), [("text", text)])
        .map_err(|e| NotifyError::Transport(format!("invalid WhatsApp link: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::SocketAddr;

    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn link_keeps_only_digits_and_encodes_text() {
        let link = whatsapp_link("+34 600-123-456", "Hola Ana").unwrap();
        assert_eq!(link.as_str(), "https://wa.me/34600123456?text=Hola+Ana");
    }

    #[test]
    fn link_needs_a_number() {
        assert!(matches!(
            whatsapp_link("sin teléfono", "Hola"),
            Err(NotifyError::MissingContact { .. })
        ));
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    fn contact() -> Contact {
        Contact {
            name: "Marta".to_owned(),
            phone: "600 123 456".to_owned(),
        }
    }

    #[tokio::test]
    async fn posts_phone_text_and_link() {
        let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let router = Router::new()
            .route(
                "/hook",
                post(
                    |State(tx): State<mpsc::UnboundedSender<serde_json::Value>>,
                     Json(body): Json<serde_json::Value>| async move {
                        tx.send(body).unwrap();
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(tx);
        let addr = serve(router).await;

        let notifier = WebhookNotifier::new(&format!("http://{addr}/hook")).unwrap();
        notifier.send(&contact(), "Territorio 7").await.unwrap();

        let body = rx.recv().await.unwrap();
        assert_eq!(body["phone"], "600 123 456");
        assert_eq!(body["text"], "Territorio 7");
        assert_eq!(
            body["whatsapp_link"],
            "https://wa.me/600123456?text=Territorio+7"
        );
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let router = Router::new().route(
            "/hook",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let addr = serve(router).await;

        let notifier = WebhookNotifier::new(&format!("http://{addr}/hook")).unwrap();
        let result = notifier.send(&contact(), "Territorio 7").await;
        assert!(matches!(result, Err(NotifyError::Rejected { status: 500 })));
    }
}
