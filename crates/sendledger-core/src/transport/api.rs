//! HTTP API transport (SendGrid v3 mail send).

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::{SendResult, Transport, TransportError};
use crate::render::{OutgoingMessage, SIGNATURE_CID};

/// Default mail-send endpoint.
pub const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Stateless API transport: one HTTP call per message.
#[derive(Clone)]
pub struct ApiTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl fmt::Debug for ApiTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiTransport")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ApiTransport {
    /// Creates a transport for `endpoint` authenticated with `api_key`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

impl Transport for ApiTransport {
    async fn connect(&mut self) -> SendResult {
        Ok(())
    }

    async fn send_message(&mut self, message: &OutgoingMessage) -> SendResult {
        let payload = Payload::from_message(message);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            debug!(recipient = %message.to, "API accepted message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let text = format!("status={} body={body}", status.as_u16());
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            Err(TransportError::auth(Some(status.as_u16()), text))
        } else {
            Err(TransportError::response(Some(status.as_u16()), text))
        }
    }

    async fn reset(&mut self) {}
}

fn map_request_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() || error.is_timeout() {
        TransportError::connection(error.to_string())
    } else {
        TransportError::response(error.status().map(|s| s.as_u16()), error.to_string())
    }
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    personalizations: [Personalization<'a>; 1],
    from: EmailField<'a>,
    reply_to: EmailField<'a>,
    subject: &'a str,
    content: [Content<'a>; 2],
    headers: Headers,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [EmailField<'a>; 1],
}

#[derive(Debug, Serialize)]
struct EmailField<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct Headers {
    #[serde(rename = "List-Unsubscribe")]
    list_unsubscribe: String,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    content: String,
    filename: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    disposition: &'static str,
    content_id: &'static str,
}

impl<'a> Payload<'a> {
    fn from_message(message: &'a OutgoingMessage) -> Self {
        Self {
            personalizations: [Personalization {
                to: [EmailField { email: &message.to }],
            }],
            from: EmailField {
                email: &message.from,
            },
            reply_to: EmailField {
                email: &message.reply_to,
            },
            subject: &message.subject,
            content: [
                Content {
                    kind: "text/plain",
                    value: &message.plain,
                },
                Content {
                    kind: "text/html",
                    value: &message.html,
                },
            ],
            headers: Headers {
                list_unsubscribe: message.list_unsubscribe(),
            },
            attachments: message
                .signature
                .iter()
                .map(|sig| Attachment {
                    content: STANDARD.encode(&sig.bytes),
                    filename: &sig.file_name,
                    kind: "image/png",
                    disposition: "inline",
                    content_id: SIGNATURE_CID,
                })
                .collect(),
        }
    }
}
