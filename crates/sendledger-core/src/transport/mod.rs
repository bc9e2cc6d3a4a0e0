//! Transports.
//!
//! The run loop sees one operation, [`Transport::send_message`], which either
//! succeeds or yields a [`TransportError`]. Each adapter translates its own
//! failures into that shape.

mod api;
mod smtp;

use std::fmt;
use std::future::Future;

use crate::render::OutgoingMessage;

pub use api::{ApiTransport, SENDGRID_ENDPOINT};
pub use smtp::{SessionPolicy, SmtpTransport};

/// How a send failed, as far as the transport can tell structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials were rejected.
    Auth,
    /// The connection could not be opened or was lost.
    Connection,
    /// The provider answered with an error.
    Response,
}

/// A failed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Structural kind.
    pub kind: FailureKind,
    /// Provider status code, if any.
    pub code: Option<u16>,
    /// Provider text.
    pub text: String,
}

impl TransportError {
    /// Authentication failure.
    #[must_use]
    pub fn auth(code: Option<u16>, text: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Auth,
            code,
            text: text.into(),
        }
    }

    /// Connection failure.
    #[must_use]
    pub fn connection(text: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Connection,
            code: None,
            text: text.into(),
        }
    }

    /// Error response.
    #[must_use]
    pub fn response(code: Option<u16>, text: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Response,
            code,
            text: text.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code} {}", self.text),
            None => f.write_str(&self.text),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outcome of one send.
pub type SendResult = std::result::Result<(), TransportError>;

/// A way to deliver messages.
pub trait Transport: Send {
    /// Prepares the transport before the first attempt (opens persistent
    /// sessions). A no-op for stateless transports.
    fn connect(&mut self) -> impl Future<Output = SendResult> + Send;

    /// Delivers one message.
    fn send_message(&mut self, message: &OutgoingMessage)
    -> impl Future<Output = SendResult> + Send;

    /// Drops any session so the next send starts fresh.
    fn reset(&mut self) -> impl Future<Output = ()> + Send;
}

/// The transport selected by a campaign's provider.
#[derive(Debug)]
pub enum ProviderTransport {
    /// SMTP mailbox.
    Smtp(SmtpTransport),
    /// HTTP API.
    Api(ApiTransport),
}

impl Transport for ProviderTransport {
    async fn connect(&mut self) -> SendResult {
        match self {
            Self::Smtp(t) => t.connect().await,
            Self::Api(t) => t.connect().await,
        }
    }

    async fn send_message(&mut self, message: &OutgoingMessage) -> SendResult {
        match self {
            Self::Smtp(t) => t.send_message(message).await,
            Self::Api(t) => t.send_message(message).await,
        }
    }

    async fn reset(&mut self) {
        match self {
            Self::Smtp(t) => t.reset().await,
            Self::Api(t) => t.reset().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        assert_eq!(
            TransportError::response(Some(550), "5.1.1 no such user").to_string(),
            "550 5.1.1 no such user"
        );
        assert_eq!(TransportError::connection("reset").to_string(), "reset");
    }

    #[test]
    fn test_constructors_set_kind() {
        assert_eq!(TransportError::auth(Some(535), "x").kind, FailureKind::Auth);
        assert_eq!(TransportError::connection("x").code, None);
        assert_eq!(TransportError::response(None, "x").kind, FailureKind::Response);
    }
}
