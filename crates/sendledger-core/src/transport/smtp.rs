//! SMTP mailbox transport.

use sendledger_smtp::{Address, Error as SmtpError, Session, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SendResult, Transport, TransportError};
use crate::render::OutgoingMessage;

/// When SMTP sessions are opened and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPolicy {
    /// One session reused across messages, reopened after a failure.
    #[default]
    Persistent,
    /// A fresh session for every message.
    PerMessage,
}

/// Sends through an SMTP server.
#[derive(Debug)]
pub struct SmtpTransport {
    config: SessionConfig,
    policy: SessionPolicy,
    session: Option<Session>,
}

impl SmtpTransport {
    /// Creates a transport; nothing is opened until [`Transport::connect`] or
    /// the first send.
    #[must_use]
    pub const fn new(config: SessionConfig, policy: SessionPolicy) -> Self {
        Self {
            config,
            policy,
            session: None,
        }
    }

    /// Session policy in use.
    #[must_use]
    pub const fn policy(&self) -> SessionPolicy {
        self.policy
    }

    async fn open(&self) -> Result<Session, TransportError> {
        Session::open(&self.config).await.map_err(map_error)
    }

    async fn close(session: Session) {
        if let Err(e) = session.quit().await {
            debug!(error = %e, "QUIT failed; dropping connection");
        }
    }
}

impl Transport for SmtpTransport {
    async fn connect(&mut self) -> SendResult {
        if self.policy == SessionPolicy::Persistent && self.session.is_none() {
            self.session = Some(self.open().await?);
        }
        Ok(())
    }

    async fn send_message(&mut self, message: &OutgoingMessage) -> SendResult {
        let from = Address::new(&message.from).map_err(map_error)?;
        let to = Address::new(&message.to).map_err(map_error)?;
        let body = message.to_mime();

        match self.policy {
            SessionPolicy::PerMessage => {
                if let Some(stale) = self.session.take() {
                    Self::close(stale).await;
                }
                let mut session = self.open().await?;
                let sent = session.send(&from, &to, body.as_bytes()).await;
                Self::close(session).await;
                sent.map_err(map_error)
            }
            SessionPolicy::Persistent => {
                let mut session = match self.session.take() {
                    Some(session) if session.is_open() => session,
                    _ => self.open().await?,
                };
                let sent = session.send(&from, &to, body.as_bytes()).await;
                if session.is_open() {
                    self.session = Some(session);
                } else {
                    warn!(recipient = %to, "SMTP session closed by failure");
                }
                sent.map_err(map_error)
            }
        }
    }

    async fn reset(&mut self) {
        if let Some(session) = self.session.take() {
            Self::close(session).await;
        }
    }
}

/// Translates a session error into the transport-neutral shape.
fn map_error(error: SmtpError) -> TransportError {
    let text = match &error {
        SmtpError::Reply { message, .. } => message.clone(),
        other => other.to_string(),
    };
    if error.is_auth_failure() {
        TransportError::auth(error.code(), text)
    } else if error.is_connection_failure() || matches!(error, SmtpError::NotSupported(_)) {
        TransportError {
            code: error.code(),
            ..TransportError::connection(text)
        }
    } else {
        TransportError::response(error.code(), text)
    }
}
