//! Error types for SMTP operations.

use std::fmt;
use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The point of the session at which a failure happened.
///
/// Callers use the stage to tell connection problems, credential problems and
/// per-message rejections apart without parsing error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// TCP connect or implicit TLS handshake.
    Connect,
    /// Server greeting (220).
    Greeting,
    /// EHLO exchange.
    Ehlo,
    /// STARTTLS upgrade.
    StartTls,
    /// AUTH exchange.
    Auth,
    /// MAIL FROM.
    MailFrom,
    /// RCPT TO.
    RcptTo,
    /// DATA command.
    Data,
    /// Message content and final reply.
    Message,
    /// QUIT.
    Quit,
}

impl Stage {
    /// Returns true for stages that happen while establishing the session.
    #[must_use]
    pub const fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Greeting | Self::Ehlo | Self::StartTls
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Greeting => "greeting",
            Self::Ehlo => "ehlo",
            Self::StartTls => "starttls",
            Self::Auth => "auth",
            Self::MailFrom => "mail-from",
            Self::RcptTo => "rcpt-to",
            Self::Data => "data",
            Self::Message => "message",
            Self::Quit => "quit",
        };
        f.write_str(name)
    }
}

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (includes the server closing the connection).
    #[error("I/O error during {stage}: {source}")]
    Io {
        /// Stage at which the transport failed.
        stage: Stage,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The server name is not usable for TLS verification.
    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// Operation did not complete within the configured timeout.
    #[error("Timed out during {0}")]
    Timeout(Stage),

    /// Server returned an error reply.
    #[error("SMTP error {code} during {stage}: {message}")]
    Reply {
        /// Stage that produced the reply.
        stage: Stage,
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text from the server.
        message: String,
    },

    /// Protocol error (unexpected or malformed response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// The session was closed and must be reopened.
    #[error("Session is closed")]
    Closed,
}

impl Error {
    /// Creates a reply error.
    #[must_use]
    pub fn reply(stage: Stage, code: u16, message: impl Into<String>) -> Self {
        Self::Reply {
            stage,
            code,
            message: message.into(),
        }
    }

    /// Wraps an I/O error with the stage it happened in.
    #[must_use]
    pub const fn io(stage: Stage, source: io::Error) -> Self {
        Self::Io { stage, source }
    }

    /// Returns the stage the error happened in, when known.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Io { stage, .. } | Self::Timeout(stage) | Self::Reply { stage, .. } => {
                Some(*stage)
            }
            Self::InvalidServerName(_)
            | Self::Protocol(_)
            | Self::InvalidAddress(_)
            | Self::NotSupported(_)
            | Self::Closed => None,
        }
    }

    /// Returns the server reply code, if the server sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Reply { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the credentials were refused.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Reply { stage: Stage::Auth, .. })
    }

    /// Returns true if the connection itself failed (connect, handshake,
    /// dropped socket or timeout), as opposed to the server answering with an
    /// error reply.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Timeout(_) | Self::InvalidServerName(_) | Self::Closed => true,
            Self::Reply { stage, .. } => stage.is_handshake(),
            Self::Protocol(_) | Self::InvalidAddress(_) | Self::NotSupported(_) => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn auth_reply_is_auth_failure() {
        let err = Error::reply(Stage::Auth, 535, "5.7.8 Username and Password not accepted");
        assert!(err.is_auth_failure());
        assert!(!err.is_connection_failure());
        assert_eq!(err.code(), Some(535));
    }

    #[test]
    fn handshake_reply_is_connection_failure() {
        let err = Error::reply(Stage::Greeting, 421, "Service not available");
        assert!(err.is_connection_failure());
        assert_eq!(err.stage(), Some(Stage::Greeting));
    }

    #[test]
    fn rcpt_reply_is_neither() {
        let err = Error::reply(Stage::RcptTo, 550, "5.1.1 user unknown");
        assert!(!err.is_connection_failure());
        assert!(!err.is_auth_failure());
        assert_eq!(err.stage(), Some(Stage::RcptTo));
    }

    #[test]
    fn io_error_is_connection_failure() {
        let err = Error::io(
            Stage::Message,
            io::Error::new(io::ErrorKind::UnexpectedEof, "closed"),
        );
        assert!(err.is_connection_failure());
        assert_eq!(err.code(), None);
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::RcptTo.to_string(), "rcpt-to");
        assert_eq!(Stage::StartTls.to_string(), "starttls");
    }
}
