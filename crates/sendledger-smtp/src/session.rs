//! A reusable submission session.
//!
//! A [`Session`] is opened once (connect, greeting, EHLO, optional STARTTLS
//! and AUTH) and can then carry any number of single-recipient messages.
//! Every network step is bounded by the configured timeout. Any I/O failure
//! or timeout closes the session; the caller decides whether to reopen it.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use tracing::{debug, trace};

use crate::address::Address;
use crate::command::Command;
use crate::error::{Error, Result, Stage};
use crate::reply::{Reply, ReplyCode, is_last_reply_line, parse_reply};
use crate::stream::{SmtpStream, connect, connect_tls, server_name};

/// Default per-step network timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plain text. Only meant for local relays and tests.
    None,
    /// Plain connection upgraded with STARTTLS (port 587).
    #[default]
    StartTls,
    /// Implicit TLS (port 465).
    Tls,
}

/// Username and password for AUTH PLAIN.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    fn plain_response(&self) -> String {
        let raw = format!("\0{}\0{}", self.username, self.password);
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection security.
    pub security: Security,
    /// Credentials, if the server requires authentication.
    pub credentials: Option<Credentials>,
    /// Hostname announced in EHLO.
    pub client_hostname: String,
    /// Timeout applied to each network step.
    pub timeout: Duration,
}

impl SessionConfig {
    /// Creates a config with STARTTLS, no credentials and the default timeout.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            security: Security::default(),
            credentials: None,
            client_hostname: "localhost".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// An open SMTP session.
#[derive(Debug)]
pub struct Session {
    stream: Option<SmtpStream>,
    extensions: Vec<String>,
    timeout: Duration,
}

impl Session {
    /// Connects, reads the greeting, negotiates TLS and authenticates.
    ///
    /// # Errors
    ///
    /// Returns an error tagged with the failing [`Stage`]. A rejected login is
    /// reported as a reply error at [`Stage::Auth`].
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let timeout = config.timeout;
        debug!(host = %config.host, port = config.port, security = ?config.security, "Opening SMTP session");

        let connected = match config.security {
            Security::Tls => {
                let name = server_name(&config.host)
                    .ok_or_else(|| Error::InvalidServerName(config.host.clone()))?;
                tokio::time::timeout(timeout, connect_tls(&config.host, config.port, name)).await
            }
            Security::None | Security::StartTls => {
                tokio::time::timeout(timeout, connect(&config.host, config.port)).await
            }
        };
        let stream = connected
            .map_err(|_| Error::Timeout(Stage::Connect))?
            .map_err(|e| Error::io(Stage::Connect, e))?;

        let mut session = Self {
            stream: Some(stream),
            extensions: Vec::new(),
            timeout,
        };

        let greeting = session.receive(Stage::Greeting).await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(reply_error(Stage::Greeting, &greeting));
        }

        session.ehlo(&config.client_hostname).await?;

        if config.security == Security::StartTls {
            if !session.supports("STARTTLS") {
                return Err(Error::NotSupported("STARTTLS".into()));
            }
            let reply = session.exchange(Stage::StartTls, &Command::StartTls).await?;
            check(Stage::StartTls, reply)?;

            let name = server_name(&config.host)
                .ok_or_else(|| Error::InvalidServerName(config.host.clone()))?;
            let plain = session.stream.take().ok_or(Error::Closed)?;
            let upgraded = tokio::time::timeout(timeout, plain.upgrade_to_tls(name))
                .await
                .map_err(|_| Error::Timeout(Stage::StartTls))?
                .map_err(|e| Error::io(Stage::StartTls, e))?;
            session.stream = Some(upgraded);

            session.ehlo(&config.client_hostname).await?;
        }

        if let Some(credentials) = &config.credentials {
            let cmd = Command::AuthPlain {
                initial_response: credentials.plain_response(),
            };
            let reply = session.exchange(Stage::Auth, &cmd).await?;
            check(Stage::Auth, reply)?;
            debug!(username = credentials.username(), "SMTP authentication accepted");
        }

        Ok(session)
    }

    /// Returns true while the connection is usable.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Checks if the server advertised an EHLO keyword (case-insensitive).
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(keyword))
    }

    /// Sends one message to one recipient.
    ///
    /// Line endings are normalized to CRLF and lines starting with `.` are
    /// dot-stuffed. After a refused recipient the transaction is reset so the
    /// session stays usable.
    ///
    /// # Errors
    ///
    /// Returns a reply error tagged with the stage that refused the message,
    /// or an I/O/timeout error (which also closes the session).
    pub async fn send(&mut self, from: &Address, to: &Address, message: &[u8]) -> Result<()> {
        let reply = self
            .exchange(Stage::MailFrom, &Command::MailFrom { from: from.clone() })
            .await?;
        if let Err(err) = check(Stage::MailFrom, reply) {
            self.reset_transaction().await;
            return Err(err);
        }

        let reply = self
            .exchange(Stage::RcptTo, &Command::RcptTo { to: to.clone() })
            .await?;
        if let Err(err) = check(Stage::RcptTo, reply) {
            self.reset_transaction().await;
            return Err(err);
        }

        let reply = self.exchange(Stage::Data, &Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            self.reset_transaction().await;
            return Err(reply_error(Stage::Data, &reply));
        }

        let reply = self.transmit(Stage::Message, &encode_data(message)).await?;
        check(Stage::Message, reply)?;
        trace!(recipient = %to, "Message accepted");
        Ok(())
    }

    /// Sends QUIT and drops the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not acknowledge QUIT.
    pub async fn quit(mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let reply = self.exchange(Stage::Quit, &Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(reply_error(Stage::Quit, &reply));
        }
        Ok(())
    }

    async fn ehlo(&mut self, client_hostname: &str) -> Result<()> {
        let cmd = Command::Ehlo {
            hostname: client_hostname.to_string(),
        };
        let reply = check(Stage::Ehlo, self.exchange(Stage::Ehlo, &cmd).await?)?;

        // First line is the server's greeting, the rest are keywords
        self.extensions = reply
            .message
            .iter()
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_ascii_uppercase)
            .collect();
        Ok(())
    }

    async fn reset_transaction(&mut self) {
        if let Err(err) = self.exchange(Stage::MailFrom, &Command::Rset).await {
            debug!(error = %err, "RSET after refused transaction failed");
        }
    }

    async fn exchange(&mut self, stage: Stage, cmd: &Command) -> Result<Reply> {
        trace!(command = cmd.verb(), "SMTP >>");
        self.transmit(stage, &cmd.serialize()).await
    }

    async fn receive(&mut self, stage: Stage) -> Result<Reply> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Closed);
        };
        let outcome = tokio::time::timeout(self.timeout, read_reply(stream, stage)).await;
        self.settle(stage, outcome)
    }

    async fn transmit(&mut self, stage: Stage, data: &[u8]) -> Result<Reply> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Closed);
        };
        let outcome = tokio::time::timeout(self.timeout, async {
            stream
                .write_all(data)
                .await
                .map_err(|e| Error::io(stage, e))?;
            read_reply(stream, stage).await
        })
        .await;
        self.settle(stage, outcome)
    }

    fn settle(
        &mut self,
        stage: Stage,
        outcome: std::result::Result<Result<Reply>, tokio::time::error::Elapsed>,
    ) -> Result<Reply> {
        let result = outcome.unwrap_or(Err(Error::Timeout(stage)));
        match &result {
            Ok(reply) if reply.code == ReplyCode::SERVICE_UNAVAILABLE => {
                // 421 means the server is closing the channel
                self.stream = None;
            }
            Err(Error::Io { .. } | Error::Timeout(_) | Error::Protocol(_)) => {
                self.stream = None;
            }
            _ => {}
        }
        result
    }
}

async fn read_reply(stream: &mut SmtpStream, stage: Stage) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await.map_err(|e| Error::io(stage, e))?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    let reply = parse_reply(&lines)?;
    trace!(code = reply.code.as_u16(), "SMTP <<");
    Ok(reply)
}

fn check(stage: Stage, reply: Reply) -> Result<Reply> {
    if reply.is_success() {
        Ok(reply)
    } else {
        Err(reply_error(stage, &reply))
    }
}

fn reply_error(stage: Stage, reply: &Reply) -> Error {
    Error::reply(stage, reply.code.as_u16(), reply.message_text())
}

/// Normalizes line endings to CRLF, dot-stuffs, and appends the terminator.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 64);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Scripted server: for each step, read one command line (or, for ".", a
    /// whole DATA body), check its prefix, then write the reply. An empty
    /// reply drops the connection.
    async fn mock_server(
        script: Vec<(&'static str, &'static str)>,
    ) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);
            write.write_all(b"220 mock.test ESMTP\r\n").await.unwrap();

            let mut received = Vec::new();
            for (expect, reply) in script {
                if expect == "." {
                    loop {
                        let mut line = String::new();
                        read.read_line(&mut line).await.unwrap();
                        let line = line.trim_end_matches("\r\n").to_string();
                        let done = line == ".";
                        received.push(line);
                        if done {
                            break;
                        }
                    }
                } else {
                    let mut line = String::new();
                    read.read_line(&mut line).await.unwrap();
                    assert!(line.starts_with(expect), "expected {expect}, got {line}");
                    received.push(line.trim_end().to_string());
                }
                if reply.is_empty() {
                    return received;
                }
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });
        (port, handle)
    }

    fn config(port: u16) -> SessionConfig {
        SessionConfig {
            security: Security::None,
            credentials: Some(Credentials::new("sender@example.com", "hunter2")),
            timeout: Duration::from_secs(5),
            ..SessionConfig::new("127.0.0.1", port)
        }
    }

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    const EHLO: (&str, &str) = ("EHLO", "250-mock.test\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n");
    const AUTH_OK: (&str, &str) = ("AUTH PLAIN", "235 2.7.0 Accepted\r\n");

    #[test]
    fn test_encode_data_dot_stuffing_and_crlf() {
        let encoded = encode_data(b"Subject: x\n\n.hidden\r\nplain\n");
        assert_eq!(encoded, b"Subject: x\r\n\r\n..hidden\r\nplain\r\n.\r\n");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("user", "secret");
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret"));
        assert!(shown.contains("user"));
    }

    #[tokio::test]
    async fn test_send_two_messages_on_one_session() {
        let (port, server) = mock_server(vec![
            EHLO,
            AUTH_OK,
            ("MAIL FROM:<sender@example.com>", "250 OK\r\n"),
            ("RCPT TO:<a@example.org>", "250 OK\r\n"),
            ("DATA", "354 Go ahead\r\n"),
            (".", "250 2.0.0 queued\r\n"),
            ("MAIL FROM", "250 OK\r\n"),
            ("RCPT TO:<b@example.org>", "250 OK\r\n"),
            ("DATA", "354 Go ahead\r\n"),
            (".", "250 2.0.0 queued\r\n"),
            ("QUIT", "221 Bye\r\n"),
        ])
        .await;

        let mut session = Session::open(&config(port)).await.unwrap();
        assert!(session.supports("auth"));
        session
            .send(&addr("sender@example.com"), &addr("a@example.org"), b"Subject: 1\r\n\r\n.dot\r\n")
            .await
            .unwrap();
        session
            .send(&addr("sender@example.com"), &addr("b@example.org"), b"Subject: 2\r\n\r\nhi\r\n")
            .await
            .unwrap();
        session.quit().await.unwrap();

        let received = server.await.unwrap();
        assert!(received.iter().any(|l| l == "..dot"));
        let plain = base64::engine::general_purpose::STANDARD.encode("\0sender@example.com\0hunter2");
        assert!(received.contains(&format!("AUTH PLAIN {plain}")));
    }

    #[tokio::test]
    async fn test_refused_recipient_keeps_session_open() {
        let (port, server) = mock_server(vec![
            EHLO,
            AUTH_OK,
            ("MAIL FROM", "250 OK\r\n"),
            ("RCPT TO", "550 5.1.1 <nobody@example.org>: user unknown\r\n"),
            ("RSET", "250 OK\r\n"),
        ])
        .await;

        let mut session = Session::open(&config(port)).await.unwrap();
        let err = session
            .send(&addr("sender@example.com"), &addr("nobody@example.org"), b"x")
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::RcptTo));
        assert_eq!(err.code(), Some(550));
        assert!(err.to_string().contains("5.1.1"));
        assert!(!err.is_connection_failure());
        assert!(session.is_open());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_login_is_auth_failure() {
        let (port, server) = mock_server(vec![
            EHLO,
            ("AUTH PLAIN", "535 5.7.8 Username and Password not accepted\r\n"),
        ])
        .await;

        let err = Session::open(&config(port)).await.unwrap_err();
        assert!(err.is_auth_failure());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_connection_closes_session() {
        let (port, server) = mock_server(vec![EHLO, AUTH_OK, ("MAIL FROM", "")]).await;

        let mut session = Session::open(&config(port)).await.unwrap();
        let err = session
            .send(&addr("sender@example.com"), &addr("a@example.org"), b"x")
            .await
            .unwrap_err();

        assert!(err.is_connection_failure());
        assert!(!session.is_open());
        server.await.unwrap();
        let again = session
            .send(&addr("sender@example.com"), &addr("a@example.org"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(again, Error::Closed));
    }

    #[tokio::test]
    async fn test_starttls_required_but_missing() {
        let (port, _server) = mock_server(vec![EHLO]).await;
        let cfg = SessionConfig {
            security: Security::StartTls,
            ..config(port)
        };
        let err = Session::open(&cfg).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Session::open(&config(port)).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Connect));
        assert!(err.is_connection_failure());
    }
}
