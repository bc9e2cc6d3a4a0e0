//! # sendledger-smtp
//!
//! A small SMTP submission client built around a reusable [`Session`].
//!
//! ## Features
//!
//! - **Reusable sessions**: open once, send many single-recipient messages
//! - **TLS support**: implicit TLS (port 465) and STARTTLS (port 587)
//! - **Authentication**: AUTH PLAIN
//! - **Stage-aware errors**: every failure carries the [`Stage`] it happened
//!   in, so callers can tell refused credentials, dropped connections and
//!   refused recipients apart
//!
//! ## Quick Start
//!
//! ```ignore
//! use sendledger_smtp::{Address, Credentials, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> sendledger_smtp::Result<()> {
//!     let config = SessionConfig {
//!         credentials: Some(Credentials::new("me@example.com", "app-password")),
//!         ..SessionConfig::new("smtp.example.com", 587)
//!     };
//!     let mut session = Session::open(&config).await?;
//!
//!     let from = Address::new("me@example.com")?;
//!     let to = Address::new("reader@example.org")?;
//!     session.send(&from, &to, b"Subject: Hi\r\n\r\nHello!\r\n").await?;
//!
//!     session.quit().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
pub mod command;
mod error;
pub mod reply;
mod session;
pub mod stream;

pub use address::Address;
pub use error::{Error, Result, Stage};
pub use reply::{Reply, ReplyCode};
pub use session::{Credentials, DEFAULT_TIMEOUT, Security, Session, SessionConfig};
