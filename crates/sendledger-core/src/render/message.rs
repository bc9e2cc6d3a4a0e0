//! Outgoing messages and their MIME encoding.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

use super::template::SIGNATURE_CID;
use crate::address::domain_of;

const LINE_WIDTH: usize = 76;

/// Inline signature image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// File name announced in the attachment headers.
    pub file_name: String,
    /// PNG bytes.
    pub bytes: Vec<u8>,
}

/// A fully rendered message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Sender.
    pub from: String,
    /// Recipient (normalized).
    pub to: String,
    /// Reply-To address.
    pub reply_to: String,
    /// Subject.
    pub subject: String,
    /// Plain-text body.
    pub plain: String,
    /// HTML body.
    pub html: String,
    /// Address for unsubscribe requests.
    pub unsubscribe: String,
    /// Inline signature, attached with Content-ID `sigimg`.
    pub signature: Option<Signature>,
}

impl OutgoingMessage {
    /// Value of the `List-Unsubscribe` header.
    #[must_use]
    pub fn list_unsubscribe(&self) -> String {
        format!("<mailto:{}?subject=unsubscribe>", self.unsubscribe)
    }

    /// Encodes the message as RFC 5322 text with CRLF line endings.
    #[must_use]
    pub fn to_mime(&self) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        self.encode(&token, Utc::now())
    }

    /// Encodes with a fixed token (boundaries, Message-ID) and date.
    pub(crate) fn encode(&self, token: &str, date: DateTime<Utc>) -> String {
        let alternative = format!("alt-{token}");
        let related = format!("rel-{token}");
        let host = domain_of(&self.from).unwrap_or("localhost");

        let mut out = String::new();
        header(&mut out, "From", &self.from);
        header(&mut out, "To", &self.to);
        header(&mut out, "Reply-To", &self.reply_to);
        header(&mut out, "Subject", &encode_header_value(&self.subject));
        header(&mut out, "Date", &date.to_rfc2822());
        header(&mut out, "Message-ID", &format!("<{token}@{host}>"));
        header(&mut out, "List-Unsubscribe", &self.list_unsubscribe());
        header(&mut out, "MIME-Version", "1.0");
        header(
            &mut out,
            "Content-Type",
            &format!("multipart/alternative; boundary=\"{alternative}\""),
        );
        out.push_str("\r\n");

        open_part(&mut out, &alternative);
        text_part(&mut out, "plain", &self.plain);

        open_part(&mut out, &alternative);
        match &self.signature {
            Some(signature) => {
                header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/related; boundary=\"{related}\""),
                );
                out.push_str("\r\n");
                open_part(&mut out, &related);
                text_part(&mut out, "html", &self.html);
                open_part(&mut out, &related);
                header(
                    &mut out,
                    "Content-Type",
                    &format!("image/png; name=\"{}\"", signature.file_name),
                );
                header(&mut out, "Content-Transfer-Encoding", "base64");
                header(&mut out, "Content-ID", &format!("<{SIGNATURE_CID}>"));
                header(
                    &mut out,
                    "Content-Disposition",
                    &format!("inline; filename=\"{}\"", signature.file_name),
                );
                out.push_str("\r\n");
                push_base64(&mut out, &signature.bytes);
                close_parts(&mut out, &related);
            }
            None => text_part(&mut out, "html", &self.html),
        }
        close_parts(&mut out, &alternative);
        out
    }
}

fn header(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "{name}: {value}\r\n");
}

fn open_part(out: &mut String, boundary: &str) {
    let _ = write!(out, "--{boundary}\r\n");
}

fn close_parts(out: &mut String, boundary: &str) {
    let _ = write!(out, "--{boundary}--\r\n");
}

fn text_part(out: &mut String, subtype: &str, body: &str) {
    header(out, "Content-Type", &format!("text/{subtype}; charset=utf-8"));
    header(out, "Content-Transfer-Encoding", "base64");
    out.push_str("\r\n");
    push_base64(out, body.as_bytes());
}

fn push_base64(out: &mut String, data: &[u8]) {
    let encoded = STANDARD.encode(data);
    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
}

/// RFC 2047 B-encodes a header value that is not plain ASCII.
fn encode_header_value(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return value.to_string();
    }
    format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
}
