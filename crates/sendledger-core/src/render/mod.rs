//! Message rendering.
//!
//! A [`Composer`] holds one campaign's template and sender identity and turns
//! each [`RecipientRecord`] into an [`OutgoingMessage`]. The run loop treats
//! the result as opaque content.

mod message;
mod template;

use std::path::Path;

use tracing::warn;

use crate::campaign::{RecipientRecord, TemplateConfig};
use crate::error::{Error, Result};

pub use message::{OutgoingMessage, Signature};
pub use template::{
    RenderedParts, SIGNATURE_CID, SIGNATURE_MARKER, render, text_to_html, unsubscribe_mailto,
};

/// Renders one campaign's messages.
#[derive(Debug, Clone)]
pub struct Composer {
    from: String,
    unsubscribe: String,
    subject: String,
    body: String,
    signature: Option<Signature>,
}

impl Composer {
    /// Creates a composer.
    ///
    /// The signature image is loaded only when the body uses the marker and
    /// the file exists; a missing file just drops the image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Render`] if the template is empty or an existing
    /// signature file cannot be read.
    pub fn new(from: &str, unsubscribe: &str, template: &TemplateConfig) -> Result<Self> {
        if template.subject.trim().is_empty() || template.body.trim().is_empty() {
            return Err(Error::Render("template needs a subject and a body".into()));
        }

        let signature = match &template.signature {
            Some(path) if template.body.contains(SIGNATURE_MARKER) => load_signature(path)?,
            _ => None,
        };

        Ok(Self {
            from: from.to_string(),
            unsubscribe: unsubscribe.to_string(),
            subject: template.subject.clone(),
            body: template.body.clone(),
            signature,
        })
    }

    /// Returns true if messages carry the inline signature image.
    #[must_use]
    pub const fn has_signature(&self) -> bool {
        self.signature.is_some()
    }

    /// Renders the message for one recipient.
    #[must_use]
    pub fn compose(&self, record: &RecipientRecord) -> OutgoingMessage {
        let parts = render(
            &self.subject,
            &self.body,
            record,
            &self.unsubscribe,
            self.signature.is_some(),
        );
        OutgoingMessage {
            from: self.from.clone(),
            to: record.address.clone(),
            reply_to: self.from.clone(),
            subject: parts.subject,
            plain: parts.plain,
            html: parts.html,
            unsubscribe: self.unsubscribe.clone(),
            signature: self.signature.clone().filter(|_| parts.wants_signature),
        }
    }
}

fn load_signature(path: &Path) -> Result<Option<Signature>> {
    if !path.exists() {
        warn!(path = %path.display(), "Signature image not found; sending without it");
        return Ok(None);
    }
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Render(format!("cannot read {}: {e}", path.display())))?;
    let file_name = path
        .file_name()
        .map_or_else(|| "signature.png".to_string(), |n| n.to_string_lossy().into_owned());
    Ok(Some(Signature { file_name, bytes }))
}
