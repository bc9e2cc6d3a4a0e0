//! Placeholder substitution and HTML conversion.

use crate::campaign::RecipientRecord;

/// Marker replaced by the inline signature image in HTML bodies.
pub const SIGNATURE_MARKER: &str = "{SIGIMG}";

/// Content-ID of the inline signature image.
pub const SIGNATURE_CID: &str = "sigimg";

const DEFAULT_AUTHOR: &str = "there";
const DEFAULT_TITLE: &str = "your book";

/// Subject and bodies for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedParts {
    /// Subject line.
    pub subject: String,
    /// Plain-text body with the signature marker removed.
    pub plain: String,
    /// HTML body.
    pub html: String,
    /// True if the body asked for the signature image.
    pub wants_signature: bool,
}

/// `mailto:` link that pre-fills an unsubscribe request.
#[must_use]
pub fn unsubscribe_mailto(unsubscribe: &str) -> String {
    format!("mailto:{unsubscribe}?subject=unsubscribe&body=unsubscribe")
}

/// Renders a subject and body template for a recipient.
///
/// `{Column}` placeholders take the recipient row's value. `{AuthorName}`
/// defaults to `there` and `{BookTitle}` falls back to `{Title}`, then
/// `your book`. Unknown placeholders are left as written.
#[must_use]
pub fn render(
    subject: &str,
    body: &str,
    record: &RecipientRecord,
    unsubscribe: &str,
    with_signature: bool,
) -> RenderedParts {
    let mailto = unsubscribe_mailto(unsubscribe);
    let lookup = |name: &str| -> Option<String> {
        match name {
            "AuthorName" => Some(non_empty(record.field("AuthorName")).unwrap_or(DEFAULT_AUTHOR).to_string()),
            "BookTitle" => Some(
                non_empty(record.field("BookTitle"))
                    .or_else(|| non_empty(record.field("Title")))
                    .unwrap_or(DEFAULT_TITLE)
                    .to_string(),
            ),
            "UnsubEmail" => Some(unsubscribe.to_string()),
            "UnsubMailto" => Some(mailto.clone()),
            "SIGIMG" => None,
            other => record.field(other).map(str::to_string),
        }
    };

    let body_text = substitute(body, &lookup);
    let subject_text = substitute(subject, &lookup).replace(SIGNATURE_MARKER, "");
    let wants_signature = body_text.contains(SIGNATURE_MARKER);
    let cid = (with_signature && wants_signature).then_some(SIGNATURE_CID);

    RenderedParts {
        subject: subject_text.trim().to_string(),
        plain: body_text.replace(SIGNATURE_MARKER, "").trim().to_string(),
        html: text_to_html(&body_text, &mailto, cid),
        wants_signature,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Replaces `{Name}` tokens using `lookup`; `{{` and `}}` are literal braces.
fn substitute(template: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }
        match tail[1..].find(['{', '}']) {
            Some(end) if tail.as_bytes()[end + 1] == b'}' => {
                let name = &tail[1..=end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&tail[..end + 2]),
                }
                rest = &tail[end + 2..];
            }
            _ => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escapes `&`, `<`, `>`, `"` and `'`.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Converts a plain body into simple HTML.
///
/// The unsubscribe link becomes clickable, the signature marker becomes an
/// inline image when `cid` is set (and disappears otherwise), blank lines
/// split paragraphs and single newlines become `<br>`.
#[must_use]
pub fn text_to_html(body: &str, mailto: &str, cid: Option<&str>) -> String {
    let escaped_mailto = escape_html(mailto);
    let mut html = escape_html(body).replace(
        &escaped_mailto,
        &format!("<a href='{escaped_mailto}'>unsubscribe</a>"),
    );

    let signature = cid.map_or_else(String::new, |cid| {
        format!(
            "<img src='cid:{cid}' alt='Signature' \
             style='max-width:320px;height:auto;display:block;margin-top:10px;'>"
        )
    });
    html = html
        .replace(SIGNATURE_MARKER, &signature)
        .replace("\r\n", "\n")
        .replace("\n\n", "</p><p>")
        .replace('\n', "<br>");

    format!("<html><body><p>{html}</p></body></html>")
}
