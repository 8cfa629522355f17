//! Full MIME bodies
//!
//! Signed and encrypted messages go out exactly as stored. Anything else
//! is rebuilt from its parts with every text part re-encoded as UTF-8.

use super::output::Body;
use crate::body::text::to_utf8;
use crate::body::{BodyPref, BodyType};
use crate::error::{Error, Result};
use crate::message::MessageAdapter;
use crate::store::MailStore;
use mail_builder::MessageBuilder;
use mail_builder::headers::raw::Raw;
use tracing::debug;

/// Headers the rebuilt message generates itself.
const GENERATED_HEADERS: &[&str] = &["Content-*", "MIME-Version"];

/// The message as a MIME body, cut to `pref`'s byte limit.
///
/// # Errors
///
/// Returns [`Error::MessageGone`] if the message disappeared, a store
/// error from the fetch, or [`Error::Io`] if the rebuilt message cannot
/// be written.
pub async fn mime_body<S: MailStore>(
    adapter: &mut MessageAdapter<'_, S>,
    pref: &BodyPref,
    honor_all_or_none: bool,
) -> Result<Body> {
    let raw = if adapter.is_signed() || adapter.is_encrypted() {
        debug!("UID {}: passing S/MIME message through", adapter.uid());
        adapter.full_message().await?.to_vec()
    } else {
        rebuild(adapter).await?
    };

    let estimated_size = u64::try_from(raw.len()).unwrap_or(u64::MAX);
    let mut data = raw;
    let truncated = pref.truncation_size.is_some_and(|limit| data.len() > limit);
    if let Some(limit) = pref.truncation_size {
        data.truncate(limit);
    }
    if truncated && pref.all_or_none && honor_all_or_none {
        data.clear();
    }
    Ok(Body {
        body_type: BodyType::Mime,
        data,
        truncated,
        estimated_size,
        preview: None,
    })
}

struct Leaf {
    mime_type: String,
    name: String,
    content_id: Option<String>,
    inline: bool,
    data: Vec<u8>,
}

async fn rebuild<S: MailStore>(adapter: &mut MessageAdapter<'_, S>) -> Result<Vec<u8>> {
    let headers = adapter.headers().await?.lines_except(GENERATED_HEADERS);
    let structure = adapter.structure().clone();
    let text = structure.find_body("plain");
    let html = structure.find_body("html");
    let attachments: Vec<_> = structure
        .attachment_candidates()
        .into_iter()
        .filter(|p| structure.is_attachment(&p.mime_id, &p.mime_type()))
        .collect();

    let ids: Vec<&str> = text
        .iter()
        .chain(html.iter())
        .chain(attachments.iter())
        .map(|p| p.mime_id.as_str())
        .collect();
    let parts = adapter.body_parts(&ids).await?;
    let content = |id: &str| parts.get(id).map(|p| p.data.clone()).unwrap_or_default();

    let leaves: Vec<Leaf> = attachments
        .iter()
        .map(|p| Leaf {
            mime_type: p.mime_type(),
            name: p
                .name()
                .map_or_else(|| format!("part-{}", p.mime_id), ToString::to_string),
            content_id: p.content_id.as_ref().map(|c| c.trim_matches(['<', '>']).to_string()),
            inline: p.is_inline(),
            data: content(&p.mime_id),
        })
        .collect();

    let mut message = MessageBuilder::new();
    for (name, value) in headers {
        message = message.header(canonical_name(name), Raw::new(value));
    }
    if let Some(part) = text {
        message = message.text_body(to_utf8(&content(&part.mime_id), part.charset()));
    }
    if let Some(part) = html {
        message = message.html_body(to_utf8(&content(&part.mime_id), part.charset()));
    }
    for leaf in leaves {
        message = match leaf.content_id {
            Some(cid) if leaf.inline => message.inline(leaf.mime_type, cid, leaf.data),
            _ => message.attachment(leaf.mime_type, leaf.name, leaf.data),
        };
    }
    message.write_to_vec().map_err(Error::Io)
}

/// Spell the headers the writer checks for the way it does, so they are
/// not emitted twice.
fn canonical_name(name: String) -> String {
    if name.eq_ignore_ascii_case("date") {
        "Date".to_string()
    } else if name.eq_ignore_ascii_case("message-id") {
        "Message-ID".to_string()
    } else {
        name
    }
}
