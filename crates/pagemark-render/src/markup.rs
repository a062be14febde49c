//! Markup scanning shared by text flow measurement and anchor lookup.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Reader over resource markup that tolerates HTML-style unclosed tags.
pub(crate) fn markup_reader(content: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(content);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    reader
}

/// Byte offset of the reader inside the content it was built over.
pub(crate) fn token_offset(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

/// Lowercased local part of a possibly prefixed tag name.
pub(crate) fn local_tag_name(raw: &[u8]) -> Vec<u8> {
    raw.rsplit(|byte| *byte == b':')
        .next()
        .unwrap_or(raw)
        .to_ascii_lowercase()
}

/// Byte offset of the element whose `id` or `name` attribute equals `anchor`.
///
/// Only attribute values of start and empty tags are considered, so the same
/// text inside comments, character data or other attribute values never
/// matches. Scanning stops at the first markup error.
pub fn anchor_offset(content: &[u8], anchor: &str) -> Option<usize> {
    let anchor = anchor.trim();
    if anchor.is_empty() {
        return None;
    }
    let mut reader = markup_reader(content);
    let mut buf = Vec::with_capacity(64);
    loop {
        let start = token_offset(&reader);
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if carries_anchor(&e, anchor) {
                    return Some(start);
                }
            }
            Ok(Event::Eof) => return None,
            Ok(_) => {}
            Err(err) => {
                log::debug!("Anchor lookup stopped at byte {}: {}", start, err);
                return None;
            }
        }
        buf.clear();
    }
}

fn carries_anchor(element: &BytesStart<'_>, anchor: &str) -> bool {
    element.attributes().flatten().any(|attr| {
        let key = attr.key.local_name();
        let key = key.as_ref();
        (key.eq_ignore_ascii_case(b"id") || key.eq_ignore_ascii_case(b"name"))
            && &*attr.value == anchor.as_bytes()
    })
}
