//! Payload decoding: best-effort zstd decompression followed by markup
//! parsing into a JSON tree.
//!
//! The tree follows the usual XML-to-dict conventions: attributes become
//! `"@name"` keys, mixed text becomes `"#text"`, repeated child elements
//! become arrays, and an element with only text collapses to a string.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::{MessageBody, MessageType};

/// First four bytes of every zstd frame.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Why [`decompress`] handed back its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThrough {
    /// The input does not start with a zstd frame.
    NotCompressed,
    /// The input looks compressed but the frame failed to decode.
    Corrupt,
}

/// Outcome of [`decompress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decompressed<'a> {
    Decoded(Vec<u8>),
    Original(&'a [u8], PassThrough),
}

impl Decompressed<'_> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Decompressed::Decoded(bytes) => bytes,
            Decompressed::Original(bytes, _) => bytes,
        }
    }

    pub fn was_decoded(&self) -> bool {
        matches!(self, Decompressed::Decoded(_))
    }
}

/// Decompress `bytes`, or return them unchanged when they are not a valid
/// zstd frame. Never fails.
pub fn decompress(bytes: &[u8]) -> Decompressed<'_> {
    if !bytes.starts_with(&ZSTD_MAGIC) {
        return Decompressed::Original(bytes, PassThrough::NotCompressed);
    }
    match zstd::decode_all(bytes) {
        Ok(decoded) => Decompressed::Decoded(decoded),
        Err(e) => {
            warn!(error = %e, len = bytes.len(), "corrupt zstd payload, passing through");
            Decompressed::Original(bytes, PassThrough::Corrupt)
        }
    }
}

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed document: {0}")]
    Malformed(&'static str),
}

impl From<quick_xml::events::attributes::AttrError> for MarkupError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        MarkupError::Xml(e.into())
    }
}

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, MarkupError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut fields = Map::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref());
            let value = attr.unescape_value()?;
            fields.insert(format!("@{key}"), Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim();
        let value = if self.fields.is_empty() {
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            }
        } else {
            let mut fields = self.fields;
            if !text.is_empty() {
                fields.insert("#text".to_string(), Value::String(text.to_string()));
            }
            Value::Object(fields)
        };
        (self.name, value)
    }
}

fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

/// Parse a markup document into a JSON tree rooted at its single element.
pub fn parse_markup(text: &str) -> Result<Value, MarkupError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;
    let mut buf = Vec::new();

    let mut finish = |stack: &mut Vec<Frame>, name: String, value: Value| match stack.last_mut() {
        Some(parent) => {
            insert_child(&mut parent.fields, name, value);
            Ok(())
        }
        None if root.is_none() => {
            let mut doc = Map::new();
            doc.insert(name, value);
            root = Some(Value::Object(doc));
            Ok(())
        }
        None => Err(MarkupError::Malformed("multiple root elements")),
    };

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => stack.push(Frame::open(e)?),
            Event::Empty(ref e) => {
                let (name, value) = Frame::open(e)?.close();
                finish(&mut stack, name, value)?;
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or(MarkupError::Malformed("unbalanced end tag"))?;
                let (name, value) = frame.close();
                finish(&mut stack, name, value)?;
            }
            Event::Text(ref e) => {
                let text = e.unescape()?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(e) => {
                let bytes = e.into_inner();
                push_text(&mut stack, &String::from_utf8_lossy(&bytes))?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(MarkupError::Malformed("unclosed element"));
    }
    root.ok_or(MarkupError::Malformed("no root element"))
}

fn push_text(stack: &mut [Frame], text: &str) -> Result<(), MarkupError> {
    match stack.last_mut() {
        Some(frame) => {
            frame.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(MarkupError::Malformed("text outside root element")),
    }
}

fn utf8(bytes: Cow<'_, [u8]>) -> Result<String, Vec<u8>> {
    match bytes {
        Cow::Borrowed(b) => std::str::from_utf8(b)
            .map(str::to_string)
            .map_err(|_| b.to_vec()),
        Cow::Owned(b) => String::from_utf8(b).map_err(|e| e.into_bytes()),
    }
}

fn decompress_owned(bytes: &[u8]) -> Cow<'_, [u8]> {
    match decompress(bytes) {
        Decompressed::Decoded(decoded) => Cow::Owned(decoded),
        Decompressed::Original(original, _) => Cow::Borrowed(original),
    }
}

/// Decode a message content column.
///
/// Plain text messages are returned verbatim; every other type is parsed
/// as markup and falls back to text when parsing fails.
pub fn decode_body(kind: MessageType, content: Option<&[u8]>) -> MessageBody {
    let Some(content) = content else {
        return MessageBody::Empty;
    };
    let text = match utf8(decompress_owned(content)) {
        Ok(text) => text,
        Err(bytes) => return MessageBody::Bytes(bytes),
    };
    if kind == MessageType::Text {
        return MessageBody::Text(text);
    }
    match parse_markup(&text) {
        Ok(tree) => MessageBody::Markup(tree),
        Err(_) => MessageBody::Text(text),
    }
}

/// Decoded source metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    /// The parsed tree, or the decoded text when it is not markup.
    pub tree: Option<Value>,
    /// Handles listed in `msgsource.atuserlist`, in order.
    pub mentions: Vec<String>,
}

/// Decode the optional source metadata column.
pub fn decode_source(source: Option<&[u8]>) -> SourceInfo {
    let Some(source) = source.filter(|s| !s.is_empty()) else {
        return SourceInfo::default();
    };
    let decoded = decompress_owned(source);
    let text = String::from_utf8_lossy(&decoded);
    let tree = match parse_markup(&text) {
        Ok(tree) => tree,
        Err(e) => {
            warn!(error = %e, "unparseable message source");
            return SourceInfo {
                tree: Some(Value::String(text.into_owned())),
                mentions: Vec::new(),
            };
        }
    };
    let mentions = mention_list(&tree);
    SourceInfo {
        tree: Some(tree),
        mentions,
    }
}

fn mention_list(tree: &Value) -> Vec<String> {
    let list = match tree.pointer("/msgsource/atuserlist") {
        Some(Value::String(list)) => list.as_str(),
        Some(Value::Object(fields)) => match fields.get("#text") {
            Some(Value::String(list)) => list.as_str(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.split(',')
        .map(str::trim)
        .filter(|handle| !handle.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plaintext_passes_through() {
        let out = decompress(b"hello");
        assert_eq!(out, Decompressed::Original(b"hello", PassThrough::NotCompressed));
        assert_eq!(out.bytes(), b"hello");
    }

    #[test]
    fn test_corrupt_frame_passes_through() {
        let bytes = [0x28, 0xB5, 0x2F, 0xFD, 0xFF, 0x00, 0x01];
        let out = decompress(&bytes);
        assert!(!out.was_decoded());
        assert!(matches!(out, Decompressed::Original(_, PassThrough::Corrupt)));
    }

    #[test]
    fn test_decompresses_zstd() {
        let compressed = zstd::encode_all(&b"<msg/>"[..], 3).unwrap();
        assert_eq!(decompress(&compressed).bytes(), b"<msg/>");
    }

    #[test]
    fn test_parse_markup_conventions() {
        let tree = parse_markup(
            r#"<?xml version="1.0"?>
            <msg>
                <img md5="abc" len="12" />
                <title>Hello &amp; bye</title>
                <item>1</item>
                <item>2</item>
                <empty></empty>
                <link kind="x">text</link>
            </msg>"#,
        )
        .unwrap();
        assert_eq!(
            tree,
            json!({
                "msg": {
                    "img": {"@md5": "abc", "@len": "12"},
                    "title": "Hello & bye",
                    "item": ["1", "2"],
                    "empty": null,
                    "link": {"@kind": "x", "#text": "text"},
                }
            })
        );
    }

    #[test]
    fn test_parse_markup_rejects_plain_text() {
        assert!(parse_markup("just words").is_err());
        assert!(parse_markup("").is_err());
        assert!(parse_markup("<a>unclosed").is_err());
        assert!(parse_markup("<a/><b/>").is_err());
    }

    #[test]
    fn test_text_messages_stay_verbatim() {
        let body = decode_body(MessageType::Text, Some(b"<b>not markup</b>"));
        assert_eq!(body, MessageBody::Text("<b>not markup</b>".into()));
    }

    #[test]
    fn test_other_types_parse_markup() {
        let compressed = zstd::encode_all(&br#"<msg><img md5="m1"/></msg>"#[..], 3).unwrap();
        let body = decode_body(MessageType::Image, Some(&compressed));
        assert_eq!(body.as_markup().unwrap()["msg"]["img"]["@md5"], "m1");
    }

    #[test]
    fn test_unknown_type_falls_back_to_text() {
        let body = decode_body(MessageType::Other(99), Some(b"wxid_a:\nhello"));
        assert_eq!(body.as_text(), Some("wxid_a:\nhello"));
        assert_eq!(decode_body(MessageType::Image, None), MessageBody::Empty);
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let compressed = zstd::encode_all(&b"<msg><a>1</a></msg>"[..], 3).unwrap();
        assert_eq!(
            decode_body(MessageType::App, Some(&compressed)),
            decode_body(MessageType::App, Some(&compressed))
        );
    }

    #[test]
    fn test_source_mentions() {
        let source = b"<msgsource><atuserlist><![CDATA[,wxid_a,wxid_b]]></atuserlist></msgsource>";
        let info = decode_source(Some(source));
        assert_eq!(info.mentions, ["wxid_a", "wxid_b"]);
        assert!(info.tree.is_some());

        let none = decode_source(Some(b"<msgsource><silence>1</silence></msgsource>"));
        assert!(none.mentions.is_empty());
        assert_eq!(decode_source(None), SourceInfo::default());
    }

    #[test]
    fn test_unparseable_source_keeps_text() {
        let info = decode_source(Some(b"origin=phone"));
        assert_eq!(info.tree, Some(json!("origin=phone")));
        assert!(info.mentions.is_empty());
    }
}
