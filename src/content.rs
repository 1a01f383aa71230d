//! Resolution of a page's `/Contents` entry into operator text.
//!
//! `/Contents` may be a stream, a reference to one, an array of references,
//! or any nesting of those. Every hop through a reference or an array costs
//! one unit of fuel, so reference cycles end once the budget runs out.

use flate2::read::ZlibDecoder;
use lopdf::{Document, Object, ObjectId, Stream};
use std::borrow::Cow;
use std::fmt;
use std::io::Read;

use crate::error::{RecolorError, Result};

pub const DEFAULT_MAX_DEPTH: usize = 64;
/// Hard ceiling on the fuel; resolution recurses once per hop.
pub const MAX_DEPTH_LIMIT: usize = 256;

/// Shape of a content node.
#[derive(Debug, Clone, Copy)]
pub enum ContentRef<'a> {
    Bytes(&'a [u8]),
    Pointer(ObjectId),
    Sequence(&'a [Object]),
    Stream(&'a Stream),
    Empty,
    Unsupported(&'static str),
}

impl<'a> From<&'a Object> for ContentRef<'a> {
    fn from(obj: &'a Object) -> Self {
        match obj {
            Object::String(bytes, _) => ContentRef::Bytes(bytes),
            Object::Reference(id) => ContentRef::Pointer(*id),
            Object::Array(items) => ContentRef::Sequence(items),
            Object::Stream(stream) => ContentRef::Stream(stream),
            Object::Null => ContentRef::Empty,
            other => ContentRef::Unsupported(shape_name(other)),
        }
    }
}

fn shape_name(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "boolean",
        Object::Integer(_) => "integer",
        Object::Real(_) => "real",
        Object::Name(_) => "name",
        Object::String(..) => "string",
        Object::Array(_) => "array",
        Object::Dictionary(_) => "dictionary",
        Object::Stream(_) => "stream",
        Object::Reference(_) => "reference",
    }
}

/// A content node that contributed no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    BrokenReference(ObjectId),
    Unsupported(&'static str),
    Undecodable(String),
    DepthExceeded,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::BrokenReference((num, generation)) => {
                write!(f, "broken reference {num} {generation} R")
            }
            Unresolved::Unsupported(shape) => write!(f, "unsupported content object ({shape})"),
            Unresolved::Undecodable(reason) => write!(f, "undecodable stream: {reason}"),
            Unresolved::DepthExceeded => write!(f, "indirection depth exceeded"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    pub unresolved: Vec<Unresolved>,
}

impl Resolution {
    /// True when every node resolved to bytes (or was explicitly empty).
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

pub struct ContentResolver<'d> {
    doc: &'d Document,
    max_depth: usize,
}

impl<'d> ContentResolver<'d> {
    pub fn new(doc: &'d Document, max_depth: usize) -> Self {
        Self { doc, max_depth: max_depth.min(MAX_DEPTH_LIMIT) }
    }

    /// Flatten `object` into Latin-1 text. Never fails: nodes that cannot be
    /// read contribute empty text and are listed in `Resolution::unresolved`.
    pub fn resolve(&self, object: &Object) -> Resolution {
        let mut unresolved = Vec::new();
        let text = self.resolve_node(object.into(), self.max_depth, &mut unresolved);
        Resolution { text, unresolved }
    }

    fn resolve_node(&self, node: ContentRef<'_>, fuel: usize, failures: &mut Vec<Unresolved>) -> String {
        match node {
            ContentRef::Bytes(bytes) => latin1_decode(bytes),
            ContentRef::Stream(stream) => match stream_bytes(stream) {
                Ok(bytes) => latin1_decode(&bytes),
                Err(reason) => {
                    failures.push(Unresolved::Undecodable(reason));
                    String::new()
                }
            },
            ContentRef::Empty => String::new(),
            ContentRef::Unsupported(shape) => {
                failures.push(Unresolved::Unsupported(shape));
                String::new()
            }
            ContentRef::Pointer(id) => {
                let Some(fuel) = fuel.checked_sub(1) else {
                    failures.push(Unresolved::DepthExceeded);
                    return String::new();
                };
                // Look up the table directly: `Document::get_object` follows
                // reference chains on its own and would bypass the fuel.
                match self.doc.objects.get(&id) {
                    Some(target) => self.resolve_node(target.into(), fuel, failures),
                    None => {
                        failures.push(Unresolved::BrokenReference(id));
                        String::new()
                    }
                }
            }
            ContentRef::Sequence(items) => {
                let Some(fuel) = fuel.checked_sub(1) else {
                    failures.push(Unresolved::DepthExceeded);
                    return String::new();
                };
                items
                    .iter()
                    .map(|item| self.resolve_node(item.into(), fuel, failures))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }
}

/// Decoded payload of a content stream; raw bytes when no filter is set.
fn stream_bytes(stream: &Stream) -> std::result::Result<Cow<'_, [u8]>, String> {
    let Ok(filter) = stream.dict.get(b"Filter") else {
        return Ok(Cow::Borrowed(stream.content.as_slice()));
    };
    if stream.content.is_empty() {
        return Ok(Cow::Borrowed(&[]));
    }
    if is_plain_flate(filter) && stream.dict.get(b"DecodeParms").is_err() {
        return flate_decode(&stream.content).map(Cow::Owned);
    }

    let decoded = stream.decompressed_content().map_err(|e| e.to_string())?;
    // lopdf logs decoder errors and returns whatever came out, often nothing
    if decoded.is_empty() {
        return Err("filter produced no output".to_string());
    }
    Ok(Cow::Owned(decoded))
}

fn is_plain_flate(filter: &Object) -> bool {
    match filter {
        Object::Name(name) => name.as_slice() == b"FlateDecode",
        Object::Array(items) => {
            matches!(items.as_slice(), [Object::Name(name)] if name.as_slice() == b"FlateDecode")
        }
        _ => false,
    }
}

fn flate_decode(data: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| format!("FlateDecode error: {e}"))?;
    Ok(out)
}

pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

pub fn latin1_encode(text: &str) -> Result<Vec<u8>> {
    text.char_indices()
        .map(|(offset, ch)| u8::try_from(u32::from(ch)).map_err(|_| RecolorError::Encoding { ch, offset }))
        .collect()
}
