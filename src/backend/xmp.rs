//! XMP packets.
//!
//! Only the top-level properties of each `rdf:Description` become entries.
//! Container values (Bag/Seq/Alt) are flattened to one text payload; the
//! structure below a property is not kept.

use img_parts::Bytes;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{BackendError, Layout, Namespace, NativeEntry, RawValue, riff_chunk};
use crate::value::NativeTypeId;

const APP1: u8 = 0xE1;
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const PNG_XMP_KEYWORD: &[u8] = b"XML:com.adobe.xmp";

/// Locate the XMP packet in a container that embeds it outside EXIF.
pub(super) fn find_in_container(layout: &Layout, bytes: &Bytes) -> Option<Vec<u8>> {
    match layout {
        Layout::Jpeg(jpeg) => jpeg
            .segments()
            .iter()
            .filter(|s| s.marker() == APP1)
            .find_map(|s| s.contents().strip_prefix(XMP_HEADER).map(<[u8]>::to_vec)),
        Layout::Png(png) => png
            .chunks()
            .iter()
            .filter(|c| &c.kind() == b"iTXt")
            .find_map(|c| xmp_from_itxt(c.contents())),
        Layout::WebP => riff_chunk(bytes, b"XMP ").map(<[u8]>::to_vec),
        Layout::Tiff | Layout::Opaque => None,
    }
}

/// iTXt: keyword\0, compression flag, method, language\0, translated keyword\0, text.
fn xmp_from_itxt(chunk: &[u8]) -> Option<Vec<u8>> {
    let rest = chunk.strip_prefix(PNG_XMP_KEYWORD)?.strip_prefix(b"\0")?;
    let (&compressed, rest) = rest.split_first()?;
    if compressed != 0 {
        log::debug!("Compressed XMP iTXt chunk is not supported");
        return None;
    }
    let rest = rest.get(1..)?;
    let lang_end = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[lang_end + 1..];
    let keyword_end = rest.iter().position(|&b| b == 0)?;
    Some(rest[keyword_end + 1..].to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Text,
    Bag,
    Seq,
    Alt,
}

#[derive(Debug, Default)]
struct Item {
    lang: Option<String>,
    text: String,
}

#[derive(Debug)]
struct Property {
    key: String,
    depth: usize,
    shape: Shape,
    text: String,
    items: Vec<Item>,
    in_item: bool,
}

impl Property {
    fn new(key: String, depth: usize) -> Self {
        Self {
            key,
            depth,
            shape: Shape::Text,
            text: String::new(),
            items: Vec::new(),
            in_item: false,
        }
    }

    fn push_text(&mut self, text: &str) {
        let target = match self.items.last_mut() {
            Some(item) if self.in_item => &mut item.text,
            _ => &mut self.text,
        };
        target.push_str(text);
    }

    fn into_native(self) -> NativeEntry<RawValue> {
        let (type_id, value) = match self.shape {
            // One value, not one per byte.
            Shape::Text => (NativeTypeId::XMP_TEXT, RawValue::single(self.text.into_bytes())),
            Shape::Bag => (NativeTypeId::XMP_BAG, joined(&self.items, false)),
            Shape::Seq => (NativeTypeId::XMP_SEQ, joined(&self.items, false)),
            Shape::Alt if self.items.iter().any(|i| i.lang.is_some()) => {
                (NativeTypeId::LANG_ALT, joined(&self.items, true))
            }
            Shape::Alt => (NativeTypeId::XMP_ALT, joined(&self.items, false)),
        };
        NativeEntry {
            key: self.key,
            type_id,
            value,
        }
    }
}

fn joined(items: &[Item], with_lang: bool) -> RawValue {
    let parts: Vec<String> = items
        .iter()
        .map(|item| match (&item.lang, with_lang) {
            (Some(lang), true) => format!("lang=\"{lang}\" {}", item.text),
            _ => item.text.clone(),
        })
        .collect();
    RawValue::new(parts.join(", ").into_bytes(), items.len())
}

fn local_name(e: &BytesStart<'_>) -> Vec<u8> {
    e.local_name().as_ref().to_vec()
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Properties written as attributes of `rdf:Description`.
fn attribute_properties(e: &BytesStart<'_>, out: &mut Vec<NativeEntry<RawValue>>) {
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        if key.starts_with(b"xmlns") || key.starts_with(b"rdf:") || key.starts_with(b"xml:") {
            continue;
        }
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        out.push(NativeEntry {
            key: String::from_utf8_lossy(key).into_owned(),
            type_id: NativeTypeId::XMP_TEXT,
            value: RawValue::single(value.into_owned().into_bytes()),
        });
    }
}

/// Parse an XMP packet into native entries, in document order.
pub(super) fn parse(packet: &[u8]) -> Result<Vec<NativeEntry<RawValue>>, BackendError> {
    let mut reader = Reader::from_reader(packet);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut description_depth: Option<usize> = None;
    let mut current: Option<Property> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| BackendError::Corrupt {
            namespace: Namespace::Xmp,
            reason: format!("at byte {}: {e}", reader.buffer_position()),
        })?;

        match event {
            Event::Start(ref e) => {
                depth += 1;
                let local = local_name(e);
                match current.as_mut() {
                    None if local == b"Description" => {
                        description_depth = Some(depth);
                        attribute_properties(e, &mut entries);
                    }
                    None if description_depth == Some(depth - 1) => {
                        let mut prop = Property::new(qualified_name(e), depth);
                        if let Some(resource) = attribute(e, b"rdf:resource") {
                            prop.text = resource;
                        }
                        current = Some(prop);
                    }
                    None => {}
                    Some(prop) => match local.as_slice() {
                        b"Bag" if depth == prop.depth + 1 => prop.shape = Shape::Bag,
                        b"Seq" if depth == prop.depth + 1 => prop.shape = Shape::Seq,
                        b"Alt" if depth == prop.depth + 1 => prop.shape = Shape::Alt,
                        b"li" if depth == prop.depth + 2 => {
                            prop.items.push(Item {
                                lang: attribute(e, b"xml:lang"),
                                text: String::new(),
                            });
                            prop.in_item = true;
                        }
                        _ => {}
                    },
                }
            }
            Event::Empty(ref e) => {
                let local = local_name(e);
                match current.as_mut() {
                    None if local == b"Description" => attribute_properties(e, &mut entries),
                    None if description_depth == Some(depth) => {
                        let mut prop = Property::new(qualified_name(e), depth + 1);
                        prop.text = attribute(e, b"rdf:resource").unwrap_or_default();
                        entries.push(prop.into_native());
                    }
                    None => {}
                    Some(prop) => {
                        if local == b"li" && depth + 1 == prop.depth + 2 {
                            prop.items.push(Item {
                                lang: attribute(e, b"xml:lang"),
                                text: String::new(),
                            });
                        }
                    }
                }
            }
            Event::Text(ref t) => {
                if let Some(prop) = current.as_mut() {
                    let text = t.unescape().map_err(|e| BackendError::Corrupt {
                        namespace: Namespace::Xmp,
                        reason: e.to_string(),
                    })?;
                    prop.push_text(&text);
                }
            }
            Event::CData(ref t) => {
                if let Some(prop) = current.as_mut() {
                    prop.push_text(&String::from_utf8_lossy(t));
                }
            }
            Event::End(ref e) => {
                let ends_property = current.as_ref().is_some_and(|p| p.depth == depth);
                if ends_property {
                    if let Some(prop) = current.take() {
                        entries.push(prop.into_native());
                    }
                } else if let Some(prop) = current.as_mut() {
                    if e.local_name().as_ref() == b"li" && depth == prop.depth + 2 {
                        prop.in_item = false;
                    }
                } else if description_depth == Some(depth) {
                    description_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    log::debug!("Read {} XMP properties", entries.len());
    Ok(entries)
}
