//! EXIF fields via `kamadak-exif`.

use exif::{Context, Exif, Field, In, Reader, Tag, Value};

use super::{BackendError, Namespace, NativeEntry, RawValue};
use crate::value::NativeTypeId;

/// IPTC-NAA record block (raw IIM bytes) in IFD0.
const TAG_IPTC_NAA: Tag = Tag(Context::Tiff, 33723);
/// XMP packet in IFD0.
const TAG_XML_PACKET: Tag = Tag(Context::Tiff, 700);

/// Fields stored as UNDEFINED that carry an 8-byte charset prefix.
const COMMENT_TAGS: &[Tag] = &[
    Tag::UserComment,
    Tag::GPSProcessingMethod,
    Tag::GPSAreaInformation,
];

#[derive(Debug, Default)]
pub(super) struct TiffMetadata {
    pub entries: Vec<NativeEntry<RawValue>>,
    pub iptc_block: Option<Vec<u8>>,
    pub xmp_packet: Option<Vec<u8>>,
}

/// Read every IFD field of a TIFF structure, in file order.
///
/// `blob` starts at the TIFF header: the whole file for TIFF, the EXIF
/// payload with its container framing removed for everything else.
pub(super) fn read(blob: &[u8]) -> Result<TiffMetadata, BackendError> {
    let parsed = Reader::new()
        .read_raw(blob.to_vec())
        .map_err(|e| BackendError::Corrupt {
            namespace: Namespace::Exif,
            reason: e.to_string(),
        })?;

    let raw = RawTiff::of(&parsed);
    let mut meta = TiffMetadata::default();

    for field in parsed.fields() {
        if field.ifd_num == In::PRIMARY {
            if field.tag == TAG_IPTC_NAA {
                meta.iptc_block = block_bytes(&field.value, raw.little_endian);
            } else if field.tag == TAG_XML_PACKET {
                meta.xmp_packet = block_bytes(&field.value, raw.little_endian);
            }
        }
        meta.entries.push(to_native(field, &raw));
    }

    log::debug!("Read {} EXIF fields", meta.entries.len());
    Ok(meta)
}

/// The undecoded TIFF bytes, for field types the parser leaves alone.
struct RawTiff<'a> {
    buf: &'a [u8],
    little_endian: bool,
}

impl<'a> RawTiff<'a> {
    fn of(parsed: &'a Exif) -> Self {
        Self {
            buf: parsed.buf(),
            little_endian: parsed.little_endian(),
        }
    }

    fn u32_at(&self, pos: usize) -> Option<u32> {
        let b: [u8; 4] = self.buf.get(pos..pos.checked_add(4)?)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    /// Payload of a field whose type the parser does not decode.
    ///
    /// `value_field` is the position of the entry's 4-byte value/offset
    /// slot. Types with a known element width come back little-endian;
    /// anything else keeps the slot bytes as stored.
    fn unknown_payload(&self, type_code: u16, count: u32, value_field: usize) -> Option<RawValue> {
        let Some(width) = element_width(type_code) else {
            let slot = self.buf.get(value_field..value_field.checked_add(4)?)?;
            return Some(RawValue::single(slot.to_vec()));
        };

        let count = usize::try_from(count).ok()?;
        let len = width.checked_mul(count)?;
        let start = if len <= 4 {
            value_field
        } else {
            usize::try_from(self.u32_at(value_field)?).ok()?
        };
        let bytes = self.buf.get(start..start.checked_add(len)?)?;

        let mut out = bytes.to_vec();
        if !self.little_endian {
            for element in out.chunks_exact_mut(width) {
                element.reverse();
            }
        }
        Some(RawValue::new(out, count))
    }
}

/// Element width of the TIFF types `kamadak-exif` reports as unknown.
fn element_width(type_code: u16) -> Option<usize> {
    match type_code {
        13 => Some(4),
        16..=18 => Some(8),
        _ => None,
    }
}

fn to_native(field: &Field, raw: &RawTiff<'_>) -> NativeEntry<RawValue> {
    let (type_id, value) = match &field.value {
        Value::Byte(v) => (NativeTypeId::UNSIGNED_BYTE, RawValue::new(v.clone(), v.len())),
        Value::Ascii(strings) => (NativeTypeId::ASCII_STRING, RawValue::single(join_ascii(strings))),
        Value::Short(v) => (NativeTypeId::UNSIGNED_SHORT, le_array(v, u16::to_le_bytes)),
        Value::Long(v) => (NativeTypeId::UNSIGNED_LONG, le_array(v, u32::to_le_bytes)),
        Value::Rational(v) => {
            let bytes = v
                .iter()
                .flat_map(|r| r.num.to_le_bytes().into_iter().chain(r.denom.to_le_bytes()))
                .collect();
            (NativeTypeId::UNSIGNED_RATIONAL, RawValue::new(bytes, v.len()))
        }
        Value::SByte(v) => (NativeTypeId::SIGNED_BYTE, le_array(v, i8::to_le_bytes)),
        Value::Undefined(bytes, _) => {
            let type_id = if COMMENT_TAGS.contains(&field.tag) {
                NativeTypeId::COMMENT
            } else {
                NativeTypeId::UNDEFINED
            };
            (type_id, RawValue::single(bytes.clone()))
        }
        Value::SShort(v) => (NativeTypeId::SIGNED_SHORT, le_array(v, i16::to_le_bytes)),
        Value::SLong(v) => (NativeTypeId::SIGNED_LONG, le_array(v, i32::to_le_bytes)),
        Value::SRational(v) => {
            let bytes = v
                .iter()
                .flat_map(|r| r.num.to_le_bytes().into_iter().chain(r.denom.to_le_bytes()))
                .collect();
            (NativeTypeId::SIGNED_RATIONAL, RawValue::new(bytes, v.len()))
        }
        Value::Float(v) => (NativeTypeId::TIFF_FLOAT, le_array(v, f32::to_le_bytes)),
        Value::Double(v) => (NativeTypeId::TIFF_DOUBLE, le_array(v, f64::to_le_bytes)),
        Value::Unknown(type_code, count, value_field) => {
            let value = raw
                .unknown_payload(*type_code, *count, *value_field as usize)
                .unwrap_or_else(|| {
                    log::debug!(
                        "{}: TIFF type {type_code} ({count} elements) points outside the data",
                        tag_key(field.tag)
                    );
                    RawValue::new(Vec::new(), 0)
                });
            (NativeTypeId(u32::from(*type_code)), value)
        }
    };

    NativeEntry {
        key: tag_key(field.tag),
        type_id,
        value,
    }
}

/// Tag name when the tag is known, `0x` and four hex digits otherwise.
fn tag_key(tag: Tag) -> String {
    if tag.description().is_some() {
        tag.to_string()
    } else {
        format!("0x{:04x}", tag.number())
    }
}

fn le_array<T: Copy, const N: usize>(values: &[T], to_le: fn(T) -> [u8; N]) -> RawValue {
    let bytes = values.iter().flat_map(|&v| to_le(v)).collect();
    RawValue::new(bytes, values.len())
}

/// ASCII fields hold one or more NUL-terminated strings.
fn join_ascii(strings: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(strings.iter().map(|s| s.len() + 1).sum());
    for s in strings {
        out.extend_from_slice(s);
        out.push(0);
    }
    out
}

/// Recover the bytes of a block stored as a TIFF field.
///
/// Writers disagree on the field type for IPTC-NAA; LONG arrays are turned
/// back into bytes in the file's own byte order.
fn block_bytes(value: &Value, little_endian: bool) -> Option<Vec<u8>> {
    match value {
        Value::Byte(v) | Value::Undefined(v, _) => Some(v.clone()),
        Value::Ascii(strings) => Some(strings.concat()),
        Value::Long(v) => Some(
            v.iter()
                .flat_map(|&n| if little_endian { n.to_le_bytes() } else { n.to_be_bytes() })
                .collect(),
        ),
        _ => None,
    }
}
