use super::{Date, NativeTypeId, NativeValue, Time, TypeTag};

/// How the payload bytes are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    /// Little-endian copy of the native bytes.
    Raw,
    /// `[year, month, day]` as `i32`.
    Date,
    /// `[hour, minute, second, tz_hour, tz_minute]` as `i32`.
    Time,
}

/// Where the element count comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Count {
    /// Whatever the parser reports.
    Native,
    /// Always one logical unit.
    One,
    /// `size / 8`. The parser's own count is wrong for 64-bit element types.
    EightByteWidth,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    tag: TypeTag,
    encoding: Encoding,
    count: Count,
}

const fn rule(tag: TypeTag, encoding: Encoding, count: Count) -> Rule {
    Rule { tag, encoding, count }
}

fn rule_for(id: NativeTypeId) -> Rule {
    use Count::{EightByteWidth, Native, One};
    use Encoding::Raw;

    match id {
        NativeTypeId::UNSIGNED_BYTE => rule(TypeTag::UnsignedByte, Raw, Native),
        NativeTypeId::ASCII_STRING => rule(TypeTag::AsciiString, Raw, One),
        NativeTypeId::UNSIGNED_SHORT => rule(TypeTag::UnsignedShort, Raw, Native),
        NativeTypeId::UNSIGNED_LONG => rule(TypeTag::UnsignedLong, Raw, Native),
        NativeTypeId::UNSIGNED_RATIONAL => rule(TypeTag::UnsignedRational, Raw, Native),
        NativeTypeId::SIGNED_BYTE => rule(TypeTag::SignedByte, Raw, Native),
        NativeTypeId::UNDEFINED => rule(TypeTag::Undefined, Raw, One),
        NativeTypeId::SIGNED_SHORT => rule(TypeTag::SignedShort, Raw, Native),
        NativeTypeId::SIGNED_LONG => rule(TypeTag::SignedLong, Raw, Native),
        NativeTypeId::SIGNED_RATIONAL => rule(TypeTag::SignedRational, Raw, Native),
        NativeTypeId::TIFF_FLOAT => rule(TypeTag::TiffFloat, Raw, Native),
        NativeTypeId::TIFF_DOUBLE => rule(TypeTag::TiffDouble, Raw, Native),
        NativeTypeId::TIFF_IFD => rule(TypeTag::TiffIfd, Raw, Native),
        NativeTypeId::UNSIGNED_LONG_LONG => rule(TypeTag::UnsignedLongLong, Raw, EightByteWidth),
        NativeTypeId::SIGNED_LONG_LONG => rule(TypeTag::SignedLongLong, Raw, EightByteWidth),
        NativeTypeId::TIFF_IFD8 => rule(TypeTag::TiffIfd8, Raw, EightByteWidth),
        NativeTypeId::STRING => rule(TypeTag::String, Raw, One),
        NativeTypeId::DATE => rule(TypeTag::Date, Encoding::Date, One),
        NativeTypeId::TIME => rule(TypeTag::Time, Encoding::Time, One),
        // First 8 bytes of a comment are the charset marker; kept as-is.
        NativeTypeId::COMMENT => rule(TypeTag::Comment, Raw, One),
        NativeTypeId::DIRECTORY => rule(TypeTag::Directory, Raw, One),
        // A plain XMP property is one value however long its text is.
        NativeTypeId::XMP_TEXT => rule(TypeTag::XmpText, Raw, Native),
        NativeTypeId::XMP_ALT => rule(TypeTag::XmpAlt, Raw, One),
        NativeTypeId::XMP_BAG => rule(TypeTag::XmpBag, Raw, One),
        NativeTypeId::XMP_SEQ => rule(TypeTag::XmpSeq, Raw, One),
        NativeTypeId::LANG_ALT => rule(TypeTag::LangAlt, Raw, One),
        NativeTypeId::INVALID | NativeTypeId::LAST => rule(TypeTag::InvalidTypeId, Raw, One),
        NativeTypeId(other) => {
            log::debug!("Unknown native type id {other:#x}, keeping raw bytes");
            rule(TypeTag::InvalidTypeId, Raw, One)
        }
    }
}

/// Result of normalizing one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub type_tag: TypeTag,
    pub payload: Vec<u8>,
    pub element_count: usize,
}

/// Normalize a native value into `(type tag, payload, element count)`.
///
/// Never fails: type ids the table does not know become
/// [`TypeTag::InvalidTypeId`] with the raw bytes preserved.
pub fn convert(type_id: NativeTypeId, value: &dyn NativeValue) -> Converted {
    let rule = rule_for(type_id);

    let payload = match rule.encoding {
        Encoding::Raw => copy_raw(value),
        Encoding::Date => {
            if value.size() == 0 {
                log::warn!("Zero-length date value, encoding as 0000-00-00");
            }
            encode_date(value.date().unwrap_or_default())
        }
        Encoding::Time => {
            if value.size() == 0 {
                log::warn!("Zero-length time value, encoding as 00:00:00+00:00");
            }
            encode_time(value.time().unwrap_or_default())
        }
    };

    let element_count = match rule.count {
        Count::Native => value.count(),
        Count::One => 1,
        Count::EightByteWidth => value.size() / 8,
    };

    Converted {
        type_tag: rule.tag,
        payload,
        element_count,
    }
}

fn copy_raw(value: &dyn NativeValue) -> Vec<u8> {
    let size = value.size();
    if size == 0 {
        return Vec::new();
    }
    let mut buffer = vec![0u8; size];
    value.copy_le(&mut buffer);
    buffer
}

fn encode_date(date: Date) -> Vec<u8> {
    encode_i32s(&[date.year, date.month, date.day])
}

fn encode_time(time: Time) -> Vec<u8> {
    encode_i32s(&[time.hour, time.minute, time.second, time.tz_hour, time.tz_minute])
}

fn encode_i32s(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
