//! Normalized metadata values.
//!
//! Every metadata value, whatever namespace it came from, ends up as an
//! [`Entry`]: a [`TypeTag`], a little-endian byte payload and an element
//! count. The conversion itself lives in [`convert`]; the types here are the
//! vocabulary shared by the collaborator backend, the reader and the FFI
//! layer.

mod normalize;

pub use normalize::{Converted, convert};

use serde::Serialize;

/// Normalized value kind.
///
/// The discriminants are stable: they are what crosses the C boundary as
/// `MetaflatEntry::type_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u32)]
pub enum TypeTag {
    UnsignedByte = 0,
    AsciiString = 1,
    UnsignedShort = 2,
    UnsignedLong = 3,
    UnsignedRational = 4,
    SignedByte = 5,
    Undefined = 6,
    SignedShort = 7,
    SignedLong = 8,
    SignedRational = 9,
    TiffFloat = 10,
    TiffDouble = 11,
    TiffIfd = 12,
    UnsignedLongLong = 13,
    SignedLongLong = 14,
    TiffIfd8 = 15,
    String = 16,
    Date = 17,
    Time = 18,
    Comment = 19,
    Directory = 20,
    XmpText = 21,
    XmpAlt = 22,
    XmpBag = 23,
    XmpSeq = 24,
    LangAlt = 25,
    InvalidTypeId = 26,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            Self::UnsignedByte => "unsignedByte",
            Self::AsciiString => "asciiString",
            Self::UnsignedShort => "unsignedShort",
            Self::UnsignedLong => "unsignedLong",
            Self::UnsignedRational => "unsignedRational",
            Self::SignedByte => "signedByte",
            Self::Undefined => "undefined",
            Self::SignedShort => "signedShort",
            Self::SignedLong => "signedLong",
            Self::SignedRational => "signedRational",
            Self::TiffFloat => "tiffFloat",
            Self::TiffDouble => "tiffDouble",
            Self::TiffIfd => "tiffIfd",
            Self::UnsignedLongLong => "unsignedLongLong",
            Self::SignedLongLong => "signedLongLong",
            Self::TiffIfd8 => "tiffIfd8",
            Self::String => "string",
            Self::Date => "date",
            Self::Time => "time",
            Self::Comment => "comment",
            Self::Directory => "directory",
            Self::XmpText => "xmpText",
            Self::XmpAlt => "xmpAlt",
            Self::XmpBag => "xmpBag",
            Self::XmpSeq => "xmpSeq",
            Self::LangAlt => "langAlt",
            Self::InvalidTypeId => "invalidTypeId",
        }
    }

    /// Width of one element in the payload, for types that have one.
    pub fn element_width(self) -> Option<usize> {
        match self {
            Self::UnsignedByte | Self::SignedByte => Some(1),
            Self::UnsignedShort | Self::SignedShort => Some(2),
            Self::UnsignedLong | Self::SignedLong | Self::TiffIfd | Self::TiffFloat => Some(4),
            Self::UnsignedRational
            | Self::SignedRational
            | Self::TiffDouble
            | Self::UnsignedLongLong
            | Self::SignedLongLong
            | Self::TiffIfd8 => Some(8),
            Self::Date => Some(12),
            Self::Time => Some(20),
            _ => None,
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Type identifier as reported by the container parser.
///
/// Numbering follows the TIFF field types, extended with a private range for
/// the kinds TIFF has no code for (IPTC strings, dates and times, XMP shapes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeTypeId(pub u32);

impl NativeTypeId {
    pub const UNSIGNED_BYTE: Self = Self(1);
    pub const ASCII_STRING: Self = Self(2);
    pub const UNSIGNED_SHORT: Self = Self(3);
    pub const UNSIGNED_LONG: Self = Self(4);
    pub const UNSIGNED_RATIONAL: Self = Self(5);
    pub const SIGNED_BYTE: Self = Self(6);
    pub const UNDEFINED: Self = Self(7);
    pub const SIGNED_SHORT: Self = Self(8);
    pub const SIGNED_LONG: Self = Self(9);
    pub const SIGNED_RATIONAL: Self = Self(10);
    pub const TIFF_FLOAT: Self = Self(11);
    pub const TIFF_DOUBLE: Self = Self(12);
    pub const TIFF_IFD: Self = Self(13);
    pub const UNSIGNED_LONG_LONG: Self = Self(16);
    pub const SIGNED_LONG_LONG: Self = Self(17);
    pub const TIFF_IFD8: Self = Self(18);
    pub const STRING: Self = Self(0x10000);
    pub const DATE: Self = Self(0x10001);
    pub const TIME: Self = Self(0x10002);
    pub const COMMENT: Self = Self(0x10003);
    pub const DIRECTORY: Self = Self(0x10004);
    pub const XMP_TEXT: Self = Self(0x10005);
    pub const XMP_ALT: Self = Self(0x10006);
    pub const XMP_BAG: Self = Self(0x10007);
    pub const XMP_SEQ: Self = Self(0x10008);
    pub const LANG_ALT: Self = Self(0x10009);
    pub const INVALID: Self = Self(0x1fffe);
    pub const LAST: Self = Self(0x1ffff);
}

/// Calendar date as decoded by the container parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Date {
    pub year: i32,
    pub month: i32,
    pub day: i32,
}

/// Time of day with a UTC offset, as decoded by the container parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Time {
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    pub tz_hour: i32,
    pub tz_minute: i32,
}

/// A metadata value in the collaborator's own representation.
///
/// The normalizer only ever asks for the byte size, the element count the
/// parser reports, a little-endian copy of the bytes, and (for the two
/// calendar kinds) the decoded date or time.
pub trait NativeValue {
    /// Size of the value in bytes.
    fn size(&self) -> usize;

    /// Number of elements as reported by the parser.
    fn count(&self) -> usize;

    /// Copy the value into `out` in little-endian byte order.
    /// `out` is exactly [`size`](Self::size) bytes long.
    fn copy_le(&self, out: &mut [u8]);

    fn date(&self) -> Option<Date> {
        None
    }

    fn time(&self) -> Option<Time> {
        None
    }
}

/// One normalized metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub tag_key: String,
    pub type_tag: TypeTag,
    pub payload: Vec<u8>,
    pub element_count: usize,
}

impl Entry {
    /// Normalize one native value into an entry.
    pub fn from_native(tag_key: impl Into<String>, type_id: NativeTypeId, value: &dyn NativeValue) -> Self {
        let Converted {
            type_tag,
            payload,
            element_count,
        } = convert(type_id, value);
        Self {
            tag_key: tag_key.into(),
            type_tag,
            payload,
            element_count,
        }
    }
}
