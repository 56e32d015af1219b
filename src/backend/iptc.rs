//! IPTC-IIM datasets.
//!
//! JPEG stores them in APP13 as Photoshop 8BIM resource 0x0404; TIFF stores
//! the bare IIM stream in IFD0 (picked up by the EXIF reader).
//!
//! IIM dataset layout:
//!   Byte 0:    0x1C tag marker
//!   Byte 1:    record number
//!   Byte 2:    dataset number
//!   Bytes 3-4: data length (big-endian u16; high bit set = extended length)
//!   Bytes 5+:  data

use super::{BackendError, Layout, Namespace, NativeEntry, RawValue};
use crate::value::{Date, NativeTypeId, Time};

const APP13: u8 = 0xED;
const PHOTOSHOP_HEADER: &[u8] = b"Photoshop 3.0\0";
const BIM_MARKER: &[u8] = b"8BIM";
const IPTC_RESOURCE_ID: u16 = 0x0404;
const TAG_MARKER: u8 = 0x1C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    String,
    Short,
    Date,
    Time,
    Binary,
}

/// `(record, dataset, name, kind)` for the datasets we know by name.
const DATASETS: &[(u8, u8, &str, Kind)] = &[
    // Envelope record
    (1, 0, "ModelVersion", Kind::Short),
    (1, 5, "Destination", Kind::String),
    (1, 20, "FileFormat", Kind::Short),
    (1, 22, "FileVersion", Kind::Short),
    (1, 30, "ServiceId", Kind::String),
    (1, 40, "EnvelopeNumber", Kind::String),
    (1, 50, "ProductId", Kind::String),
    (1, 60, "EnvelopePriority", Kind::String),
    (1, 70, "DateSent", Kind::Date),
    (1, 80, "TimeSent", Kind::Time),
    (1, 90, "CharacterSet", Kind::Binary),
    (1, 100, "UNO", Kind::String),
    (1, 120, "ARMId", Kind::Short),
    (1, 122, "ARMVersion", Kind::Short),
    // Application record
    (2, 0, "RecordVersion", Kind::Short),
    (2, 3, "ObjectType", Kind::String),
    (2, 4, "ObjectAttribute", Kind::String),
    (2, 5, "ObjectName", Kind::String),
    (2, 7, "EditStatus", Kind::String),
    (2, 8, "EditorialUpdate", Kind::String),
    (2, 10, "Urgency", Kind::String),
    (2, 12, "Subject", Kind::String),
    (2, 15, "Category", Kind::String),
    (2, 20, "SuppCategory", Kind::String),
    (2, 22, "FixtureId", Kind::String),
    (2, 25, "Keywords", Kind::String),
    (2, 26, "LocationCode", Kind::String),
    (2, 27, "LocationName", Kind::String),
    (2, 30, "ReleaseDate", Kind::Date),
    (2, 35, "ReleaseTime", Kind::Time),
    (2, 37, "ExpirationDate", Kind::Date),
    (2, 38, "ExpirationTime", Kind::Time),
    (2, 40, "SpecialInstructions", Kind::String),
    (2, 42, "ActionAdvised", Kind::String),
    (2, 45, "ReferenceService", Kind::String),
    (2, 47, "ReferenceDate", Kind::Date),
    (2, 50, "ReferenceNumber", Kind::String),
    (2, 55, "DateCreated", Kind::Date),
    (2, 60, "TimeCreated", Kind::Time),
    (2, 62, "DigitizationDate", Kind::Date),
    (2, 63, "DigitizationTime", Kind::Time),
    (2, 65, "Program", Kind::String),
    (2, 70, "ProgramVersion", Kind::String),
    (2, 75, "ObjectCycle", Kind::String),
    (2, 80, "Byline", Kind::String),
    (2, 85, "BylineTitle", Kind::String),
    (2, 90, "City", Kind::String),
    (2, 92, "SubLocation", Kind::String),
    (2, 95, "ProvinceState", Kind::String),
    (2, 100, "CountryCode", Kind::String),
    (2, 101, "CountryName", Kind::String),
    (2, 103, "TransmissionReference", Kind::String),
    (2, 105, "Headline", Kind::String),
    (2, 110, "Credit", Kind::String),
    (2, 115, "Source", Kind::String),
    (2, 116, "Copyright", Kind::String),
    (2, 118, "Contact", Kind::String),
    (2, 120, "Caption", Kind::String),
    (2, 122, "Writer", Kind::String),
    (2, 125, "RasterizedCaption", Kind::Binary),
    (2, 130, "ImageType", Kind::String),
    (2, 131, "ImageOrientation", Kind::String),
    (2, 135, "Language", Kind::String),
    (2, 150, "AudioType", Kind::String),
    (2, 151, "AudioRate", Kind::String),
    (2, 152, "AudioResolution", Kind::String),
    (2, 153, "AudioDuration", Kind::String),
    (2, 154, "AudioOutcue", Kind::String),
    (2, 200, "PreviewFormat", Kind::Short),
    (2, 201, "PreviewVersion", Kind::Short),
    (2, 202, "Preview", Kind::Binary),
];

fn lookup(record: u8, dataset: u8) -> (String, Kind) {
    DATASETS
        .iter()
        .find(|(r, d, _, _)| *r == record && *d == dataset)
        .map(|(_, _, name, kind)| (name.to_string(), *kind))
        .unwrap_or_else(|| (format!("0x{record:02x}{dataset:02x}"), Kind::Binary))
}

/// Locate the raw IIM stream in a container that embeds it outside EXIF.
pub(super) fn find_in_container(layout: &Layout) -> Option<Vec<u8>> {
    let Layout::Jpeg(jpeg) = layout else {
        return None;
    };
    jpeg.segments()
        .iter()
        .filter(|s| s.marker() == APP13)
        .find_map(|s| extract_from_8bim(s.contents()).map(<[u8]>::to_vec))
}

/// Pull resource 0x0404 out of a Photoshop 8BIM resource block.
fn extract_from_8bim(segment: &[u8]) -> Option<&[u8]> {
    let data = segment.strip_prefix(PHOTOSHOP_HEADER).unwrap_or(segment);

    let mut pos = 0;
    while pos + 12 <= data.len() {
        if &data[pos..pos + 4] != BIM_MARKER {
            break;
        }
        let resource_id = u16::from_be_bytes([data[pos + 4], data[pos + 5]]);

        // Pascal name: length byte + chars, padded to even
        let name_len = data[pos + 6] as usize;
        let name_total = (1 + name_len + 1) & !1;
        let len_at = pos + 6 + name_total;
        if len_at + 4 > data.len() {
            break;
        }
        let res_len = u32::from_be_bytes([
            data[len_at],
            data[len_at + 1],
            data[len_at + 2],
            data[len_at + 3],
        ]) as usize;
        let start = len_at + 4;
        let end = start.checked_add(res_len)?;
        if end > data.len() {
            break;
        }

        if resource_id == IPTC_RESOURCE_ID {
            return Some(&data[start..end]);
        }
        pos = end + (res_len % 2);
    }
    None
}

/// Parse an IIM stream into native entries, in stream order.
pub(super) fn parse(data: &[u8]) -> Result<Vec<NativeEntry<RawValue>>, BackendError> {
    let corrupt = |reason: String| BackendError::Corrupt {
        namespace: Namespace::Iptc,
        reason,
    };

    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        // Trailing padding after the last dataset is common.
        if data[pos] != TAG_MARKER {
            if data[pos..].iter().all(|&b| b == 0) {
                break;
            }
            return Err(corrupt(format!("expected tag marker at offset {pos}")));
        }
        if pos + 5 > data.len() {
            return Err(corrupt(format!("truncated dataset header at offset {pos}")));
        }

        let record = data[pos + 1];
        let dataset = data[pos + 2];
        let raw_len = u16::from_be_bytes([data[pos + 3], data[pos + 4]]);
        pos += 5;

        let length = if raw_len & 0x8000 != 0 {
            // Extended dataset: low bits give the size of the length field.
            let width = usize::from(raw_len & 0x7FFF);
            if width == 0 || width > 4 || pos + width > data.len() {
                return Err(corrupt(format!("bad extended length at offset {pos}")));
            }
            let len = data[pos..pos + width]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
            pos += width;
            len
        } else {
            usize::from(raw_len)
        };

        if pos + length > data.len() {
            return Err(corrupt(format!(
                "dataset {record}:{dataset} overruns the block ({length} bytes)"
            )));
        }
        let bytes = &data[pos..pos + length];
        pos += length;

        let (key, kind) = lookup(record, dataset);
        let (type_id, value) = native_value(kind, bytes);
        log::trace!("IPTC {record}:{dataset} {key} ({length} bytes)");
        entries.push(NativeEntry { key, type_id, value });
    }

    log::debug!("Read {} IPTC datasets", entries.len());
    Ok(entries)
}

fn native_value(kind: Kind, bytes: &[u8]) -> (NativeTypeId, RawValue) {
    match kind {
        Kind::String => (NativeTypeId::STRING, RawValue::single(bytes.to_vec())),
        Kind::Binary => (NativeTypeId::UNDEFINED, RawValue::single(bytes.to_vec())),
        Kind::Short => {
            // Big-endian in the stream; odd trailing bytes are dropped.
            let shorts: Vec<u8> = bytes
                .chunks_exact(2)
                .flat_map(|c| u16::from_be_bytes([c[0], c[1]]).to_le_bytes())
                .collect();
            let count = shorts.len() / 2;
            (NativeTypeId::UNSIGNED_SHORT, RawValue::new(shorts, count))
        }
        Kind::Date => {
            let mut value = RawValue::single(bytes.to_vec());
            value.date = parse_date(bytes);
            if value.date.is_none() && !bytes.is_empty() {
                log::debug!("Unparseable IPTC date {:?}", String::from_utf8_lossy(bytes));
            }
            (NativeTypeId::DATE, value)
        }
        Kind::Time => {
            let mut value = RawValue::single(bytes.to_vec());
            value.time = parse_time(bytes);
            if value.time.is_none() && !bytes.is_empty() {
                log::debug!("Unparseable IPTC time {:?}", String::from_utf8_lossy(bytes));
            }
            (NativeTypeId::TIME, value)
        }
    }
}

/// Parse a run of ASCII digits.
fn digits(bytes: &[u8]) -> Option<i32> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(bytes.iter().fold(0i32, |acc, &b| acc * 10 + i32::from(b - b'0')))
}

/// `CCYYMMDD` or `CCYY-MM-DD`.
pub(super) fn parse_date(bytes: &[u8]) -> Option<Date> {
    let compact: Vec<u8> = match bytes.len() {
        8 => bytes.to_vec(),
        10 if bytes[4] == b'-' && bytes[7] == b'-' => {
            [&bytes[0..4], &bytes[5..7], &bytes[8..10]].concat()
        }
        _ => return None,
    };
    Some(Date {
        year: digits(&compact[0..4])?,
        month: digits(&compact[4..6])?,
        day: digits(&compact[6..8])?,
    })
}

/// `HHMMSS±HHMM` or `HH:MM:SS±HH:MM`; the zone may be missing.
pub(super) fn parse_time(bytes: &[u8]) -> Option<Time> {
    let compact: Vec<u8> = bytes.iter().copied().filter(|&b| b != b':').collect();
    if compact.len() < 6 {
        return None;
    }
    let mut time = Time {
        hour: digits(&compact[0..2])?,
        minute: digits(&compact[2..4])?,
        second: digits(&compact[4..6])?,
        ..Time::default()
    };

    let zone = &compact[6..];
    match zone {
        [] => {}
        [sign @ (b'+' | b'-'), rest @ ..] if rest.len() == 4 => {
            let hours = digits(&rest[0..2])?;
            let minutes = digits(&rest[2..4])?;
            let sign = if *sign == b'-' { -1 } else { 1 };
            time.tz_hour = sign * hours;
            time.tz_minute = sign * minutes;
        }
        _ => return None,
    }
    Some(time)
}
