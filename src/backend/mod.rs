//! Image-container collaborator.
//!
//! The reader never parses containers itself. It talks to a [`Backend`],
//! which opens a path or buffer into an [`ImageHandle`], decodes the
//! metadata segments on request, and then hands out the native entries of
//! each namespace in on-disk order.
//!
//! [`ContainerBackend`] is the bundled implementation:
//!
//! | Container | EXIF | IPTC | XMP |
//! |-----------|------|------|-----|
//! | JPEG | APP1 `Exif` | APP13 `Photoshop 3.0` | APP1 `http://ns.adobe.com/xap/1.0/` |
//! | TIFF | IFDs | tag 33723 | tag 700 |
//! | PNG | `eXIf` | - | iTXt `XML:com.adobe.xmp` |
//! | WebP | `EXIF` | - | `XMP ` |
//! | GIF, BMP | - | - | - |

mod iptc;
mod tiff;
mod xmp;

use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::{Bytes, ImageEXIF};
use image::ImageFormat;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::value::{Date, NativeTypeId, NativeValue, Time};

/// Failures a backend can report while opening or decoding a source.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Cannot read source: {0}")]
    Unreadable(String),

    #[error("Unsupported container: {0}")]
    Unsupported(String),

    #[error("Corrupt {namespace} metadata: {reason}")]
    Corrupt {
        namespace: Namespace,
        reason: String,
    },
}

/// The three metadata namespaces, in the order the reader walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Iptc,
    Exif,
    Xmp,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Iptc, Namespace::Exif, Namespace::Xmp];

    pub fn name(self) -> &'static str {
        match self {
            Self::Iptc => "IPTC",
            Self::Exif => "EXIF",
            Self::Xmp => "XMP",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry as the collaborator sees it.
#[derive(Debug, Clone)]
pub struct NativeEntry<V> {
    pub key: String,
    pub type_id: NativeTypeId,
    pub value: V,
}

/// Opens sources into handles.
pub trait Backend {
    type Handle: ImageHandle;

    fn open_path(&self, path: &Path) -> Result<Self::Handle, BackendError>;

    fn open_buffer(&self, buffer: &[u8]) -> Result<Self::Handle, BackendError>;
}

/// An opened image. Scoped to one read.
pub trait ImageHandle {
    type Value: NativeValue;

    /// Whether the source was recognized as a readable container.
    fn is_good(&self) -> bool;

    /// Parse the metadata segments. Must be called before [`entries`](Self::entries).
    fn decode(&mut self) -> Result<(), BackendError>;

    /// Native entries of one namespace, in on-disk order.
    fn entries(&self, namespace: Namespace) -> &[NativeEntry<Self::Value>];

    /// Pixel dimensions, `(0, 0)` when the container does not expose them.
    fn dimensions(&self) -> (u32, u32);
}

/// Value produced by [`ContainerBackend`]: bytes already in little-endian
/// order plus whatever the parser decoded alongside them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawValue {
    pub bytes: Vec<u8>,
    pub count: usize,
    pub date: Option<Date>,
    pub time: Option<Time>,
}

impl RawValue {
    pub fn new(bytes: Vec<u8>, count: usize) -> Self {
        Self {
            bytes,
            count,
            ..Self::default()
        }
    }

    /// A value that is one logical unit regardless of its byte length.
    pub fn single(bytes: Vec<u8>) -> Self {
        Self::new(bytes, 1)
    }
}

impl NativeValue for RawValue {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn count(&self) -> usize {
        self.count
    }

    fn copy_le(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.bytes);
    }

    fn date(&self) -> Option<Date> {
        self.date
    }

    fn time(&self) -> Option<Time> {
        self.time
    }
}

/// Containers the bundled backend opens.
const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Tiff,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Bmp,
];

/// Backend built on `img-parts`, `kamadak-exif`, `quick-xml` and `image`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerBackend;

impl Backend for ContainerBackend {
    type Handle = ContainerHandle;

    fn open_path(&self, path: &Path) -> Result<ContainerHandle, BackendError> {
        let bytes = std::fs::read(path)
            .map_err(|e| BackendError::Unreadable(format!("{}: {e}", path.display())))?;
        self.open_buffer(&bytes)
    }

    fn open_buffer(&self, buffer: &[u8]) -> Result<ContainerHandle, BackendError> {
        if buffer.is_empty() {
            return Err(BackendError::Unreadable("empty buffer".to_string()));
        }
        let format = image::guess_format(buffer)
            .map_err(|e| BackendError::Unsupported(e.to_string()))?;
        Ok(ContainerHandle::new(Bytes::copy_from_slice(buffer), format))
    }
}

/// Handle over an in-memory copy of the source.
#[derive(Debug)]
pub struct ContainerHandle {
    bytes: Bytes,
    format: ImageFormat,
    iptc: Vec<NativeEntry<RawValue>>,
    exif: Vec<NativeEntry<RawValue>>,
    xmp: Vec<NativeEntry<RawValue>>,
}

impl ContainerHandle {
    fn new(bytes: Bytes, format: ImageFormat) -> Self {
        Self {
            bytes,
            format,
            iptc: Vec::new(),
            exif: Vec::new(),
            xmp: Vec::new(),
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    fn read_dimensions(&self) -> (u32, u32) {
        // The decoder only reads the header here.
        let reader = image::ImageReader::with_format(Cursor::new(&self.bytes[..]), self.format);
        match reader.into_dimensions() {
            Ok(dims) => dims,
            Err(e) => {
                log::debug!("No pixel dimensions for {:?}: {e}", self.format);
                (0, 0)
            }
        }
    }
}

impl ImageHandle for ContainerHandle {
    type Value = RawValue;

    fn is_good(&self) -> bool {
        SUPPORTED_FORMATS.contains(&self.format)
    }

    fn decode(&mut self) -> Result<(), BackendError> {
        let layout = Layout::parse(&self.bytes, self.format);

        let ifds = match layout.exif_blob(&self.bytes) {
            Some(blob) => Some(tiff::read(&blob)?),
            None => None,
        };

        let mut iptc_data = iptc::find_in_container(&layout);
        let mut xmp_packet = xmp::find_in_container(&layout, &self.bytes);

        if let Some(ifds) = &ifds {
            // TIFF keeps IPTC and XMP as plain IFD0 fields.
            if iptc_data.is_none() {
                iptc_data = ifds.iptc_block.clone();
            }
            if xmp_packet.is_none() {
                xmp_packet = ifds.xmp_packet.clone();
            }
        }

        self.exif = ifds.map(|t| t.entries).unwrap_or_default();
        self.iptc = match iptc_data {
            Some(data) => iptc::parse(&data)?,
            None => Vec::new(),
        };
        self.xmp = match xmp_packet {
            Some(packet) => xmp::parse(&packet)?,
            None => Vec::new(),
        };
        Ok(())
    }

    fn entries(&self, namespace: Namespace) -> &[NativeEntry<RawValue>] {
        match namespace {
            Namespace::Iptc => &self.iptc,
            Namespace::Exif => &self.exif,
            Namespace::Xmp => &self.xmp,
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        self.read_dimensions()
    }
}

/// Segment structure of a container, parsed once per decode.
///
/// Parsing stops where the metadata ends (SOS for JPEG), so a damaged or
/// truncated pixel stream does not hide intact metadata.
pub(super) enum Layout {
    Jpeg(Jpeg),
    Png(Png),
    WebP,
    Tiff,
    /// No metadata segments we can read.
    Opaque,
}

impl Layout {
    fn parse(bytes: &Bytes, format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => Jpeg::from_bytes(bytes.clone())
                .map(Layout::Jpeg)
                .unwrap_or_else(|e| {
                    log::debug!("Cannot walk JPEG segments: {e}");
                    Layout::Opaque
                }),
            ImageFormat::Png => Png::from_bytes(bytes.clone())
                .map(Layout::Png)
                .unwrap_or_else(|e| {
                    log::debug!("Cannot walk PNG chunks: {e}");
                    Layout::Opaque
                }),
            ImageFormat::WebP => Layout::WebP,
            ImageFormat::Tiff => Layout::Tiff,
            _ => Layout::Opaque,
        }
    }

    /// The TIFF structure holding the EXIF IFDs, without any container framing.
    fn exif_blob(&self, bytes: &Bytes) -> Option<Bytes> {
        match self {
            Layout::Jpeg(jpeg) => jpeg.exif(),
            Layout::Png(png) => png.exif(),
            Layout::WebP => riff_chunk(bytes, b"EXIF").map(|chunk| {
                // Writers disagree on whether the JPEG-style prefix is kept.
                let tiff = chunk.strip_prefix(EXIF_PREFIX).unwrap_or(chunk);
                Bytes::copy_from_slice(tiff)
            }),
            Layout::Tiff => Some(bytes.clone()),
            Layout::Opaque => None,
        }
    }
}

const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// Find a top-level chunk in a RIFF/WEBP file.
pub(super) fn riff_chunk<'a>(data: &'a [u8], id: &[u8; 4]) -> Option<&'a [u8]> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return None;
    }
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let size =
            u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]) as usize;
        let start = pos + 8;
        let end = start.checked_add(size)?.min(data.len());
        if &data[pos..pos + 4] == id {
            return Some(&data[start..end]);
        }
        pos = end + (size % 2);
    }
    None
}
