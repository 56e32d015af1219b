//! Extraction coordinator.
//!
//! Opens a source through a [`Backend`], decodes it, walks the IPTC, EXIF and
//! XMP namespaces in that order and normalizes every entry into a
//! [`MetadataSet`].
//!
//! ```rust,no_run
//! use metaflat::reader::read_from_path;
//!
//! if let Some(set) = read_from_path("photo.jpg") {
//!     println!("{}x{}, {} EXIF entries", set.width, set.height, set.exif.len());
//! }
//! ```

use serde::Serialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use thiserror::Error;

use crate::backend::{Backend, ContainerBackend, ImageHandle, Namespace};
use crate::config::ReadOptions;
use crate::value::Entry;

/// Everything one read produced. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataSet {
    pub width: u32,
    pub height: u32,
    pub iptc: Vec<Entry>,
    pub exif: Vec<Entry>,
    pub xmp: Vec<Entry>,
}

impl MetadataSet {
    pub fn entries(&self, namespace: Namespace) -> &[Entry] {
        match namespace {
            Namespace::Iptc => &self.iptc,
            Namespace::Exif => &self.exif,
            Namespace::Xmp => &self.xmp,
        }
    }

    fn entries_mut(&mut self, namespace: Namespace) -> &mut Vec<Entry> {
        match namespace {
            Namespace::Iptc => &mut self.iptc,
            Namespace::Exif => &mut self.exif,
            Namespace::Xmp => &mut self.xmp,
        }
    }

    /// Total number of entries across all namespaces.
    pub fn len(&self) -> usize {
        self.iptc.len() + self.exif.len() + self.xmp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a read produced no [`MetadataSet`].
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Metadata decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Metadata backend panicked: {0}")]
    Panicked(String),
}

/// Reads metadata through a backend.
#[derive(Debug, Clone)]
pub struct Reader<B> {
    backend: B,
    options: ReadOptions,
}

impl Reader<ContainerBackend> {
    pub fn new() -> Self {
        Self::with_backend(ContainerBackend)
    }
}

impl Default for Reader<ContainerBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Reader<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            options: ReadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Read the image file at `path`.
    pub fn read_path(&self, path: &Path) -> Result<MetadataSet, ReadError> {
        guarded(|| {
            let handle = self
                .backend
                .open_path(path)
                .map_err(|e| ReadError::SourceUnreadable(e.to_string()))?;
            self.collect(handle)
        })
    }

    /// Read an image held in memory.
    pub fn read_buffer(&self, buffer: &[u8]) -> Result<MetadataSet, ReadError> {
        guarded(|| {
            let handle = self
                .backend
                .open_buffer(buffer)
                .map_err(|e| ReadError::SourceUnreadable(e.to_string()))?;
            self.collect(handle)
        })
    }

    fn collect(&self, mut handle: B::Handle) -> Result<MetadataSet, ReadError> {
        if !handle.is_good() {
            return Err(ReadError::SourceUnreadable(
                "not a recognized image container".to_string(),
            ));
        }
        handle
            .decode()
            .map_err(|e| ReadError::DecodeFailed(e.to_string()))?;

        let mut set = MetadataSet::default();
        for namespace in Namespace::ALL {
            if !self.options.includes(namespace) {
                continue;
            }
            let entries = normalize_namespace(&handle, namespace);
            log::debug!("{namespace}: {} entries", entries.len());
            *set.entries_mut(namespace) = entries;
        }

        if self.options.dimensions {
            (set.width, set.height) = handle.dimensions();
        }
        Ok(set)
    }
}

fn normalize_namespace<H: ImageHandle>(handle: &H, namespace: Namespace) -> Vec<Entry> {
    handle
        .entries(namespace)
        .iter()
        .map(|native| {
            let entry = Entry::from_native(native.key.as_str(), native.type_id, &native.value);
            log::trace!(
                "{namespace} {} -> {} ({} bytes, count {})",
                entry.tag_key,
                entry.type_tag,
                entry.payload.len(),
                entry.element_count
            );
            entry
        })
        .collect()
}

/// Run one read, turning a panic anywhere inside it into an error.
fn guarded<F>(read: F) -> Result<MetadataSet, ReadError>
where
    F: FnOnce() -> Result<MetadataSet, ReadError>,
{
    catch_unwind(AssertUnwindSafe(read))
        .unwrap_or_else(|payload| Err(ReadError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Read the metadata of an image file with the bundled backend.
///
/// Returns `None` when the file cannot be opened or decoded; the reason is
/// logged at debug level.
pub fn read_from_path(path: impl AsRef<Path>) -> Option<MetadataSet> {
    let path = path.as_ref();
    Reader::new()
        .read_path(path)
        .map_err(|e| log::debug!("{}: {e}", path.display()))
        .ok()
}

/// Read the metadata of an in-memory image with the bundled backend.
pub fn read_from_bytes(buffer: &[u8]) -> Option<MetadataSet> {
    Reader::new()
        .read_buffer(buffer)
        .map_err(|e| log::debug!("{} byte buffer: {e}", buffer.len()))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, NativeEntry, RawValue};
    use crate::value::{NativeTypeId, TypeTag};
    use img_parts::jpeg::{Jpeg, JpegSegment};
    use img_parts::{Bytes, ImageEXIF};
    use std::cell::Cell;
    use std::io::Cursor;
    use std::rc::Rc;

    // ── stub backend ─────────────────────────────────────────────────

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Fault {
        None,
        NotGood,
        DecodeError,
        PanicOnOpen,
        PanicOnDecode,
        PanicOnEntries,
    }

    #[derive(Clone)]
    struct StubBackend {
        fault: Fault,
        iptc: Vec<NativeEntry<RawValue>>,
        exif: Vec<NativeEntry<RawValue>>,
        xmp: Vec<NativeEntry<RawValue>>,
        dims: (u32, u32),
        dropped: Rc<Cell<usize>>,
        dims_read: Rc<Cell<bool>>,
    }

    struct StubHandle {
        source: StubBackend,
        decoded: bool,
    }

    impl Drop for StubHandle {
        fn drop(&mut self) {
            self.source.dropped.set(self.source.dropped.get() + 1);
        }
    }

    fn native(key: &str, type_id: NativeTypeId, bytes: &[u8], count: usize) -> NativeEntry<RawValue> {
        NativeEntry {
            key: key.to_string(),
            type_id,
            value: RawValue::new(bytes.to_vec(), count),
        }
    }

    fn stub(fault: Fault) -> StubBackend {
        StubBackend {
            fault,
            iptc: vec![
                native("Keywords", NativeTypeId::STRING, b"sea", 1),
                native("Keywords", NativeTypeId::STRING, b"boat", 1),
            ],
            exif: vec![
                native("Orientation", NativeTypeId::UNSIGNED_SHORT, &[6, 0], 1),
                native("Make", NativeTypeId::ASCII_STRING, b"Canon\0", 6),
                native("Orientation", NativeTypeId::UNSIGNED_SHORT, &[1, 0], 1),
            ],
            xmp: vec![native("xmp:Rating", NativeTypeId::XMP_TEXT, b"5", 1)],
            dims: (640, 480),
            dropped: Rc::new(Cell::new(0)),
            dims_read: Rc::new(Cell::new(false)),
        }
    }

    impl Backend for StubBackend {
        type Handle = StubHandle;

        fn open_path(&self, path: &Path) -> Result<StubHandle, BackendError> {
            if path.as_os_str().is_empty() {
                return Err(BackendError::Unreadable("empty path".to_string()));
            }
            self.open_buffer(b"stub")
        }

        fn open_buffer(&self, _buffer: &[u8]) -> Result<StubHandle, BackendError> {
            if self.fault == Fault::PanicOnOpen {
                panic!("open blew up");
            }
            Ok(StubHandle {
                source: self.clone(),
                decoded: false,
            })
        }
    }

    impl ImageHandle for StubHandle {
        type Value = RawValue;

        fn is_good(&self) -> bool {
            self.source.fault != Fault::NotGood
        }

        fn decode(&mut self) -> Result<(), BackendError> {
            match self.source.fault {
                Fault::DecodeError => Err(BackendError::Corrupt {
                    namespace: Namespace::Exif,
                    reason: "bad IFD offset".to_string(),
                }),
                Fault::PanicOnDecode => panic!("decode blew up: {}", 42),
                _ => {
                    self.decoded = true;
                    Ok(())
                }
            }
        }

        fn entries(&self, namespace: Namespace) -> &[NativeEntry<RawValue>] {
            assert!(self.decoded, "entries before decode");
            if self.source.fault == Fault::PanicOnEntries && namespace == Namespace::Xmp {
                panic!("iteration blew up");
            }
            match namespace {
                Namespace::Iptc => &self.source.iptc,
                Namespace::Exif => &self.source.exif,
                Namespace::Xmp => &self.source.xmp,
            }
        }

        fn dimensions(&self) -> (u32, u32) {
            self.source.dims_read.set(true);
            self.source.dims
        }
    }

    fn keys(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.tag_key.as_str()).collect()
    }

    // ── coordinator ──────────────────────────────────────────────────

    #[test]
    fn keeps_backend_order_and_duplicates() {
        let set = Reader::with_backend(stub(Fault::None))
            .read_buffer(b"x")
            .unwrap();

        assert_eq!(keys(&set.iptc), ["Keywords", "Keywords"]);
        assert_eq!(keys(&set.exif), ["Orientation", "Make", "Orientation"]);
        assert_eq!(keys(&set.xmp), ["xmp:Rating"]);
        assert_eq!((set.width, set.height), (640, 480));
        assert_eq!(set.len(), 6);

        assert_eq!(set.exif[0].payload, vec![6, 0]);
        assert_eq!(set.exif[2].payload, vec![1, 0]);
        assert_eq!(set.exif[1].type_tag, TypeTag::AsciiString);
        assert_eq!(set.exif[1].element_count, 1);
        assert_eq!(set.iptc[1].payload, b"boat".to_vec());
    }

    #[test]
    fn invalid_handle_is_unreadable() {
        let backend = stub(Fault::NotGood);
        let dropped = backend.dropped.clone();
        let err = Reader::with_backend(backend).read_buffer(b"x").unwrap_err();
        assert!(matches!(err, ReadError::SourceUnreadable(_)));
        assert_eq!(dropped.get(), 1);
    }

    #[test]
    fn open_failure_is_unreadable() {
        let err = Reader::with_backend(stub(Fault::None))
            .read_path(Path::new(""))
            .unwrap_err();
        assert!(matches!(err, ReadError::SourceUnreadable(_)));
    }

    #[test]
    fn decode_failure_is_reported() {
        let err = Reader::with_backend(stub(Fault::DecodeError))
            .read_buffer(b"x")
            .unwrap_err();
        match err {
            ReadError::DecodeFailed(reason) => assert!(reason.contains("bad IFD offset")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panics_become_errors() {
        for (fault, message) in [
            (Fault::PanicOnOpen, "open blew up"),
            (Fault::PanicOnDecode, "decode blew up: 42"),
            (Fault::PanicOnEntries, "iteration blew up"),
        ] {
            let err = Reader::with_backend(stub(fault)).read_buffer(b"x").unwrap_err();
            match err {
                ReadError::Panicked(m) => assert_eq!(m, message),
                other => panic!("{fault:?}: unexpected error {other}"),
            }
        }
    }

    #[test]
    fn handle_dropped_after_panic() {
        let backend = stub(Fault::PanicOnEntries);
        let dropped = backend.dropped.clone();
        assert!(Reader::with_backend(backend).read_buffer(b"x").is_err());
        assert_eq!(dropped.get(), 1);
    }

    #[test]
    fn disabled_namespaces_are_empty() {
        let options = ReadOptions {
            exif: false,
            dimensions: false,
            ..ReadOptions::default()
        };
        let backend = stub(Fault::None);
        let dims_read = backend.dims_read.clone();
        let set = Reader::with_backend(backend)
            .with_options(options)
            .read_buffer(b"x")
            .unwrap();

        assert_eq!(set.iptc.len(), 2);
        assert!(set.exif.is_empty());
        assert_eq!(set.xmp.len(), 1);
        assert_eq!((set.width, set.height), (0, 0));
        assert!(!dims_read.get());
    }

    #[test]
    fn skipping_a_panicking_namespace_avoids_the_panic() {
        let set = Reader::with_backend(stub(Fault::PanicOnEntries))
            .with_options(ReadOptions::only(Namespace::Exif))
            .read_buffer(b"x")
            .unwrap();
        assert_eq!(set.exif.len(), 3);
    }

    // ── boundary ─────────────────────────────────────────────────────

    #[test]
    fn nonexistent_path_is_absent() {
        assert!(read_from_path("/nonexistent/metaflat/photo.jpg").is_none());
    }

    #[test]
    fn empty_buffer_is_absent() {
        assert!(read_from_bytes(&[]).is_none());
    }

    #[test]
    fn garbage_buffer_is_absent() {
        assert!(read_from_bytes(b"definitely not an image").is_none());
    }

    // ── end to end ───────────────────────────────────────────────────

    /// Little-endian TIFF with IFD0 = { Make: "Canon", Orientation: 6 }.
    fn tiff_exif() -> Vec<u8> {
        let mut t = b"II*\0".to_vec();
        t.extend_from_slice(&8u32.to_le_bytes());
        t.extend_from_slice(&2u16.to_le_bytes());
        // Make, ASCII, 6 bytes at offset 38
        t.extend_from_slice(&[0x0F, 0x01, 2, 0, 6, 0, 0, 0, 38, 0, 0, 0]);
        // Orientation, SHORT, 1 value inline
        t.extend_from_slice(&[0x12, 0x01, 3, 0, 1, 0, 0, 0, 6, 0, 0, 0]);
        t.extend_from_slice(&0u32.to_le_bytes());
        t.extend_from_slice(b"Canon\0");
        t
    }

    /// Bare IIM stream: RecordVersion 4, Keywords "harbour", Keywords "boats".
    fn iim() -> Vec<u8> {
        let mut iim = Vec::new();
        for (number, data) in [(0u8, &[0u8, 4][..]), (25, &b"harbour"[..]), (25, &b"boats"[..])] {
            iim.extend_from_slice(&[0x1C, 2, number]);
            iim.extend_from_slice(&(data.len() as u16).to_be_bytes());
            iim.extend_from_slice(data);
        }
        iim
    }

    fn iptc_app13() -> Vec<u8> {
        let iim = iim();
        let mut seg = b"Photoshop 3.0\0".to_vec();
        seg.extend_from_slice(b"8BIM");
        seg.extend_from_slice(&0x0404u16.to_be_bytes());
        seg.extend_from_slice(&[0, 0]);
        seg.extend_from_slice(&(iim.len() as u32).to_be_bytes());
        seg.extend_from_slice(&iim);
        if iim.len() % 2 == 1 {
            seg.push(0);
        }
        seg
    }

    const XMP_PACKET: &[u8] = br#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description xmlns:xmp="http://ns.adobe.com/xap/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmp:Rating="5">
<dc:subject><rdf:Bag><rdf:li>harbour</rdf:li><rdf:li>boats</rdf:li></rdf:Bag></dc:subject>
</rdf:Description></rdf:RDF></x:xmpmeta>"#;

    fn xmp_app1() -> Vec<u8> {
        let mut seg = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
        seg.extend_from_slice(XMP_PACKET);
        seg
    }

    /// Baseline JPEG of `width` x `height` black pixels.
    fn plain_jpeg(width: u32, height: u32) -> Jpeg {
        let img = image::RgbImage::new(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        Jpeg::from_bytes(Bytes::from(out.into_inner())).unwrap()
    }

    fn tagged_jpeg() -> Vec<u8> {
        let mut jpeg = plain_jpeg(4, 3);
        jpeg.set_exif(Some(Bytes::from(tiff_exif())));
        let segments = jpeg.segments_mut();
        let at = segments.len().min(2);
        segments.insert(at, JpegSegment::new_with_contents(0xED, Bytes::from(iptc_app13())));
        segments.insert(at, JpegSegment::new_with_contents(0xE1, Bytes::from(xmp_app1())));
        jpeg.encoder().bytes().to_vec()
    }

    #[test]
    fn reads_all_namespaces_from_jpeg() {
        let set = read_from_bytes(&tagged_jpeg()).unwrap();

        assert_eq!((set.width, set.height), (4, 3));

        assert_eq!(keys(&set.iptc), ["RecordVersion", "Keywords", "Keywords"]);
        assert_eq!(set.iptc[0].type_tag, TypeTag::UnsignedShort);
        assert_eq!(set.iptc[0].payload, vec![4, 0]);
        assert_eq!(set.iptc[2].type_tag, TypeTag::String);
        assert_eq!(set.iptc[2].payload, b"boats".to_vec());

        assert_eq!(keys(&set.exif), ["Make", "Orientation"]);
        assert_eq!(set.exif[0].type_tag, TypeTag::AsciiString);
        assert_eq!(set.exif[0].payload, b"Canon\0".to_vec());
        assert_eq!(set.exif[0].element_count, 1);
        assert_eq!(set.exif[1].type_tag, TypeTag::UnsignedShort);
        assert_eq!(set.exif[1].payload, vec![6, 0]);

        assert_eq!(keys(&set.xmp), ["xmp:Rating", "dc:subject"]);
        assert_eq!(set.xmp[1].type_tag, TypeTag::XmpBag);
        assert_eq!(set.xmp[1].payload, b"harbour, boats".to_vec());
        assert_eq!(set.xmp[1].element_count, 1);
    }

    #[test]
    fn reads_jpeg_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tagged.jpg");
        std::fs::write(&path, tagged_jpeg()).unwrap();

        let from_disk = read_from_path(&path).unwrap();
        let from_memory = read_from_bytes(&tagged_jpeg()).unwrap();
        assert_eq!(from_disk, from_memory);
    }

    fn xmp_only_jpeg() -> Vec<u8> {
        let mut jpeg = plain_jpeg(4, 3);
        let segments = jpeg.segments_mut();
        let at = segments.len().min(2);
        segments.insert(at, JpegSegment::new_with_contents(0xE1, Bytes::from(xmp_app1())));
        jpeg.encoder().bytes().to_vec()
    }

    #[test]
    fn jpeg_without_eoi_keeps_its_xmp() {
        let full = xmp_only_jpeg();
        assert_eq!(full[full.len() - 2..], [0xFF, 0xD9]);
        let truncated = &full[..full.len() - 2];

        let set = read_from_bytes(truncated).unwrap();
        assert!(set.exif.is_empty());
        assert!(set.iptc.is_empty());
        assert_eq!(keys(&set.xmp), ["xmp:Rating", "dc:subject"]);
        assert_eq!(set.xmp[0].payload, b"5".to_vec());
    }

    #[test]
    fn jpeg_cut_inside_the_scan_keeps_every_namespace() {
        let full = tagged_jpeg();
        let truncated = &full[..full.len() - 4];

        let set = read_from_bytes(truncated).unwrap();
        assert_eq!(keys(&set.iptc), ["RecordVersion", "Keywords", "Keywords"]);
        assert_eq!(keys(&set.exif), ["Make", "Orientation"]);
        assert_eq!(keys(&set.xmp), ["xmp:Rating", "dc:subject"]);
    }

    /// Little-endian 2x1 8-bit grayscale TIFF. IFD0 also carries the XMP
    /// packet in tag 700 and the IIM stream in tag 33723.
    fn tagged_tiff() -> Vec<u8> {
        const ENTRIES: u32 = 10;
        let pixels_at = 8 + 2 + 12 * ENTRIES + 4;
        let xmp_at = pixels_at + 2;
        let iim = iim();
        let iim_at = xmp_at + XMP_PACKET.len() as u32;

        let ifd: [(u16, u16, u32, u32); ENTRIES as usize] = [
            (256, 3, 1, 2),                            // ImageWidth
            (257, 3, 1, 1),                            // ImageLength
            (258, 3, 1, 8),                            // BitsPerSample
            (259, 3, 1, 1),                            // Compression: none
            (262, 3, 1, 1),                            // PhotometricInterpretation: BlackIsZero
            (273, 4, 1, pixels_at),                    // StripOffsets
            (278, 3, 1, 1),                            // RowsPerStrip
            (279, 4, 1, 2),                            // StripByteCounts
            (700, 1, XMP_PACKET.len() as u32, xmp_at), // XMLPacket
            (33723, 7, iim.len() as u32, iim_at),      // IPTC-NAA
        ];

        let mut t = b"II*\0".to_vec();
        t.extend_from_slice(&8u32.to_le_bytes());
        t.extend_from_slice(&(ENTRIES as u16).to_le_bytes());
        for (tag, typ, count, value) in ifd {
            t.extend_from_slice(&tag.to_le_bytes());
            t.extend_from_slice(&typ.to_le_bytes());
            t.extend_from_slice(&count.to_le_bytes());
            // SHORT values sit in the low half of the slot.
            t.extend_from_slice(&value.to_le_bytes());
        }
        t.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(t.len() as u32, pixels_at);
        t.extend_from_slice(&[0x00, 0xFF]);
        t.extend_from_slice(XMP_PACKET);
        t.extend_from_slice(&iim);
        t
    }

    #[test]
    fn reads_iptc_and_xmp_from_tiff_ifd0() {
        let set = read_from_bytes(&tagged_tiff()).unwrap();

        assert_eq!((set.width, set.height), (2, 1));

        assert_eq!(keys(&set.iptc), ["RecordVersion", "Keywords", "Keywords"]);
        assert_eq!(set.iptc[1].payload, b"harbour".to_vec());
        assert_eq!(set.iptc[2].payload, b"boats".to_vec());

        assert_eq!(keys(&set.xmp), ["xmp:Rating", "dc:subject"]);
        assert_eq!(set.xmp[1].payload, b"harbour, boats".to_vec());

        assert_eq!(set.exif.len(), 10);
        assert_eq!(set.exif[0].tag_key, "ImageWidth");
        assert_eq!(set.exif[0].payload, vec![2, 0]);
    }
}
