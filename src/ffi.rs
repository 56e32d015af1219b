//! C boundary.
//!
//! [`externalize`] flattens a [`MetadataSet`] into one caller-owned
//! [`MetaflatResult`]; [`release`] frees it again. The two walk the same
//! shape in the same order and must be kept in step.
//!
//! Ownership rules for C callers:
//!
//! - every non-NULL pointer returned by `metaflat_read_file` or
//!   `metaflat_read_buffer` must be passed to `metaflat_result_free` exactly
//!   once;
//! - nothing inside a result may be freed or reallocated individually;
//! - a result must not be used after it was freed.
//!
//! Double frees are not detected.

use std::ffi::{CStr, CString, c_char};
use std::ptr::{self, slice_from_raw_parts_mut};

use crate::reader::{MetadataSet, read_from_bytes, read_from_path};
use crate::value::Entry;

/// One normalized entry.
///
/// `tag_key` is NUL-terminated. `data` is NULL exactly when `size` is 0.
/// `type_id` is a `TypeTag` discriminant.
#[repr(C)]
#[derive(Debug)]
pub struct MetaflatEntry {
    pub tag_key: *mut c_char,
    pub type_id: u32,
    pub data: *mut u8,
    pub size: usize,
    pub count: usize,
}

/// A whole read. Each `*_data` array is NULL exactly when its count is 0.
#[repr(C)]
#[derive(Debug)]
pub struct MetaflatResult {
    pub width: u32,
    pub height: u32,
    pub iptc_data: *mut MetaflatEntry,
    pub iptc_count: usize,
    pub exif_data: *mut MetaflatEntry,
    pub exif_count: usize,
    pub xmp_data: *mut MetaflatEntry,
    pub xmp_count: usize,
}

/// Move a metadata set into a heap record the caller owns.
///
/// Never returns NULL. Free it with [`release`].
pub fn externalize(set: MetadataSet) -> *mut MetaflatResult {
    let (iptc_data, iptc_count) = externalize_entries(set.iptc);
    let (exif_data, exif_count) = externalize_entries(set.exif);
    let (xmp_data, xmp_count) = externalize_entries(set.xmp);

    Box::into_raw(Box::new(MetaflatResult {
        width: set.width,
        height: set.height,
        iptc_data,
        iptc_count,
        exif_data,
        exif_count,
        xmp_data,
        xmp_count,
    }))
}

fn externalize_entries(entries: Vec<Entry>) -> (*mut MetaflatEntry, usize) {
    if entries.is_empty() {
        return (ptr::null_mut(), 0);
    }
    let flat: Box<[MetaflatEntry]> = entries.into_iter().map(externalize_entry).collect();
    let count = flat.len();
    (Box::into_raw(flat).cast::<MetaflatEntry>(), count)
}

fn externalize_entry(entry: Entry) -> MetaflatEntry {
    // Interior NULs would truncate the key on the C side.
    let tag_key = CString::new(entry.tag_key).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    });

    let size = entry.payload.len();
    let data = if size == 0 {
        ptr::null_mut()
    } else {
        Box::into_raw(entry.payload.into_boxed_slice()).cast::<u8>()
    };

    MetaflatEntry {
        tag_key: tag_key.into_raw(),
        type_id: entry.type_tag as u32,
        data,
        size,
        count: entry.element_count,
    }
}

/// Free a record produced by [`externalize`]. NULL is a no-op.
///
/// # Safety
///
/// `result` must be NULL or a pointer returned by [`externalize`] that has
/// not been released yet. It is dangling afterwards.
pub unsafe fn release(result: *mut MetaflatResult) {
    if result.is_null() {
        return;
    }
    let result = unsafe { Box::from_raw(result) };
    unsafe {
        release_entries(result.iptc_data, result.iptc_count);
        release_entries(result.exif_data, result.exif_count);
        release_entries(result.xmp_data, result.xmp_count);
    }
}

unsafe fn release_entries(data: *mut MetaflatEntry, count: usize) {
    if data.is_null() {
        return;
    }
    let entries = unsafe { Box::from_raw(slice_from_raw_parts_mut(data, count)) };
    for entry in entries.iter() {
        if !entry.tag_key.is_null() {
            drop(unsafe { CString::from_raw(entry.tag_key) });
        }
        if !entry.data.is_null() {
            drop(unsafe { Box::from_raw(slice_from_raw_parts_mut(entry.data, entry.size)) });
        }
    }
}

/// Read the image file at `path`. Returns NULL on any failure, including a
/// NULL or non-UTF-8 path.
///
/// # Safety
///
/// `path` must be NULL or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn metaflat_read_file(path: *const c_char) -> *mut MetaflatResult {
    if path.is_null() {
        return ptr::null_mut();
    }
    let path = unsafe { CStr::from_ptr(path) };
    let Ok(path) = path.to_str() else {
        log::debug!("Path is not valid UTF-8: {path:?}");
        return ptr::null_mut();
    };
    read_from_path(path).map_or(ptr::null_mut(), externalize)
}

/// Read an image held in memory. Returns NULL on any failure, including a
/// NULL buffer.
///
/// # Safety
///
/// `buffer` must be NULL or point to `size` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn metaflat_read_buffer(buffer: *const u8, size: usize) -> *mut MetaflatResult {
    if buffer.is_null() {
        return ptr::null_mut();
    }
    let bytes = unsafe { std::slice::from_raw_parts(buffer, size) };
    read_from_bytes(bytes).map_or(ptr::null_mut(), externalize)
}

/// Free a result from `metaflat_read_file` or `metaflat_read_buffer`.
///
/// # Safety
///
/// See [`release`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn metaflat_result_free(result: *mut MetaflatResult) {
    unsafe { release(result) }
}
