//! # metaflat
//!
//! Reads the IPTC, EXIF and XMP metadata of an image and flattens every
//! value into a normalized entry: a type tag, a little-endian byte payload
//! and an element count. The result can be handed across a C boundary as
//! one caller-owned record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metaflat::reader::read_from_path;
//!
//! let Some(set) = read_from_path("photo.jpg") else {
//!     eprintln!("not a readable image");
//!     return;
//! };
//!
//! println!("{} x {}", set.width, set.height);
//! for entry in &set.exif {
//!     println!("{} {} x{}", entry.tag_key, entry.type_tag, entry.element_count);
//! }
//! ```
//!
//! ## Choosing what to read
//!
//! ```rust,no_run
//! use metaflat::backend::Namespace;
//! use metaflat::config::ReadOptions;
//! use metaflat::reader::Reader;
//! use std::path::Path;
//!
//! let reader = Reader::new().with_options(ReadOptions::only(Namespace::Xmp));
//! match reader.read_path(Path::new("photo.jpg")) {
//!     Ok(set) => println!("{} XMP properties", set.xmp.len()),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```
//!
//! ## C callers
//!
//! Build the `cdylib` and include `include/metaflat.h`. Every result from
//! `metaflat_read_file` or `metaflat_read_buffer` must be released with
//! `metaflat_result_free` exactly once.
//!
//! ## Modules
//!
//! - [`value`]: type tags and the value normalizer
//! - [`backend`]: the container collaborator (JPEG, PNG, TIFF, WebP, GIF, BMP)
//! - [`reader`]: the extraction coordinator
//! - [`ffi`]: externalize/release and the C entry points
//! - [`config`]: configuration (read options, output)
//! - [`scan`]: collecting image files from paths

pub mod backend;
pub mod config;
pub mod ffi;
pub mod reader;
pub mod scan;
pub mod value;

pub use reader::{MetadataSet, ReadError, Reader, read_from_bytes, read_from_path};
pub use value::{Entry, TypeTag};
