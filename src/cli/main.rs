use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use metaflat::backend::Namespace;
use metaflat::config::{self, ReadOptions};
use metaflat::reader::{MetadataSet, Reader};
use metaflat::scan;
use metaflat::value::{Entry, TypeTag};

#[derive(Parser, Debug)]
#[command(
    name = "metaflat-cli",
    version,
    about = "Dump the IPTC, EXIF and XMP metadata of images as normalized entries"
)]
struct Cli {
    /// Image files or directories to read
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Only read one namespace
    #[arg(long, value_enum, value_name = "NS")]
    only: Option<NamespaceArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NamespaceArg {
    Iptc,
    Exif,
    Xmp,
}

impl From<NamespaceArg> for Namespace {
    fn from(arg: NamespaceArg) -> Self {
        match arg {
            NamespaceArg::Iptc => Namespace::Iptc,
            NamespaceArg::Exif => Namespace::Exif,
            NamespaceArg::Xmp => Namespace::Xmp,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    // Load config, CLI flags win
    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.json {
        config.output.json = true;
    }
    if let Some(only) = cli.only {
        config.read = ReadOptions {
            dimensions: config.read.dimensions,
            ..ReadOptions::only(only.into())
        };
    }

    let images = scan::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }
    log::info!("Found {} image(s) to read", images.len());

    let reader = Reader::new().with_options(config.read);
    let total = images.len();
    let mut json_results = Vec::new();
    let mut failed = 0;

    for (i, image_path) in images.iter().enumerate() {
        log::debug!("[{}/{}] Reading: {}", i + 1, total, image_path.display());

        match reader.read_path(image_path) {
            Ok(set) => {
                if config.output.json {
                    json_results.push(serde_json::json!({
                        "path": image_path.display().to_string(),
                        "metadata": set,
                        "error": null,
                    }));
                } else {
                    print_metadata(image_path, &set, config.output.preview_bytes);
                }
            }
            Err(e) => {
                failed += 1;
                if config.output.json {
                    json_results.push(serde_json::json!({
                        "path": image_path.display().to_string(),
                        "metadata": null,
                        "error": e.to_string(),
                    }));
                } else {
                    log::error!("{}: {e}", image_path.display());
                }
            }
        }
    }

    if config.output.json {
        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }

    log::info!(
        "Done: {} read, {failed} failed out of {total} images",
        total - failed
    );
    Ok(())
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 40;
/// Indent for continuation lines (key, type and count columns + " : ").
const INDENT: &str = "                                                    ";

/// Print every namespace of one file as a table.
fn print_metadata(path: &Path, set: &MetadataSet, preview_bytes: usize) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(92));

    if set.width > 0 || set.height > 0 {
        println!("  {:<28} : {} x {}", "Dimensions", set.width, set.height);
        println!();
    }

    for namespace in Namespace::ALL {
        let entries = set.entries(namespace);
        if entries.is_empty() {
            continue;
        }
        println!("  {BOLD}{namespace}{RESET} ({} entries)", entries.len());
        println!("  {DIM}{}{RESET}", "─".repeat(90));
        for entry in entries {
            print_row(entry, preview_bytes);
        }
        println!();
    }

    if set.is_empty() {
        println!("  {DIM}(no metadata found){RESET}");
        println!();
    }
}

/// Print a single row in the metadata table.
fn print_row(entry: &Entry, preview_bytes: usize) {
    let key_col = format!("{:<28}", entry.tag_key);
    let type_col = format!("{:<16}", entry.type_tag.name());
    let lines = wrap_text(&preview(entry, preview_bytes), VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {key_col} {type_col} {:>3} : {line}", entry.element_count);
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Human-readable rendering of at most `max_bytes` of a payload.
fn preview(entry: &Entry, max_bytes: usize) -> String {
    let payload = &entry.payload;
    match entry.type_tag {
        TypeTag::Date => {
            let v = le_i32s(payload);
            match v.as_slice() {
                [y, m, d] => format!("{y:04}-{m:02}-{d:02}"),
                _ => hex(payload, max_bytes),
            }
        }
        TypeTag::Time => {
            let v = le_i32s(payload);
            match v.as_slice() {
                [h, m, s, tzh, tzm] => {
                    let sign = if *tzh < 0 || *tzm < 0 { '-' } else { '+' };
                    format!(
                        "{h:02}:{m:02}:{s:02}{sign}{:02}:{:02}",
                        tzh.abs(),
                        tzm.abs()
                    )
                }
                _ => hex(payload, max_bytes),
            }
        }
        TypeTag::AsciiString
        | TypeTag::String
        | TypeTag::XmpText
        | TypeTag::XmpAlt
        | TypeTag::XmpBag
        | TypeTag::XmpSeq
        | TypeTag::LangAlt => {
            let shown = &payload[..payload.len().min(max_bytes)];
            let text = String::from_utf8_lossy(shown);
            let text = text.trim_end_matches('\0');
            if shown.len() < payload.len() {
                format!("{text}…")
            } else {
                text.to_string()
            }
        }
        _ => hex(payload, max_bytes),
    }
}

fn le_i32s(payload: &[u8]) -> Vec<i32> {
    payload
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn hex(payload: &[u8], max_bytes: usize) -> String {
    if payload.is_empty() {
        return "(empty)".to_string();
    }
    let shown: Vec<String> = payload
        .iter()
        .take(max_bytes)
        .map(|b| format!("{b:02x}"))
        .collect();
    let mut out = shown.join(" ");
    if payload.len() > max_bytes {
        out.push_str(&format!(" … ({} bytes)", payload.len()));
    }
    out
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(type_tag: TypeTag, payload: Vec<u8>) -> Entry {
        Entry {
            tag_key: "Test".to_string(),
            type_tag,
            payload,
            element_count: 1,
        }
    }

    // ── preview ──────────────────────────────────────────────────────

    #[test]
    fn preview_text_strips_nul() {
        assert_eq!(preview(&entry(TypeTag::AsciiString, b"Canon\0".to_vec()), 32), "Canon");
    }

    #[test]
    fn preview_text_truncates() {
        assert_eq!(preview(&entry(TypeTag::String, b"harbour".to_vec()), 4), "harb…");
    }

    #[test]
    fn preview_date_and_time() {
        let date: Vec<u8> = [2023i32, 7, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(preview(&entry(TypeTag::Date, date), 32), "2023-07-04");

        let time: Vec<u8> = [14i32, 30, 5, -5, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(preview(&entry(TypeTag::Time, time), 32), "14:30:05-05:00");
    }

    #[test]
    fn preview_binary_as_hex() {
        assert_eq!(preview(&entry(TypeTag::UnsignedShort, vec![6, 0]), 32), "06 00");
        assert_eq!(
            preview(&entry(TypeTag::Undefined, vec![1, 2, 3]), 2),
            "01 02 … (3 bytes)"
        );
        assert_eq!(preview(&entry(TypeTag::Undefined, Vec::new()), 2), "(empty)");
    }

    // ── wrap_text ────────────────────────────────────────────────────

    #[test]
    fn wrap_text_splits_on_words() {
        assert_eq!(wrap_text("aa bb cc", 5), vec!["aa bb", "cc"]);
        assert_eq!(wrap_text("", 5), vec![""]);
    }
}
