//! Input format detection for inbox files.

pub mod format_sniffer;

pub use format_sniffer::{
    detect_format, inspect_text, sniff_delimiter, strip_bom, LineEndings, TableFormat,
    TextInspection,
};
