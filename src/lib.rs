//! `header_skipper` is a Rust crate that finds and removes the copier headers that
//! old backup devices glued to the front of console ROM dumps.
//!
//! # About
//! A header is recognised by a *detector*: a bundle of rules, each of which is a set of
//! byte and size tests plus a window of the file to keep. The first rule whose tests
//! all pass says where the real data starts and how its bytes are ordered, and can
//! then rewrite the file without its header (or with its byte order fixed).
//!
//! Stripped headers can be kept in a header store, keyed by the SHA-256 of the
//! de-headered file, so that the original dump can be rebuilt byte for byte later.
//!
//! # Features
//! - Built-in detectors for Atari 7800, Atari Lynx, PSID, PC-Engine, Nintendo 64,
//!   NES, Famicom Disk System, SNES and SPC files.
//! - Detectors are data: the bundled catalog is a small text format, and an external
//!   catalog file can replace it.
//! - Bit, byte and word reordering for dumps saved in the wrong byte order.
//! - Catalogs and header stores serialize to JSON.
//!
//! # Feature flags
//! `cli`:        Enable building of `hskip` binary
//!
//! # Example
//! ```rust
//! extern crate header_skipper;
//! use std::io::Cursor;
//!
//! // A NES dump with its 16 byte iNES header
//! let mut rom = b"NES\x1A".to_vec();
//! rom.resize(0x410, 0xFF);
//! let mut rom = Cursor::new(rom);
//!
//! // Load the bundled detectors, then find the rule that fits
//! header_skipper::init();
//! let rule = header_skipper::from_stream(&mut rom, "");
//! assert_eq!(rule.source(), Some("nes"));
//!
//! // Strip the header
//! let mut out = Vec::new();
//! rule.transform_stream(&mut rom, &mut out).unwrap();
//! assert_eq!(out.len(), 0x400);
//! ```

#[macro_use]
extern crate lazy_static;

use std::io::{Read, Seek};
use std::path::Path;

mod error;
pub mod headerer;
pub mod registry;
pub mod skipper;
pub mod store;

pub use error::{Error, Result};
pub use registry::Registry;
pub use skipper::{Detector, FileOperator, Offset, Operation, Rule, SizeCheck, Test};
pub use store::{HeaderStore, JsonHeaderStore, StoredHeader};

/// The registry behind the crate-level functions
static SKIPPERS: Registry = Registry::new();

/// Load the bundled detectors into the crate-wide registry.
///
/// Safe to call any number of times, from any thread. Until it has been
/// called, `from_stream` and `from_filepath` match nothing.
pub fn init() {
    SKIPPERS.init();
}

/// The crate-wide registry
pub fn registry() -> &'static Registry {
    &SKIPPERS
}

/// Find the rule that fits a stream.
///
/// Returns the empty rule (see `Rule::is_empty`) if no detector matched.
/// An empty `name` tries every detector, otherwise only the one with that
/// display name or source id.
///
/// # Arguments
/// * `input` - Stream to check. It is left open for the caller.
/// * `name` - Detector to restrict matching to, or `""`.
pub fn from_stream<R: Read + Seek>(input: &mut R, name: &str) -> Rule {
    SKIPPERS.find_match(input, name)
}

/// Find the rule that fits a file.
///
/// Returns the empty rule if the file can't be opened or nothing matched.
///
/// # Arguments
/// * `filepath` - Path to the file
/// * `name` - Detector to restrict matching to, or `""`.
pub fn from_filepath(filepath: &Path, name: &str) -> Rule {
    SKIPPERS.find_match_filepath(filepath, name)
}
