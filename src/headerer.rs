//! Strip copier headers from files and put them back later

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::registry::Registry;
use crate::skipper::{stream_len, Offset, Operation};
use crate::store::HeaderStore;
use crate::{Error, Result};

/// What `detect_and_transform` produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// The file with its header removed
    pub output: PathBuf,
    /// Bytes that were in front of the rule's start offset
    pub header: Vec<u8>,
    /// Hex SHA-256 of `output`
    pub digest: String,
    /// Id of the detector that matched
    pub source: String,
}

impl Extraction {
    /// Record the header in `store`, keyed by the output's digest
    pub fn store<S: HeaderStore + ?Sized>(&self, store: &mut S) -> Result<bool> {
        store.add_header(&self.digest, &self.header, &self.source)
    }
}

/// `path` with `suffix` tacked onto the file name
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// `<path><suffix>` next to the input, or `<out_dir>/<name><suffix>`
fn output_path(path: &Path, out_dir: Option<&Path>, suffix: &str) -> PathBuf {
    match (out_dir, path.file_name()) {
        (Some(dir), Some(name)) => with_suffix(&dir.join(name), suffix),
        (Some(dir), None) => with_suffix(&dir.join(OsStr::new("output")), suffix),
        (None, _) => with_suffix(path, &format!(".new{}", suffix)),
    }
}

/// Find the header of the file at `path`, and write the file without it.
///
/// Only rules that plainly cut bytes off the front (operation `none`, window
/// running to the end of the file) can be undone by `restore_file`, so any
/// other matching rule is refused. `name` filters detectors the same way
/// `Registry::find_match` does.
pub fn detect_and_transform(
    registry: &Registry,
    path: &Path,
    name: &str,
    out_dir: Option<&Path>,
) -> Result<Extraction> {
    if !path.is_file() {
        return Err(Error::NotFound(path.to_path_buf()));
    }

    let rule = registry.find_match_filepath(path, name);
    if rule.tests().is_empty() {
        return Err(Error::NoMatch(path.to_path_buf()));
    }
    if rule.operation() != Operation::None {
        return Err(Error::UnsupportedOperation(rule.operation()));
    }
    let source = rule.source().unwrap_or_default().to_string();
    info!("{} has a {} header", path.display(), source);

    let mut input = File::open(path)?;
    let len = stream_len(&mut input)?;
    let start = match rule.start_offset() {
        Some(Offset::At(n)) => Offset::At(n)
            .resolve(len)
            .ok_or(Error::OutOfRange { offset: n, length: len })?,
        _ => return Err(Error::UndefinedStart),
    };
    if let Some(Offset::At(n)) = rule.end_offset() {
        let end = Offset::At(n).resolve(len).unwrap_or(if n < 0 { 0 } else { len });
        if end < len {
            return Err(Error::TruncatedTail { end, length: len });
        }
    }
    let mut header = Vec::new();
    Read::by_ref(&mut input).take(start).read_to_end(&mut header)?;

    let output = output_path(path, out_dir, "");
    rule.transform_file(path, &output)?;
    let digest = file_digest(&output)?;
    debug!("{} -> {} ({})", path.display(), output.display(), digest);

    Ok(Extraction { output, header, digest, source })
}

/// Write `header` followed by everything left in `input`. Returns the total
/// number of bytes written.
pub fn restore_with_header<R, W>(input: &mut R, header: &[u8], output: &mut W) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    output.write_all(header)?;
    let copied = io::copy(input, output)?;
    output.flush()?;
    Ok(header.len() as u64 + copied)
}

/// Rebuild every headered variant of `path` known to `store`.
///
/// The i-th stored header goes to `<path>.new<i>`, or `<out_dir>/<name><i>`
/// when an output directory is given. Returns the files written.
pub fn restore_file<S: HeaderStore + ?Sized>(
    path: &Path,
    out_dir: Option<&Path>,
    store: &S,
) -> Result<Vec<PathBuf>> {
    if !path.is_file() {
        return Err(Error::NotFound(path.to_path_buf()));
    }

    let digest = file_digest(path)?;
    let headers = store.headers(&digest)?;
    if headers.is_empty() {
        return Err(Error::NoMatch(path.to_path_buf()));
    }
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir)?;
    }

    let mut written = Vec::with_capacity(headers.len());
    for (i, stored) in headers.iter().enumerate() {
        let output = output_path(path, out_dir, &i.to_string());
        debug!("restoring {} header into {}", stored.source, output.display());

        let mut reader = BufReader::new(File::open(path)?);
        let mut writer = BufWriter::new(File::create(&output)?);
        restore_with_header(&mut reader, &stored.header, &mut writer)?;
        written.push(output);
    }

    info!("restored {} variants of {}", written.len(), path.display());
    Ok(written)
}

/// Hex SHA-256 of everything left in `input`
pub fn stream_digest<R: Read + ?Sized>(input: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(input, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of the file at `path`
pub fn file_digest(path: &Path) -> Result<String> {
    let mut f = BufReader::new(File::open(path)?);
    stream_digest(&mut f)
}
