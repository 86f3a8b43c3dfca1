//! Where stripped headers are kept until a file is restored

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;

/// One header removed from a file, and the detector that removed it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredHeader {
    #[serde(with = "hex")]
    pub header: Vec<u8>,
    pub source: String,
}

/// Content-addressed header storage.
///
/// Keys are the hex SHA-256 digest of a file with its header removed. One
/// digest can hold several headers, since the same dump has shipped with
/// different copier headers.
pub trait HeaderStore {
    /// Record `header` under `digest` unless that exact header is already
    /// there. Returns whether anything was added.
    fn add_header(&mut self, digest: &str, header: &[u8], source: &str) -> Result<bool>;

    /// All headers stored for `digest`, oldest first
    fn headers(&self, digest: &str) -> Result<Vec<StoredHeader>>;
}

/// Header store kept in memory and, optionally, written to a JSON file.
#[derive(Debug, Default)]
pub struct JsonHeaderStore {
    path: Option<PathBuf>,
    entries: FnvHashMap<String, Vec<StoredHeader>>,
}

impl JsonHeaderStore {
    /// A store that never touches the disk
    pub fn in_memory() -> JsonHeaderStore {
        JsonHeaderStore::default()
    }

    /// Load the store at `path`. A missing file is an empty store that
    /// `save` will create.
    pub fn open(path: &Path) -> Result<JsonHeaderStore> {
        let entries = match File::open(path) {
            Ok(f) => serde_json::from_reader(BufReader::new(f))?,
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                debug!("no header store at {}, starting empty", path.display());
                FnvHashMap::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(JsonHeaderStore {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of digests with at least one header
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the store back to its file. In-memory stores do nothing.
    pub fn save(&self) -> Result<()> {
        let path = match self.path {
            Some(ref x) => x,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Sorted keys keep the file diffable
        let sorted: BTreeMap<&String, &Vec<StoredHeader>> = self.entries.iter().collect();
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, &sorted)?;
        w.write_all(b"\n")?;
        w.flush()?;

        info!("saved {} digests to {}", self.entries.len(), path.display());
        Ok(())
    }
}

impl HeaderStore for JsonHeaderStore {
    fn add_header(&mut self, digest: &str, header: &[u8], source: &str) -> Result<bool> {
        let headers = self.entries.entry(digest.to_lowercase()).or_insert_with(Vec::new);
        if headers.iter().any(|x| x.header == header) {
            return Ok(false);
        }

        headers.push(StoredHeader {
            header: header.to_vec(),
            source: source.to_string(),
        });
        Ok(true)
    }

    fn headers(&self, digest: &str) -> Result<Vec<StoredHeader>> {
        Ok(self
            .entries
            .get(&digest.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}
