//! Ordered collection of detectors and the lookups built on it

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use fnv::FnvHashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::skipper::{builtin, ruleset, Detector, Rule};
use crate::Result;

struct Catalog {
    detectors: Vec<Detector>,
    /// Lowercased display names and source ids, first registration wins
    index: FnvHashMap<String, usize>,
}

impl Catalog {
    fn new(detectors: Vec<Detector>) -> Catalog {
        let mut index = FnvHashMap::default();
        for (i, detector) in detectors.iter().enumerate() {
            index.entry(detector.name().to_lowercase()).or_insert(i);
            index.entry(detector.source().to_lowercase()).or_insert(i);
        }
        Catalog { detectors, index }
    }
}

/// Detectors in registration order.
///
/// A registry created with `new` is empty until `init` loads the bundled
/// catalog into it. Until then every lookup comes back empty.
pub struct Registry {
    catalog: OnceCell<Catalog>,
}

impl Registry {
    pub const fn new() -> Registry {
        Registry { catalog: OnceCell::new() }
    }

    /// A registry that is already populated with `detectors`. `init` is a
    /// no-op on it.
    pub fn with_detectors(detectors: Vec<Detector>) -> Registry {
        let catalog = OnceCell::new();
        let _ = catalog.set(Catalog::new(detectors));
        Registry { catalog }
    }

    /// A registry populated from a catalog file instead of the bundled one
    pub fn from_filepath(filepath: &Path) -> Result<Registry> {
        let detectors = ruleset::from_filepath(filepath)?;
        info!("loaded {} detectors from {}", detectors.len(), filepath.display());
        Ok(Registry::with_detectors(detectors))
    }

    /// Load the bundled catalog. Only the first call, across all threads,
    /// does any work.
    pub fn init(&self) {
        self.catalog.get_or_init(|| {
            let detectors = builtin::detectors().to_vec();
            debug!("registered {} built-in detectors", detectors.len());
            Catalog::new(detectors)
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.catalog.get().is_some()
    }

    pub fn detectors(&self) -> &[Detector] {
        match self.catalog.get() {
            Some(x) => &x.detectors,
            None => &[],
        }
    }

    /// Look a detector up by display name or source id, ignoring case
    pub fn detector(&self, name: &str) -> Option<&Detector> {
        let catalog = self.catalog.get()?;
        let i = catalog.index.get(&name.to_lowercase())?;
        catalog.detectors.get(*i)
    }

    /// First rule that `input` satisfies, trying detectors in order.
    ///
    /// An empty `name` tries every detector, anything else only the ones
    /// answering to it.
    pub fn find_rule<R: Read + Seek>(&self, input: &mut R, name: &str) -> Option<&Rule> {
        self.detectors()
            .iter()
            .find_map(|x| x.find_match(input, name))
    }

    /// Like `find_rule`, but hands back the empty rule when nothing matched.
    ///
    /// `input` is only borrowed, so it stays open for the caller.
    pub fn find_match<R: Read + Seek>(&self, input: &mut R, name: &str) -> Rule {
        match self.find_rule(input, name) {
            Some(rule) => rule.clone(),
            None => Rule::default(),
        }
    }

    /// Match the file at `filepath`, closing it afterwards. A file that
    /// can't be opened matches nothing.
    pub fn find_match_filepath(&self, filepath: &Path, name: &str) -> Rule {
        let mut f = match File::open(filepath) {
            Ok(x) => x,
            Err(e) => {
                debug!("cannot open {}: {}", filepath.display(), e);
                return Rule::default();
            }
        };
        self.find_match(&mut f, name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
