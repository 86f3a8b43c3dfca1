//! Read header catalog bundled in crate

use tracing::error;

use super::{ruleset, Detector};

// Parse the bundled catalog before anything else
lazy_static! {
	static ref BUILTIN: Vec<Detector> = {
		match ruleset::from_str(include_str!("headers")) {
			Ok(x) => x,
			Err(e) => {
				error!("bundled header catalog is broken: {}", e);
				Vec::new()
			}
		}
	};
}

/// Detectors shipped with the crate, in catalog order
pub fn detectors() -> &'static [Detector] {
	&BUILTIN
}

/// Text of the bundled catalog
pub fn source() -> &'static str {
	include_str!("headers")
}
