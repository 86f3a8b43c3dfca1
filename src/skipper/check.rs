use std::io::{self, Read, Seek, SeekFrom};

use tracing::trace;

use super::{stream_len, Detector, FileOperator, Offset, Rule, SizeCheck, Test};

/// Move to `offset`, or report that it lies outside the stream.
fn seek_to<R: Read + Seek>(input: &mut R, offset: Offset) -> io::Result<bool> {
	let len = stream_len(input)?;
	match offset.resolve(len) {
		Some(pos) => {
			input.seek(SeekFrom::Start(pos))?;
			Ok(true)
		}
		None => Ok(false),
	}
}

/// Read exactly `n` bytes, `None` if the stream ends first
fn read_pattern<R: Read>(input: &mut R, n: usize) -> io::Result<Option<Vec<u8>>> {
	let mut buf = vec![0u8; n];
	match input.read_exact(&mut buf) {
		Ok(()) => Ok(Some(buf)),
		Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
		Err(e) => Err(e),
	}
}

fn size_matches(len: u64, size: &SizeCheck) -> bool {
	match *size {
		// 0 is not a real file size, so it is never a power of two here
		SizeCheck::PowerOfTwo => len.is_power_of_two(),
		SizeCheck::Compare { operator: FileOperator::Equal, size } => len == size,
		SizeCheck::Compare { operator: FileOperator::Less, size } => len < size,
		SizeCheck::Compare { operator: FileOperator::Greater, size } => len > size,
	}
}

impl Test {
	/// Check a stream against this test.
	///
	/// The test seeks to its own offset, so the current position of `input`
	/// doesn't matter. Anything that stops the comparison from happening
	/// (bad offset, short read, I/O error) counts as a failure.
	pub fn passes<R: Read + Seek>(&self, input: &mut R) -> bool {
		match self.evaluate(input) {
			Ok(Some(x)) => x,
			Ok(None) => false,
			Err(e) => {
				trace!("test aborted: {}", e);
				false
			}
		}
	}

	/// `None` when the comparison couldn't be made at all
	fn evaluate<R: Read + Seek>(&self, input: &mut R) -> io::Result<Option<bool>> {
		match *self {
			Test::Data { offset, ref value, result } => {
				if value.is_empty() || !seek_to(input, offset)? {
					return Ok(None);
				}
				Ok(read_pattern(input, value.len())?.map(|x| (x == *value) == result))
			}

			Test::Xor { offset, ref mask, ref value, result } => {
				if mask.is_empty() || mask.len() != value.len() || !seek_to(input, offset)? {
					return Ok(None);
				}
				Ok(read_pattern(input, mask.len())?.map(|x| {
					let equal = x.iter().zip(mask).map(|(b, m)| b ^ m).eq(value.iter().cloned());
					equal == result
				}))
			}

			Test::File { ref size, result } => {
				let len = stream_len(input)?;
				Ok(Some(size_matches(len, size) == result))
			}

			Test::And { ref tests } => Ok(Some(tests.iter().all(|x| x.passes(input)))),

			Test::Or { ref tests } => Ok(Some(tests.iter().any(|x| x.passes(input)))),
		}
	}
}

impl Rule {
	/// True if every test in the rule passes. A rule without tests always does.
	pub fn passes_all<R: Read + Seek>(&self, input: &mut R) -> bool {
		self.tests().iter().all(|x| x.passes(input))
	}
}

impl Detector {
	/// Whether a caller-supplied detector name refers to this detector.
	///
	/// The empty name refers to every detector. Otherwise the display name
	/// and the source id are both accepted, ignoring ASCII case. Whitespace
	/// is significant.
	pub fn answers_to(&self, name: &str) -> bool {
		name.is_empty()
			|| name.eq_ignore_ascii_case(self.name())
			|| name.eq_ignore_ascii_case(self.source())
	}

	/// First rule, in declaration order, that `input` satisfies.
	pub fn find_match<R: Read + Seek>(&self, input: &mut R, name: &str) -> Option<&Rule> {
		if !self.answers_to(name) {
			return None;
		}

		for rule in self.rules() {
			// Always start every rule from the top
			if let Err(e) = input.seek(SeekFrom::Start(0)) {
				trace!("cannot rewind stream for {}: {}", self.source(), e);
				return None;
			}

			if rule.passes_all(input) {
				return Some(rule);
			}
		}

		None
	}
}
