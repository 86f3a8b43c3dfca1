// Common types for all skipper catalogs

use std::convert::TryFrom;
use std::fmt;
use std::io::{self, Seek, SeekFrom};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub mod builtin;
pub mod check;
pub mod ruleset;
pub mod transform;

/// Position in a stream.
///
/// `At(n)` counts from the start when `n >= 0` and back from the end when
/// negative. `Eof` is wherever the stream currently ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Offset {
    At(i64),
    Eof,
}

impl Offset {
    /// Absolute position of this offset in a stream of `len` bytes, or
    /// `None` if it points outside of it.
    pub fn resolve(self, len: u64) -> Option<u64> {
        match self {
            Offset::Eof => Some(len),
            Offset::At(n) if n >= 0 => {
                let n = n as u64;
                if n <= len {
                    Some(n)
                } else {
                    None
                }
            }
            Offset::At(n) => len.checked_sub(n.unsigned_abs()),
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Offset::Eof => f.write_str("EOF"),
            Offset::At(n) if n < 0 => write!(f, "-0x{:X}", n.unsigned_abs()),
            Offset::At(n) => write!(f, "0x{:X}", n),
        }
    }
}

impl FromStr for Offset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ruleset::parse_offset(s.trim())
    }
}

impl From<Offset> for String {
    fn from(offset: Offset) -> String {
        offset.to_string()
    }
}

impl TryFrom<String> for Offset {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Byte reordering applied over a rule's window.
///
/// Declaration order matters: each variant demands at least the alignment
/// of the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    None,
    Bitswap,
    Byteswap,
    Wordswap,
    WordByteswap,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::None => "none",
            Operation::Bitswap => "bitswap",
            Operation::Byteswap => "byteswap",
            Operation::Wordswap => "wordswap",
            Operation::WordByteswap => "wordbyteswap",
        }
    }

    /// Number of bytes the operation shuffles between.
    pub fn group_width(self) -> u64 {
        match self {
            Operation::None | Operation::Bitswap => 1,
            Operation::Byteswap => 2,
            Operation::Wordswap | Operation::WordByteswap => 4,
        }
    }

    /// Buffer slot that the byte read at `pos` (0..4) lands in.
    pub fn slot(self, pos: usize) -> usize {
        match self {
            Operation::None | Operation::Bitswap => pos,
            Operation::Byteswap => pos ^ 1,
            Operation::Wordswap => 3 - pos,
            Operation::WordByteswap => (pos + 2) % 4,
        }
    }
}

impl Default for Operation {
    fn default() -> Self {
        Operation::None
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperator {
    Equal,
    Less,
    Greater,
}

impl FileOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperator::Equal => "==",
            FileOperator::Less => "<",
            FileOperator::Greater => ">",
        }
    }
}

/// What a `file` test checks the stream length against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum SizeCheck {
    PowerOfTwo,
    Compare { operator: FileOperator, size: u64 },
}

/// A single assertion about a stream.
///
/// Leaf tests carry a `result` flag: the test passes when the comparison
/// outcome equals it. A failed seek or short read never passes, whatever the
/// flag says.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Test {
    Data {
        offset: Offset,
        #[serde(with = "hex")]
        value: Vec<u8>,
        result: bool,
    },
    File {
        size: SizeCheck,
        result: bool,
    },
    Xor {
        offset: Offset,
        #[serde(with = "hex")]
        mask: Vec<u8>,
        #[serde(with = "hex")]
        value: Vec<u8>,
        result: bool,
    },
    And {
        tests: Vec<Test>,
    },
    Or {
        tests: Vec<Test>,
    },
}

impl Test {
    pub fn data(offset: Offset, value: Vec<u8>, result: bool) -> Result<Test> {
        if value.is_empty() {
            return Err(Error::InvalidTest("data value is empty"));
        }
        Ok(Test::Data { offset, value, result })
    }

    pub fn xor(offset: Offset, mask: Vec<u8>, value: Vec<u8>, result: bool) -> Result<Test> {
        if mask.is_empty() || value.is_empty() {
            return Err(Error::InvalidTest("xor mask and value must not be empty"));
        }
        if mask.len() != value.len() {
            return Err(Error::InvalidTest("xor mask and value differ in length"));
        }
        Ok(Test::Xor { offset, mask, value, result })
    }

    pub fn file(size: SizeCheck, result: bool) -> Test {
        Test::File { size, result }
    }

    pub fn and(tests: Vec<Test>) -> Test {
        Test::And { tests }
    }

    pub fn or(tests: Vec<Test>) -> Test {
        Test::Or { tests }
    }
}

/// A transform window plus the tests that decide whether it applies.
///
/// `Rule::default()` is the empty rule: no window, no tests, no source. It's
/// what the registry hands back when nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_offset: Option<Offset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_offset: Option<Offset>,
    #[serde(default)]
    operation: Operation,
    #[serde(default)]
    tests: Vec<Test>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

impl Rule {
    pub fn new(
        start_offset: Option<Offset>,
        end_offset: Option<Offset>,
        operation: Operation,
        tests: Vec<Test>,
        source: Option<String>,
    ) -> Rule {
        Rule {
            start_offset,
            end_offset,
            operation,
            tests,
            source,
        }
    }

    pub fn start_offset(&self) -> Option<Offset> {
        self.start_offset
    }

    pub fn end_offset(&self) -> Option<Offset> {
        self.end_offset
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// True for the no-op rule returned when nothing matched
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.source.is_none()
    }
}

/// All rules for one family of headers, usually one console.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Detector {
    name: String,
    author: String,
    version: String,
    source: String,
    rules: Vec<Rule>,
}

impl Detector {
    pub fn new(name: &str, author: &str, version: &str, source: &str, rules: Vec<Rule>) -> Detector {
        Detector {
            name: name.to_string(),
            author: author.to_string(),
            version: version.to_string(),
            source: source.to_string(),
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Length of a seekable stream, leaving its position where it was.
pub fn stream_len<S: Seek>(stream: &mut S) -> io::Result<u64> {
    let pos = stream.stream_position()?;
    let len = stream.seek(SeekFrom::End(0))?;
    if pos != len {
        stream.seek(SeekFrom::Start(pos))?;
    }
    Ok(len)
}
