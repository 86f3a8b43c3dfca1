use std::convert::TryFrom;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use nom::{
	branch::alt,
	bytes::complete::{is_not, tag, tag_no_case, take_while1},
	character::complete::{char, hex_digit1, multispace1, not_line_ending, one_of},
	combinator::{all_consuming, cut, map, map_res, opt, value},
	error::{context, VerboseError, VerboseErrorKind},
	multi::{fold_many0, many0, many0_count, many1_count},
	sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
	Finish, IResult,
};

use super::{Detector, FileOperator, Offset, Operation, Rule, SizeCheck, Test};
use crate::{Error, Result};

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

const INDENT: &str = "    ";

// Comments run from '#' to the end of the line
fn comment(input: &str) -> Res<'_, &str> {
	preceded(char('#'), not_line_ending)(input)
}

fn ws(input: &str) -> Res<'_, ()> {
	value((), many0_count(alt((multispace1, comment))))(input)
}

fn ws1(input: &str) -> Res<'_, ()> {
	value((), many1_count(alt((multispace1, comment))))(input)
}

/// `0x1F`, always hexadecimal
fn hex_number(input: &str) -> Res<'_, u64> {
	map_res(preceded(tag_no_case("0x"), hex_digit1), |digits: &str| {
		u64::from_str_radix(digits, 16)
	})(input)
}

/// `EOF`, `0x10` or `-0x10`
fn offset(input: &str) -> Res<'_, Offset> {
	alt((
		value(Offset::Eof, tag_no_case("EOF")),
		map_res(pair(opt(char('-')), hex_number), |(sign, n)| {
			i64::try_from(n).map(|n| match sign {
				Some(_) => Offset::At(-n),
				None => Offset::At(n),
			})
		}),
	))(input)
}

/// Raw hex byte string, `4E45531A`
fn hex_bytes(input: &str) -> Res<'_, Vec<u8>> {
	context("hex bytes", map_res(hex_digit1, |digits: &str| hex::decode(digits)))(input)
}

/// Double-quoted string, `\"` and `\\` escaped
fn quoted(input: &str) -> Res<'_, String> {
	let chunk = alt((
		map(is_not("\\\""), str::to_string),
		map(preceded(char('\\'), one_of("\\\"")), |c: char| c.to_string()),
	));
	delimited(
		char('"'),
		fold_many0(chunk, String::new, |mut acc: String, s: String| {
			acc.push_str(&s);
			acc
		}),
		char('"'),
	)(input)
}

fn ident(input: &str) -> Res<'_, &str> {
	take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(input)
}

fn operation(input: &str) -> Res<'_, Operation> {
	context(
		"operation",
		alt((
			value(Operation::None, tag("none")),
			value(Operation::Bitswap, tag("bitswap")),
			value(Operation::Byteswap, tag("byteswap")),
			value(Operation::WordByteswap, tag("wordbyteswap")),
			value(Operation::Wordswap, tag("wordswap")),
		)),
	)(input)
}

fn file_operator(input: &str) -> Res<'_, FileOperator> {
	alt((
		value(FileOperator::Equal, tag("==")),
		value(FileOperator::Less, char('<')),
		value(FileOperator::Greater, char('>')),
	))(input)
}

// data <offset> <hex>
fn data_test(input: &str) -> Res<'_, (Offset, Vec<u8>)> {
	preceded(pair(tag("data"), ws1), cut(separated_pair(offset, ws1, hex_bytes)))(input)
}

// xor <offset> mask <hex> value <hex>
fn xor_test(input: &str) -> Res<'_, (Offset, Vec<u8>, Vec<u8>)> {
	preceded(
		pair(tag("xor"), ws1),
		cut(tuple((
			terminated(offset, ws1),
			delimited(pair(tag("mask"), ws1), hex_bytes, ws1),
			preceded(pair(tag("value"), ws1), hex_bytes),
		))),
	)(input)
}

// file po2 | file <op> <size>
fn file_test(input: &str) -> Res<'_, SizeCheck> {
	preceded(
		pair(tag("file"), ws1),
		cut(alt((
			value(SizeCheck::PowerOfTwo, tag_no_case("po2")),
			map(separated_pair(file_operator, ws, hex_number), |(operator, size)| {
				SizeCheck::Compare { operator, size }
			}),
		))),
	)(input)
}

/// Leaf test, optionally prefixed with `not`
fn leaf(input: &str) -> Res<'_, Test> {
	let (input, negated) = opt(terminated(tag("not"), ws1))(input)?;
	let result = negated.is_none();

	alt((
		map_res(data_test, move |(offset, value)| Test::data(offset, value, result)),
		map_res(xor_test, move |(offset, mask, value)| Test::xor(offset, mask, value, result)),
		map(file_test, move |size| Test::file(size, result)),
	))(input)
}

fn test_list(input: &str) -> Res<'_, Vec<Test>> {
	delimited(pair(char('{'), ws), many0(terminated(test, ws)), char('}'))(input)
}

fn group(input: &str) -> Res<'_, Test> {
	alt((
		map(preceded(pair(tag("and"), ws), cut(test_list)), Test::and),
		map(preceded(pair(tag("or"), ws), cut(test_list)), Test::or),
	))(input)
}

fn test(input: &str) -> Res<'_, Test> {
	context("test", alt((group, leaf)))(input)
}

// rule <start>..<end> <operation> { <tests> }
fn rule(input: &str) -> Res<'_, (Option<Offset>, Option<Offset>, Operation, Vec<Test>)> {
	let (input, _) = pair(tag("rule"), ws1)(input)?;
	context(
		"rule",
		cut(tuple((
			opt(offset),
			preceded(tag(".."), terminated(opt(offset), ws1)),
			terminated(operation, ws),
			test_list,
		))),
	)(input)
}

fn field<'a>(name: &'static str) -> impl FnMut(&'a str) -> Res<'a, String> {
	context(name, delimited(pair(tag(name), ws1), quoted, ws))
}

fn detector(input: &str) -> Res<'_, Detector> {
	let (input, _) = pair(tag("detector"), ws1)(input)?;
	let (input, source) = context("detector", cut(terminated(ident, ws)))(input)?;
	let (input, _) = cut(pair(char('{'), ws))(input)?;
	let (input, name) = cut(field("name"))(input)?;
	let (input, author) = cut(field("author"))(input)?;
	let (input, version) = cut(field("version"))(input)?;
	let (input, rules) = many0(terminated(rule, ws))(input)?;
	let (input, _) = cut(char('}'))(input)?;

	let rules = rules
		.into_iter()
		.map(|(start, end, operation, tests)| {
			Rule::new(start, end, operation, tests, Some(source.to_string()))
		})
		.collect();

	Ok((input, Detector::new(&name, &author, &version, source, rules)))
}

fn catalog(input: &str) -> Res<'_, Vec<Detector>> {
	preceded(ws, many0(terminated(detector, ws)))(input)
}

/// Describe where and why parsing stopped
fn describe(input: &str, e: VerboseError<&str>) -> String {
	let (rest, _) = match e.errors.first() {
		Some(x) => x,
		None => return "unknown error".to_string(),
	};
	let consumed = &input[..input.len() - rest.len()];
	let line = consumed.matches('\n').count() + 1;
	let column = consumed.len() - consumed.rfind('\n').map(|x| x + 1).unwrap_or(0) + 1;

	let contexts: Vec<&str> = e
		.errors
		.iter()
		.filter_map(|(_, kind)| match kind {
			VerboseErrorKind::Context(c) => Some(*c),
			_ => None,
		})
		.collect();

	if contexts.is_empty() {
		format!("line {}, column {}: unexpected input", line, column)
	} else {
		format!("line {}, column {}: bad {}", line, column, contexts.join(" in "))
	}
}

/// Parse a catalog document into its detectors, in document order
pub fn from_str(input: &str) -> Result<Vec<Detector>> {
	match all_consuming(catalog)(input).finish() {
		Ok((_, detectors)) => Ok(detectors),
		Err(e) => Err(Error::Catalog(describe(input, e))),
	}
}

/// Loads the given catalog file and parses it
pub fn from_filepath(filepath: &Path) -> Result<Vec<Detector>> {
	let f = File::open(filepath)?;
	let mut r = BufReader::new(f);
	let mut s = String::new();
	r.read_to_string(&mut s)?;

	from_str(&s)
}

pub(crate) fn parse_offset(input: &str) -> Result<Offset> {
	all_consuming(offset)(input)
		.finish()
		.map(|(_, x)| x)
		.map_err(|_| Error::Catalog(format!("invalid offset {:?}", input)))
}

/// Render detectors back into catalog text that `from_str` reads back
/// unchanged
pub fn to_string(detectors: &[Detector]) -> String {
	detectors.iter().map(|x| x.to_string()).collect::<Vec<_>>().join("\n")
}

fn quote(s: &str) -> String {
	format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn write_test(f: &mut fmt::Formatter, test: &Test, depth: usize) -> fmt::Result {
	let pad = INDENT.repeat(depth);
	let not = |result: bool| if result { "" } else { "not " };

	match *test {
		Test::Data { offset, ref value, result } => {
			writeln!(f, "{}{}data {} {}", pad, not(result), offset, hex::encode_upper(value))
		}
		Test::Xor { offset, ref mask, ref value, result } => writeln!(
			f,
			"{}{}xor {} mask {} value {}",
			pad,
			not(result),
			offset,
			hex::encode_upper(mask),
			hex::encode_upper(value)
		),
		Test::File { size: SizeCheck::PowerOfTwo, result } => {
			writeln!(f, "{}{}file po2", pad, not(result))
		}
		Test::File { size: SizeCheck::Compare { operator, size }, result } => {
			writeln!(f, "{}{}file {} 0x{:X}", pad, not(result), operator.as_str(), size)
		}
		Test::And { ref tests } | Test::Or { ref tests } => {
			let keyword = if let Test::And { .. } = *test { "and" } else { "or" };
			writeln!(f, "{}{} {{", pad, keyword)?;
			for x in tests {
				write_test(f, x, depth + 1)?;
			}
			writeln!(f, "{}}}", pad)
		}
	}
}

fn write_rule(f: &mut fmt::Formatter, rule: &Rule, depth: usize) -> fmt::Result {
	let pad = INDENT.repeat(depth);
	let bound = |x: Option<Offset>| x.map(|o| o.to_string()).unwrap_or_default();

	writeln!(
		f,
		"{}rule {}..{} {} {{",
		pad,
		bound(rule.start_offset()),
		bound(rule.end_offset()),
		rule.operation()
	)?;
	for x in rule.tests() {
		write_test(f, x, depth + 1)?;
	}
	writeln!(f, "{}}}", pad)
}

impl fmt::Display for Test {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write_test(f, self, 0)
	}
}

impl fmt::Display for Rule {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write_rule(f, self, 0)
	}
}

impl fmt::Display for Detector {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		writeln!(f, "detector {} {{", self.source())?;
		writeln!(f, "{}name {}", INDENT, quote(self.name()))?;
		writeln!(f, "{}author {}", INDENT, quote(self.author()))?;
		writeln!(f, "{}version {}", INDENT, quote(self.version()))?;
		for x in self.rules() {
			write_rule(f, x, 1)?;
		}
		writeln!(f, "}}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SIMPLE: &str = r#"
# Nintendo Entertainment System
detector nes {
    name "Nintendo Famicon/NES"
    author "Roman Scherzer"
    version "1.1"
    rule 0x10..EOF none {
        data 0x0 4E45531A
    }
}
"#;

	#[test]
	fn offset_test() {
		assert_eq!(offset("EOF"), Ok(("", Offset::Eof)));
		assert_eq!(offset("eof.."), Ok(("..", Offset::Eof)));
		assert_eq!(offset("0x200"), Ok(("", Offset::At(0x200))));
		assert_eq!(offset("-0x7C"), Ok(("", Offset::At(-0x7C))));
		assert!(offset("200").is_err());
	}

	#[test]
	fn quoted_test() {
		assert_eq!(quoted(r#""Atari 7800""#), Ok(("", "Atari 7800".to_string())));
		assert_eq!(quoted(r#""""#), Ok(("", String::new())));
		assert_eq!(quoted(r#""a \"b\" \\c""#), Ok(("", r#"a "b" \c"#.to_string())));
	}

	#[test]
	fn ws_skips_comments() {
		assert_eq!(ws("  # hello\n\t# again\nrule"), Ok(("rule", ())));
		assert_eq!(ws("rule"), Ok(("rule", ())));
		assert!(ws1("rule").is_err());
	}

	#[test]
	fn parses_simple_detector() {
		let detectors = from_str(SIMPLE).unwrap();
		assert_eq!(detectors.len(), 1);

		let nes = &detectors[0];
		assert_eq!(nes.source(), "nes");
		assert_eq!(nes.name(), "Nintendo Famicon/NES");
		assert_eq!(nes.author(), "Roman Scherzer");
		assert_eq!(nes.version(), "1.1");

		let expected = Rule::new(
			Some(Offset::At(0x10)),
			Some(Offset::Eof),
			Operation::None,
			vec![Test::data(Offset::At(0), vec![0x4E, 0x45, 0x53, 0x1A], true).unwrap()],
			Some("nes".to_string()),
		);
		assert_eq!(nes.rules(), &[expected][..]);
	}

	#[test]
	fn parses_every_test_kind() {
		let text = r#"
detector mixed {
    name "Mixed"
    author "Nobody"
    version "0.1"
    rule ..0x400 byteswap {
        not data -0x4 00FF
        xor EOF mask FF00 value 1234
        file po2
        not file < 0x200
        or {
            file == 0x400
            and {
                file > 0x10
                data 0x2 AA
            }
        }
    }
    rule -0x10.. wordbyteswap {
    }
}
"#;
		let detectors = from_str(text).unwrap();
		let rules = detectors[0].rules();
		assert_eq!(rules.len(), 2);

		assert_eq!(rules[0].start_offset(), None);
		assert_eq!(rules[0].end_offset(), Some(Offset::At(0x400)));
		assert_eq!(rules[0].operation(), Operation::Byteswap);
		assert_eq!(
			rules[0].tests(),
			&[
				Test::data(Offset::At(-4), vec![0x00, 0xFF], false).unwrap(),
				Test::xor(Offset::Eof, vec![0xFF, 0x00], vec![0x12, 0x34], true).unwrap(),
				Test::file(SizeCheck::PowerOfTwo, true),
				Test::file(SizeCheck::Compare { operator: FileOperator::Less, size: 0x200 }, false),
				Test::or(vec![
					Test::file(SizeCheck::Compare { operator: FileOperator::Equal, size: 0x400 }, true),
					Test::and(vec![
						Test::file(SizeCheck::Compare { operator: FileOperator::Greater, size: 0x10 }, true),
						Test::data(Offset::At(2), vec![0xAA], true).unwrap(),
					]),
				]),
			][..]
		);

		assert_eq!(rules[1].start_offset(), Some(Offset::At(-0x10)));
		assert_eq!(rules[1].end_offset(), None);
		assert_eq!(rules[1].operation(), Operation::WordByteswap);
		assert!(rules[1].tests().is_empty());
		assert_eq!(rules[1].source(), Some("mixed"));
	}

	#[test]
	fn empty_catalog() {
		assert!(from_str("").unwrap().is_empty());
		assert!(from_str("# nothing here\n").unwrap().is_empty());
	}

	#[test]
	fn rejects_odd_hex() {
		let err = from_str(&SIMPLE.replace("4E45531A", "4E45531")).unwrap_err();
		assert!(matches!(err, Error::Catalog(_)));
	}

	#[test]
	fn rejects_unknown_operation() {
		match from_str(&SIMPLE.replace("none", "nibbleswap")) {
			Err(Error::Catalog(msg)) => assert!(msg.contains("line 7"), "{}", msg),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn rejects_mismatched_xor() {
		let text = SIMPLE.replace("data 0x0 4E45531A", "xor 0x0 mask FFFF value 00");
		assert!(from_str(&text).is_err());
	}

	#[test]
	fn rejects_trailing_garbage() {
		assert!(from_str(&format!("{}\nstray", SIMPLE)).is_err());
	}

	#[test]
	fn renders_what_it_parses() {
		let detectors = from_str(SIMPLE).unwrap();
		let text = to_string(&detectors);
		assert_eq!(
			text,
			"detector nes {\n    name \"Nintendo Famicon/NES\"\n    author \"Roman Scherzer\"\n    version \"1.1\"\n    rule 0x10..EOF none {\n        data 0x0 4E45531A\n    }\n}\n"
		);
		assert_eq!(from_str(&text).unwrap(), detectors);
	}

	#[test]
	fn round_trips_escapes_and_groups() {
		let tests = vec![
			Test::or(vec![
				Test::and(vec![]),
				Test::xor(Offset::At(-2), vec![0x0F], vec![0xF0], false).unwrap(),
			]),
			Test::file(SizeCheck::Compare { operator: FileOperator::Greater, size: 0 }, true),
		];
		let rule = Rule::new(None, Some(Offset::Eof), Operation::Bitswap, tests, Some("odd".to_string()));
		let detector = Detector::new("Quote \"this\"", "Back\\slash", "", "odd", vec![rule]);

		let text = to_string(&[detector.clone()]);
		assert_eq!(from_str(&text).unwrap(), vec![detector]);
	}
}
