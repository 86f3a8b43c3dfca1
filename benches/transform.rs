#[macro_use]
extern crate bencher;
extern crate header_skipper;

use bencher::Bencher;
use header_skipper::{Offset, Operation, Rule};
use std::io::Cursor;

const LEN: usize = 0x10000;

fn run(b: &mut Bencher, start: i64, operation: Operation) {
    let rule = Rule::new(Some(Offset::At(start)), Some(Offset::Eof), operation, vec![], None);
    let rom: Vec<u8> = (0..LEN).map(|x| x as u8).collect();
    let mut out = Vec::with_capacity(LEN);
    b.bytes = LEN as u64;
    b.iter(|| {
        out.clear();
        rule.transform_stream(&mut Cursor::new(&rom[..]), &mut out).unwrap()
    });
}

fn strip_header(b: &mut Bencher) {
    run(b, 0x200, Operation::None);
}

fn bitswap(b: &mut Bencher) {
    run(b, 0, Operation::Bitswap);
}

fn byteswap(b: &mut Bencher) {
    run(b, 0, Operation::Byteswap);
}

fn wordswap(b: &mut Bencher) {
    run(b, 0, Operation::Wordswap);
}

benchmark_group!(benches, strip_header, bitswap, byteswap, wordswap);
benchmark_main!(benches);
