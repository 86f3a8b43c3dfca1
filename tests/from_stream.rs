mod from_stream {

    extern crate header_skipper;

    use header_skipper::{Offset, Operation, Rule};
    use std::io::Cursor;

    fn detect(rom: &[u8], name: &str) -> Rule {
        header_skipper::init();
        header_skipper::from_stream(&mut Cursor::new(rom), name)
    }

    /// Output length after applying whatever rule matched
    fn stripped_len(rom: &[u8]) -> usize {
        let mut input = Cursor::new(rom);
        let rule = detect(rom, "");
        let mut out = Vec::new();
        rule.transform_stream(&mut input, &mut out).unwrap();
        out.len()
    }

    /// 1 KiB of 0xFF with `bytes` at `offset`
    fn padded(offset: usize, bytes: &[u8]) -> Vec<u8> {
        let mut rom = vec![0xFF; 1024];
        rom[offset..offset + bytes.len()].copy_from_slice(bytes);
        rom
    }

    ///Atari tests
    #[test]
    fn a7800() {
        let rule = detect(include_bytes!("roms/a7800.a78"), "");
        assert_eq!(rule.source(), Some("a7800"));
        assert_eq!(rule.start_offset(), Some(Offset::At(0x80)));
        assert_eq!(stripped_len(include_bytes!("roms/a7800.a78")), 1024 - 0x80);
    }
    #[test]
    fn a7800_actual_cart_data() {
        assert_eq!(detect(include_bytes!("roms/a7800_actual.a78"), "").source(), Some("a7800"));
        assert_eq!(stripped_len(include_bytes!("roms/a7800_actual.a78")), 1024 - 0x80);
    }
    #[test]
    fn lynx() {
        assert_eq!(detect(include_bytes!("roms/lynx.lnx"), "").source(), Some("lynx"));
        assert_eq!(stripped_len(include_bytes!("roms/lynx.lnx")), 1024 - 0x40);
        assert_eq!(stripped_len(&padded(0x6, b"BS9")), 1024 - 0x40);
    }

    ///Commodore tests
    #[test]
    fn psid() {
        assert_eq!(detect(include_bytes!("roms/psid.sid"), "").source(), Some("psid"));
        assert_eq!(stripped_len(include_bytes!("roms/psid.sid")), 1024 - 0x76);
        assert_eq!(stripped_len(&padded(0, b"PSID\x00\x03\x00\x7C")), 1024 - 0x76);
        assert_eq!(stripped_len(&padded(0, b"PSID\x00\x02\x00\x7C")), 1024 - 0x7C);
        assert_eq!(stripped_len(&padded(0, b"PSID\x00\x01\x00\x7C")), 1024 - 0x7C);
    }
    #[test]
    fn rsid() {
        assert_eq!(detect(include_bytes!("roms/rsid.sid"), "").source(), Some("psid"));
        assert_eq!(stripped_len(include_bytes!("roms/rsid.sid")), 1024 - 0x7C);
    }

    ///NEC tests
    #[test]
    fn pce() {
        assert_eq!(detect(include_bytes!("roms/pce.pce"), "").source(), Some("pce"));
        assert_eq!(stripped_len(include_bytes!("roms/pce.pce")), 1024 - 0x200);
    }

    ///Nintendo tests
    #[test]
    fn n64_big_endian() {
        let rule = detect(include_bytes!("roms/n64.z64"), "");
        assert_eq!(rule.source(), Some("n64"));
        assert_eq!(rule.operation(), Operation::None);
        assert_eq!(stripped_len(include_bytes!("roms/n64.z64")), 1024);
    }
    #[test]
    fn n64_byteswapped() {
        let rule = detect(include_bytes!("roms/n64.v64"), "");
        assert_eq!(rule.operation(), Operation::Byteswap);
        assert_eq!(stripped_len(include_bytes!("roms/n64.v64")), 1024);
    }
    #[test]
    fn n64_wordswapped() {
        let rule = detect(include_bytes!("roms/n64.n64"), "");
        assert_eq!(rule.operation(), Operation::Wordswap);
        assert_eq!(stripped_len(include_bytes!("roms/n64.n64")), 1024);
    }
    #[test]
    fn n64_swaps_restore_big_endian_order() {
        for rom in &[&include_bytes!("roms/n64.v64")[..], &include_bytes!("roms/n64.n64")[..]] {
            let rule = detect(rom, "");
            let mut out = Vec::new();
            rule.transform_stream(&mut Cursor::new(*rom), &mut out).unwrap();
            assert_eq!(&out[..4], &[0x80u8, 0x37, 0x12, 0x40]);
        }
    }
    #[test]
    fn nes() {
        assert_eq!(detect(include_bytes!("roms/nes.nes"), "").source(), Some("nes"));
        assert_eq!(stripped_len(include_bytes!("roms/nes.nes")), 1024 - 0x10);
    }
    #[test]
    fn fds() {
        assert_eq!(detect(include_bytes!("roms/fds.fds"), "").source(), Some("fds"));
        assert_eq!(stripped_len(include_bytes!("roms/fds.fds")), 1024 - 0x10);
        for side in 2..=4u8 {
            let rom = padded(0, &[0x46, 0x44, 0x53, 0x1A, side, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
            assert_eq!(detect(&rom, "").source(), Some("fds"));
        }
    }
    #[test]
    fn snes() {
        assert_eq!(detect(include_bytes!("roms/snes.smc"), "").source(), Some("snes"));
        assert_eq!(stripped_len(include_bytes!("roms/snes.smc")), 1024 - 0x200);
        assert_eq!(stripped_len(&padded(0x16, &[0; 8])), 1024 - 0x200);
        assert_eq!(stripped_len(&padded(0x16, b"SUPERUFO")), 1024 - 0x200);
    }
    #[test]
    fn spc() {
        assert_eq!(detect(include_bytes!("roms/spc.spc"), "").source(), Some("spc"));
        assert_eq!(stripped_len(include_bytes!("roms/spc.spc")), 1024 - 0x100);
    }

    ///Negative tests
    #[test]
    fn empty_stream() {
        assert!(detect(&[], "").is_empty());
    }
    #[test]
    fn short_garbage() {
        assert!(detect(&[0xFF; 4], "").is_empty());
    }
    #[test]
    fn plain_file() {
        assert!(detect(include_bytes!("roms/plain.bin"), "").is_empty());
    }

    ///Name filter tests
    #[test]
    fn unknown_name() {
        assert!(detect(include_bytes!("roms/nes.nes"), "gameboy").is_empty());
    }
    #[test]
    fn other_detector_name() {
        assert!(detect(include_bytes!("roms/nes.nes"), "snes").is_empty());
    }
    #[test]
    fn source_name() {
        assert_eq!(detect(include_bytes!("roms/nes.nes"), "nes").source(), Some("nes"));
    }
    #[test]
    fn display_name_any_case() {
        let rule = detect(include_bytes!("roms/nes.nes"), "NINTENDO FAMICON/NES");
        assert_eq!(rule.source(), Some("nes"));
    }

    #[test]
    fn header_round_trip() {
        let rom = include_bytes!("roms/nes.nes");
        let rule = detect(rom, "");
        let mut out = Vec::new();
        rule.transform_stream(&mut Cursor::new(&rom[..]), &mut out).unwrap();

        let mut restored = Vec::new();
        header_skipper::headerer::restore_with_header(&mut &out[..], &rom[..0x10], &mut restored).unwrap();
        assert_eq!(&restored[..], &rom[..]);
    }

}
