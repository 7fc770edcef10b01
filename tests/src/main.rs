// Host-side scenario tests for the floppy emulation core.

mod read_path_tests;
mod step_behavior_tests;
mod write_path_tests;

use floppy_core::types::FloppyConfig;

fn main() {
    println!("floppy-core smoke checks");

    smoke_config();
    smoke_mfm_round_trip();

    println!("ok");
    println!("run the scenario suites with: cargo test");
}

fn smoke_config() {
    let cfg = FloppyConfig::default();
    assert_eq!(cfg.rpm(), 300);
    assert!(FloppyConfig::new(200, 2, 12, 10).is_ok());
    assert!(FloppyConfig::new(200, 200, 12, 10).is_err());
    println!("  config validation ok");
}

fn smoke_mfm_round_trip() {
    use floppy_core::mfm::{mfm_bit, MfmWriter};
    use floppy_core::test_utils::patterns::samples_from_bits;

    let pattern = "1001001000100101";
    let mut buf = [0u32; 4];
    let mut writer = MfmWriter::resume(&mut buf, 0, 0xdead_beef);
    for s in samples_from_bits::<32>(pattern) {
        writer.push_interval(s as u32 + 1);
    }
    let bits = writer.finish();
    assert_eq!(bits as usize, pattern.len());
    for (i, c) in pattern.chars().enumerate() {
        assert_eq!(mfm_bit(&buf, i as u32), c == '1');
    }
    println!("  mfm round trip ok");
}
