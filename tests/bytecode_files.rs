// Strata bytecode persistence tests
// Covers: .stc round trip through a file, disassembly listing, corrupt input

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::sync::Arc;

use strata::{CompileOptions, OptLevel, compile_source, run_chunk};
use strata_core::vm::{BytecodeError, Chunk, RuntimeOptions};
use strata_core::Value;

const PROGRAM: &str = "
    class Counter {
        public int Count;
        public void Bump(int by) { Count = Count + by; }
    }
    int tally(int rounds) {
        var counter = new Counter();
        for (int i = 1; i <= rounds; i++) { counter.Bump(i); }
        return counter.Count;
    }
    tally(6)
";

#[test]
fn test_chunk_survives_a_file_round_trip() {
    let chunk = compile_source(PROGRAM, &CompileOptions::with_level(OptLevel::O3)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.stc");

    let mut writer = BufWriter::new(File::create(&path).unwrap());
    chunk.encode(&mut writer).unwrap();
    writer.flush().unwrap();
    drop(writer);

    let loaded = Chunk::decode(BufReader::new(File::open(&path).unwrap())).unwrap();
    assert_eq!(loaded.instructions.len(), chunk.instructions.len());
    assert_eq!(loaded.constants, chunk.constants);
    let value = run_chunk(Arc::new(loaded), RuntimeOptions::default()).unwrap();
    assert_eq!(value, Value::Integer(21));
}

#[test]
fn test_disassembly_names_functions_and_classes() {
    let chunk = compile_source(PROGRAM, &CompileOptions::default()).unwrap();
    let listing = chunk.disassemble();
    assert!(listing.contains("tally"));
    assert!(listing.contains("class Counter"));
    assert!(listing.contains("Bump"));
    assert!(listing.contains("Return"));
}

#[test]
fn test_json_dump_is_valid_json() {
    let chunk = compile_source("1 + 2", &CompileOptions::default()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&chunk.to_json().unwrap()).unwrap();
    assert!(parsed["instructions"].is_array());
    assert!(parsed["constants"].is_array());
}

#[test]
fn test_rejects_files_without_the_magic_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bogus.stc");
    fs::write(&path, b"NOPE0000").unwrap();
    let bytes = fs::read(&path).unwrap();
    assert!(matches!(
        Chunk::decode(&bytes[..]),
        Err(BytecodeError::InvalidMagic)
    ));
}

#[test]
fn test_rejects_truncated_files() {
    let chunk = compile_source("40 + 2", &CompileOptions::default()).unwrap();
    let bytes = chunk.serialize().unwrap();
    assert!(Chunk::decode(&bytes[..bytes.len() - 3]).is_err());
}
