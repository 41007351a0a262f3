use cask_core::config::{Config, CONFIG_FILE_NAME};
use cask_core::ErrorKind;
use std::path::PathBuf;

#[test]
fn defaults_match_documented_values() {
    let c = Config::default();
    assert_eq!(c.chunk_size, 4 * 1024 * 1024);
    assert_eq!(c.compression_level, 3);
    assert_eq!(c.handle_ttl_secs, 60);
    assert_eq!(c.data_dir, PathBuf::from(".cask"));
    c.validate().unwrap();
}

#[test]
fn partial_toml_fills_in_defaults() {
    let c = Config::from_toml_str("chunk_size = 1024\nmax_parallel_chunks = 2\n").unwrap();
    assert_eq!(c.chunk_size, 1024);
    assert_eq!(c.max_parallel_chunks, 2);
    assert_eq!(c.handle_ttl_secs, 60);

    let again = Config::from_toml_str(&c.to_toml_string().unwrap()).unwrap();
    assert_eq!(again, c);
}

#[test]
fn invalid_values_are_rejected() {
    for bad in [
        "chunk_size = 0",
        "max_parallel_chunks = 0",
        "handle_ttl_secs = 0",
        "handle_ttl_secs = 100000",
        "compression_level = 999",
        "chunk_size = \"big\"",
    ] {
        let err = Config::from_toml_str(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{bad}");
    }
}

#[test]
fn discover_prefers_explicit_then_data_dir_file() {
    let td = tempfile::tempdir().unwrap();
    let data_dir = td.path().join("store");
    std::fs::create_dir_all(&data_dir).unwrap();

    let c = Config::discover(None, Some(&data_dir)).unwrap();
    assert_eq!(c.data_dir, data_dir);
    assert_eq!(c.chunk_size, Config::default().chunk_size);

    std::fs::write(data_dir.join(CONFIG_FILE_NAME), "chunk_size = 512\n").unwrap();
    let c = Config::discover(None, Some(&data_dir)).unwrap();
    assert_eq!(c.chunk_size, 512);
    assert_eq!(c.data_dir, data_dir);

    let explicit = td.path().join("other.toml");
    std::fs::write(&explicit, "chunk_size = 64\n").unwrap();
    assert_eq!(Config::discover(Some(&explicit), Some(&data_dir)).unwrap().chunk_size, 64);

    let missing = td.path().join("nope.toml");
    assert_eq!(
        Config::discover(Some(&missing), None).unwrap_err().kind(),
        ErrorKind::StorageUnavailable
    );
}
