//! The glob-miners cdylib loaded through the real dynamic loader.
//!
//! The library is built into the same target directory as these tests on
//! first use; `cargo build` is a no-op when it is already up to date.
use assert_cmd::Command;
use byteminer::{plugin_system, Engine, EngineConfig, ErrorKind, ExtractFlags, Stream};
use predicates::prelude::*;
use serde_json::json;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;
use tempfile::TempDir;

/// `target/<profile>`, the directory holding this test binary's `deps/`
fn profile_dir() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    exe.parent().and_then(Path::parent).unwrap().to_path_buf()
}

fn glob_miners() -> &'static Path {
    static LIBRARY: OnceLock<PathBuf> = OnceLock::new();
    LIBRARY.get_or_init(|| {
        let profile = profile_dir();
        let mut build = process::Command::new(env!("CARGO"));
        build
            .current_dir(env!("CARGO_MANIFEST_DIR"))
            .args(["build", "--lib", "-p", "glob-miners"])
            .env("CARGO_TARGET_DIR", profile.parent().unwrap());
        if profile.file_name().is_some_and(|name| name == "release") {
            build.arg("--release");
        }
        let status = build.status().expect("failed to run cargo build");
        assert!(status.success(), "building glob-miners failed");

        let library = profile.join(format!("{DLL_PREFIX}glob_miners{DLL_SUFFIX}"));
        assert!(library.is_file(), "{} was not built", library.display());
        library
    })
}

fn library_path() -> String {
    glob_miners().display().to_string()
}

#[test]
fn test_introspect_lists_declared_miners() {
    let listed = plugin_system::introspect(glob_miners()).unwrap();
    let pairs: Vec<_> = listed
        .iter()
        .map(|l| (l.miner.as_str(), l.label.as_str()))
        .collect();
    assert_eq!(pairs, vec![("match_glob", "GLOB"), ("match_literal", "LITERAL")]);
    assert!(listed.iter().all(|l| l.path == library_path()));
}

#[test]
fn test_a_cat_sat() {
    let path = library_path();
    let mut engine = Engine::new(2).unwrap();
    assert!(engine.add_miner(&path, "match_glob", "c?t"), "{}", engine.last_error());

    let stream = Stream::open_buffer(b"a cat sat").into_shared();
    assert!(engine.bind_stream(&stream));
    let batch = engine.next(10);

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].position, 2);
    assert_eq!(batch[0].length, 3);
    assert_eq!(batch[0].label, "GLOB");
    assert_eq!(batch[0].value, b"cat");
    assert_eq!(batch[0].confidence, 1.0);
    assert!(engine.is_at_end());
    assert!(engine.next(10).is_empty());
    assert_eq!(engine.loaded_miners().len(), 2);
}

#[test]
fn test_two_miners_across_slices() {
    let path = library_path();
    let mut engine = Engine::with_config(EngineConfig {
        threads: 2,
        slice_size: 4,
        max_span: 8,
        flags: ExtractFlags::NONE,
    })
    .unwrap();
    assert!(engine.add_miner(&path, "match_glob", "?at"));
    assert!(engine.add_miner(&path, "match_literal", "at"));

    let stream = Stream::open_buffer(b"a cat sat on the mat").into_shared();
    engine.bind_stream(&stream);
    let mut found = Vec::new();
    while !engine.is_at_end() {
        for occurrence in engine.next(2) {
            let value = occurrence.value_str().into_owned();
            found.push((occurrence.position, occurrence.label, value));
        }
    }

    let expected = [
        (2, "GLOB", "cat"),
        (3, "LITERAL", "at"),
        (6, "GLOB", "sat"),
        (7, "LITERAL", "at"),
        (17, "GLOB", "mat"),
        (18, "LITERAL", "at"),
    ];
    let expected: Vec<_> = expected
        .iter()
        .map(|(p, l, v)| (*p, l.to_string(), v.to_string()))
        .collect();
    assert_eq!(found, expected);
    assert_eq!(engine.last_error(), "");
}

#[test]
fn test_load_errors() {
    let path = library_path();
    let mut engine = Engine::new(1).unwrap();

    assert!(!engine.add_miner(&path, "match_nothing", ""));
    assert_eq!(engine.last_error_kind(), Some(ErrorKind::Symbol));

    assert!(!engine.add_miner(&path, "match_glob", ""));
    assert_eq!(engine.last_error_kind(), Some(ErrorKind::Config));
    assert!(engine.last_error().contains("must not be empty"));

    assert!(engine.miners().is_empty());
}

fn byteminer(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("byteminer").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("BYTEMINER_MINERS_PATH", home.path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_scan_json() {
    let home = TempDir::new().unwrap();
    let miner = format!("{}::match_glob=c?t", library_path());

    let assert = byteminer(&home)
        .args(["scan", "--text", "a cat sat", "--miner", &miner, "--format", "json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("1 occurrences"));

    let output: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(
        output,
        json!([{
            "position": 2,
            "length": 3,
            "label": "GLOB",
            "value": "cat",
            "confidence": 1.0
        }])
    );
}

#[test]
fn test_cli_meta_resolves_bare_name() {
    let home = TempDir::new().unwrap();
    let dir = glob_miners().parent().unwrap();

    byteminer(&home)
        .env("BYTEMINER_MINERS_PATH", dir)
        .args(["meta", "glob_miners"])
        .assert()
        .success()
        .stdout(predicate::str::contains("match_glob"))
        .stdout(predicate::str::contains("LITERAL"));
}
