//! Loading configuration files from disk.

use std::fs;
use std::path::PathBuf;

use rtg_core::{Config, CoreError};

fn scratch_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rtg_core_{}_{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("rtg.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_from_explicit_path() {
    let path = scratch_file(
        "explicit",
        "[engine]\nworkspaces = 4\nheadless = true\n\n[surface]\nwidth = 64\nheight = 32\n",
    );

    let config = Config::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.engine.workspaces, 4);
    assert!(config.engine.headless);
    assert_eq!((config.surface.width, config.surface.height), (64, 32));
    assert_eq!(config.debug, Config::default().debug);
}

#[test]
fn test_invalid_file_reports_the_problem() {
    let path = scratch_file("invalid", "[surface]\nwidth = \"wide\"\n");
    assert!(matches!(Config::load(&path), Err(CoreError::Parse(_))));

    let path = scratch_file("range", "[surface]\npresent_modes = []\n");
    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("present_modes"));
}

#[test]
fn test_explicit_missing_path_is_not_defaulted() {
    let missing = std::env::temp_dir().join("rtg_core_missing/none.toml");
    assert!(matches!(
        Config::load_or_default(Some(&missing)),
        Err(CoreError::Io { .. })
    ));
}
