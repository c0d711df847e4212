//! Integration tests for the persisted configuration document.

use serde_json::Value;
use tempfile::TempDir;

use solo_cli::config::{ConfigStore, Configuration};
use solo_cli::settings::ModeSettings;

const SECTIONS: [&str; 6] = ["hardware", "user", "server", "active_model", "modes", "known_ids"];

#[test]
fn test_load_save_load_fills_defaults_and_is_idempotent() {
    let documents = [
        "{}",
        r#"{"user": {"domain": "Robotics"}}"#,
        r#"{"server": {"type": "ollama"}, "modes": {"teleop": {"fps": 30}}}"#,
        r#"{"hardware": {"use_gpu": true, "gpu_vendor": "NVIDIA"}, "custom": [1, 2]}"#,
    ];

    for document in documents {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, document).unwrap();

        let mut store = ConfigStore::open(&path).unwrap();
        let loaded = store.config().clone();
        store.save(loaded.clone()).unwrap();
        let first = std::fs::read(&path).unwrap();

        let raw: Value = serde_json::from_slice(&first).unwrap();
        for section in SECTIONS {
            assert!(raw.get(section).is_some(), "{} missing after saving {}", section, document);
        }

        let mut reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.config(), &loaded);
        let again = reopened.config().clone();
        reopened.save(again).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first, "second save differs for {}", document);
    }
}

#[test]
fn test_mode_settings_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    let mut settings: ModeSettings = [("robot_type", "koch"), ("leader_port", "/dev/ttyUSB0")]
        .into_iter()
        .collect();
    settings.insert("fps", 30i64);
    settings.insert("display_data", false);

    let mut store = ConfigStore::open(&path).unwrap();
    store.set_mode_settings("teleop", settings.clone()).unwrap();
    assert_eq!(store.get_mode_settings("teleop"), Some(&settings));

    let reopened = ConfigStore::open(&path).unwrap();
    assert_eq!(reopened.get_mode_settings("teleop"), Some(&settings));
}

#[test]
fn test_set_mode_settings_replaces_in_full() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();
    let first: ModeSettings = [("robot_type", "koch"), ("leader_id", "old")].into_iter().collect();
    let second: ModeSettings = [("robot_type", "so100")].into_iter().collect();

    store.set_mode_settings("record", first).unwrap();
    store.set_mode_settings("record", second.clone()).unwrap();
    assert_eq!(store.get_mode_settings("record"), Some(&second));
}

#[test]
fn test_corrupt_file_opens_with_defaults_and_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "not json at all").unwrap();

    let store = ConfigStore::open(&path).unwrap();
    assert_eq!(store.config(), &Configuration::default());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json at all");
}

#[test]
fn test_save_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();
    for role in ["Engineer", "Student"] {
        store.update(|c| c.user.role = Some(role.to_string())).unwrap();
    }
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}
