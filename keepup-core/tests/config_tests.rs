use keepup_core::config::{CONFIG_FILE_NAME, save};
use keepup_core::{FileConfig, Store, UpdaterConfig};
use tempfile::TempDir;

#[tokio::test]
async fn test_defaults_when_missing() {
    let dir = TempDir::new().unwrap();
    let config = FileConfig::load_or_default(dir.path().join(CONFIG_FILE_NAME)).await;

    assert_eq!(config.get_update_auto(), (false, false));
    assert_eq!(config.get_install_id(), "");
    assert!(!config.path().exists());
}

#[tokio::test]
async fn test_set_update_auto_marks_preference_set() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    let config = FileConfig::load_or_default(&path).await;

    config.set_update_auto(false).await.unwrap();
    assert_eq!(config.get_update_auto(), (false, true));

    let reloaded = FileConfig::load(&path).await.unwrap();
    assert_eq!(reloaded.get_update_auto(), (false, true));
}

#[tokio::test]
async fn test_install_id_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
    let config = FileConfig::new(&path);

    config.set_install_id("install-123").await.unwrap();
    config.set_update_auto(true).await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["installId"], "install-123");
    assert_eq!(json["auto"], true);
    assert_eq!(json["autoSet"], true);
}

#[tokio::test]
async fn test_save_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);

    for i in 0..5 {
        let store = Store {
            install_id: format!("id-{}", i),
            ..Default::default()
        };
        save(&path, &store).await.unwrap();
    }

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from(CONFIG_FILE_NAME)]);

    let reloaded = FileConfig::load(&path).await.unwrap();
    assert_eq!(reloaded.get_install_id(), "id-4");
}

#[tokio::test]
async fn test_corrupt_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "{not json").unwrap();

    assert!(FileConfig::load(&path).await.is_err());

    let config = FileConfig::load_or_default(&path).await;
    assert_eq!(config.store(), Store::default());

    // The next write replaces the corrupt file entirely.
    config.set_install_id("fresh").await.unwrap();
    let reloaded = FileConfig::load(&path).await.unwrap();
    assert_eq!(reloaded.get_install_id(), "fresh");
}
