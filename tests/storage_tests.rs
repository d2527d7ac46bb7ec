use wirtual::storage::{self, ConfigStore};

#[test]
fn test_round_trip_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("nested").join(".anthropic"));

    assert!(store.save(storage::API_KEY, "  sk-ant-123\n"));
    assert_eq!(store.load(storage::API_KEY).as_deref(), Some("sk-ant-123"));
    assert_eq!(store.load(storage::SYSTEM_PROMPT), None);
}

#[test]
fn test_save_under_a_file_fails_quietly() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();

    let store = ConfigStore::new(blocker.join("config"));
    assert!(!store.save(storage::API_KEY, "sk-ant-123"));
    assert_eq!(store.load(storage::API_KEY), None);
}

#[cfg(unix)]
#[test]
fn test_save_into_read_only_dir_fails_quietly() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("ro");
    std::fs::create_dir(&config_dir).unwrap();
    std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

    // Privileged users ignore directory permissions.
    let probe = config_dir.join(".probe");
    if std::fs::write(&probe, "").is_ok() {
        let _ = std::fs::remove_file(&probe);
        std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let store = ConfigStore::new(&config_dir);
    assert!(!store.save(storage::API_KEY, "sk-ant-123"));
    assert_eq!(store.load(storage::API_KEY), None);

    std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
}
