use super::*;

use std::collections::HashMap;

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:data/test.db"),
        "sqlite://data/test.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn creates_parent_dir_for_sqlite_url() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.path().join("data").exists());
}

#[test]
fn file_settings_override_defaults() {
    let mut settings = Settings::default();
    merge_file_settings(
        &mut settings,
        r#"
            bind_addr = "0.0.0.0:9000"
            media_root = "/srv/helix/media"
            max_upload_bytes = 1024
        "#,
    )
    .expect("settings");

    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.media_root, PathBuf::from("/srv/helix/media"));
    assert_eq!(settings.max_upload_bytes, 1024);
    assert_eq!(settings.database_url, Settings::default().database_url);
}

#[test]
fn unknown_file_keys_are_rejected() {
    let mut settings = Settings::default();
    assert!(merge_file_settings(&mut settings, "admin_token = \"x\"").is_err());
    assert_eq!(settings, Settings::default());
}

#[test]
fn prefixed_env_vars_win_over_short_names() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("SERVER_BIND", "127.0.0.1:1"),
        ("APP__BIND_ADDR", "127.0.0.1:2"),
        ("DATABASE_URL", "sqlite://a.db"),
        ("MEDIA_ROOT", "/tmp/media"),
        ("APP__MAX_UPLOAD_BYTES", "not-a-number"),
    ]);
    let mut settings = Settings::default();
    merge_env_settings(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_bind, "127.0.0.1:2");
    assert_eq!(settings.database_url, "sqlite://a.db");
    assert_eq!(settings.media_root, PathBuf::from("/tmp/media"));
    assert_eq!(
        settings.max_upload_bytes,
        Settings::default().max_upload_bytes
    );
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("server.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );
}
