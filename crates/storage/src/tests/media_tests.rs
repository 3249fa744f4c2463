use super::*;

#[test]
fn rejects_filenames_with_separators_or_blank() {
    assert!(validate_filename("   ").is_err());
    assert!(validate_filename("../etc/passwd").is_err());
    assert!(validate_filename("a\\b.txt").is_err());
    assert!(validate_filename("..").is_err());
    assert!(validate_filename(&"x".repeat(MAX_FILENAME_BYTES + 1)).is_err());
    assert_eq!(validate_filename(" report.pdf ").expect("valid"), "report.pdf");
}

#[test]
fn rejects_control_characters_and_header_delimiters() {
    assert!(validate_filename("a\0b.txt").is_err());
    assert!(validate_filename("line\nbreak.txt").is_err());
    assert!(validate_filename("a\"; x=1.txt").is_err());
    assert!(validate_filename("a;b.txt").is_err());
    assert_eq!(
        validate_filename("quarterly report (v2).pdf").expect("valid"),
        "quarterly report (v2).pdf"
    );
}

#[tokio::test]
async fn save_refuses_nul_in_filename_before_touching_disk() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = LocalMediaStore::new(root.path());

    assert!(matches!(
        store.save("a\0b.txt", b"x").await,
        Err(MediaError::InvalidFilename(_))
    ));
    assert!(!root.path().join(UPLOAD_PREFIX).exists());
}

#[tokio::test]
async fn saves_under_upload_prefix_and_reads_back() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = LocalMediaStore::new(root.path());

    let path = store.save("evidence.txt", b"audit log").await.expect("save");
    assert!(path.starts_with("control_files/"));
    assert!(path.ends_with("_evidence.txt"));
    assert!(root.path().join(&path).exists());

    let bytes = store.open(&path).await.expect("open");
    assert_eq!(bytes, b"audit log");
}

#[tokio::test]
async fn same_filename_is_stored_twice_without_clobbering() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = LocalMediaStore::new(root.path());

    let first = store.save("a.txt", b"one").await.expect("first");
    let second = store.save("a.txt", b"two").await.expect("second");
    assert_ne!(first, second);
    assert_eq!(store.open(&first).await.expect("open"), b"one");
}

#[tokio::test]
async fn delete_is_idempotent_and_open_reports_missing() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = LocalMediaStore::new(root.path());

    let path = store.save("gone.bin", b"bytes").await.expect("save");
    store.delete(&path).await.expect("delete");
    store.delete(&path).await.expect("second delete");
    assert!(matches!(
        store.open(&path).await,
        Err(MediaError::NotFound(_))
    ));
}

#[tokio::test]
async fn refuses_paths_outside_prefix() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = LocalMediaStore::new(root.path());

    assert!(matches!(
        store.open("secrets/key.pem").await,
        Err(MediaError::InvalidPath(_))
    ));
    assert!(matches!(
        store.open("control_files/../../key.pem").await,
        Err(MediaError::InvalidPath(_))
    ));
}

#[tokio::test]
async fn longest_allowed_filename_survives_the_uuid_prefix() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = LocalMediaStore::new(root.path());
    let name = "n".repeat(MAX_FILENAME_BYTES);

    let path = store.save(&name, b"x").await.expect("save");
    assert_eq!(store.open(&path).await.expect("open"), b"x");
}
