use super::*;
use crate::forms::{invalid_choice, tests::valid_form};
use shared::domain::Status;
use storage::media::LocalMediaStore;

async fn setup() -> (ApiContext, tempfile::TempDir) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let media_root = tempfile::tempdir().expect("tempdir");
    let ctx = ApiContext {
        storage,
        media: Arc::new(LocalMediaStore::new(media_root.path())),
    };
    (ctx, media_root)
}

#[tokio::test]
async fn create_then_detail_returns_submitted_values() {
    let (ctx, _media) = setup().await;
    let alice = ctx.storage.create_user("alice").await.expect("user");
    let mut form = valid_form("PR-1");
    form.team_members = vec![alice.0];

    let control_id = create_control(&ctx, &form).await.expect("create");
    let detail = control_detail(&ctx, control_id).await.expect("detail");
    assert_eq!(detail.label, "PR-1 - Asset inventory");
    assert_eq!(detail.fields.status, Status::Draft);
    assert_eq!(detail.team_members.len(), 1);
    assert!(detail.subitems.is_empty());
}

#[tokio::test]
async fn duplicate_short_number_becomes_field_error() {
    let (ctx, _media) = setup().await;
    create_control(&ctx, &valid_form("PR-2"))
        .await
        .expect("first");

    let err = create_control(&ctx, &valid_form("PR-2"))
        .await
        .expect_err("duplicate");
    assert!(matches!(err.code, ErrorCode::Validation));
    assert_eq!(
        err.fields["control_short_number"],
        vec![DUPLICATE_SHORT_NUMBER.to_string()]
    );
}

#[tokio::test]
async fn unknown_relations_are_reported_with_field_errors() {
    let (ctx, _media) = setup().await;
    let mut form = valid_form("PR-3");
    form.team_members = vec![41];
    form.related_controls = vec![42];
    form.name = None;

    let err = create_control(&ctx, &form).await.expect_err("invalid");
    assert_eq!(err.fields["team_members"], vec![invalid_choice(41)]);
    assert_eq!(err.fields["related_controls"], vec![invalid_choice(42)]);
    assert_eq!(err.fields["name"], vec![REQUIRED.to_string()]);
}

#[tokio::test]
async fn missing_control_is_not_found_everywhere() {
    let (ctx, _media) = setup().await;
    let missing = ControlId(1234);

    let checks = [
        control_detail(&ctx, missing).await.map(|_| ()),
        edit_form(&ctx, missing).await.map(|_| ()),
        update_control(&ctx, missing, &valid_form("PR-4")).await,
        delete_confirmation(&ctx, missing).await.map(|_| ()),
        delete_control(&ctx, missing).await,
    ];
    for result in checks {
        let err = result.expect_err("not found");
        assert!(matches!(err.code, ErrorCode::NotFound));
    }
}

#[tokio::test]
async fn update_changes_status_only() {
    let (ctx, _media) = setup().await;
    let control_id = create_control(&ctx, &valid_form("PR-5"))
        .await
        .expect("create");
    let before = control_detail(&ctx, control_id).await.expect("before");

    let mut form = edit_form(&ctx, control_id).await.expect("form").initial;
    form.status = Some("In Review".into());
    update_control(&ctx, control_id, &form)
        .await
        .expect("update");

    let after = control_detail(&ctx, control_id).await.expect("after");
    assert_eq!(after.fields.status, Status::InReview);
    let mut expected = before.fields.clone();
    expected.status = Status::InReview;
    assert_eq!(after.fields, expected);
}

#[tokio::test]
async fn list_scopes_use_manager_queries() {
    let (ctx, _media) = setup().await;
    let mut approved = valid_form("PR-6");
    approved.status = Some("Approved".into());
    create_control(&ctx, &approved).await.expect("approved");
    create_control(&ctx, &valid_form("PR-7"))
        .await
        .expect("draft");

    let active = list_controls(&ctx, ListScope::Active).await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].control_short_number, "PR-6");

    let drafts = list_controls(&ctx, ListScope::Draft).await.expect("drafts");
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].control_short_number, "PR-7");

    assert_eq!(list_controls(&ctx, ListScope::All).await.expect("all").len(), 2);
}

#[tokio::test]
async fn delete_removes_children_and_blobs() {
    let (ctx, media_root) = setup().await;
    let control_id = create_control(&ctx, &valid_form("PR-8"))
        .await
        .expect("create");
    add_subitem(
        &ctx,
        control_id,
        &NewSubitemRequest {
            subitem: Some(serde_json::json!({ "task": "rotate keys" })),
        },
    )
    .await
    .expect("subitem");
    let file = upload_file(&ctx, control_id, Some("evidence.txt"), b"proof")
        .await
        .expect("upload");
    let blob = media_root.path().join(&file.path);
    assert!(blob.exists());

    let confirmation = delete_confirmation(&ctx, control_id)
        .await
        .expect("confirm");
    assert_eq!((confirmation.subitem_count, confirmation.file_count), (1, 1));

    delete_control(&ctx, control_id).await.expect("delete");
    assert!(!blob.exists());
    assert!(ctx
        .storage
        .list_subitems(control_id)
        .await
        .expect("subitems")
        .is_empty());
}

#[tokio::test]
async fn upload_validates_filename_and_body() {
    let (ctx, _media) = setup().await;
    let control_id = create_control(&ctx, &valid_form("PR-9"))
        .await
        .expect("create");

    let err = upload_file(&ctx, control_id, Some("../x"), b"data")
        .await
        .expect_err("bad name");
    assert!(err.fields.contains_key("filename"));

    let err = upload_file(&ctx, control_id, Some("x.txt"), b"")
        .await
        .expect_err("empty");
    assert!(err.fields.contains_key("file"));

    let err = upload_file(&ctx, ControlId(999), Some("x.txt"), b"data")
        .await
        .expect_err("missing control");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn download_and_delete_file_round_trip() {
    let (ctx, _media) = setup().await;
    let control_id = create_control(&ctx, &valid_form("PR-10"))
        .await
        .expect("create");
    let file = upload_file(&ctx, control_id, Some("a.csv"), b"x,y")
        .await
        .expect("upload");

    let (payload, bytes) = download_file(&ctx, control_id, file.file_id)
        .await
        .expect("download");
    assert_eq!(payload.filename, "a.csv");
    assert_eq!(bytes, b"x,y");

    delete_file(&ctx, control_id, file.file_id)
        .await
        .expect("delete");
    let err = download_file(&ctx, control_id, file.file_id)
        .await
        .expect_err("gone");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn subitem_requires_payload() {
    let (ctx, _media) = setup().await;
    let control_id = create_control(&ctx, &valid_form("PR-11"))
        .await
        .expect("create");
    let err = add_subitem(&ctx, control_id, &NewSubitemRequest { subitem: None })
        .await
        .expect_err("missing payload");
    assert_eq!(err.fields["subitem"], vec![REQUIRED.to_string()]);

    let err = delete_subitem(&ctx, control_id, SubitemId(77))
        .await
        .expect_err("missing subitem");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn users_are_created_once() {
    let (ctx, _media) = setup().await;
    let request = CreateUserRequest {
        username: " dana ".into(),
    };
    create_user(&ctx, &request).await.expect("create");
    let err = create_user(&ctx, &request).await.expect_err("duplicate");
    assert!(err.fields.contains_key("username"));

    let users = list_users(&ctx).await.expect("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].username, "dana");
}

#[tokio::test]
async fn duplicate_short_number_is_reported_with_other_field_errors() {
    let (ctx, _media) = setup().await;
    create_control(&ctx, &valid_form("PR-12"))
        .await
        .expect("first");

    let mut form = valid_form("PR-12");
    form.name = None;
    form.status = Some("Retired".into());
    let err = create_control(&ctx, &form).await.expect_err("invalid");
    assert_eq!(
        err.fields["control_short_number"],
        vec![DUPLICATE_SHORT_NUMBER.to_string()]
    );
    assert_eq!(err.fields["name"], vec![REQUIRED.to_string()]);
    assert_eq!(err.fields["status"], vec![invalid_choice("Retired")]);
}

#[tokio::test]
async fn editing_keeps_own_short_number_but_not_anothers() {
    let (ctx, _media) = setup().await;
    let first = create_control(&ctx, &valid_form("PR-13"))
        .await
        .expect("first");
    let second = create_control(&ctx, &valid_form("PR-14"))
        .await
        .expect("second");

    update_control(&ctx, first, &valid_form("PR-13"))
        .await
        .expect("same number");
    let err = update_control(&ctx, second, &valid_form("PR-13"))
        .await
        .expect_err("taken");
    assert_eq!(
        err.fields["control_short_number"],
        vec![DUPLICATE_SHORT_NUMBER.to_string()]
    );
}

#[tokio::test]
async fn repeated_unknown_ids_are_reported_once() {
    let (ctx, _media) = setup().await;
    let mut form = valid_form("PR-15");
    form.team_members = vec![41, 41];
    form.related_controls = vec![42, 42, 42];

    let err = create_control(&ctx, &form).await.expect_err("invalid");
    assert_eq!(err.fields["team_members"], vec![invalid_choice(41)]);
    assert_eq!(err.fields["related_controls"], vec![invalid_choice(42)]);
}
