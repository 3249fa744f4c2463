use std::sync::Arc;

use serde::Deserialize;
use shared::{
    domain::{ControlId, FileId, SubitemId, UserId, UserSummary},
    error::{ApiError, ErrorCode, FieldErrors},
    protocol::{
        ControlDetail, ControlFilePayload, ControlForm, ControlSummary, CreateUserRequest,
        DeleteConfirmation, FormSchema, NewSubitemRequest, RelatedControlSummary, SubitemPayload,
    },
};
use storage::{
    media::{validate_filename, MediaError, MediaStore},
    ControlInput, ControlRecord, Storage, StorageError, StoredControlFile, StoredRelatedControl,
    StoredSubitem,
};
use tracing::{error, info, warn};

pub mod forms;

use forms::{clean_control_form, report_unknown_ids, DUPLICATE_SHORT_NUMBER, REQUIRED};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub media: Arc<dyn MediaStore>,
}

/// Which manager query backs the list view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListScope {
    #[default]
    All,
    Active,
    Draft,
}

pub async fn list_controls(
    ctx: &ApiContext,
    scope: ListScope,
) -> Result<Vec<ControlSummary>, ApiError> {
    let records = match scope {
        ListScope::All => ctx.storage.list_controls().await,
        ListScope::Active => ctx.storage.active_controls().await,
        ListScope::Draft => ctx.storage.draft_controls().await,
    }
    .map_err(internal)?;
    Ok(records.iter().map(summary_from_record).collect())
}

pub async fn control_detail(ctx: &ApiContext, control_id: ControlId) -> Result<ControlDetail, ApiError> {
    let record = load_record(ctx, control_id).await?;
    let subitems = ctx
        .storage
        .list_subitems(control_id)
        .await
        .map_err(internal)?;
    Ok(detail_from_record(record, subitems))
}

pub async fn create_form(ctx: &ApiContext) -> Result<FormSchema, ApiError> {
    Ok(FormSchema {
        control_id: None,
        initial: ControlForm::default(),
        choices: choices(ctx).await?,
    })
}

pub async fn edit_form(ctx: &ApiContext, control_id: ControlId) -> Result<FormSchema, ApiError> {
    let record = load_record(ctx, control_id).await?;
    Ok(FormSchema {
        control_id: Some(control_id),
        initial: forms::initial_from_record(&record),
        choices: choices(ctx).await?,
    })
}

pub async fn create_control(ctx: &ApiContext, form: &ControlForm) -> Result<ControlId, ApiError> {
    let input = validate(ctx, form, None).await?;
    let control_id = ctx
        .storage
        .create_control(&input)
        .await
        .map_err(storage_failure)?;
    info!(
        control_id = control_id.0,
        short_number = %input.fields.control_short_number,
        "control created"
    );
    Ok(control_id)
}

pub async fn update_control(
    ctx: &ApiContext,
    control_id: ControlId,
    form: &ControlForm,
) -> Result<(), ApiError> {
    load_record(ctx, control_id).await?;
    let input = validate(ctx, form, Some(control_id)).await?;
    let updated = ctx
        .storage
        .update_control(control_id, &input)
        .await
        .map_err(storage_failure)?;
    if !updated {
        return Err(control_not_found());
    }
    info!(control_id = control_id.0, status = %input.fields.status, "control updated");
    Ok(())
}

pub async fn delete_confirmation(
    ctx: &ApiContext,
    control_id: ControlId,
) -> Result<DeleteConfirmation, ApiError> {
    let record = load_record(ctx, control_id).await?;
    let counts = ctx
        .storage
        .count_children(control_id)
        .await
        .map_err(internal)?;
    Ok(DeleteConfirmation {
        control_id,
        label: record.control.fields.label(),
        subitem_count: counts.subitems,
        file_count: counts.files,
    })
}

pub async fn delete_control(ctx: &ApiContext, control_id: ControlId) -> Result<(), ApiError> {
    let removed_files = ctx
        .storage
        .delete_control(control_id)
        .await
        .map_err(internal)?
        .ok_or_else(control_not_found)?;
    for file in &removed_files {
        discard_blob(ctx, &file.path).await;
    }
    info!(
        control_id = control_id.0,
        files = removed_files.len(),
        "control deleted"
    );
    Ok(())
}

pub async fn add_subitem(
    ctx: &ApiContext,
    control_id: ControlId,
    request: &NewSubitemRequest,
) -> Result<SubitemPayload, ApiError> {
    let subitem = match &request.subitem {
        None | Some(serde_json::Value::Null) => return Err(ApiError::field("subitem", REQUIRED)),
        Some(value) => value.clone(),
    };
    load_record(ctx, control_id).await?;
    let subitem_id = ctx
        .storage
        .add_subitem(control_id, &subitem)
        .await
        .map_err(storage_failure)?;
    Ok(SubitemPayload {
        subitem_id,
        control_id,
        subitem,
    })
}

pub async fn delete_subitem(
    ctx: &ApiContext,
    control_id: ControlId,
    subitem_id: SubitemId,
) -> Result<(), ApiError> {
    let deleted = ctx
        .storage
        .delete_subitem(control_id, subitem_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("subitem not found"));
    }
    Ok(())
}

pub async fn upload_file(
    ctx: &ApiContext,
    control_id: ControlId,
    filename: Option<&str>,
    bytes: &[u8],
) -> Result<ControlFilePayload, ApiError> {
    let filename = validate_filename(filename.unwrap_or_default())
        .map_err(|e| ApiError::field("filename", e.to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::field("file", "The submitted file is empty."));
    }
    load_record(ctx, control_id).await?;

    let path = ctx.media.save(filename, bytes).await.map_err(internal)?;
    let stored = match ctx
        .storage
        .add_control_file(control_id, &path, filename, bytes.len() as u64)
        .await
    {
        Ok(stored) => stored,
        Err(e) => {
            discard_blob(ctx, &path).await;
            return Err(storage_failure(e));
        }
    };
    info!(
        control_id = control_id.0,
        file_id = stored.file_id.0,
        size_bytes = stored.size_bytes,
        "control file stored"
    );
    Ok(file_payload(&stored))
}

pub async fn download_file(
    ctx: &ApiContext,
    control_id: ControlId,
    file_id: FileId,
) -> Result<(ControlFilePayload, Vec<u8>), ApiError> {
    let stored = ctx
        .storage
        .load_control_file(control_id, file_id)
        .await
        .map_err(internal)?
        .ok_or_else(file_not_found)?;
    let bytes = ctx.media.open(&stored.path).await.map_err(|e| match e {
        MediaError::NotFound(_) => file_not_found(),
        other => internal(other),
    })?;
    Ok((file_payload(&stored), bytes))
}

pub async fn delete_file(
    ctx: &ApiContext,
    control_id: ControlId,
    file_id: FileId,
) -> Result<(), ApiError> {
    let removed = ctx
        .storage
        .delete_control_file(control_id, file_id)
        .await
        .map_err(internal)?
        .ok_or_else(file_not_found)?;
    discard_blob(ctx, &removed.path).await;
    Ok(())
}

pub async fn list_users(ctx: &ApiContext) -> Result<Vec<UserSummary>, ApiError> {
    ctx.storage.list_users().await.map_err(internal)
}

pub async fn create_user(ctx: &ApiContext, request: &CreateUserRequest) -> Result<UserId, ApiError> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(ApiError::field("username", REQUIRED));
    }
    if username.chars().count() > 150 {
        return Err(ApiError::field(
            "username",
            "Ensure this value has at most 150 characters.",
        ));
    }
    ctx.storage
        .create_user(username)
        .await
        .map_err(storage_failure)
}

/// Runs field cleaning and every store-backed check together so one
/// response carries all field errors. The unique index still guards
/// against a concurrent insert of the same short number.
async fn validate(
    ctx: &ApiContext,
    form: &ControlForm,
    editing: Option<ControlId>,
) -> Result<ControlInput, ApiError> {
    let (input, mut errors) = match clean_control_form(form) {
        Ok(input) => (Some(input), FieldErrors::new()),
        Err(errors) => (None, errors),
    };

    let short_number = form
        .control_short_number
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(short_number) = short_number {
        if !errors.contains_key("control_short_number")
            && ctx
                .storage
                .short_number_in_use(short_number, editing)
                .await
                .map_err(internal)?
        {
            errors
                .entry("control_short_number".to_string())
                .or_default()
                .push(DUPLICATE_SHORT_NUMBER.to_string());
        }
    }

    let user_ids = forms::dedup(form.team_members.iter().copied().map(UserId));
    let known_users = ctx
        .storage
        .existing_user_ids(&user_ids)
        .await
        .map_err(internal)?;
    report_unknown_ids(&mut errors, "team_members", &user_ids, &known_users, |id| id.0);

    let control_ids = forms::dedup(form.related_controls.iter().copied().map(ControlId));
    let known_controls = ctx
        .storage
        .existing_control_ids(&control_ids)
        .await
        .map_err(internal)?;
    report_unknown_ids(
        &mut errors,
        "related_controls",
        &control_ids,
        &known_controls,
        |id| id.0,
    );

    match input {
        Some(input) if errors.is_empty() => Ok(input),
        _ => Err(ApiError::invalid_fields(errors)),
    }
}

async fn choices(ctx: &ApiContext) -> Result<shared::protocol::ChoiceSets, ApiError> {
    let users = ctx.storage.list_users().await.map_err(internal)?;
    let controls = ctx
        .storage
        .list_control_labels()
        .await
        .map_err(internal)?;
    Ok(forms::choice_sets(&users, &controls))
}

async fn load_record(ctx: &ApiContext, control_id: ControlId) -> Result<ControlRecord, ApiError> {
    ctx.storage
        .get_control(control_id)
        .await
        .map_err(internal)?
        .ok_or_else(control_not_found)
}

async fn discard_blob(ctx: &ApiContext, path: &str) {
    if let Err(error) = ctx.media.delete(path).await {
        warn!(%path, %error, "failed to remove stored control file");
    }
}

fn related_summary(related: &StoredRelatedControl) -> RelatedControlSummary {
    RelatedControlSummary {
        control_id: related.control_id,
        label: related.label(),
    }
}

fn file_payload(file: &StoredControlFile) -> ControlFilePayload {
    ControlFilePayload {
        file_id: file.file_id,
        control_id: file.control_id,
        filename: file.filename.clone(),
        path: file.path.clone(),
        size_bytes: file.size_bytes,
        uploaded_at: file.uploaded_at,
    }
}

fn summary_from_record(record: &ControlRecord) -> ControlSummary {
    let fields = &record.control.fields;
    ControlSummary {
        control_id: record.control.control_id,
        label: fields.label(),
        control_short_number: fields.control_short_number.clone(),
        name: fields.name.clone(),
        status: fields.status,
        priority: fields.priority,
        selected: fields.selected,
        last_updated: record.control.last_updated,
        team_members: record.team_members.clone(),
        related_controls: record.related_controls.iter().map(related_summary).collect(),
        file_count: record.files.len(),
    }
}

fn detail_from_record(record: ControlRecord, subitems: Vec<StoredSubitem>) -> ControlDetail {
    ControlDetail {
        control_id: record.control.control_id,
        label: record.control.fields.label(),
        last_updated: record.control.last_updated,
        related_controls: record.related_controls.iter().map(related_summary).collect(),
        files: record.files.iter().map(file_payload).collect(),
        subitems: subitems
            .into_iter()
            .map(|s| SubitemPayload {
                subitem_id: s.subitem_id,
                control_id: s.control_id,
                subitem: s.subitem,
            })
            .collect(),
        team_members: record.team_members,
        fields: record.control.fields,
    }
}

fn control_not_found() -> ApiError {
    ApiError::not_found("control not found")
}

fn file_not_found() -> ApiError {
    ApiError::not_found("file not found")
}

fn storage_failure(error: StorageError) -> ApiError {
    match error {
        StorageError::DuplicateShortNumber(_) => {
            ApiError::field("control_short_number", DUPLICATE_SHORT_NUMBER)
        }
        StorageError::DuplicateUsername(_) => {
            ApiError::field("username", "A user with that username already exists.")
        }
        StorageError::MissingReference => ApiError::new(
            ErrorCode::Validation,
            "referenced user or control no longer exists",
        ),
        other => internal(other),
    }
}

fn internal(error: impl std::fmt::Display) -> ApiError {
    error!(%error, "request failed");
    ApiError::new(ErrorCode::Internal, "internal server error")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
