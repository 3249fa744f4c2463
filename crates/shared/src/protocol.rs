use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ControlFields, ControlId, FileId, Priority, Status, SubitemId, UserId, UserSummary,
};

/// Submitted control form. Every value is optional so that missing and
/// malformed input can be reported per field instead of failing the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlForm {
    pub name: Option<String>,
    pub control_short_number: Option<String>,
    pub description: Option<String>,
    pub tags: Option<serde_json::Value>,
    pub status: Option<String>,
    pub priority: Option<serde_json::Value>,
    pub selected: Option<bool>,
    pub project_timeline_start: Option<String>,
    pub project_timeline_end: Option<String>,
    pub responsible_team: Option<String>,
    pub team_members: Vec<i64>,
    pub exception_required: Option<bool>,
    pub exception_for: Option<String>,
    pub exception_duration_start: Option<String>,
    pub exception_duration_end: Option<String>,
    pub csf_function: Option<String>,
    pub csf_category: Option<String>,
    pub responsible: Option<String>,
    pub accountable: Option<String>,
    pub consulted: Option<String>,
    pub informed: Option<String>,
    pub visibility: Option<String>,
    pub alerting: Option<String>,
    pub detection: Option<String>,
    pub telemetry: Option<String>,
    pub signals: Option<String>,
    pub components: Option<serde_json::Value>,
    pub span: Option<String>,
    pub metric: Option<String>,
    pub report: Option<String>,
    pub discussion: Option<String>,
    pub related_controls: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: serde_json::Value,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceSets {
    pub status: Vec<Choice>,
    pub priority: Vec<Choice>,
    pub csf_function: Vec<Choice>,
    pub nice_role: Vec<Choice>,
    pub detection: Vec<Choice>,
    pub signals: Vec<Choice>,
    pub span: Vec<Choice>,
    pub metric: Vec<Choice>,
    pub team_members: Vec<Choice>,
    pub related_controls: Vec<Choice>,
}

/// What a create or edit page needs: initial values and every choice list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_id: Option<ControlId>,
    pub initial: ControlForm,
    pub choices: ChoiceSets,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedControlSummary {
    pub control_id: ControlId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFilePayload {
    pub file_id: FileId,
    pub control_id: ControlId,
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubitemPayload {
    pub subitem_id: SubitemId,
    pub control_id: ControlId,
    pub subitem: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSubitemRequest {
    #[serde(default)]
    pub subitem: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSummary {
    pub control_id: ControlId,
    pub label: String,
    pub control_short_number: String,
    pub name: String,
    pub status: Status,
    pub priority: Priority,
    pub selected: bool,
    pub last_updated: DateTime<Utc>,
    pub team_members: Vec<UserSummary>,
    pub related_controls: Vec<RelatedControlSummary>,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlDetail {
    pub control_id: ControlId,
    pub label: String,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: ControlFields,
    pub team_members: Vec<UserSummary>,
    pub related_controls: Vec<RelatedControlSummary>,
    pub files: Vec<ControlFilePayload>,
    pub subitems: Vec<SubitemPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConfirmation {
    pub control_id: ControlId,
    pub label: String,
    pub subitem_count: u64,
    pub file_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedUser {
    pub user_id: UserId,
}
