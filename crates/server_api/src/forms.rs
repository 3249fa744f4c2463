//! Turns a loosely typed [`ControlForm`] into a validated [`ControlInput`],
//! collecting one or more messages per offending field.

use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use shared::{
    domain::{
        ControlFields, ControlId, CsfFunction, Detection, Metric, NiceRole, Priority, Signals,
        Span, Status, UserId, UserSummary,
    },
    error::FieldErrors,
    protocol::{Choice, ChoiceSets, ControlForm},
};
use storage::{ControlRecord, ControlInput, StoredRelatedControl};

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_DATE: &str = "Enter a valid date.";
pub const INVALID_JSON: &str = "Enter a valid JSON.";
pub const DUPLICATE_SHORT_NUMBER: &str = "Control with this Short Number already exists.";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

pub fn invalid_choice(value: impl fmt::Display) -> String {
    format!("Select a valid choice. {value} is not one of the available choices.")
}

#[derive(Default)]
struct Cleaner {
    errors: FieldErrors,
}

impl Cleaner {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    fn text(&mut self, field: &str, value: &Option<String>, max_chars: Option<usize>) -> Option<String> {
        let trimmed = value.as_deref().map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            self.error(field, REQUIRED);
            return None;
        }
        if let Some(max) = max_chars {
            let count = trimmed.chars().count();
            if count > max {
                self.error(
                    field,
                    format!("Ensure this value has at most {max} characters (it has {count})."),
                );
                return None;
            }
        }
        Some(trimmed.to_string())
    }

    fn optional_text(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn date(&mut self, field: &str, value: &Option<String>) -> Option<NaiveDate> {
        match self.optional_date(field, value) {
            Some(Some(date)) => Some(date),
            Some(None) => {
                self.error(field, REQUIRED);
                None
            }
            None => None,
        }
    }

    /// `Some(None)` means blank, outer `None` means invalid.
    fn optional_date(&mut self, field: &str, value: &Option<String>) -> Option<Option<NaiveDate>> {
        let Some(raw) = Self::optional_text(value) else {
            return Some(None);
        };
        let parsed = DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(&raw, format).ok());
        if parsed.is_none() {
            self.error(field, INVALID_DATE);
            return None;
        }
        Some(parsed)
    }

    fn choice<T: FromStr>(&mut self, field: &str, value: &Option<String>) -> Option<T> {
        let raw = value.as_deref().unwrap_or_default();
        if raw.trim().is_empty() {
            self.error(field, REQUIRED);
            return None;
        }
        match raw.parse::<T>() {
            Ok(choice) => Some(choice),
            Err(_) => {
                self.error(field, invalid_choice(raw));
                None
            }
        }
    }

    fn priority(&mut self, value: &Option<serde_json::Value>) -> Option<Priority> {
        let raw = match value {
            None | Some(serde_json::Value::Null) => {
                self.error("priority", REQUIRED);
                return None;
            }
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
                self.error("priority", REQUIRED);
                return None;
            }
            Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(_) => None,
        };
        match raw.map(Priority::try_from) {
            Some(Ok(priority)) => Some(priority),
            _ => {
                let shown = match value {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                self.error("priority", invalid_choice(shown));
                None
            }
        }
    }

    /// JSON fields accept any non-null value; a string is parsed as JSON text.
    fn json(&mut self, field: &str, value: &Option<serde_json::Value>) -> Option<serde_json::Value> {
        match value {
            None | Some(serde_json::Value::Null) => {
                self.error(field, REQUIRED);
                None
            }
            Some(serde_json::Value::String(text)) if text.trim().is_empty() => {
                self.error(field, REQUIRED);
                None
            }
            Some(serde_json::Value::String(text)) => match serde_json::from_str(text) {
                Ok(serde_json::Value::Null) => {
                    self.error(field, REQUIRED);
                    None
                }
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    self.error(field, INVALID_JSON);
                    None
                }
            },
            Some(other) => Some(other.clone()),
        }
    }
}

/// Field-level validation only; relation existence and uniqueness need the
/// store and are checked by the caller.
pub fn clean_control_form(form: &ControlForm) -> Result<ControlInput, FieldErrors> {
    let mut c = Cleaner::default();

    let name = c.text("name", &form.name, Some(255));
    let control_short_number = c.text("control_short_number", &form.control_short_number, Some(50));
    let description = c.text("description", &form.description, None);
    let tags = c.json("tags", &form.tags);
    let status = c.choice::<Status>("status", &form.status);
    let priority = c.priority(&form.priority);
    let project_timeline_start = c.date("project_timeline_start", &form.project_timeline_start);
    let project_timeline_end = c.date("project_timeline_end", &form.project_timeline_end);
    let responsible_team = c.text("responsible_team", &form.responsible_team, Some(255));
    let exception_for = Cleaner::optional_text(&form.exception_for);
    let exception_duration_start =
        c.optional_date("exception_duration_start", &form.exception_duration_start);
    let exception_duration_end =
        c.optional_date("exception_duration_end", &form.exception_duration_end);
    let csf_function = c.choice::<CsfFunction>("csf_function", &form.csf_function);
    let csf_category = c.text("csf_category", &form.csf_category, Some(50));
    let responsible = c.choice::<NiceRole>("responsible", &form.responsible);
    let accountable = c.choice::<NiceRole>("accountable", &form.accountable);
    let consulted = c.choice::<NiceRole>("consulted", &form.consulted);
    let informed = c.choice::<NiceRole>("informed", &form.informed);
    let visibility = c.text("visibility", &form.visibility, Some(255));
    let alerting = c.text("alerting", &form.alerting, Some(255));
    let detection = c.choice::<Detection>("detection", &form.detection);
    let telemetry = c.text("telemetry", &form.telemetry, Some(255));
    let signals = c.choice::<Signals>("signals", &form.signals);
    let components = c.json("components", &form.components);
    let span = c.choice::<Span>("span", &form.span);
    let metric = c.choice::<Metric>("metric", &form.metric);
    let report = c.text("report", &form.report, None);
    let discussion = c.text("discussion", &form.discussion, None);

    let assembled = (move || {
        Some(ControlFields {
            name: name?,
            control_short_number: control_short_number?,
            description: description?,
            tags: tags?,
            status: status?,
            priority: priority?,
            selected: form.selected.unwrap_or(false),
            project_timeline_start: project_timeline_start?,
            project_timeline_end: project_timeline_end?,
            responsible_team: responsible_team?,
            exception_required: form.exception_required.unwrap_or(false),
            exception_for,
            exception_duration_start: exception_duration_start?,
            exception_duration_end: exception_duration_end?,
            csf_function: csf_function?,
            csf_category: csf_category?,
            responsible: responsible?,
            accountable: accountable?,
            consulted: consulted?,
            informed: informed?,
            visibility: visibility?,
            alerting: alerting?,
            detection: detection?,
            telemetry: telemetry?,
            signals: signals?,
            components: components?,
            span: span?,
            metric: metric?,
            report: report?,
            discussion: discussion?,
        })
    })();

    let fields = match assembled {
        Some(fields) if c.errors.is_empty() => fields,
        _ => return Err(c.errors),
    };

    Ok(ControlInput {
        fields,
        team_members: dedup(form.team_members.iter().copied().map(UserId)),
        related_controls: dedup(form.related_controls.iter().copied().map(ControlId)),
    })
}

pub(crate) fn dedup<T: Ord>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut values: Vec<T> = values.collect();
    values.sort();
    values.dedup();
    values
}

/// Adds an invalid-choice message for every submitted id absent from `known`.
pub fn report_unknown_ids<T: PartialEq + Copy>(
    errors: &mut FieldErrors,
    field: &str,
    submitted: &[T],
    known: &[T],
    raw: impl Fn(T) -> i64,
) {
    for id in submitted {
        if !known.contains(id) {
            errors
                .entry(field.to_string())
                .or_default()
                .push(invalid_choice(raw(*id)));
        }
    }
}

pub fn initial_from_record(record: &ControlRecord) -> ControlForm {
    let f = &record.control.fields;
    let date = |d: NaiveDate| d.format("%Y-%m-%d").to_string();
    ControlForm {
        name: Some(f.name.clone()),
        control_short_number: Some(f.control_short_number.clone()),
        description: Some(f.description.clone()),
        tags: Some(f.tags.clone()),
        status: Some(f.status.to_string()),
        priority: Some(serde_json::Value::from(f.priority.value())),
        selected: Some(f.selected),
        project_timeline_start: Some(date(f.project_timeline_start)),
        project_timeline_end: Some(date(f.project_timeline_end)),
        responsible_team: Some(f.responsible_team.clone()),
        team_members: record.team_members.iter().map(|m| m.user_id.0).collect(),
        exception_required: Some(f.exception_required),
        exception_for: f.exception_for.clone(),
        exception_duration_start: f.exception_duration_start.map(date),
        exception_duration_end: f.exception_duration_end.map(date),
        csf_function: Some(f.csf_function.to_string()),
        csf_category: Some(f.csf_category.clone()),
        responsible: Some(f.responsible.to_string()),
        accountable: Some(f.accountable.to_string()),
        consulted: Some(f.consulted.to_string()),
        informed: Some(f.informed.to_string()),
        visibility: Some(f.visibility.clone()),
        alerting: Some(f.alerting.clone()),
        detection: Some(f.detection.to_string()),
        telemetry: Some(f.telemetry.clone()),
        signals: Some(f.signals.to_string()),
        components: Some(f.components.clone()),
        span: Some(f.span.to_string()),
        metric: Some(f.metric.to_string()),
        report: Some(f.report.clone()),
        discussion: Some(f.discussion.clone()),
        related_controls: record
            .related_controls
            .iter()
            .map(|r| r.control_id.0)
            .collect(),
    }
}

fn text_choice_list<T: Copy + fmt::Display>(all: &[T]) -> Vec<Choice> {
    all.iter()
        .map(|choice| Choice {
            value: serde_json::Value::String(choice.to_string()),
            label: choice.to_string(),
        })
        .collect()
}

pub fn choice_sets(users: &[UserSummary], controls: &[StoredRelatedControl]) -> ChoiceSets {
    ChoiceSets {
        status: text_choice_list(Status::ALL),
        priority: Priority::ALL
            .iter()
            .map(|p| Choice {
                value: serde_json::Value::from(p.value()),
                label: p.label().to_string(),
            })
            .collect(),
        csf_function: text_choice_list(CsfFunction::ALL),
        nice_role: text_choice_list(NiceRole::ALL),
        detection: text_choice_list(Detection::ALL),
        signals: text_choice_list(Signals::ALL),
        span: text_choice_list(Span::ALL),
        metric: text_choice_list(Metric::ALL),
        team_members: users
            .iter()
            .map(|u| Choice {
                value: serde_json::Value::from(u.user_id.0),
                label: u.username.clone(),
            })
            .collect(),
        related_controls: controls
            .iter()
            .map(|c| Choice {
                value: serde_json::Value::from(c.control_id.0),
                label: c.label(),
            })
            .collect(),
    }
}

#[cfg(test)]
#[path = "tests/forms_tests.rs"]
pub(crate) mod tests;
