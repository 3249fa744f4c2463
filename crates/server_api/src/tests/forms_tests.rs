use super::*;

pub(crate) fn valid_form(short_number: &str) -> ControlForm {
    ControlForm {
        name: Some("Asset inventory".into()),
        control_short_number: Some(short_number.into()),
        description: Some("Keep an inventory of hardware".into()),
        tags: Some(serde_json::json!(["inventory"])),
        status: Some("Draft".into()),
        priority: Some(serde_json::json!(2)),
        selected: None,
        project_timeline_start: Some("2024-01-01".into()),
        project_timeline_end: Some("2024-12-31".into()),
        responsible_team: Some("IT Ops".into()),
        team_members: Vec::new(),
        exception_required: None,
        exception_for: None,
        exception_duration_start: None,
        exception_duration_end: None,
        csf_function: Some("Identify".into()),
        csf_category: Some("ID.AM".into()),
        responsible: Some("Operate and Maintain".into()),
        accountable: Some("Oversee and Govern".into()),
        consulted: Some("Analyze".into()),
        informed: Some("Investigate".into()),
        visibility: Some("Dashboard".into()),
        alerting: Some("Email".into()),
        detection: Some("Statistical".into()),
        telemetry: Some("Logs".into()),
        signals: Some("Baggage".into()),
        components: Some(serde_json::json!(["Data"])),
        span: Some("Unset".into()),
        metric: Some("Measure".into()),
        report: Some("Quarterly".into()),
        discussion: Some("Initial draft".into()),
        related_controls: Vec::new(),
    }
}

#[test]
fn valid_form_cleans_into_typed_fields() {
    let input = clean_control_form(&valid_form("ID-1")).expect("valid");
    assert_eq!(input.fields.status, Status::Draft);
    assert_eq!(input.fields.priority, Priority::Medium);
    assert_eq!(input.fields.csf_function, CsfFunction::Identify);
    assert_eq!(
        input.fields.project_timeline_end,
        NaiveDate::from_ymd_opt(2024, 12, 31).expect("date")
    );
    assert!(!input.fields.selected);
    assert_eq!(input.fields.exception_for, None);
}

#[test]
fn empty_form_reports_every_required_field() {
    let errors = clean_control_form(&ControlForm::default()).expect_err("invalid");
    for field in [
        "name",
        "control_short_number",
        "description",
        "tags",
        "status",
        "priority",
        "project_timeline_start",
        "project_timeline_end",
        "csf_function",
        "responsible",
        "components",
        "discussion",
    ] {
        assert_eq!(errors.get(field), Some(&vec![REQUIRED.to_string()]), "{field}");
    }
    assert!(!errors.contains_key("exception_for"));
    assert!(!errors.contains_key("exception_duration_start"));
}

#[test]
fn unknown_choices_and_bad_dates_are_reported() {
    let mut form = valid_form("ID-2");
    form.status = Some("Active".into());
    form.priority = Some(serde_json::json!("7"));
    form.project_timeline_start = Some("31/31/2024".into());
    form.exception_duration_end = Some("not a date".into());

    let errors = clean_control_form(&form).expect_err("invalid");
    assert_eq!(errors["status"], vec![invalid_choice("Active")]);
    assert_eq!(errors["priority"], vec![invalid_choice("7")]);
    assert_eq!(errors["project_timeline_start"], vec![INVALID_DATE.to_string()]);
    assert_eq!(errors["exception_duration_end"], vec![INVALID_DATE.to_string()]);
    assert_eq!(errors.len(), 4);
}

#[test]
fn priority_accepts_numeric_strings() {
    let mut form = valid_form("ID-3");
    form.priority = Some(serde_json::json!("1"));
    let input = clean_control_form(&form).expect("valid");
    assert_eq!(input.fields.priority, Priority::High);
}

#[test]
fn length_limits_use_character_counts() {
    let mut form = valid_form(&"S".repeat(51));
    form.name = Some("é".repeat(255));
    let errors = clean_control_form(&form).expect_err("invalid");
    assert_eq!(
        errors["control_short_number"],
        vec!["Ensure this value has at most 50 characters (it has 51).".to_string()]
    );
    assert!(!errors.contains_key("name"));
}

#[test]
fn json_fields_parse_text_and_reject_null() {
    let mut form = valid_form("ID-4");
    form.tags = Some(serde_json::json!("[\"a\", \"b\"]"));
    form.components = Some(serde_json::json!("{not json"));
    let errors = clean_control_form(&form).expect_err("invalid");
    assert_eq!(errors["components"], vec![INVALID_JSON.to_string()]);
    assert!(!errors.contains_key("tags"));

    form.components = Some(serde_json::Value::Null);
    let errors = clean_control_form(&form).expect_err("invalid");
    assert_eq!(errors["components"], vec![REQUIRED.to_string()]);
}

#[test]
fn text_fields_are_trimmed_and_relations_deduplicated() {
    let mut form = valid_form("  ID-5  ");
    form.team_members = vec![3, 1, 3];
    form.related_controls = vec![9, 9];
    let input = clean_control_form(&form).expect("valid");
    assert_eq!(input.fields.control_short_number, "ID-5");
    assert_eq!(input.team_members, vec![UserId(1), UserId(3)]);
    assert_eq!(input.related_controls, vec![ControlId(9)]);
}

#[test]
fn report_unknown_ids_flags_only_missing_values() {
    let mut errors = FieldErrors::new();
    report_unknown_ids(
        &mut errors,
        "team_members",
        &[UserId(1), UserId(2)],
        &[UserId(1)],
        |id| id.0,
    );
    assert_eq!(errors["team_members"], vec![invalid_choice(2)]);
}

#[test]
fn choice_sets_list_every_enumeration() {
    let sets = choice_sets(
        &[UserSummary {
            user_id: UserId(1),
            username: "alice".into(),
        }],
        &[],
    );
    assert_eq!(sets.status.len(), 4);
    assert_eq!(sets.priority[0].value, serde_json::json!(1));
    assert_eq!(sets.priority[0].label, "High");
    assert_eq!(sets.nice_role.len(), 7);
    assert_eq!(sets.team_members[0].label, "alice");
    assert!(sets.related_controls.is_empty());
}
