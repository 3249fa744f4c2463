use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    query::Query,
    sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite, SqliteConnection, Transaction,
};

use shared::domain::{
    ControlFields, ControlId, FileId, Priority, SubitemId, UserId, UserSummary,
    ACTIVE_STATUS_VALUES, DRAFT_STATUS_VALUES,
};

mod error;
pub mod media;

pub use error::{StorageError, StorageResult};

/// Writable control columns, in bind order.
const CONTROL_COLUMNS: &[&str] = &[
    "name",
    "control_short_number",
    "description",
    "tags",
    "status",
    "priority",
    "selected",
    "last_updated",
    "project_timeline_start",
    "project_timeline_end",
    "responsible_team",
    "exception_required",
    "exception_for",
    "exception_duration_start",
    "exception_duration_end",
    "csf_function",
    "csf_category",
    "responsible",
    "accountable",
    "consulted",
    "informed",
    "visibility",
    "alerting",
    "detection",
    "telemetry",
    "signals",
    "components",
    "span",
    "metric",
    "report",
    "discussion",
];

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Everything needed to write a control, relations included.
#[derive(Debug, Clone)]
pub struct ControlInput {
    pub fields: ControlFields,
    pub team_members: Vec<UserId>,
    pub related_controls: Vec<ControlId>,
}

#[derive(Debug, Clone)]
pub struct StoredControl {
    pub control_id: ControlId,
    pub fields: ControlFields,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRelatedControl {
    pub control_id: ControlId,
    pub control_short_number: String,
    pub name: String,
}

impl StoredRelatedControl {
    pub fn label(&self) -> String {
        format!("{} - {}", self.control_short_number, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredControlFile {
    pub file_id: FileId,
    pub control_id: ControlId,
    pub path: String,
    pub filename: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSubitem {
    pub subitem_id: SubitemId,
    pub control_id: ControlId,
    pub subitem: serde_json::Value,
}

/// A control with its team members, outgoing related controls and files
/// already loaded.
#[derive(Debug, Clone)]
pub struct ControlRecord {
    pub control: StoredControl,
    pub team_members: Vec<UserSummary>,
    pub related_controls: Vec<StoredRelatedControl>,
    pub files: Vec<StoredControlFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildCounts {
    pub subitems: u64,
    pub files: u64,
}

#[derive(Debug, Clone, Copy)]
enum ControlScope {
    All,
    One(ControlId),
    Statuses(&'static [&'static str]),
}

impl ControlScope {
    fn push_filter(self, query: &mut QueryBuilder<'_, Sqlite>, id_column: &str) {
        match self {
            ControlScope::All => {}
            ControlScope::One(control_id) => {
                query
                    .push(" WHERE ")
                    .push(id_column)
                    .push(" = ")
                    .push_bind(control_id.0);
            }
            ControlScope::Statuses(statuses) => {
                query
                    .push(" WHERE ")
                    .push(id_column)
                    .push(" IN (SELECT id FROM controls WHERE status IN (");
                let mut values = query.separated(", ");
                for status in statuses {
                    values.push_bind(*status);
                }
                values.push_unseparated("))");
            }
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to apply migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> StorageResult<UserId> {
        let rec = sqlx::query("INSERT INTO users (username) VALUES (?) RETURNING id")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                StorageError::from_write(e, || {
                    StorageError::DuplicateUsername(username.to_string())
                })
            })?;
        Ok(UserId(rec.try_get::<i64, _>(0)?))
    }

    pub async fn list_users(&self) -> StorageResult<Vec<UserSummary>> {
        let rows = sqlx::query("SELECT id, username FROM users ORDER BY lower(username) ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> StorageResult<UserSummary> {
                Ok(UserSummary {
                    user_id: UserId(r.try_get::<i64, _>(0)?),
                    username: r.try_get::<String, _>(1)?,
                })
            })
            .collect()
    }

    /// Returns the subset of `user_ids` that exist.
    pub async fn existing_user_ids(&self, user_ids: &[UserId]) -> StorageResult<Vec<UserId>> {
        let ids: Vec<i64> = user_ids.iter().map(|id| id.0).collect();
        Ok(self
            .existing_ids("users", &ids)
            .await?
            .into_iter()
            .map(UserId)
            .collect())
    }

    /// Returns the subset of `control_ids` that exist.
    pub async fn existing_control_ids(
        &self,
        control_ids: &[ControlId],
    ) -> StorageResult<Vec<ControlId>> {
        let ids: Vec<i64> = control_ids.iter().map(|id| id.0).collect();
        Ok(self
            .existing_ids("controls", &ids)
            .await?
            .into_iter()
            .map(ControlId)
            .collect())
    }

    /// True when another control already uses `short_number`. `exclude` is
    /// the control being edited, which may keep its own number.
    pub async fn short_number_in_use(
        &self,
        short_number: &str,
        exclude: Option<ControlId>,
    ) -> StorageResult<bool> {
        let taken: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM controls WHERE control_short_number = ? AND (? IS NULL OR id != ?) LIMIT 1",
        )
        .bind(short_number)
        .bind(exclude.map(|id| id.0))
        .bind(exclude.map(|id| id.0))
        .fetch_optional(&self.pool)
        .await?;
        Ok(taken.is_some())
    }

    async fn existing_ids(&self, table: &'static str, ids: &[i64]) -> StorageResult<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT id FROM {table} WHERE id IN ("));
        let mut values = query.separated(", ");
        for id in ids {
            values.push_bind(*id);
        }
        values.push_unseparated(")");
        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>(0).map_err(StorageError::from))
            .collect()
    }

    pub async fn create_control(&self, input: &ControlInput) -> StorageResult<ControlId> {
        let sql = format!(
            "INSERT INTO controls ({}) VALUES ({}) RETURNING id",
            CONTROL_COLUMNS.join(", "),
            vec!["?"; CONTROL_COLUMNS.len()].join(", ")
        );
        let tags = serde_json::to_string(&input.fields.tags)?;
        let components = serde_json::to_string(&input.fields.components)?;

        let mut tx = self.pool.begin().await?;
        let rec = bind_control_fields(sqlx::query(&sql), &input.fields, tags, components)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| duplicate_short_number(e, &input.fields))?;
        let control_id = ControlId(rec.try_get::<i64, _>(0)?);
        replace_relations(&mut tx, control_id, input).await?;
        tx.commit().await?;
        Ok(control_id)
    }

    /// Overwrites every scalar column and both relation sets. Returns false
    /// when no control has this id.
    pub async fn update_control(
        &self,
        control_id: ControlId,
        input: &ControlInput,
    ) -> StorageResult<bool> {
        let assignments: Vec<String> = CONTROL_COLUMNS
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect();
        let sql = format!(
            "UPDATE controls SET {} WHERE id = ?",
            assignments.join(", ")
        );
        let tags = serde_json::to_string(&input.fields.tags)?;
        let components = serde_json::to_string(&input.fields.components)?;

        let mut tx = self.pool.begin().await?;
        let result = bind_control_fields(sqlx::query(&sql), &input.fields, tags, components)
            .bind(control_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| duplicate_short_number(e, &input.fields))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        replace_relations(&mut tx, control_id, input).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Deletes a control; subitems, files and link rows cascade. Returns the
    /// file rows that were removed so their blobs can be cleaned up.
    pub async fn delete_control(
        &self,
        control_id: ControlId,
    ) -> StorageResult<Option<Vec<StoredControlFile>>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT id, control_id, path, filename, size_bytes, uploaded_at
             FROM control_files WHERE control_id = ? ORDER BY id",
        )
        .bind(control_id.0)
        .fetch_all(&mut *tx)
        .await?;
        let files = rows
            .iter()
            .map(decode_file)
            .collect::<StorageResult<Vec<_>>>()?;

        let result = sqlx::query("DELETE FROM controls WHERE id = ?")
            .bind(control_id.0)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(files))
    }

    pub async fn get_control(&self, control_id: ControlId) -> StorageResult<Option<ControlRecord>> {
        Ok(self
            .load_records(ControlScope::One(control_id))
            .await?
            .into_iter()
            .next())
    }

    pub async fn list_controls(&self) -> StorageResult<Vec<ControlRecord>> {
        self.load_records(ControlScope::All).await
    }

    pub async fn active_controls(&self) -> StorageResult<Vec<ControlRecord>> {
        self.load_records(ControlScope::Statuses(ACTIVE_STATUS_VALUES))
            .await
    }

    pub async fn draft_controls(&self) -> StorageResult<Vec<ControlRecord>> {
        self.load_records(ControlScope::Statuses(DRAFT_STATUS_VALUES))
            .await
    }

    /// Short number and name of every control, for choice lists.
    pub async fn list_control_labels(&self) -> StorageResult<Vec<StoredRelatedControl>> {
        let rows = sqlx::query(
            "SELECT id, control_short_number, name FROM controls ORDER BY control_short_number",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> StorageResult<StoredRelatedControl> {
                Ok(StoredRelatedControl {
                    control_id: ControlId(r.try_get::<i64, _>(0)?),
                    control_short_number: r.try_get::<String, _>(1)?,
                    name: r.try_get::<String, _>(2)?,
                })
            })
            .collect()
    }

    pub async fn count_children(&self, control_id: ControlId) -> StorageResult<ChildCounts> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM control_subitems WHERE control_id = ?1),
                (SELECT COUNT(*) FROM control_files WHERE control_id = ?1)",
        )
        .bind(control_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(ChildCounts {
            subitems: row.try_get::<i64, _>(0)?.max(0) as u64,
            files: row.try_get::<i64, _>(1)?.max(0) as u64,
        })
    }

    async fn load_records(&self, scope: ControlScope) -> StorageResult<Vec<ControlRecord>> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT id, {} FROM controls", CONTROL_COLUMNS.join(", ")));
        scope.push_filter(&mut query, "id");
        query.push(" ORDER BY id");
        let rows = query.build().fetch_all(&self.pool).await?;
        let controls = rows
            .iter()
            .map(decode_control)
            .collect::<StorageResult<Vec<_>>>()?;
        if controls.is_empty() {
            return Ok(Vec::new());
        }

        let mut team_members = self.prefetch_team_members(scope).await?;
        let mut related_controls = self.prefetch_related_controls(scope).await?;
        let mut files = self.prefetch_files(scope).await?;

        Ok(controls
            .into_iter()
            .map(|control| {
                let id = control.control_id;
                ControlRecord {
                    control,
                    team_members: team_members.remove(&id).unwrap_or_default(),
                    related_controls: related_controls.remove(&id).unwrap_or_default(),
                    files: files.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn prefetch_team_members(
        &self,
        scope: ControlScope,
    ) -> StorageResult<HashMap<ControlId, Vec<UserSummary>>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT m.control_id, u.id, u.username
             FROM control_team_members m
             INNER JOIN users u ON u.id = m.user_id",
        );
        scope.push_filter(&mut query, "m.control_id");
        query.push(" ORDER BY lower(u.username) ASC");
        let rows = query.build().fetch_all(&self.pool).await?;

        let mut grouped: HashMap<ControlId, Vec<UserSummary>> = HashMap::new();
        for r in rows {
            grouped
                .entry(ControlId(r.try_get::<i64, _>(0)?))
                .or_default()
                .push(UserSummary {
                    user_id: UserId(r.try_get::<i64, _>(1)?),
                    username: r.try_get::<String, _>(2)?,
                });
        }
        Ok(grouped)
    }

    async fn prefetch_related_controls(
        &self,
        scope: ControlScope,
    ) -> StorageResult<HashMap<ControlId, Vec<StoredRelatedControl>>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT r.from_control_id, c.id, c.control_short_number, c.name
             FROM control_related_controls r
             INNER JOIN controls c ON c.id = r.to_control_id",
        );
        scope.push_filter(&mut query, "r.from_control_id");
        query.push(" ORDER BY c.control_short_number ASC");
        let rows = query.build().fetch_all(&self.pool).await?;

        let mut grouped: HashMap<ControlId, Vec<StoredRelatedControl>> = HashMap::new();
        for r in rows {
            grouped
                .entry(ControlId(r.try_get::<i64, _>(0)?))
                .or_default()
                .push(StoredRelatedControl {
                    control_id: ControlId(r.try_get::<i64, _>(1)?),
                    control_short_number: r.try_get::<String, _>(2)?,
                    name: r.try_get::<String, _>(3)?,
                });
        }
        Ok(grouped)
    }

    async fn prefetch_files(
        &self,
        scope: ControlScope,
    ) -> StorageResult<HashMap<ControlId, Vec<StoredControlFile>>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, control_id, path, filename, size_bytes, uploaded_at FROM control_files",
        );
        scope.push_filter(&mut query, "control_id");
        query.push(" ORDER BY id ASC");
        let rows = query.build().fetch_all(&self.pool).await?;

        let mut grouped: HashMap<ControlId, Vec<StoredControlFile>> = HashMap::new();
        for r in &rows {
            let file = decode_file(r)?;
            grouped.entry(file.control_id).or_default().push(file);
        }
        Ok(grouped)
    }

    pub async fn add_subitem(
        &self,
        control_id: ControlId,
        subitem: &serde_json::Value,
    ) -> StorageResult<SubitemId> {
        let rec = sqlx::query(
            "INSERT INTO control_subitems (control_id, subitem) VALUES (?, ?) RETURNING id",
        )
        .bind(control_id.0)
        .bind(serde_json::to_string(subitem)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::from_write(e, || StorageError::MissingReference))?;
        Ok(SubitemId(rec.try_get::<i64, _>(0)?))
    }

    pub async fn list_subitems(&self, control_id: ControlId) -> StorageResult<Vec<StoredSubitem>> {
        let rows = sqlx::query(
            "SELECT id, control_id, subitem FROM control_subitems WHERE control_id = ? ORDER BY id",
        )
        .bind(control_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> StorageResult<StoredSubitem> {
                Ok(StoredSubitem {
                    subitem_id: SubitemId(r.try_get::<i64, _>(0)?),
                    control_id: ControlId(r.try_get::<i64, _>(1)?),
                    subitem: serde_json::from_str(&r.try_get::<String, _>(2)?)?,
                })
            })
            .collect()
    }

    pub async fn delete_subitem(
        &self,
        control_id: ControlId,
        subitem_id: SubitemId,
    ) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM control_subitems WHERE id = ? AND control_id = ?")
            .bind(subitem_id.0)
            .bind(control_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_control_file(
        &self,
        control_id: ControlId,
        path: &str,
        filename: &str,
        size_bytes: u64,
    ) -> StorageResult<StoredControlFile> {
        let uploaded_at = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO control_files (control_id, path, filename, size_bytes, uploaded_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(control_id.0)
        .bind(path)
        .bind(filename)
        .bind(i64::try_from(size_bytes).unwrap_or(i64::MAX))
        .bind(uploaded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::from_write(e, || StorageError::MissingReference))?;
        Ok(StoredControlFile {
            file_id: FileId(rec.try_get::<i64, _>(0)?),
            control_id,
            path: path.to_string(),
            filename: filename.to_string(),
            size_bytes,
            uploaded_at,
        })
    }

    pub async fn load_control_file(
        &self,
        control_id: ControlId,
        file_id: FileId,
    ) -> StorageResult<Option<StoredControlFile>> {
        let row = sqlx::query(
            "SELECT id, control_id, path, filename, size_bytes, uploaded_at
             FROM control_files WHERE id = ? AND control_id = ?",
        )
        .bind(file_id.0)
        .bind(control_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_file).transpose()
    }

    pub async fn delete_control_file(
        &self,
        control_id: ControlId,
        file_id: FileId,
    ) -> StorageResult<Option<StoredControlFile>> {
        let row = sqlx::query(
            "DELETE FROM control_files WHERE id = ? AND control_id = ?
             RETURNING id, control_id, path, filename, size_bytes, uploaded_at",
        )
        .bind(file_id.0)
        .bind(control_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_file).transpose()
    }
}

fn duplicate_short_number(error: sqlx::Error, fields: &ControlFields) -> StorageError {
    StorageError::from_write(error, || {
        StorageError::DuplicateShortNumber(fields.control_short_number.clone())
    })
}

fn bind_control_fields<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    fields: &'q ControlFields,
    tags: String,
    components: String,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(fields.name.as_str())
        .bind(fields.control_short_number.as_str())
        .bind(fields.description.as_str())
        .bind(tags)
        .bind(fields.status.as_str())
        .bind(fields.priority.value())
        .bind(fields.selected)
        .bind(Utc::now())
        .bind(fields.project_timeline_start)
        .bind(fields.project_timeline_end)
        .bind(fields.responsible_team.as_str())
        .bind(fields.exception_required)
        .bind(fields.exception_for.as_deref())
        .bind(fields.exception_duration_start)
        .bind(fields.exception_duration_end)
        .bind(fields.csf_function.as_str())
        .bind(fields.csf_category.as_str())
        .bind(fields.responsible.as_str())
        .bind(fields.accountable.as_str())
        .bind(fields.consulted.as_str())
        .bind(fields.informed.as_str())
        .bind(fields.visibility.as_str())
        .bind(fields.alerting.as_str())
        .bind(fields.detection.as_str())
        .bind(fields.telemetry.as_str())
        .bind(fields.signals.as_str())
        .bind(components)
        .bind(fields.span.as_str())
        .bind(fields.metric.as_str())
        .bind(fields.report.as_str())
        .bind(fields.discussion.as_str())
}

async fn replace_relations(
    tx: &mut Transaction<'_, Sqlite>,
    control_id: ControlId,
    input: &ControlInput,
) -> StorageResult<()> {
    let conn: &mut SqliteConnection = tx;
    sqlx::query("DELETE FROM control_team_members WHERE control_id = ?")
        .bind(control_id.0)
        .execute(&mut *conn)
        .await?;
    for user_id in &input.team_members {
        sqlx::query(
            "INSERT OR IGNORE INTO control_team_members (control_id, user_id) VALUES (?, ?)",
        )
        .bind(control_id.0)
        .bind(user_id.0)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::from_write(e, || StorageError::MissingReference))?;
    }

    sqlx::query("DELETE FROM control_related_controls WHERE from_control_id = ?")
        .bind(control_id.0)
        .execute(&mut *conn)
        .await?;
    for related_id in &input.related_controls {
        sqlx::query(
            "INSERT OR IGNORE INTO control_related_controls (from_control_id, to_control_id)
             VALUES (?, ?)",
        )
        .bind(control_id.0)
        .bind(related_id.0)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::from_write(e, || StorageError::MissingReference))?;
    }
    Ok(())
}

fn choice<T: FromStr>(row: &SqliteRow, column: &'static str) -> StorageResult<T> {
    let raw: String = row.try_get(column)?;
    match raw.parse::<T>() {
        Ok(value) => Ok(value),
        Err(_) => Err(StorageError::InvalidColumn { column, value: raw }),
    }
}

fn json_column(row: &SqliteRow, column: &'static str) -> StorageResult<serde_json::Value> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn decode_control(row: &SqliteRow) -> StorageResult<StoredControl> {
    let raw_priority: i64 = row.try_get("priority")?;
    let priority = Priority::try_from(raw_priority).map_err(|_| StorageError::InvalidColumn {
        column: "priority",
        value: raw_priority.to_string(),
    })?;

    Ok(StoredControl {
        control_id: ControlId(row.try_get::<i64, _>("id")?),
        last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
        fields: ControlFields {
            name: row.try_get("name")?,
            control_short_number: row.try_get("control_short_number")?,
            description: row.try_get("description")?,
            tags: json_column(row, "tags")?,
            status: choice(row, "status")?,
            priority,
            selected: row.try_get("selected")?,
            project_timeline_start: row.try_get("project_timeline_start")?,
            project_timeline_end: row.try_get("project_timeline_end")?,
            responsible_team: row.try_get("responsible_team")?,
            exception_required: row.try_get("exception_required")?,
            exception_for: row.try_get("exception_for")?,
            exception_duration_start: row.try_get("exception_duration_start")?,
            exception_duration_end: row.try_get("exception_duration_end")?,
            csf_function: choice(row, "csf_function")?,
            csf_category: row.try_get("csf_category")?,
            responsible: choice(row, "responsible")?,
            accountable: choice(row, "accountable")?,
            consulted: choice(row, "consulted")?,
            informed: choice(row, "informed")?,
            visibility: row.try_get("visibility")?,
            alerting: row.try_get("alerting")?,
            detection: choice(row, "detection")?,
            telemetry: row.try_get("telemetry")?,
            signals: choice(row, "signals")?,
            components: json_column(row, "components")?,
            span: choice(row, "span")?,
            metric: choice(row, "metric")?,
            report: row.try_get("report")?,
            discussion: row.try_get("discussion")?,
        },
    })
}

fn decode_file(row: &SqliteRow) -> StorageResult<StoredControlFile> {
    Ok(StoredControlFile {
        file_id: FileId(row.try_get::<i64, _>(0)?),
        control_id: ControlId(row.try_get::<i64, _>(1)?),
        path: row.try_get::<String, _>(2)?,
        filename: row.try_get::<String, _>(3)?,
        size_bytes: row.try_get::<i64, _>(4)?.max(0) as u64,
        uploaded_at: row.try_get::<DateTime<Utc>, _>(5)?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
