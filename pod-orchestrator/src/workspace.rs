use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum WorkspaceStatus {
    Active,
    Inactive,
    Deleted,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Active => "ACTIVE",
            WorkspaceStatus::Inactive => "INACTIVE",
            WorkspaceStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(WorkspaceStatus::Active),
            "INACTIVE" => Ok(WorkspaceStatus::Inactive),
            "DELETED" => Ok(WorkspaceStatus::Deleted),
            other => Err(OrchestratorError::InvalidInput(format!(
                "Invalid status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// What the workspace list endpoint returns per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub id: String,
    pub name: String,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Workspace> for WorkspaceSummary {
    fn from(ws: &Workspace) -> Self {
        Self {
            id: ws.id.clone(),
            name: ws.name.clone(),
            status: ws.status,
            created_at: ws.created_at,
        }
    }
}

/// Normalize a user-supplied display name.
///
/// The name doubles as the remote sync key segment, so separators and
/// control characters are refused.
pub fn validate_workspace_name(name: &str) -> Result<String> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "Workspace name is required".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(OrchestratorError::InvalidInput(format!(
            "Workspace name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(OrchestratorError::InvalidInput(format!(
            "Invalid workspace name: {}",
            trimmed
        )));
    }
    if trimmed
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(OrchestratorError::InvalidInput(format!(
            "Workspace name contains invalid characters: {:?}",
            trimmed
        )));
    }

    Ok(trimmed.to_string())
}

/// SQLite-backed workspace records.
#[derive(Clone)]
pub struct WorkspaceStore {
    pool: SqlitePool,
}

impl WorkspaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new ACTIVE record.
    pub async fn insert(&self, owner: &str, name: &str) -> Result<Workspace> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO workspaces (id, name, owner, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(owner)
        .bind(WorkspaceStatus::Active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                OrchestratorError::DuplicateName(name.to_string())
            }
            _ => OrchestratorError::Database(e),
        })?;

        self.get(&id).await
    }

    async fn get(&self, id: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        Ok(row.into())
    }

    /// Non-deleted record with this (owner, name), if any.
    pub async fn find_active_by_name(&self, owner: &str, name: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces WHERE owner = ? AND name = ? AND deleted_at IS NULL",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// All non-deleted records for an owner, newest first.
    pub async fn list_for_owner(&self, owner: &str) -> Result<Vec<Workspace>> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces
             WHERE owner = ? AND deleted_at IS NULL AND status != 'DELETED'
             ORDER BY created_at DESC, name ASC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// A non-deleted record owned by `owner`. Records of other owners are
    /// reported as missing.
    pub async fn get_for_owner(&self, owner: &str, id: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces
             WHERE id = ? AND owner = ? AND deleted_at IS NULL AND status != 'DELETED'",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        Ok(row.into())
    }

    pub async fn set_status(&self, id: &str, status: WorkspaceStatus) -> Result<()> {
        let now = Utc::now().timestamp();

        let result = sqlx::query("UPDATE workspaces SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        Ok(())
    }

    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE workspaces SET status = ?, updated_at = ?, deleted_at = ?
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(WorkspaceStatus::Deleted)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    name: String,
    owner: String,
    status: WorkspaceStatus,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

fn from_timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            owner: row.owner,
            status: row.status,
            created_at: from_timestamp(row.created_at),
            updated_at: from_timestamp(row.updated_at),
            deleted_at: row.deleted_at.map(from_timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[tokio::test]
    async fn test_insert_and_list() {
        let store = WorkspaceStore::new(create_test_db().await);

        let ws = store.insert("bob", "my-app").await.unwrap();
        assert_eq!(ws.status, WorkspaceStatus::Active);
        assert_eq!(ws.owner, "bob");
        assert!(ws.deleted_at.is_none());

        store.insert("alice", "other").await.unwrap();

        let listed = store.list_for_owner("bob").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ws.id);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_until_deleted() {
        let store = WorkspaceStore::new(create_test_db().await);

        let ws = store.insert("bob", "my-app").await.unwrap();
        match store.insert("bob", "my-app").await {
            Err(OrchestratorError::DuplicateName(name)) => assert_eq!(name, "my-app"),
            other => panic!("expected DuplicateName, got {other:?}"),
        }

        // Another owner may reuse the name
        store.insert("alice", "my-app").await.unwrap();

        store.soft_delete(&ws.id).await.unwrap();
        store.insert("bob", "my-app").await.unwrap();
    }

    #[tokio::test]
    async fn test_soft_deleted_records_are_hidden() {
        let store = WorkspaceStore::new(create_test_db().await);

        let ws = store.insert("bob", "my-app").await.unwrap();
        store.soft_delete(&ws.id).await.unwrap();

        assert!(store.list_for_owner("bob").await.unwrap().is_empty());
        assert!(matches!(
            store.get_for_owner("bob", &ws.id).await,
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(store
            .find_active_by_name("bob", "my-app")
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            store.soft_delete(&ws.id).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_for_owner_scopes_by_owner() {
        let store = WorkspaceStore::new(create_test_db().await);
        let ws = store.insert("bob", "my-app").await.unwrap();

        assert!(store.get_for_owner("bob", &ws.id).await.is_ok());
        assert!(matches!(
            store.get_for_owner("alice", &ws.id).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_status() {
        let store = WorkspaceStore::new(create_test_db().await);
        let ws = store.insert("bob", "my-app").await.unwrap();

        store
            .set_status(&ws.id, WorkspaceStatus::Inactive)
            .await
            .unwrap();
        let updated = store.get_for_owner("bob", &ws.id).await.unwrap();
        assert_eq!(updated.status, WorkspaceStatus::Inactive);

        assert!(matches!(
            store.set_status("missing", WorkspaceStatus::Active).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[test]
    fn test_validate_workspace_name() {
        assert_eq!(validate_workspace_name("  my app ").unwrap(), "my app");

        for bad in ["", "   ", ".", "..", "a/b", "a\\b", "tab\there"] {
            assert!(
                validate_workspace_name(bad).is_err(),
                "expected {bad:?} to be rejected"
            );
        }
        assert!(validate_workspace_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "INACTIVE".parse::<WorkspaceStatus>().unwrap(),
            WorkspaceStatus::Inactive
        );
        assert!("paused".parse::<WorkspaceStatus>().is_err());
        assert_eq!(
            serde_json::to_value(WorkspaceStatus::Active).unwrap(),
            serde_json::json!("ACTIVE")
        );
    }
}
