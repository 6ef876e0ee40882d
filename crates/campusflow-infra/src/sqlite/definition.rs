//! SQLite definition repository implementation.
//!
//! Persists the workflow catalog: workflows, node templates, and mappings.
//! Config blobs are stored as JSON text.

use campusflow_core::repository::definition::DefinitionRepository;
use campusflow_types::error::RepositoryError;
use campusflow_types::workflow::{NodeTemplate, Workflow, WorkflowNodeMapping};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_json, parse_opt_json,
    parse_uuid,
};

/// SQLite-backed implementation of `DefinitionRepository`.
pub struct SqliteDefinitionRepository {
    pool: DatabasePool,
}

impl SqliteDefinitionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    name: String,
    status: String,
    kind: String,
    institute_id: String,
    created_by: String,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            kind: row.try_get("kind")?,
            institute_id: row.try_get("institute_id")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            name: self.name,
            status: enum_from_str(&self.status)?,
            kind: enum_from_str(&self.kind)?,
            institute_id: parse_uuid(&self.institute_id)?,
            created_by: parse_uuid(&self.created_by)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct TemplateRow {
    id: String,
    name: String,
    node_type: String,
    config_version: i64,
    config: String,
    status: String,
}

impl TemplateRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            node_type: row.try_get("node_type")?,
            config_version: row.try_get("config_version")?,
            config: row.try_get("config")?,
            status: row.try_get("status")?,
        })
    }

    fn into_template(self) -> Result<NodeTemplate, RepositoryError> {
        Ok(NodeTemplate {
            id: parse_uuid(&self.id)?,
            name: self.name,
            node_type: self.node_type,
            config_version: self.config_version as u32,
            config: parse_json(&self.config)?,
            status: enum_from_str(&self.status)?,
        })
    }
}

struct MappingRow {
    id: String,
    workflow_id: String,
    node_template_id: String,
    node_order: i32,
    is_start_node: bool,
    is_end_node: bool,
    override_config: Option<String>,
    on_error: String,
}

impl MappingRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            node_template_id: row.try_get("node_template_id")?,
            node_order: row.try_get("node_order")?,
            is_start_node: row.try_get("is_start_node")?,
            is_end_node: row.try_get("is_end_node")?,
            override_config: row.try_get("override_config")?,
            on_error: row.try_get("on_error")?,
        })
    }

    fn into_mapping(self) -> Result<WorkflowNodeMapping, RepositoryError> {
        Ok(WorkflowNodeMapping {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            node_template_id: parse_uuid(&self.node_template_id)?,
            node_order: self.node_order,
            is_start_node: self.is_start_node,
            is_end_node: self.is_end_node,
            override_config: parse_opt_json(self.override_config.as_deref())?,
            on_error: enum_from_str(&self.on_error)?,
        })
    }
}

// ---------------------------------------------------------------------------
// DefinitionRepository impl
// ---------------------------------------------------------------------------

impl DefinitionRepository for SqliteDefinitionRepository {
    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_workflow()?))
            }
            None => Ok(None),
        }
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflows (id, name, status, kind, institute_id, created_by, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 status = excluded.status,
                 kind = excluded.kind,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(enum_to_str(&workflow.status)?)
        .bind(enum_to_str(&workflow.kind)?)
        .bind(workflow.institute_id.to_string())
        .bind(workflow.created_by.to_string())
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_node_template(
        &self,
        id: &Uuid,
    ) -> Result<Option<NodeTemplate>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM node_templates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = TemplateRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_template()?))
            }
            None => Ok(None),
        }
    }

    async fn save_node_template(&self, template: &NodeTemplate) -> Result<(), RepositoryError> {
        let config = serde_json::to_string(&template.config)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO node_templates (id, name, node_type, config_version, config, status)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 node_type = excluded.node_type,
                 config_version = excluded.config_version,
                 config = excluded.config,
                 status = excluded.status"#,
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(&template.node_type)
        .bind(template.config_version as i64)
        .bind(&config)
        .bind(enum_to_str(&template.status)?)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_node_mappings(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowNodeMapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_node_mappings WHERE workflow_id = ? ORDER BY node_order ASC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = MappingRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            mappings.push(r.into_mapping()?);
        }
        Ok(mappings)
    }

    async fn save_node_mapping(
        &self,
        mapping: &WorkflowNodeMapping,
    ) -> Result<(), RepositoryError> {
        let override_config = mapping
            .override_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_node_mappings
               (id, workflow_id, node_template_id, node_order, is_start_node, is_end_node, override_config, on_error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 node_order = excluded.node_order,
                 is_start_node = excluded.is_start_node,
                 is_end_node = excluded.is_end_node,
                 override_config = excluded.override_config,
                 on_error = excluded.on_error"#,
        )
        .bind(mapping.id.to_string())
        .bind(mapping.workflow_id.to_string())
        .bind(mapping.node_template_id.to_string())
        .bind(mapping.node_order)
        .bind(mapping.is_start_node)
        .bind(mapping.is_end_node)
        .bind(&override_config)
        .bind(enum_to_str(&mapping.on_error)?)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
