use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{
        RepoError, TemplatesRepo, TemplatesWriteRepo, UpsertTemplateFieldParams,
        UpsertTemplateParams, UpsertedTemplateField,
    },
    domain::{
        entities::{TemplateFieldRecord, TemplateRecord},
        types::{FieldType, TemplateFieldId, TemplateId},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const TEMPLATE_COLUMNS: &str =
    "id, name, template_filename, no_cache, position, visible, created_at, updated_at";

const TEMPLATE_FIELD_COLUMNS: &str = "id, template_id, key, field_type, required, help_text, \
    css_class, position, min_num, max_num, nested_templates, choices, model_choice_content_type";

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: TemplateId,
    name: String,
    template_filename: String,
    no_cache: bool,
    position: i32,
    visible: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TemplateRow> for TemplateRecord {
    fn from(row: TemplateRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            template_filename: row.template_filename,
            no_cache: row.no_cache,
            position: row.position,
            visible: row.visible,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TemplateFieldRow {
    id: TemplateFieldId,
    template_id: TemplateId,
    key: String,
    field_type: String,
    required: bool,
    help_text: String,
    css_class: String,
    position: i32,
    min_num: i32,
    max_num: i32,
    nested_templates: Vec<i64>,
    choices: String,
    model_choice_content_type: Option<String>,
}

impl TryFrom<TemplateFieldRow> for TemplateFieldRecord {
    type Error = RepoError;

    fn try_from(row: TemplateFieldRow) -> Result<Self, Self::Error> {
        let field_type: FieldType = row.field_type.parse().map_err(|_| {
            RepoError::integrity(format!(
                "template field {} has unknown type `{}`",
                row.id, row.field_type
            ))
        })?;
        Ok(Self {
            id: row.id,
            template_id: row.template_id,
            key: row.key,
            field_type,
            required: row.required,
            help_text: row.help_text,
            css_class: row.css_class,
            position: row.position,
            min_num: row.min_num,
            max_num: row.max_num,
            nested_templates: row.nested_templates.into_iter().map(TemplateId).collect(),
            choices: row.choices,
            model_choice_content_type: row.model_choice_content_type,
        })
    }
}

#[async_trait]
impl TemplatesRepo for PostgresRepositories {
    async fn find_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>, RepoError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1");
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(TemplateRecord::from))
    }

    async fn find_template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<TemplateRecord>, RepoError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE name = $1");
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(TemplateRecord::from))
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRecord>, RepoError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY position, name");
        let rows = sqlx::query_as::<_, TemplateRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TemplateRecord::from).collect())
    }

    async fn templates_with_filename(
        &self,
        filename: &str,
    ) -> Result<Vec<TemplateRecord>, RepoError> {
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE btrim(template_filename) = $1 ORDER BY id"
        );
        let rows = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(filename.trim())
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TemplateRecord::from).collect())
    }

    async fn list_template_fields(
        &self,
        template: TemplateId,
    ) -> Result<Vec<TemplateFieldRecord>, RepoError> {
        let sql = format!(
            "SELECT {TEMPLATE_FIELD_COLUMNS} FROM template_fields WHERE template_id = $1 ORDER BY position, id"
        );
        let rows = sqlx::query_as::<_, TemplateFieldRow>(&sql)
            .bind(template)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(TemplateFieldRecord::try_from).collect()
    }

    async fn find_template_field(
        &self,
        id: TemplateFieldId,
    ) -> Result<Option<TemplateFieldRecord>, RepoError> {
        let sql = format!("SELECT {TEMPLATE_FIELD_COLUMNS} FROM template_fields WHERE id = $1");
        let row = sqlx::query_as::<_, TemplateFieldRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(TemplateFieldRecord::try_from).transpose()
    }
}

#[async_trait]
impl TemplatesWriteRepo for PostgresRepositories {
    async fn upsert_template(
        &self,
        params: UpsertTemplateParams,
    ) -> Result<TemplateRecord, RepoError> {
        let sql = format!(
            r#"
            INSERT INTO templates (name, template_filename, no_cache, position, visible)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET template_filename = EXCLUDED.template_filename,
                no_cache = EXCLUDED.no_cache,
                position = EXCLUDED.position,
                visible = EXCLUDED.visible,
                updated_at = now()
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(params.name)
            .bind(params.template_filename)
            .bind(params.no_cache)
            .bind(params.position)
            .bind(params.visible)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn upsert_template_field(
        &self,
        params: UpsertTemplateFieldParams,
    ) -> Result<UpsertedTemplateField, RepoError> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT field_type FROM template_fields WHERE template_id = $1 AND key = $2",
        )
        .bind(params.template_id)
        .bind(&params.key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if let Some(current) = existing.as_deref()
            && current != params.field_type.as_str()
        {
            return Err(RepoError::InvalidInput {
                message: format!(
                    "template field `{}` cannot change type from {current} to {}",
                    params.key, params.field_type
                ),
            });
        }

        let nested: Vec<i64> = params.nested_templates.iter().map(|id| id.get()).collect();
        let sql = format!(
            r#"
            INSERT INTO template_fields (
                template_id, key, field_type, required, help_text, css_class, position,
                min_num, max_num, nested_templates, choices, model_choice_content_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (template_id, key) DO UPDATE
            SET required = EXCLUDED.required,
                help_text = EXCLUDED.help_text,
                css_class = EXCLUDED.css_class,
                position = EXCLUDED.position,
                min_num = EXCLUDED.min_num,
                max_num = EXCLUDED.max_num,
                nested_templates = EXCLUDED.nested_templates,
                choices = EXCLUDED.choices,
                model_choice_content_type = EXCLUDED.model_choice_content_type
            RETURNING {TEMPLATE_FIELD_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TemplateFieldRow>(&sql)
            .bind(params.template_id)
            .bind(params.key)
            .bind(params.field_type.as_str())
            .bind(params.required)
            .bind(params.help_text)
            .bind(params.css_class)
            .bind(params.position)
            .bind(params.min_num)
            .bind(params.max_num)
            .bind(nested)
            .bind(params.choices)
            .bind(params.model_choice_content_type)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(UpsertedTemplateField {
            field: row.try_into()?,
            created: existing.is_none(),
        })
    }

    async fn delete_template_fields(&self, ids: &[TemplateFieldId]) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        sqlx::query("DELETE FROM template_fields WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
