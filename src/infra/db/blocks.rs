use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    application::repos::{
        BlocksRepo, BlocksWriteRepo, CreateBlockParams, CreateFieldParams, RepoError,
    },
    domain::{
        entities::{BlockRecord, FieldRecord},
        fields::FieldValue,
        types::{BlockId, FieldId, FieldType, TemplateFieldId, TemplateId},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

pub(super) const BLOCK_COLUMNS: &str = "b.id, b.template_id, b.parent_field_id, b.name, \
    b.position, b.visible, b.draft, b.saved, b.css_class, b.created_at, b.updated_at";

const FIELD_COLUMNS: &str = "f.id, f.block_id, f.template_field_id, f.field_type, f.text, \
    f.content, f.image, f.file, f.video, f.embedded_video, f.checkbox, f.choice, \
    f.model_choice_content_type, f.model_choice_object_id, f.iframe";

#[derive(sqlx::FromRow)]
pub(super) struct BlockRow {
    id: BlockId,
    template_id: TemplateId,
    parent_field_id: Option<FieldId>,
    name: String,
    position: i32,
    visible: bool,
    draft: bool,
    saved: bool,
    css_class: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<BlockRow> for BlockRecord {
    fn from(row: BlockRow) -> Self {
        Self {
            id: row.id,
            template_id: row.template_id,
            parent: row.parent_field_id,
            name: row.name,
            position: row.position,
            visible: row.visible,
            draft: row.draft,
            saved: row.saved,
            css_class: row.css_class,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FieldRow {
    id: FieldId,
    block_id: BlockId,
    template_field_id: TemplateFieldId,
    field_type: String,
    text: String,
    content: String,
    image: Option<String>,
    file: Option<String>,
    video: Option<String>,
    embedded_video: String,
    checkbox: bool,
    choice: String,
    model_choice_content_type: Option<String>,
    model_choice_object_id: Option<i64>,
    iframe: String,
}

impl TryFrom<FieldRow> for FieldRecord {
    type Error = RepoError;

    fn try_from(row: FieldRow) -> Result<Self, Self::Error> {
        let field_type: FieldType = row.field_type.parse().map_err(|_| {
            RepoError::integrity(format!(
                "field {} has unknown type `{}`",
                row.id, row.field_type
            ))
        })?;
        let value = match field_type {
            FieldType::Text => FieldValue::Text(row.text),
            FieldType::Content => FieldValue::Content(row.content),
            FieldType::Image => FieldValue::Image(row.image),
            FieldType::File => FieldValue::File(row.file),
            FieldType::Video => FieldValue::Video(row.video),
            FieldType::EmbeddedVideo => FieldValue::EmbeddedVideo(row.embedded_video),
            FieldType::Checkbox => FieldValue::Checkbox(row.checkbox),
            FieldType::Choice => FieldValue::Choice(row.choice),
            FieldType::ModelChoice => FieldValue::ModelChoice {
                content_type: row.model_choice_content_type,
                object_id: row.model_choice_object_id,
            },
            FieldType::Nested => FieldValue::Nested,
            FieldType::Iframe => FieldValue::Iframe(row.iframe),
        };

        Ok(Self {
            id: row.id,
            block_id: row.block_id,
            template_field_id: row.template_field_id,
            value,
        })
    }
}

/// Column values written for one field; untouched columns keep their defaults.
#[derive(Default)]
struct FieldColumns {
    text: String,
    content: String,
    image: Option<String>,
    file: Option<String>,
    video: Option<String>,
    embedded_video: String,
    checkbox: bool,
    choice: String,
    model_choice_content_type: Option<String>,
    model_choice_object_id: Option<i64>,
    iframe: String,
}

impl From<&FieldValue> for FieldColumns {
    fn from(value: &FieldValue) -> Self {
        let mut columns = Self::default();
        match value.clone() {
            FieldValue::Text(text) => columns.text = text,
            FieldValue::Content(content) => columns.content = content,
            FieldValue::Image(image) => columns.image = image,
            FieldValue::File(file) => columns.file = file,
            FieldValue::Video(video) => columns.video = video,
            FieldValue::EmbeddedVideo(url) => columns.embedded_video = url,
            FieldValue::Checkbox(checked) => columns.checkbox = checked,
            FieldValue::Choice(choice) => columns.choice = choice,
            FieldValue::ModelChoice {
                content_type,
                object_id,
            } => {
                columns.model_choice_content_type = content_type;
                columns.model_choice_object_id = object_id;
            }
            FieldValue::Nested => {}
            FieldValue::Iframe(url) => columns.iframe = url,
        }
        columns
    }
}

fn to_fields(rows: Vec<FieldRow>) -> Result<Vec<FieldRecord>, RepoError> {
    rows.into_iter().map(FieldRecord::try_from).collect()
}

#[async_trait]
impl BlocksRepo for PostgresRepositories {
    async fn find_block(&self, id: BlockId) -> Result<Option<BlockRecord>, RepoError> {
        let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks b WHERE b.id = $1");
        let row = sqlx::query_as::<_, BlockRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(BlockRecord::from))
    }

    async fn list_fields(&self, block: BlockId) -> Result<Vec<FieldRecord>, RepoError> {
        let sql = format!("SELECT {FIELD_COLUMNS} FROM fields f WHERE f.block_id = $1 ORDER BY f.id");
        let rows = sqlx::query_as::<_, FieldRow>(&sql)
            .bind(block)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        to_fields(rows)
    }

    async fn find_field(&self, id: FieldId) -> Result<Option<FieldRecord>, RepoError> {
        let sql = format!("SELECT {FIELD_COLUMNS} FROM fields f WHERE f.id = $1");
        let row = sqlx::query_as::<_, FieldRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(FieldRecord::try_from).transpose()
    }

    async fn list_children(&self, field: FieldId) -> Result<Vec<BlockRecord>, RepoError> {
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks b WHERE b.parent_field_id = $1 ORDER BY b.position, b.id"
        );
        let rows = sqlx::query_as::<_, BlockRow>(&sql)
            .bind(field)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BlockRecord::from).collect())
    }

    async fn blocks_with_templates(
        &self,
        templates: &[TemplateId],
    ) -> Result<Vec<BlockRecord>, RepoError> {
        let ids: Vec<i64> = templates.iter().map(|id| id.get()).collect();
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks b WHERE b.template_id = ANY($1) ORDER BY b.id"
        );
        let rows = sqlx::query_as::<_, BlockRow>(&sql)
            .bind(ids)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BlockRecord::from).collect())
    }

    async fn blocks_referencing(
        &self,
        content_type: &str,
        object_id: i64,
    ) -> Result<Vec<BlockId>, RepoError> {
        sqlx::query_scalar::<_, BlockId>(
            r#"
            SELECT DISTINCT block_id
            FROM fields
            WHERE field_type = $1
              AND model_choice_content_type = $2
              AND model_choice_object_id = $3
            ORDER BY block_id
            "#,
        )
        .bind(FieldType::ModelChoice.as_str())
        .bind(content_type)
        .bind(object_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn resolve_model_choice(
        &self,
        content_type: &str,
        object_id: i64,
    ) -> Result<Option<Value>, RepoError> {
        sqlx::query_scalar::<_, Value>(
            "SELECT value FROM model_choices WHERE content_type = $1 AND object_id = $2",
        )
        .bind(content_type)
        .bind(object_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl BlocksWriteRepo for PostgresRepositories {
    async fn create_block(&self, params: CreateBlockParams) -> Result<BlockRecord, RepoError> {
        let sql = format!(
            r#"
            WITH b AS (
                INSERT INTO blocks (template_id, parent_field_id, name, position, visible, draft, saved, css_class)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
            )
            SELECT {BLOCK_COLUMNS} FROM b
            "#
        );
        let row = sqlx::query_as::<_, BlockRow>(&sql)
            .bind(params.template_id)
            .bind(params.parent)
            .bind(params.name)
            .bind(params.position)
            .bind(params.visible)
            .bind(params.draft)
            .bind(params.saved)
            .bind(params.css_class)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update_block(&self, block: &BlockRecord) -> Result<BlockRecord, RepoError> {
        let sql = format!(
            r#"
            WITH b AS (
                UPDATE blocks
                SET parent_field_id = $2,
                    name = $3,
                    position = $4,
                    visible = $5,
                    draft = $6,
                    saved = $7,
                    css_class = $8,
                    updated_at = now()
                WHERE id = $1
                RETURNING *
            )
            SELECT {BLOCK_COLUMNS} FROM b
            "#
        );
        let row = sqlx::query_as::<_, BlockRow>(&sql)
            .bind(block.id)
            .bind(block.parent)
            .bind(&block.name)
            .bind(block.position)
            .bind(block.visible)
            .bind(block.draft)
            .bind(block.saved)
            .bind(&block.css_class)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(BlockRecord::from).ok_or(RepoError::NotFound)
    }

    async fn create_field(&self, params: CreateFieldParams) -> Result<FieldRecord, RepoError> {
        let field_type = params.value.field_type();
        let columns = FieldColumns::from(&params.value);
        // The SELECT yields no row when the value does not match the template field.
        let sql = format!(
            r#"
            WITH f AS (
                INSERT INTO fields (
                    block_id, template_field_id, field_type, text, content, image, file, video,
                    embedded_video, checkbox, choice, model_choice_content_type,
                    model_choice_object_id, iframe
                )
                SELECT $1, tf.id, tf.field_type, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
                FROM template_fields tf
                WHERE tf.id = $2 AND tf.field_type = $3
                RETURNING *
            )
            SELECT {FIELD_COLUMNS} FROM f
            "#
        );
        let row = sqlx::query_as::<_, FieldRow>(&sql)
            .bind(params.block_id)
            .bind(params.template_field_id)
            .bind(field_type.as_str())
            .bind(columns.text)
            .bind(columns.content)
            .bind(columns.image)
            .bind(columns.file)
            .bind(columns.video)
            .bind(columns.embedded_video)
            .bind(columns.checkbox)
            .bind(columns.choice)
            .bind(columns.model_choice_content_type)
            .bind(columns.model_choice_object_id)
            .bind(columns.iframe)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(RepoError::InvalidInput {
                message: format!(
                    "template field {} does not exist or is not a {field_type}",
                    params.template_field_id
                ),
            }),
        }
    }

    async fn update_field(&self, field: &FieldRecord) -> Result<(), RepoError> {
        let columns = FieldColumns::from(&field.value);
        let result = sqlx::query(
            r#"
            UPDATE fields
            SET text = $3,
                content = $4,
                image = $5,
                file = $6,
                video = $7,
                embedded_video = $8,
                checkbox = $9,
                choice = $10,
                model_choice_content_type = $11,
                model_choice_object_id = $12,
                iframe = $13
            WHERE id = $1 AND field_type = $2
            "#,
        )
        .bind(field.id)
        .bind(field.field_type().as_str())
        .bind(columns.text)
        .bind(columns.content)
        .bind(columns.image)
        .bind(columns.file)
        .bind(columns.video)
        .bind(columns.embedded_video)
        .bind(columns.checkbox)
        .bind(columns.choice)
        .bind(columns.model_choice_content_type)
        .bind(columns.model_choice_object_id)
        .bind(columns.iframe)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        match self.find_field(field.id).await? {
            Some(_) => Err(RepoError::InvalidInput {
                message: format!("field {} cannot change its type", field.id),
            }),
            None => Err(RepoError::NotFound),
        }
    }

    async fn delete_blocks(&self, ids: &[BlockId]) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        // Fields and nested descendants go through ON DELETE CASCADE.
        sqlx::query("DELETE FROM blocks WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl PostgresRepositories {
    /// Store the template-facing payload of a model-choice target.
    pub async fn upsert_model_choice(
        &self,
        content_type: &str,
        object_id: i64,
        value: &Value,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO model_choices (content_type, object_id, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (content_type, object_id) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(content_type)
        .bind(object_id)
        .bind(value)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
