//! Repository traits describing persistence adapters.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::entities::{
    BlockRecord, FieldRecord, ParentRecord, ParentRef, TemplateFieldRecord, TemplateRecord,
};
use crate::domain::fields::FieldValue;
use crate::domain::types::{BlockId, FieldId, FieldType, TemplateFieldId, TemplateId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateBlockParams {
    pub template_id: TemplateId,
    pub parent: Option<FieldId>,
    pub name: String,
    pub position: i32,
    pub visible: bool,
    pub draft: bool,
    pub saved: bool,
    pub css_class: String,
}

impl CreateBlockParams {
    /// Parameters reproducing `block` under a new identity.
    pub fn copy_of(block: &BlockRecord) -> Self {
        Self {
            template_id: block.template_id,
            parent: block.parent,
            name: block.name.clone(),
            position: block.position,
            visible: block.visible,
            draft: block.draft,
            saved: block.saved,
            css_class: block.css_class.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateFieldParams {
    pub block_id: BlockId,
    pub template_field_id: TemplateFieldId,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub struct UpsertTemplateParams {
    pub name: String,
    pub template_filename: String,
    pub no_cache: bool,
    pub position: i32,
    pub visible: bool,
}

#[derive(Debug, Clone)]
pub struct UpsertTemplateFieldParams {
    pub template_id: TemplateId,
    pub key: String,
    pub field_type: FieldType,
    pub required: bool,
    pub help_text: String,
    pub css_class: String,
    pub position: i32,
    pub min_num: i32,
    pub max_num: i32,
    pub nested_templates: Vec<TemplateId>,
    pub choices: String,
    pub model_choice_content_type: Option<String>,
}

/// Result of a template field upsert.
#[derive(Debug, Clone)]
pub struct UpsertedTemplateField {
    pub field: TemplateFieldRecord,
    pub created: bool,
}

#[async_trait]
pub trait BlocksRepo: Send + Sync {
    async fn find_block(&self, id: BlockId) -> Result<Option<BlockRecord>, RepoError>;

    /// Fields owned by `block`, in insertion order.
    async fn list_fields(&self, block: BlockId) -> Result<Vec<FieldRecord>, RepoError>;

    async fn find_field(&self, id: FieldId) -> Result<Option<FieldRecord>, RepoError>;

    /// Child blocks owned by a nested field, ordered by position then id.
    async fn list_children(&self, field: FieldId) -> Result<Vec<BlockRecord>, RepoError>;

    /// Every block, nested or not, built from one of `templates`.
    async fn blocks_with_templates(
        &self,
        templates: &[TemplateId],
    ) -> Result<Vec<BlockRecord>, RepoError>;

    /// Blocks owning a model-choice field pointing at the given entity.
    async fn blocks_referencing(
        &self,
        content_type: &str,
        object_id: i64,
    ) -> Result<Vec<BlockId>, RepoError>;

    /// Template-facing representation of a model-choice target.
    async fn resolve_model_choice(
        &self,
        content_type: &str,
        object_id: i64,
    ) -> Result<Option<Value>, RepoError>;
}

#[async_trait]
pub trait BlocksWriteRepo: Send + Sync {
    async fn create_block(&self, params: CreateBlockParams) -> Result<BlockRecord, RepoError>;

    async fn update_block(&self, block: &BlockRecord) -> Result<BlockRecord, RepoError>;

    async fn create_field(&self, params: CreateFieldParams) -> Result<FieldRecord, RepoError>;

    async fn update_field(&self, field: &FieldRecord) -> Result<(), RepoError>;

    /// Delete blocks together with their fields and nested descendants.
    async fn delete_blocks(&self, ids: &[BlockId]) -> Result<(), RepoError>;
}

#[async_trait]
pub trait TemplatesRepo: Send + Sync {
    async fn find_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>, RepoError>;

    async fn find_template_by_name(&self, name: &str)
    -> Result<Option<TemplateRecord>, RepoError>;

    /// All templates ordered by position then name.
    async fn list_templates(&self) -> Result<Vec<TemplateRecord>, RepoError>;

    async fn templates_with_filename(
        &self,
        filename: &str,
    ) -> Result<Vec<TemplateRecord>, RepoError>;

    /// Template fields ordered by position then id.
    async fn list_template_fields(
        &self,
        template: TemplateId,
    ) -> Result<Vec<TemplateFieldRecord>, RepoError>;

    async fn find_template_field(
        &self,
        id: TemplateFieldId,
    ) -> Result<Option<TemplateFieldRecord>, RepoError>;
}

#[async_trait]
pub trait TemplatesWriteRepo: Send + Sync {
    /// Insert or update a template by name.
    async fn upsert_template(
        &self,
        params: UpsertTemplateParams,
    ) -> Result<TemplateRecord, RepoError>;

    /// Insert or update a template field by `(template, key)`.
    async fn upsert_template_field(
        &self,
        params: UpsertTemplateFieldParams,
    ) -> Result<UpsertedTemplateField, RepoError>;

    /// Delete template fields along with every field instantiated from them.
    async fn delete_template_fields(&self, ids: &[TemplateFieldId]) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ParentsRepo: Send + Sync {
    async fn list_parents(&self, kind: &str) -> Result<Vec<ParentRecord>, RepoError>;

    async fn find_parent(&self, parent: &ParentRef) -> Result<Option<ParentRecord>, RepoError>;

    /// Top-level blocks referenced by `parent`, ordered by position then id.
    async fn parent_blocks(&self, parent: &ParentRef) -> Result<Vec<BlockRecord>, RepoError>;

    async fn parents_of_block(&self, block: BlockId) -> Result<Vec<ParentRef>, RepoError>;

    async fn attach_block(&self, parent: &ParentRef, block: BlockId) -> Result<(), RepoError>;

    /// Remove the parent row and its block references; blocks are left intact.
    async fn delete_parent(&self, parent: &ParentRef) -> Result<(), RepoError>;
}

/// Bundle of repository handles shared by the application services.
#[derive(Clone)]
pub struct Repositories {
    pub blocks: Arc<dyn BlocksRepo>,
    pub block_writes: Arc<dyn BlocksWriteRepo>,
    pub templates: Arc<dyn TemplatesRepo>,
    pub template_writes: Arc<dyn TemplatesWriteRepo>,
    pub parents: Arc<dyn ParentsRepo>,
}

impl Repositories {
    /// Use one adapter for every repository concern.
    pub fn from_shared<R>(repo: Arc<R>) -> Self
    where
        R: BlocksRepo
            + BlocksWriteRepo
            + TemplatesRepo
            + TemplatesWriteRepo
            + ParentsRepo
            + 'static,
    {
        Self {
            blocks: repo.clone(),
            block_writes: repo.clone(),
            templates: repo.clone(),
            template_writes: repo.clone(),
            parents: repo,
        }
    }
}
