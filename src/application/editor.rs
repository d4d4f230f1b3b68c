//! Block creation and editing.

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::application::{
    error::AppError,
    loader::BlockLoader,
    parents::parent_sites,
    repos::{CreateBlockParams, CreateFieldParams, Repositories},
};
use crate::cache::CacheEngine;
use crate::domain::{
    blocks::BlockNode,
    entities::{BlockRecord, ParentRef, TemplateRecord},
    error::DomainError,
    fields::FieldValue,
    types::{BlockId, FieldId, TemplateId},
};

const MAX_NAME_LEN: usize = 320;
const MAX_CSS_CLASS_LEN: usize = 64;

/// Editor submission for one block.
#[derive(Debug, Clone, Default)]
pub struct BlockChanges {
    /// New values keyed by field key; absent keys keep their value.
    pub values: Map<String, Value>,
    pub name: Option<String>,
    pub css_class: Option<String>,
    pub visible: Option<bool>,
}

#[derive(Clone)]
pub struct BlockEditor {
    repos: Repositories,
    loader: BlockLoader,
    cache: CacheEngine,
}

impl BlockEditor {
    pub fn new(repos: Repositories, loader: BlockLoader, cache: CacheEngine) -> Self {
        Self {
            repos,
            loader,
            cache,
        }
    }

    /// Create a block with one field per template field, seeding each nested
    /// field with `min_num` children of its first allowed template.
    pub async fn create_content_block(
        &self,
        template: TemplateId,
        draft: bool,
        parent: Option<FieldId>,
        position: i32,
    ) -> Result<BlockRecord, AppError> {
        let template = self.template(template).await?;
        self.create_from(template, draft, parent, position, 1).await
    }

    /// Create a draft block and attach it to `parent` after its existing blocks.
    #[instrument(skip(self), fields(parent = %parent))]
    pub async fn add_content_block(
        &self,
        parent: &ParentRef,
        template: TemplateId,
    ) -> Result<BlockRecord, AppError> {
        if self.repos.parents.find_parent(parent).await?.is_none() {
            return Err(AppError::not_found("parent", parent));
        }
        let position = next_position(&self.repos.parents.parent_blocks(parent).await?);
        let block = self
            .create_content_block(template, true, None, position)
            .await?;
        self.repos.parents.attach_block(parent, block.id).await?;
        info!(block_id = %block.id, "block added");
        Ok(block)
    }

    /// Append a child block to a nested field.
    #[instrument(skip(self))]
    pub async fn add_nested_block(
        &self,
        field: FieldId,
        template: TemplateId,
    ) -> Result<BlockRecord, AppError> {
        let field_record = self
            .repos
            .blocks
            .find_field(field)
            .await?
            .ok_or_else(|| AppError::not_found("field", field))?;
        let definition = self
            .repos
            .templates
            .find_template_field(field_record.template_field_id)
            .await?
            .ok_or_else(|| AppError::not_found("template field", field_record.template_field_id))?;

        if !definition.field_type.is_nested() {
            return Err(DomainError::validation(format!(
                "field `{}` does not hold nested blocks",
                definition.key
            ))
            .into());
        }
        if !definition.allows_nested_template(template) {
            return Err(DomainError::validation(format!(
                "template {template} is not allowed in field `{}`",
                definition.key
            ))
            .into());
        }

        let children = self.repos.blocks.list_children(field).await?;
        if children.len() >= usize::try_from(definition.max_num).unwrap_or(0) {
            return Err(DomainError::validation(format!(
                "field `{}` accepts at most {} blocks",
                definition.key, definition.max_num
            ))
            .into());
        }

        let owner = self.loader.find(field_record.block_id).await?;
        let depth = self.depth_of(&owner).await? + 1;
        let template = self.template(template).await?;
        let block = self
            .create_from(template, false, Some(field), next_position(&children), depth)
            .await?;
        self.refresh_root(owner.id).await?;
        Ok(block)
    }

    /// Apply editor changes, mark the block saved and refresh the cache of
    /// its top-level ancestor. Returns the block as now stored.
    #[instrument(skip(self, changes))]
    pub async fn save_block(
        &self,
        block: BlockId,
        changes: BlockChanges,
    ) -> Result<BlockNode, AppError> {
        let node = self.loader.load(block).await?;

        for key in changes.values.keys() {
            if node.field(key).is_none() {
                return Err(DomainError::validation(format!(
                    "block {block} has no field `{key}`"
                ))
                .into());
            }
        }

        let mut updates = Vec::new();
        for field in &node.fields {
            let Some(input) = changes.values.get(field.key()) else {
                continue;
            };
            let mut updated = field.field.clone();
            updated.value.assign(input, &field.template_field)?;
            if updated != field.field {
                updates.push(updated);
            }
        }

        let mut record = node.block;
        if let Some(name) = changes.name {
            let name = name.trim().to_string();
            if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
                return Err(DomainError::validation(format!(
                    "block name must be 1 to {MAX_NAME_LEN} characters"
                ))
                .into());
            }
            record.name = name;
        }
        if let Some(css_class) = changes.css_class {
            if css_class.chars().count() > MAX_CSS_CLASS_LEN {
                return Err(DomainError::validation(format!(
                    "css class must be at most {MAX_CSS_CLASS_LEN} characters"
                ))
                .into());
            }
            record.css_class = css_class;
        }
        if let Some(visible) = changes.visible {
            record.visible = visible;
        }
        record.saved = true;

        for field in &updates {
            self.repos.block_writes.update_field(field).await?;
        }
        self.repos.block_writes.update_block(&record).await?;

        self.refresh_root(block).await?;
        self.loader.load(block).await
    }

    /// Delete a block subtree and refresh whatever ancestor embedded it.
    #[instrument(skip(self))]
    pub async fn delete_block(&self, block: BlockId) -> Result<(), AppError> {
        let record = self.loader.find(block).await?;
        let owner = self.loader.owning_block(&record).await?;

        if owner.is_none() {
            for parent in self.repos.parents.parents_of_block(block).await? {
                if let Some(parent) = self.repos.parents.find_parent(&parent).await? {
                    self.cache
                        .delete_cache_per_site(&record, &parent_sites(&parent))
                        .await?;
                }
            }
        }
        self.repos.block_writes.delete_blocks(&[block]).await?;

        if let Some(owner) = owner {
            self.refresh_root(owner.id).await?;
        }
        Ok(())
    }

    async fn refresh_root(&self, block: BlockId) -> Result<(), AppError> {
        self.cache.refresh_blocks(&[block]).await.map(|_| ())
    }

    async fn template(&self, id: TemplateId) -> Result<TemplateRecord, AppError> {
        self.repos
            .templates
            .find_template(id)
            .await?
            .ok_or_else(|| AppError::not_found("template", id))
    }

    async fn depth_of(&self, block: &BlockRecord) -> Result<usize, AppError> {
        let mut depth = 1;
        let mut current = block.clone();
        while let Some(owner) = self.loader.owning_block(&current).await? {
            depth += 1;
            if depth > self.loader.max_depth() {
                return Err(DomainError::nesting_too_deep(self.loader.max_depth()).into());
            }
            current = owner;
        }
        Ok(depth)
    }

    fn create_from(
        &self,
        template: TemplateRecord,
        draft: bool,
        parent: Option<FieldId>,
        position: i32,
        depth: usize,
    ) -> BoxFuture<'_, Result<BlockRecord, AppError>> {
        Box::pin(async move {
            if depth > self.loader.max_depth() {
                return Err(DomainError::nesting_too_deep(self.loader.max_depth()).into());
            }

            let mut block = self
                .repos
                .block_writes
                .create_block(CreateBlockParams {
                    template_id: template.id,
                    parent,
                    name: template.name.clone(),
                    position,
                    visible: true,
                    draft,
                    saved: false,
                    css_class: String::new(),
                })
                .await?;
            block.name = format!("{} #{}", template.name, block.id);
            let block = self.repos.block_writes.update_block(&block).await?;

            for definition in self.repos.templates.list_template_fields(template.id).await? {
                let field = self
                    .repos
                    .block_writes
                    .create_field(CreateFieldParams {
                        block_id: block.id,
                        template_field_id: definition.id,
                        value: FieldValue::empty(
                            definition.field_type,
                            definition.model_choice_content_type.clone(),
                        ),
                    })
                    .await?;

                if !definition.field_type.is_nested() || definition.min_num <= 0 {
                    continue;
                }
                let Some(first) = definition.nested_templates.first() else {
                    continue;
                };
                let child_template = self.template(*first).await?;
                for position in 0..definition.min_num {
                    self.create_from(
                        child_template.clone(),
                        false,
                        Some(field.id),
                        position,
                        depth + 1,
                    )
                    .await?;
                }
            }

            Ok(block)
        })
    }
}

fn next_position(blocks: &[BlockRecord]) -> i32 {
    blocks
        .iter()
        .map(|block| block.position + 1)
        .max()
        .unwrap_or(0)
}
