//! Hydrates block trees from the repositories.

use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::application::{error::AppError, repos::Repositories};
use crate::domain::{
    blocks::{BlockNode, FieldNode},
    entities::{BlockRecord, TemplateFieldRecord},
    error::DomainError,
    types::{BlockId, TemplateFieldId},
};

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 32;

#[derive(Clone)]
pub struct BlockLoader {
    repos: Repositories,
    max_depth: usize,
}

impl BlockLoader {
    pub fn new(repos: Repositories, max_depth: usize) -> Self {
        Self {
            repos,
            max_depth: max_depth.max(1),
        }
    }

    pub fn repos(&self) -> &Repositories {
        &self.repos
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub async fn find(&self, id: BlockId) -> Result<BlockRecord, AppError> {
        self.repos
            .blocks
            .find_block(id)
            .await?
            .ok_or_else(|| AppError::not_found("block", id))
    }

    /// Load the block and its whole nested subtree.
    pub async fn load(&self, id: BlockId) -> Result<BlockNode, AppError> {
        let block = self.find(id).await?;
        self.load_record(block).await
    }

    pub async fn load_record(&self, block: BlockRecord) -> Result<BlockNode, AppError> {
        self.load_at(block, 1).await
    }

    /// Block owning the nested field `block` lives in, if any.
    pub async fn owning_block(&self, block: &BlockRecord) -> Result<Option<BlockRecord>, AppError> {
        let Some(field_id) = block.parent else {
            return Ok(None);
        };
        let field = self
            .repos
            .blocks
            .find_field(field_id)
            .await?
            .ok_or_else(|| AppError::not_found("field", field_id))?;
        let owner = self.find(field.block_id).await?;
        Ok(Some(owner))
    }

    /// Follow parent links to the top-level block.
    pub async fn root_of(&self, block: BlockRecord) -> Result<BlockRecord, AppError> {
        let mut current = block;
        let mut steps = 0;
        while let Some(owner) = self.owning_block(&current).await? {
            steps += 1;
            if steps > self.max_depth {
                return Err(DomainError::nesting_too_deep(self.max_depth).into());
            }
            current = owner;
        }
        Ok(current)
    }

    fn load_at(&self, block: BlockRecord, depth: usize) -> BoxFuture<'_, Result<BlockNode, AppError>> {
        Box::pin(async move {
            if depth > self.max_depth {
                return Err(DomainError::nesting_too_deep(self.max_depth).into());
            }

            let template = self
                .repos
                .templates
                .find_template(block.template_id)
                .await?
                .ok_or_else(|| AppError::not_found("template", block.template_id))?;
            let definitions: HashMap<TemplateFieldId, TemplateFieldRecord> = self
                .repos
                .templates
                .list_template_fields(template.id)
                .await?
                .into_iter()
                .map(|definition| (definition.id, definition))
                .collect();

            let mut fields = Vec::new();
            for field in self.repos.blocks.list_fields(block.id).await? {
                let template_field = match definitions.get(&field.template_field_id) {
                    Some(definition) => definition.clone(),
                    None => self
                        .repos
                        .templates
                        .find_template_field(field.template_field_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("template field", field.template_field_id))?,
                };

                if template_field.field_type != field.field_type() {
                    return Err(DomainError::invariant(format!(
                        "field {} is {} but template field `{}` is {}",
                        field.id,
                        field.field_type(),
                        template_field.key,
                        template_field.field_type
                    ))
                    .into());
                }

                let mut children = Vec::new();
                if field.field_type().is_nested() {
                    for child in self.repos.blocks.list_children(field.id).await? {
                        children.push(self.load_at(child, depth + 1).await?);
                    }
                }

                let model_choice = match field.value.model_choice_target() {
                    Some((content_type, object_id)) => {
                        self.repos
                            .blocks
                            .resolve_model_choice(content_type, object_id)
                            .await?
                    }
                    None => None,
                };

                fields.push(FieldNode {
                    field,
                    template_field,
                    children,
                    model_choice,
                });
            }
            fields.sort_by_key(|node| (node.template_field.position, node.template_field.id));

            Ok(BlockNode {
                block,
                template,
                fields,
            })
        })
    }
}
