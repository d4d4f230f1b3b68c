//! Deep copies of block subtrees.

use futures::future::BoxFuture;
use tracing::debug;

use crate::application::{
    error::AppError,
    repos::{CreateBlockParams, CreateFieldParams, Repositories},
};
use crate::domain::{
    blocks::BlockNode,
    entities::BlockRecord,
    types::FieldId,
};

/// Attributes replaced on the cloned root block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneOverrides {
    pub draft: Option<bool>,
    /// `Some(None)` detaches the clone from any nested field.
    pub parent: Option<Option<FieldId>>,
}

impl CloneOverrides {
    pub fn draft(draft: bool) -> Self {
        Self {
            draft: Some(draft),
            parent: None,
        }
    }

    pub fn parent(parent: FieldId) -> Self {
        Self {
            draft: None,
            parent: Some(Some(parent)),
        }
    }

    fn apply(&self, params: &mut CreateBlockParams) {
        if let Some(draft) = self.draft {
            params.draft = draft;
        }
        if let Some(parent) = self.parent {
            params.parent = parent;
        }
    }
}

#[derive(Clone)]
pub struct CloneEngine {
    repos: Repositories,
}

impl CloneEngine {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Copy `block`, its fields and every nested child, depth first.
    ///
    /// Children keep their own flags and are re-pointed at the copied field.
    /// The clone is not attached to any parent.
    pub async fn clone_content_block(
        &self,
        block: &BlockNode,
        overrides: CloneOverrides,
    ) -> Result<BlockRecord, AppError> {
        self.clone_node(block, overrides).await
    }

    fn clone_node<'a>(
        &'a self,
        block: &'a BlockNode,
        overrides: CloneOverrides,
    ) -> BoxFuture<'a, Result<BlockRecord, AppError>> {
        Box::pin(async move {
            let mut params = CreateBlockParams::copy_of(&block.block);
            overrides.apply(&mut params);
            let copy = self.repos.block_writes.create_block(params).await?;

            for field in &block.fields {
                let new_field = self
                    .repos
                    .block_writes
                    .create_field(CreateFieldParams {
                        block_id: copy.id,
                        template_field_id: field.field.template_field_id,
                        value: field.field.value.clone(),
                    })
                    .await?;

                if field.is_nested() {
                    for child in &field.children {
                        self.clone_node(child, CloneOverrides::parent(new_field.id))
                            .await?;
                    }
                }
            }

            debug!(source = %block.id(), clone = %copy.id, "block cloned");
            Ok(copy)
        })
    }
}
