//! In-process repositories.
//!
//! Implements every repository trait over plain collections behind one lock.
//! Used by tests and by tooling that works on exported documents without a
//! database.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::application::repos::{
    BlocksRepo, BlocksWriteRepo, CreateBlockParams, CreateFieldParams, ParentsRepo, RepoError,
    TemplatesRepo, TemplatesWriteRepo, UpsertTemplateFieldParams, UpsertTemplateParams,
    UpsertedTemplateField,
};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{
    BlockRecord, FieldRecord, ParentRecord, ParentRef, Site, SiteRelation, TemplateFieldRecord,
    TemplateRecord,
};
use crate::domain::types::{BlockId, FieldId, SiteId, TemplateFieldId, TemplateId};

const SOURCE: &str = "infra::memory";

struct StoredParent {
    record: ParentRecord,
    blocks: Vec<BlockId>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    templates: BTreeMap<TemplateId, TemplateRecord>,
    template_fields: BTreeMap<TemplateFieldId, TemplateFieldRecord>,
    blocks: BTreeMap<BlockId, BlockRecord>,
    fields: BTreeMap<FieldId, FieldRecord>,
    parents: Vec<StoredParent>,
    sites: BTreeMap<SiteId, Site>,
    model_choices: HashMap<(String, i64), Value>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn parent_mut(&mut self, parent: &ParentRef) -> Option<&mut StoredParent> {
        self.parents
            .iter_mut()
            .find(|stored| stored.record.parent == *parent)
    }

    /// `roots` plus every nested descendant.
    fn subtree(&self, roots: &[BlockId]) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<BlockId> = roots.to_vec();
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            let owned_fields: BTreeSet<FieldId> = self
                .fields
                .values()
                .filter(|field| field.block_id == id)
                .map(|field| field.id)
                .collect();
            pending.extend(
                self.blocks
                    .values()
                    .filter(|block| block.parent.is_some_and(|parent| owned_fields.contains(&parent)))
                    .map(|block| block.id),
            );
        }
        seen
    }
}

#[derive(Default)]
pub struct InMemoryRepositories {
    state: RwLock<MemoryState>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_site(&self, domain: &str, name: &str) -> Site {
        let mut state = rw_write(&self.state, SOURCE, "add_site");
        let site = Site {
            id: SiteId(state.next_id()),
            domain: domain.to_string(),
            name: name.to_string(),
        };
        state.sites.insert(site.id, site.clone());
        site
    }

    pub fn add_parent(&self, kind: &str, name: &str, slug: &str, sites: SiteRelation) -> ParentRef {
        let mut state = rw_write(&self.state, SOURCE, "add_parent");
        let parent = ParentRef::new(kind, state.next_id());
        state.parents.push(StoredParent {
            record: ParentRecord {
                parent: parent.clone(),
                name: name.to_string(),
                slug: slug.to_string(),
                sites,
            },
            blocks: Vec::new(),
        });
        parent
    }

    /// Register the template-facing value of a model-choice target.
    pub fn set_model_choice(&self, content_type: &str, object_id: i64, value: Value) {
        rw_write(&self.state, SOURCE, "set_model_choice")
            .model_choices
            .insert((content_type.to_string(), object_id), value);
    }

    /// Point a block at another nested field, bypassing validation.
    pub fn set_block_parent(&self, block: BlockId, parent: Option<FieldId>) {
        if let Some(record) = rw_write(&self.state, SOURCE, "set_block_parent")
            .blocks
            .get_mut(&block)
        {
            record.parent = parent;
        }
    }

    pub fn block_count(&self) -> usize {
        rw_read(&self.state, SOURCE, "block_count").blocks.len()
    }

    pub fn field_count(&self) -> usize {
        rw_read(&self.state, SOURCE, "field_count").fields.len()
    }
}

#[async_trait]
impl BlocksRepo for InMemoryRepositories {
    async fn find_block(&self, id: BlockId) -> Result<Option<BlockRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_block")
            .blocks
            .get(&id)
            .cloned())
    }

    async fn list_fields(&self, block: BlockId) -> Result<Vec<FieldRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_fields")
            .fields
            .values()
            .filter(|field| field.block_id == block)
            .cloned()
            .collect())
    }

    async fn find_field(&self, id: FieldId) -> Result<Option<FieldRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_field")
            .fields
            .get(&id)
            .cloned())
    }

    async fn list_children(&self, field: FieldId) -> Result<Vec<BlockRecord>, RepoError> {
        let state = rw_read(&self.state, SOURCE, "list_children");
        let mut children: Vec<BlockRecord> = state
            .blocks
            .values()
            .filter(|block| block.parent == Some(field))
            .cloned()
            .collect();
        children.sort_by_key(|block| (block.position, block.id));
        Ok(children)
    }

    async fn blocks_with_templates(
        &self,
        templates: &[TemplateId],
    ) -> Result<Vec<BlockRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "blocks_with_templates")
            .blocks
            .values()
            .filter(|block| templates.contains(&block.template_id))
            .cloned()
            .collect())
    }

    async fn blocks_referencing(
        &self,
        content_type: &str,
        object_id: i64,
    ) -> Result<Vec<BlockId>, RepoError> {
        let state = rw_read(&self.state, SOURCE, "blocks_referencing");
        let ids: BTreeSet<BlockId> = state
            .fields
            .values()
            .filter(|field| field.value.model_choice_target() == Some((content_type, object_id)))
            .map(|field| field.block_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn resolve_model_choice(
        &self,
        content_type: &str,
        object_id: i64,
    ) -> Result<Option<Value>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "resolve_model_choice")
            .model_choices
            .get(&(content_type.to_string(), object_id))
            .cloned())
    }
}

#[async_trait]
impl BlocksWriteRepo for InMemoryRepositories {
    async fn create_block(&self, params: CreateBlockParams) -> Result<BlockRecord, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "create_block");
        if !state.templates.contains_key(&params.template_id) {
            return Err(RepoError::integrity(format!(
                "template {} does not exist",
                params.template_id
            )));
        }
        if let Some(parent) = params.parent
            && !state.fields.contains_key(&parent)
        {
            return Err(RepoError::integrity(format!("field {parent} does not exist")));
        }

        let now = OffsetDateTime::now_utc();
        let block = BlockRecord {
            id: BlockId(state.next_id()),
            template_id: params.template_id,
            parent: params.parent,
            name: params.name,
            position: params.position,
            visible: params.visible,
            draft: params.draft,
            saved: params.saved,
            css_class: params.css_class,
            created_at: now,
            updated_at: now,
        };
        state.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    async fn update_block(&self, block: &BlockRecord) -> Result<BlockRecord, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "update_block");
        let stored = state.blocks.get_mut(&block.id).ok_or(RepoError::NotFound)?;
        *stored = BlockRecord {
            updated_at: OffsetDateTime::now_utc(),
            created_at: stored.created_at,
            ..block.clone()
        };
        Ok(stored.clone())
    }

    async fn create_field(&self, params: CreateFieldParams) -> Result<FieldRecord, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "create_field");
        if !state.blocks.contains_key(&params.block_id) {
            return Err(RepoError::integrity(format!(
                "block {} does not exist",
                params.block_id
            )));
        }
        let definition = state
            .template_fields
            .get(&params.template_field_id)
            .ok_or_else(|| {
                RepoError::integrity(format!(
                    "template field {} does not exist",
                    params.template_field_id
                ))
            })?;
        if definition.field_type != params.value.field_type() {
            return Err(RepoError::InvalidInput {
                message: format!(
                    "field value {} does not match template field type {}",
                    params.value.field_type(),
                    definition.field_type
                ),
            });
        }

        let field = FieldRecord {
            id: FieldId(state.next_id()),
            block_id: params.block_id,
            template_field_id: params.template_field_id,
            value: params.value,
        };
        state.fields.insert(field.id, field.clone());
        Ok(field)
    }

    async fn update_field(&self, field: &FieldRecord) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "update_field");
        let stored = state.fields.get_mut(&field.id).ok_or(RepoError::NotFound)?;
        if stored.field_type() != field.field_type() {
            return Err(RepoError::InvalidInput {
                message: format!("field {} cannot change its type", field.id),
            });
        }
        *stored = field.clone();
        Ok(())
    }

    async fn delete_blocks(&self, ids: &[BlockId]) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "delete_blocks");
        let doomed = state.subtree(ids);
        state.blocks.retain(|id, _| !doomed.contains(id));
        state.fields.retain(|_, field| !doomed.contains(&field.block_id));
        for parent in &mut state.parents {
            parent.blocks.retain(|id| !doomed.contains(id));
        }
        Ok(())
    }
}

#[async_trait]
impl TemplatesRepo for InMemoryRepositories {
    async fn find_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_template")
            .templates
            .get(&id)
            .cloned())
    }

    async fn find_template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<TemplateRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_template_by_name")
            .templates
            .values()
            .find(|template| template.name == name)
            .cloned())
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRecord>, RepoError> {
        let mut templates: Vec<TemplateRecord> = rw_read(&self.state, SOURCE, "list_templates")
            .templates
            .values()
            .cloned()
            .collect();
        templates.sort_by(|a, b| (a.position, &a.name).cmp(&(b.position, &b.name)));
        Ok(templates)
    }

    async fn templates_with_filename(
        &self,
        filename: &str,
    ) -> Result<Vec<TemplateRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "templates_with_filename")
            .templates
            .values()
            .filter(|template| template.filename() == Some(filename))
            .cloned()
            .collect())
    }

    async fn list_template_fields(
        &self,
        template: TemplateId,
    ) -> Result<Vec<TemplateFieldRecord>, RepoError> {
        let mut fields: Vec<TemplateFieldRecord> =
            rw_read(&self.state, SOURCE, "list_template_fields")
                .template_fields
                .values()
                .filter(|field| field.template_id == template)
                .cloned()
                .collect();
        fields.sort_by_key(|field| (field.position, field.id));
        Ok(fields)
    }

    async fn find_template_field(
        &self,
        id: TemplateFieldId,
    ) -> Result<Option<TemplateFieldRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_template_field")
            .template_fields
            .get(&id)
            .cloned())
    }
}

#[async_trait]
impl TemplatesWriteRepo for InMemoryRepositories {
    async fn upsert_template(
        &self,
        params: UpsertTemplateParams,
    ) -> Result<TemplateRecord, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "upsert_template");
        let now = OffsetDateTime::now_utc();
        let existing = state
            .templates
            .values()
            .find(|template| template.name == params.name)
            .map(|template| (template.id, template.created_at));
        let (id, created_at) = match existing {
            Some(found) => found,
            None => (TemplateId(state.next_id()), now),
        };

        let template = TemplateRecord {
            id,
            name: params.name,
            template_filename: params.template_filename,
            no_cache: params.no_cache,
            position: params.position,
            visible: params.visible,
            created_at,
            updated_at: now,
        };
        state.templates.insert(id, template.clone());
        Ok(template)
    }

    async fn upsert_template_field(
        &self,
        params: UpsertTemplateFieldParams,
    ) -> Result<UpsertedTemplateField, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "upsert_template_field");
        if !state.templates.contains_key(&params.template_id) {
            return Err(RepoError::integrity(format!(
                "template {} does not exist",
                params.template_id
            )));
        }
        let existing = state
            .template_fields
            .values()
            .find(|field| field.template_id == params.template_id && field.key == params.key)
            .map(|field| (field.id, field.field_type));

        let id = match existing {
            Some((_, field_type)) if field_type != params.field_type => {
                return Err(RepoError::InvalidInput {
                    message: format!(
                        "template field `{}` cannot change type from {field_type} to {}",
                        params.key, params.field_type
                    ),
                });
            }
            Some((id, _)) => id,
            None => TemplateFieldId(state.next_id()),
        };

        let field = TemplateFieldRecord {
            id,
            template_id: params.template_id,
            key: params.key,
            field_type: params.field_type,
            required: params.required,
            help_text: params.help_text,
            css_class: params.css_class,
            position: params.position,
            min_num: params.min_num,
            max_num: params.max_num,
            nested_templates: params.nested_templates,
            choices: params.choices,
            model_choice_content_type: params.model_choice_content_type,
        };
        state.template_fields.insert(id, field.clone());
        Ok(UpsertedTemplateField {
            field,
            created: existing.is_none(),
        })
    }

    async fn delete_template_fields(&self, ids: &[TemplateFieldId]) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "delete_template_fields");
        let owned: Vec<FieldId> = state
            .fields
            .values()
            .filter(|field| ids.contains(&field.template_field_id))
            .map(|field| field.id)
            .collect();
        let orphaned: Vec<BlockId> = state
            .blocks
            .values()
            .filter(|block| block.parent.is_some_and(|parent| owned.contains(&parent)))
            .map(|block| block.id)
            .collect();
        let doomed = state.subtree(&orphaned);

        state.blocks.retain(|id, _| !doomed.contains(id));
        state
            .fields
            .retain(|id, field| !owned.contains(id) && !doomed.contains(&field.block_id));
        state.template_fields.retain(|id, _| !ids.contains(id));
        Ok(())
    }
}

#[async_trait]
impl ParentsRepo for InMemoryRepositories {
    async fn list_parents(&self, kind: &str) -> Result<Vec<ParentRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_parents")
            .parents
            .iter()
            .filter(|stored| stored.record.parent.kind == kind)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn find_parent(&self, parent: &ParentRef) -> Result<Option<ParentRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_parent")
            .parents
            .iter()
            .find(|stored| stored.record.parent == *parent)
            .map(|stored| stored.record.clone()))
    }

    async fn parent_blocks(&self, parent: &ParentRef) -> Result<Vec<BlockRecord>, RepoError> {
        let state = rw_read(&self.state, SOURCE, "parent_blocks");
        let Some(stored) = state
            .parents
            .iter()
            .find(|stored| stored.record.parent == *parent)
        else {
            return Ok(Vec::new());
        };
        let mut blocks: Vec<BlockRecord> = stored
            .blocks
            .iter()
            .filter_map(|id| state.blocks.get(id).cloned())
            .collect();
        blocks.sort_by_key(|block| (block.position, block.id));
        Ok(blocks)
    }

    async fn parents_of_block(&self, block: BlockId) -> Result<Vec<ParentRef>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "parents_of_block")
            .parents
            .iter()
            .filter(|stored| stored.blocks.contains(&block))
            .map(|stored| stored.record.parent.clone())
            .collect())
    }

    async fn attach_block(&self, parent: &ParentRef, block: BlockId) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "attach_block");
        if !state.blocks.contains_key(&block) {
            return Err(RepoError::integrity(format!("block {block} does not exist")));
        }
        let stored = state.parent_mut(parent).ok_or(RepoError::NotFound)?;
        if !stored.blocks.contains(&block) {
            stored.blocks.push(block);
        }
        Ok(())
    }

    async fn delete_parent(&self, parent: &ParentRef) -> Result<(), RepoError> {
        rw_write(&self.state, SOURCE, "delete_parent")
            .parents
            .retain(|stored| stored.record.parent != *parent);
        Ok(())
    }
}
