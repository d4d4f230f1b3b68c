//! Hydrated block trees.
//!
//! A [`BlockNode`] is a block together with its template and its fields, each
//! nested field carrying its child blocks. Nodes are plain values loaded per
//! operation; nothing derived from field values is memoized on them, so a
//! freshly loaded node always reflects the stored state.

use serde_json::{Map, Value};

use crate::domain::{
    entities::{BlockRecord, FieldRecord, TemplateFieldRecord, TemplateRecord},
    types::{BlockId, FieldId, FieldType},
};

#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub block: BlockRecord,
    pub template: TemplateRecord,
    /// Ordered by template field position.
    pub fields: Vec<FieldNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub field: FieldRecord,
    pub template_field: TemplateFieldRecord,
    /// Child blocks of a nested field, ordered by position.
    pub children: Vec<BlockNode>,
    /// Resolved target entity of a model-choice field.
    pub model_choice: Option<Value>,
}

/// What a field contributes to its block's context.
#[derive(Debug)]
pub enum ContextSlot<'a> {
    Value(Value),
    /// Nested children visible to templates, in order.
    Nested(Vec<&'a BlockNode>),
}

impl BlockNode {
    pub fn id(&self) -> BlockId {
        self.block.id
    }

    /// Field keys in template order.
    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(FieldNode::key).collect()
    }

    pub fn field(&self, key: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|field| field.key() == key)
    }

    pub fn field_by_id(&self, id: FieldId) -> Option<&FieldNode> {
        self.fields.iter().find(|field| field.field.id == id)
    }

    pub fn nested_fields(&self) -> impl Iterator<Item = &FieldNode> {
        self.fields.iter().filter(|field| field.is_nested())
    }

    /// Depth of the deepest nested descendant; a leaf block has depth 1.
    pub fn depth(&self) -> usize {
        1 + self
            .nested_fields()
            .flat_map(|field| field.children.iter())
            .map(BlockNode::depth)
            .max()
            .unwrap_or(0)
    }

    /// Every block id in the subtree, depth first.
    pub fn subtree_ids(&self) -> Vec<BlockId> {
        let mut ids = vec![self.id()];
        for field in self.nested_fields() {
            for child in &field.children {
                ids.extend(child.subtree_ids());
            }
        }
        ids
    }

    /// Identity-free description of the subtree: template, flags, field values
    /// and children. Two trees with equal structure render the same context.
    pub fn structure(&self) -> Value {
        let mut fields = Map::new();
        for field in &self.fields {
            let value = if field.is_nested() {
                Value::Array(field.children.iter().map(BlockNode::structure).collect())
            } else {
                field.field.value.context_value(field.model_choice.as_ref())
            };
            fields.insert(field.key().to_string(), value);
        }

        let mut out = Map::new();
        out.insert("template".into(), Value::String(self.template.name.clone()));
        out.insert("position".into(), Value::from(self.block.position));
        out.insert("visible".into(), Value::Bool(self.block.visible));
        out.insert("saved".into(), Value::Bool(self.block.saved));
        out.insert("css_class".into(), Value::String(self.block.css_class.clone()));
        out.insert("fields".into(), Value::Object(fields));
        Value::Object(out)
    }
}

impl FieldNode {
    pub fn key(&self) -> &str {
        &self.template_field.key
    }

    pub fn field_type(&self) -> FieldType {
        self.field.field_type()
    }

    pub fn is_nested(&self) -> bool {
        self.field_type().is_nested()
    }

    pub fn context_slot(&self) -> ContextSlot<'_> {
        if self.is_nested() {
            ContextSlot::Nested(
                self.children
                    .iter()
                    .filter(|child| child.block.is_nested_visible())
                    .collect(),
            )
        } else {
            ContextSlot::Value(self.field.value.context_value(self.model_choice.as_ref()))
        }
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fixtures::*;
    use super::*;
    use crate::domain::fields::FieldValue;

    fn tree() -> BlockNode {
        let card = template(2, "card");
        let section = template(1, "section");

        let mut hidden = block(11, &card, Some(FieldId(2)));
        hidden.visible = false;
        let hidden = BlockNode {
            fields: vec![field(5, &hidden, "title", FieldValue::Text("b".into()), vec![])],
            block: hidden,
            template: card.clone(),
        };
        let shown = block(10, &card, Some(FieldId(2)));
        let shown = BlockNode {
            fields: vec![field(4, &shown, "title", FieldValue::Text("a".into()), vec![])],
            block: shown,
            template: card,
        };

        let root = block(1, &section, None);
        BlockNode {
            fields: vec![
                field(1, &root, "heading", FieldValue::Text("hi".into()), vec![]),
                field(2, &root, "cards", FieldValue::Nested, vec![shown, hidden]),
            ],
            block: root,
            template: section,
        }
    }

    #[test]
    fn keys_follow_field_order() {
        assert_eq!(tree().keys(), vec!["heading", "cards"]);
    }

    #[test]
    fn nested_slot_only_exposes_visible_published_saved_children() {
        let root = tree();
        let cards = root.field("cards").unwrap();
        match cards.context_slot() {
            ContextSlot::Nested(children) => {
                assert_eq!(children.len(), 1);
                assert_eq!(children[0].id(), BlockId(10));
            }
            ContextSlot::Value(_) => panic!("nested field must expose children"),
        }
    }

    #[test]
    fn depth_and_subtree_ids_cover_children() {
        let root = tree();
        assert_eq!(root.depth(), 2);
        assert_eq!(root.subtree_ids(), vec![BlockId(1), BlockId(10), BlockId(11)]);
    }

    #[test]
    fn structure_ignores_identity() {
        let original = tree();
        let mut copy = tree();
        copy.block.id = BlockId(100);
        copy.fields[1].children[0].block.id = BlockId(101);
        assert_eq!(original.structure(), copy.structure());
        assert_eq!(
            original.structure()["fields"]["heading"],
            json!("hi"),
        );
    }
}
