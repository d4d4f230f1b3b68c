//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{
    error::DomainError,
    fields::FieldValue,
    types::{BlockId, FieldId, FieldType, SiteId, TemplateFieldId, TemplateId},
};

/// Maximum length of a template field key.
pub const MAX_FIELD_KEY_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub name: String,
    pub template_filename: String,
    pub no_cache: bool,
    pub position: i32,
    pub visible: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TemplateRecord {
    /// Returns the configured filename when one is set.
    pub fn filename(&self) -> Option<&str> {
        let trimmed = self.template_filename.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateFieldRecord {
    pub id: TemplateFieldId,
    pub template_id: TemplateId,
    pub key: String,
    pub field_type: FieldType,
    pub required: bool,
    pub help_text: String,
    pub css_class: String,
    pub position: i32,
    /// Nested fields only.
    pub min_num: i32,
    pub max_num: i32,
    pub nested_templates: Vec<TemplateId>,
    /// Choice fields only: JSON list of `[value, label]` pairs.
    pub choices: String,
    /// Model-choice fields only: the target entity kind.
    pub model_choice_content_type: Option<String>,
}

impl TemplateFieldRecord {
    /// Parse the configured `[value, label]` pairs.
    pub fn choice_pairs(&self) -> Result<Vec<(String, String)>, DomainError> {
        if self.choices.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&self.choices).map_err(|err| {
            DomainError::validation(format!(
                "choices for field `{}` must be a JSON list of [value, label] pairs: {err}",
                self.key
            ))
        })
    }

    /// Whether a nested template may be placed in this field.
    pub fn allows_nested_template(&self, template: TemplateId) -> bool {
        self.nested_templates.is_empty() || self.nested_templates.contains(&template)
    }
}

/// Validate a template field key: lowercase letters, digits and underscores.
pub fn validate_field_key(key: &str) -> Result<(), DomainError> {
    if key.is_empty() {
        return Err(DomainError::validation("field key must not be empty"));
    }
    if key.len() > MAX_FIELD_KEY_LEN {
        return Err(DomainError::validation(format!(
            "field key `{key}` exceeds {MAX_FIELD_KEY_LEN} characters"
        )));
    }
    if !key
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
    {
        return Err(DomainError::validation(format!(
            "field key `{key}` may only contain lowercase letters, numbers and underscores"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockRecord {
    pub id: BlockId,
    pub template_id: TemplateId,
    /// Owning nested field; `None` for top-level blocks.
    pub parent: Option<FieldId>,
    pub name: String,
    pub position: i32,
    pub visible: bool,
    pub draft: bool,
    /// Set once the block has been saved through the editor.
    pub saved: bool,
    pub css_class: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl BlockRecord {
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Visible published blocks, as rendered on public pages.
    pub fn is_visible_published(&self) -> bool {
        self.visible && !self.draft
    }

    /// Visible drafts that went through the editor; used for previews.
    pub fn is_preview(&self) -> bool {
        self.visible && self.draft && self.saved
    }

    /// Children exposed through a nested field's context.
    pub fn is_nested_visible(&self) -> bool {
        self.visible && !self.draft && self.saved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldRecord {
    pub id: FieldId,
    pub block_id: BlockId,
    pub template_field_id: TemplateFieldId,
    pub value: FieldValue,
}

impl FieldRecord {
    pub fn field_type(&self) -> FieldType {
        self.value.field_type()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub domain: String,
    pub name: String,
}

/// Reference to a persisted entity owning a collection of top-level blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: String,
    pub id: i64,
}

impl ParentRef {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// How a parent relates to sites.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SiteRelation {
    /// The parent kind has no site relation.
    #[default]
    Absent,
    /// A single, possibly unset, site reference.
    Single(Option<Site>),
    /// A multi-valued site relation.
    Many(Vec<Site>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParentRecord {
    pub parent: ParentRef,
    pub name: String,
    pub slug: String,
    pub sites: SiteRelation,
}
