//! Template import and export keyed by natural keys.
//!
//! Templates are identified by name, template fields by `(template, key)` and
//! nested templates by name, so documents move between databases unchanged.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::application::{
    error::AppError,
    repos::{
        CreateFieldParams, Repositories, UpsertTemplateFieldParams, UpsertTemplateParams,
    },
};
use crate::cache::{BulkReport, CacheEngine};
use crate::application::filters::BlockSubset;
use crate::domain::{
    entities::validate_field_key,
    error::DomainError,
    fields::FieldValue,
    types::{FieldType, TemplateId},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    pub templates: Vec<TemplateEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub name: String,
    #[serde(default)]
    pub template_filename: String,
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub fields: Vec<TemplateFieldEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFieldEntry {
    pub key: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub help_text: String,
    #[serde(default)]
    pub css_class: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_min_num")]
    pub min_num: i32,
    #[serde(default = "default_max_num")]
    pub max_num: i32,
    /// Names of the allowed nested templates.
    #[serde(default)]
    pub nested_templates: Vec<String>,
    #[serde(default)]
    pub choices: String,
    #[serde(default)]
    pub model_choice_content_type: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_min_num() -> i32 {
    0
}

fn default_max_num() -> i32 {
    99
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub templates: usize,
    pub fields_created: usize,
    pub fields_deleted: usize,
    pub block_fields_created: usize,
    pub cache: BulkReport,
}

#[derive(Clone)]
pub struct TemplateTransfer {
    repos: Repositories,
    cache: CacheEngine,
}

impl TemplateTransfer {
    pub fn new(repos: Repositories, cache: CacheEngine) -> Self {
        Self { repos, cache }
    }

    pub async fn export(&self) -> Result<TemplateDocument, AppError> {
        let templates = self.repos.templates.list_templates().await?;
        let names: HashMap<TemplateId, String> = templates
            .iter()
            .map(|template| (template.id, template.name.clone()))
            .collect();

        let mut entries = Vec::with_capacity(templates.len());
        for template in templates {
            let mut fields = Vec::new();
            for field in self.repos.templates.list_template_fields(template.id).await? {
                let nested_templates = field
                    .nested_templates
                    .iter()
                    .map(|id| {
                        names
                            .get(id)
                            .cloned()
                            .ok_or_else(|| AppError::not_found("template", id))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                fields.push(TemplateFieldEntry {
                    key: field.key,
                    field_type: field.field_type,
                    required: field.required,
                    help_text: field.help_text,
                    css_class: field.css_class,
                    position: field.position,
                    min_num: field.min_num,
                    max_num: field.max_num,
                    nested_templates,
                    choices: field.choices,
                    model_choice_content_type: field.model_choice_content_type,
                });
            }
            entries.push(TemplateEntry {
                name: template.name,
                template_filename: template.template_filename,
                no_cache: template.no_cache,
                position: template.position,
                visible: template.visible,
                fields,
            });
        }

        Ok(TemplateDocument { templates: entries })
    }

    /// Create or update every template in `document`.
    ///
    /// Template fields missing from the document are deleted; new template
    /// fields get a blank field on every existing block of their template.
    #[instrument(skip(self, document), fields(templates = document.templates.len()))]
    pub async fn import(&self, document: &TemplateDocument) -> Result<ImportReport, AppError> {
        validate_document(document)?;

        let mut report = ImportReport::default();
        let mut ids: HashMap<String, TemplateId> = HashMap::new();
        for entry in &document.templates {
            let template = self
                .repos
                .template_writes
                .upsert_template(UpsertTemplateParams {
                    name: entry.name.clone(),
                    template_filename: entry.template_filename.clone(),
                    no_cache: entry.no_cache,
                    position: entry.position,
                    visible: entry.visible,
                })
                .await?;
            ids.insert(template.name.clone(), template.id);
            report.templates += 1;
        }

        for entry in &document.templates {
            let template_id = ids[&entry.name];
            let existing = self.repos.templates.list_template_fields(template_id).await?;
            let mut kept = HashSet::new();
            let mut created = Vec::new();

            for field in &entry.fields {
                let nested_templates = self.resolve_names(&field.nested_templates, &ids).await?;
                let upserted = self
                    .repos
                    .template_writes
                    .upsert_template_field(UpsertTemplateFieldParams {
                        template_id,
                        key: field.key.clone(),
                        field_type: field.field_type,
                        required: field.required,
                        help_text: field.help_text.clone(),
                        css_class: field.css_class.clone(),
                        position: field.position,
                        min_num: field.min_num,
                        max_num: field.max_num,
                        nested_templates,
                        choices: field.choices.clone(),
                        model_choice_content_type: field.model_choice_content_type.clone(),
                    })
                    .await?;
                kept.insert(upserted.field.id);
                if upserted.created {
                    created.push(upserted.field);
                }
            }

            let stale: Vec<_> = existing
                .iter()
                .filter(|field| !kept.contains(&field.id))
                .map(|field| field.id)
                .collect();
            if !stale.is_empty() {
                self.repos.template_writes.delete_template_fields(&stale).await?;
                report.fields_deleted += stale.len();
            }

            if !created.is_empty() {
                let blocks = self
                    .repos
                    .blocks
                    .blocks_with_templates(&[template_id])
                    .await?;
                for definition in &created {
                    for block in &blocks {
                        self.repos
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
                        report.block_fields_created += 1;
                    }
                }
                report.fields_created += created.len();
            }
        }

        report.cache = self.cache.set_cache_all(&BlockSubset::all()).await?;
        info!(
            templates = report.templates,
            fields_created = report.fields_created,
            fields_deleted = report.fields_deleted,
            "templates imported"
        );
        Ok(report)
    }

    async fn resolve_names(
        &self,
        names: &[String],
        imported: &HashMap<String, TemplateId>,
    ) -> Result<Vec<TemplateId>, AppError> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let id = match imported.get(name) {
                Some(id) => *id,
                None => self
                    .repos
                    .templates
                    .find_template_by_name(name)
                    .await?
                    .map(|template| template.id)
                    .ok_or_else(|| AppError::not_found("template", name))?,
            };
            resolved.push(id);
        }
        Ok(resolved)
    }
}

fn validate_document(document: &TemplateDocument) -> Result<(), DomainError> {
    let mut names = HashSet::new();
    for entry in &document.templates {
        if entry.name.trim().is_empty() {
            return Err(DomainError::validation("template name must not be empty"));
        }
        if !names.insert(entry.name.as_str()) {
            return Err(DomainError::validation(format!(
                "template `{}` appears more than once",
                entry.name
            )));
        }

        let mut keys = HashSet::new();
        for field in &entry.fields {
            validate_field_key(&field.key)?;
            if !keys.insert(field.key.as_str()) {
                return Err(DomainError::validation(format!(
                    "template `{}` declares field `{}` twice",
                    entry.name, field.key
                )));
            }
            if field.field_type.is_nested()
                && (field.min_num < 0 || field.max_num < field.min_num)
            {
                return Err(DomainError::validation(format!(
                    "field `{}` needs 0 <= min_num <= max_num",
                    field.key
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, keys: &[&str]) -> TemplateEntry {
        TemplateEntry {
            name: name.to_string(),
            template_filename: format!("{name}.html"),
            no_cache: false,
            position: 0,
            visible: true,
            fields: keys
                .iter()
                .map(|key| TemplateFieldEntry {
                    key: key.to_string(),
                    field_type: FieldType::Text,
                    required: false,
                    help_text: String::new(),
                    css_class: String::new(),
                    position: 0,
                    min_num: 0,
                    max_num: 99,
                    nested_templates: Vec::new(),
                    choices: String::new(),
                    model_choice_content_type: None,
                })
                .collect(),
        }
    }

    #[test]
    fn document_defaults_fill_optional_columns() {
        let document: TemplateDocument = serde_json::from_str(
            r#"{"templates": [{"name": "Text", "fields": [{"key": "body", "field_type": "ContentField"}]}]}"#,
        )
        .unwrap();
        let template = &document.templates[0];
        assert!(template.visible);
        assert_eq!(template.fields[0].field_type, FieldType::Content);
        assert_eq!(template.fields[0].max_num, 99);
    }

    #[test]
    fn rejects_bad_keys_and_duplicates() {
        let bad_key = TemplateDocument {
            templates: vec![entry("Text", &["Body"])],
        };
        assert!(validate_document(&bad_key).is_err());

        let duplicate_key = TemplateDocument {
            templates: vec![entry("Text", &["body", "body"])],
        };
        assert!(validate_document(&duplicate_key).is_err());

        let duplicate_template = TemplateDocument {
            templates: vec![entry("Text", &[]), entry("Text", &[])],
        };
        assert!(validate_document(&duplicate_template).is_err());

        let valid = TemplateDocument {
            templates: vec![entry("Text", &["body", "title_2"])],
        };
        assert!(validate_document(&valid).is_ok());
    }
}
