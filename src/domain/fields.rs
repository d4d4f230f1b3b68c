//! Field values as a closed sum over [`FieldType`].
//!
//! Persistence stores one wide row per field; the domain only ever sees the
//! payload that matches the field's type, so the type tag cannot drift from
//! the value it describes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{entities::TemplateFieldRecord, error::DomainError, types::FieldType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Text(String),
    Content(String),
    Image(Option<String>),
    File(Option<String>),
    Video(Option<String>),
    EmbeddedVideo(String),
    Checkbox(bool),
    Choice(String),
    ModelChoice {
        content_type: Option<String>,
        object_id: Option<i64>,
    },
    Nested,
    Iframe(String),
}

impl FieldValue {
    /// Blank value for a freshly created field of the given type.
    pub fn empty(field_type: FieldType, model_choice_content_type: Option<String>) -> Self {
        match field_type {
            FieldType::Text => FieldValue::Text(String::new()),
            FieldType::Content => FieldValue::Content(String::new()),
            FieldType::Image => FieldValue::Image(None),
            FieldType::File => FieldValue::File(None),
            FieldType::Video => FieldValue::Video(None),
            FieldType::EmbeddedVideo => FieldValue::EmbeddedVideo(String::new()),
            FieldType::Checkbox => FieldValue::Checkbox(false),
            FieldType::Choice => FieldValue::Choice(String::new()),
            FieldType::ModelChoice => FieldValue::ModelChoice {
                content_type: model_choice_content_type,
                object_id: None,
            },
            FieldType::Nested => FieldValue::Nested,
            FieldType::Iframe => FieldValue::Iframe(String::new()),
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Content(_) => FieldType::Content,
            FieldValue::Image(_) => FieldType::Image,
            FieldValue::File(_) => FieldType::File,
            FieldValue::Video(_) => FieldType::Video,
            FieldValue::EmbeddedVideo(_) => FieldType::EmbeddedVideo,
            FieldValue::Checkbox(_) => FieldType::Checkbox,
            FieldValue::Choice(_) => FieldType::Choice,
            FieldValue::ModelChoice { .. } => FieldType::ModelChoice,
            FieldValue::Nested => FieldType::Nested,
            FieldValue::Iframe(_) => FieldType::Iframe,
        }
    }

    /// Assign an editor-supplied value, keeping the field's type fixed.
    pub fn assign(
        &mut self,
        input: &Value,
        template_field: &TemplateFieldRecord,
    ) -> Result<(), DomainError> {
        if template_field.field_type != self.field_type() {
            return Err(DomainError::invariant(format!(
                "field `{}` is stored as {} but its template declares {}",
                template_field.key,
                self.field_type(),
                template_field.field_type
            )));
        }

        match self {
            FieldValue::Text(slot)
            | FieldValue::Content(slot)
            | FieldValue::EmbeddedVideo(slot)
            | FieldValue::Iframe(slot) => {
                let text = expect_text(input, template_field)?;
                if template_field.required && text.trim().is_empty() {
                    return Err(required(template_field));
                }
                *slot = text;
            }
            FieldValue::Choice(slot) => {
                let choice = expect_text(input, template_field)?;
                if choice.is_empty() {
                    if template_field.required {
                        return Err(required(template_field));
                    }
                } else if !template_field
                    .choice_pairs()?
                    .iter()
                    .any(|(value, _)| *value == choice)
                {
                    return Err(DomainError::validation(format!(
                        "`{choice}` is not a valid choice for field `{}`",
                        template_field.key
                    )));
                }
                *slot = choice;
            }
            FieldValue::Checkbox(slot) => match input {
                Value::Bool(checked) => *slot = *checked,
                Value::Null => *slot = false,
                _ => return Err(mismatch(template_field, "a boolean")),
            },
            FieldValue::Image(slot) | FieldValue::File(slot) | FieldValue::Video(slot) => {
                match input {
                    Value::String(path) if !path.is_empty() => *slot = Some(path.clone()),
                    Value::String(_) | Value::Null | Value::Bool(false) => {
                        if template_field.required {
                            return Err(required(template_field));
                        }
                        *slot = None;
                    }
                    _ => return Err(mismatch(template_field, "a stored file path")),
                }
            }
            FieldValue::ModelChoice { object_id, .. } => match input {
                Value::Number(number) => {
                    let id = number
                        .as_i64()
                        .ok_or_else(|| mismatch(template_field, "an integer object id"))?;
                    *object_id = Some(id);
                }
                Value::Null => {
                    if template_field.required {
                        return Err(required(template_field));
                    }
                    // The content type stays so the field remains resolvable.
                    *object_id = None;
                }
                _ => return Err(mismatch(template_field, "an integer object id")),
            },
            FieldValue::Nested => {}
        }

        Ok(())
    }

    /// Template-facing value for every type except nested fields, whose
    /// context is built from their child blocks.
    pub fn context_value(&self, resolved_model_choice: Option<&Value>) -> Value {
        match self {
            FieldValue::Text(text)
            | FieldValue::Content(text)
            | FieldValue::EmbeddedVideo(text)
            | FieldValue::Choice(text)
            | FieldValue::Iframe(text) => Value::String(text.clone()),
            FieldValue::Image(path) | FieldValue::File(path) | FieldValue::Video(path) => path
                .as_ref()
                .map(|path| Value::String(path.clone()))
                .unwrap_or(Value::Null),
            FieldValue::Checkbox(checked) => Value::Bool(*checked),
            FieldValue::ModelChoice { .. } => resolved_model_choice.cloned().unwrap_or(Value::Null),
            FieldValue::Nested => Value::Array(Vec::new()),
        }
    }

    /// The referenced entity of a model-choice field, when set.
    pub fn model_choice_target(&self) -> Option<(&str, i64)> {
        match self {
            FieldValue::ModelChoice {
                content_type: Some(content_type),
                object_id: Some(object_id),
            } => Some((content_type.as_str(), *object_id)),
            _ => None,
        }
    }
}

fn expect_text(input: &Value, template_field: &TemplateFieldRecord) -> Result<String, DomainError> {
    match input {
        Value::String(text) => Ok(text.clone()),
        Value::Null => Ok(String::new()),
        _ => Err(mismatch(template_field, "a string")),
    }
}

fn mismatch(template_field: &TemplateFieldRecord, expected: &str) -> DomainError {
    DomainError::validation(format!(
        "field `{}` ({}) expects {expected}",
        template_field.key, template_field.field_type
    ))
}

fn required(template_field: &TemplateFieldRecord) -> DomainError {
    DomainError::validation(format!("field `{}` is required", template_field.key))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::types::{TemplateFieldId, TemplateId};

    fn template_field(key: &str, field_type: FieldType) -> TemplateFieldRecord {
        TemplateFieldRecord {
            id: TemplateFieldId(1),
            template_id: TemplateId(1),
            key: key.to_string(),
            field_type,
            required: false,
            help_text: String::new(),
            css_class: String::new(),
            position: 0,
            min_num: 0,
            max_num: 99,
            nested_templates: Vec::new(),
            choices: String::new(),
            model_choice_content_type: None,
        }
    }

    #[test]
    fn empty_value_matches_every_type() {
        for field_type in FieldType::ALL {
            assert_eq!(FieldValue::empty(field_type, None).field_type(), field_type);
        }
    }

    #[test]
    fn text_assignment_and_context() {
        let definition = template_field("title", FieldType::Text);
        let mut value = FieldValue::empty(FieldType::Text, None);
        value.assign(&json!("hello"), &definition).unwrap();
        assert_eq!(value.context_value(None), json!("hello"));
    }

    #[test]
    fn assignment_rejects_mismatched_json() {
        let definition = template_field("flag", FieldType::Checkbox);
        let mut value = FieldValue::empty(FieldType::Checkbox, None);
        let err = value.assign(&json!("yes"), &definition).unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn assignment_refuses_to_change_type() {
        let definition = template_field("title", FieldType::Content);
        let mut value = FieldValue::empty(FieldType::Text, None);
        let err = value.assign(&json!("x"), &definition).unwrap_err();
        assert!(matches!(err, DomainError::Invariant { .. }));
        assert_eq!(value.field_type(), FieldType::Text);
    }

    #[test]
    fn false_clears_file_slots() {
        let definition = template_field("hero", FieldType::Image);
        let mut value = FieldValue::Image(Some("content-blocks/images/a.png".to_string()));
        value.assign(&json!(false), &definition).unwrap();
        assert_eq!(value, FieldValue::Image(None));
        assert_eq!(value.context_value(None), Value::Null);
    }

    #[test]
    fn choice_must_be_declared() {
        let mut definition = template_field("colour", FieldType::Choice);
        definition.choices = r#"[["red", "Red"]]"#.to_string();
        let mut value = FieldValue::empty(FieldType::Choice, None);

        value.assign(&json!("red"), &definition).unwrap();
        assert!(value.assign(&json!("green"), &definition).is_err());
        value.assign(&json!(""), &definition).unwrap();

        definition.required = true;
        assert!(value.assign(&json!(""), &definition).is_err());
    }

    #[test]
    fn clearing_model_choice_keeps_content_type() {
        let definition = template_field("author", FieldType::ModelChoice);
        let mut value = FieldValue::empty(FieldType::ModelChoice, Some("author".to_string()));
        value.assign(&json!(12), &definition).unwrap();
        assert_eq!(value.model_choice_target(), Some(("author", 12)));

        value.assign(&Value::Null, &definition).unwrap();
        assert_eq!(
            value,
            FieldValue::ModelChoice {
                content_type: Some("author".to_string()),
                object_id: None
            }
        );
    }

    #[test]
    fn model_choice_context_uses_resolved_entity() {
        let value = FieldValue::ModelChoice {
            content_type: Some("author".to_string()),
            object_id: Some(3),
        };
        let resolved = json!({"id": 3, "name": "Ada"});
        assert_eq!(value.context_value(Some(&resolved)), resolved);
        assert_eq!(value.context_value(None), Value::Null);
    }

    #[test]
    fn required_text_rejects_blank() {
        let mut definition = template_field("title", FieldType::Text);
        definition.required = true;
        let mut value = FieldValue::empty(FieldType::Text, None);
        assert!(value.assign(&json!("   "), &definition).is_err());
    }
}
