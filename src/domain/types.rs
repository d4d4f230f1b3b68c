//! Shared domain identifiers and enumerations aligned with persisted columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

record_id!(
    /// Identifier of a content block row.
    BlockId
);
record_id!(
    /// Identifier of a content block field row.
    FieldId
);
record_id!(
    /// Identifier of a content block template.
    TemplateId
);
record_id!(
    /// Identifier of a template field definition.
    TemplateFieldId
);
record_id!(
    /// Identifier of a site used for per-site cache variants.
    SiteId
);

/// Closed set of field kinds a template field may declare.
///
/// The serialized names match the tags stored in the `field_type` columns and
/// in template export documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "TextField")]
    Text,
    #[serde(rename = "ContentField")]
    Content,
    #[serde(rename = "ImageField")]
    Image,
    #[serde(rename = "FileField")]
    File,
    #[serde(rename = "VideoField")]
    Video,
    #[serde(rename = "EmbeddedVideoField")]
    EmbeddedVideo,
    #[serde(rename = "CheckboxField")]
    Checkbox,
    #[serde(rename = "ChoiceField")]
    Choice,
    #[serde(rename = "ModelChoiceField")]
    ModelChoice,
    #[serde(rename = "NestedField")]
    Nested,
    #[serde(rename = "IframeField")]
    Iframe,
}

impl FieldType {
    pub const ALL: [FieldType; 11] = [
        FieldType::Text,
        FieldType::Content,
        FieldType::Image,
        FieldType::File,
        FieldType::Video,
        FieldType::EmbeddedVideo,
        FieldType::Checkbox,
        FieldType::Choice,
        FieldType::ModelChoice,
        FieldType::Nested,
        FieldType::Iframe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "TextField",
            FieldType::Content => "ContentField",
            FieldType::Image => "ImageField",
            FieldType::File => "FileField",
            FieldType::Video => "VideoField",
            FieldType::EmbeddedVideo => "EmbeddedVideoField",
            FieldType::Checkbox => "CheckboxField",
            FieldType::Choice => "ChoiceField",
            FieldType::ModelChoice => "ModelChoiceField",
            FieldType::Nested => "NestedField",
            FieldType::Iframe => "IframeField",
        }
    }

    pub fn is_nested(self) -> bool {
        matches!(self, FieldType::Nested)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| DomainError::validation(format!("unknown field type `{value}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_round_trips_through_stored_tag() {
        for field_type in FieldType::ALL {
            let parsed: FieldType = field_type.as_str().parse().expect("known tag");
            assert_eq!(parsed, field_type);
        }
    }

    #[test]
    fn unknown_field_type_is_a_validation_error() {
        let err = "RichTextField".parse::<FieldType>().unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn serde_uses_stored_tags() {
        let json = serde_json::to_string(&FieldType::EmbeddedVideo).unwrap();
        assert_eq!(json, "\"EmbeddedVideoField\"");
    }
}
