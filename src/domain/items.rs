//! Raw content-store records and the relation-field decoder.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Relation and slug field names used by the content store collections.
pub mod fields {
    pub const SLUG: &str = "slug";
    pub const BELONGS_TO: &str = "belongs-to";
    pub const SUB_FAMILIES: &str = "sub-families";
    pub const PRODUCT_FAMILIES: &str = "product-families";
    pub const EXTRA_PRODUCTS: &str = "extra-products";
    pub const PRODUCT_FAMILY: &str = "product-family";

    /// Alternate spellings of the business-unit reference, checked in order.
    pub const BUSINESS_UNIT: [&str; 5] = [
        "business-unit",
        "business-unit-2",
        "business unit",
        "business_unit",
        "businessUnit",
    ];
}

/// One item as returned by the content store. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(rename = "fieldData", default)]
    pub field_data: Map<String, Value>,
}

impl RawItem {
    pub fn new(id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slug: Some(slug.into()),
            field_data: Map::new(),
        }
    }

    /// Builder helper used by fixtures and tests.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.field_data.insert(name.to_string(), value);
        self
    }

    /// Resolved slug: the top-level `slug`, else `fieldData.slug`, trimmed.
    /// Returns `None` when neither carries a non-blank value.
    pub fn resolved_slug(&self) -> Option<&str> {
        let top = self.slug.as_deref().map(str::trim).filter(|s| !s.is_empty());
        top.or_else(|| {
            self.field_data
                .get(fields::SLUG)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
    }

    pub fn reference(&self, name: &str) -> RefField<'_> {
        RefField::decode(self.field_data.get(name))
    }
}

/// A relation field as it arrives from the store: a bare id, an object
/// carrying an `id`, or an array of either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefField<'a> {
    Absent,
    Single(&'a str),
    Object { id: &'a str },
    ManyOf(Vec<&'a str>),
}

impl<'a> RefField<'a> {
    pub fn decode(raw: Option<&'a Value>) -> Self {
        match raw {
            Some(Value::String(id)) if !id.is_empty() => Self::Single(id),
            Some(Value::Object(object)) => match object_id(object) {
                Some(id) => Self::Object { id },
                None => Self::Absent,
            },
            Some(Value::Array(values)) => Self::ManyOf(
                values
                    .iter()
                    .filter_map(|value| match value {
                        Value::String(id) if !id.is_empty() => Some(id.as_str()),
                        Value::Object(object) => object_id(object),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => Self::Absent,
        }
    }

    pub fn ids(&self) -> Vec<&'a str> {
        match self {
            Self::Absent => Vec::new(),
            Self::Single(id) | Self::Object { id } => vec![*id],
            Self::ManyOf(ids) => ids.clone(),
        }
    }

    pub fn first(&self) -> Option<&'a str> {
        match self {
            Self::Absent => None,
            Self::Single(id) | Self::Object { id } => Some(*id),
            Self::ManyOf(ids) => ids.first().copied(),
        }
    }
}

fn object_id(object: &Map<String, Value>) -> Option<&str> {
    object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn slug_prefers_top_level_then_field_data() {
        let item: RawItem = serde_json::from_value(json!({
            "id": "a",
            "slug": "  ",
            "fieldData": { "slug": " cables " }
        }))
        .expect("item");
        assert_eq!(item.resolved_slug(), Some("cables"));

        let bare: RawItem = serde_json::from_value(json!({ "id": "b" })).expect("item");
        assert_eq!(bare.resolved_slug(), None);
    }

    #[test]
    fn decodes_every_reference_encoding() {
        let single = json!("f1");
        let object = json!({ "id": "f2", "name": "Cables" });
        let many = json!(["f3", { "id": "f4" }, "", null, { "name": "no id" }]);
        let empty = json!("");

        assert_eq!(RefField::decode(Some(&single)), RefField::Single("f1"));
        assert_eq!(
            RefField::decode(Some(&object)),
            RefField::Object { id: "f2" }
        );
        assert_eq!(RefField::decode(Some(&many)).ids(), vec!["f3", "f4"]);
        assert_eq!(RefField::decode(Some(&empty)), RefField::Absent);
        assert_eq!(RefField::decode(Some(&json!(42))), RefField::Absent);
        assert_eq!(RefField::decode(None).first(), None);
    }
}
