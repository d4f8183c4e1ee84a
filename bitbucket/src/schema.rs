use crate::provider::{ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Bool,
}

impl AttributeType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            AttributeType::String => value.is_string(),
            AttributeType::Bool => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeSchema {
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AttributeSchema {
    fn base(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            default: None,
            description: None,
        }
    }

    pub fn required(attr_type: AttributeType) -> Self {
        Self {
            required: true,
            ..Self::base(attr_type)
        }
    }

    pub fn optional(attr_type: AttributeType) -> Self {
        Self {
            optional: true,
            ..Self::base(attr_type)
        }
    }

    /// Set by the remote service, never by the caller.
    pub fn computed(attr_type: AttributeType) -> Self {
        Self {
            computed: true,
            ..Self::base(attr_type)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceSchema {
    pub attributes: BTreeMap<String, AttributeSchema>,
}

impl ResourceSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, name: impl Into<String>, schema: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), schema);
        self
    }

    /// Fill in defaults for absent optional attributes, then reject records
    /// with missing required attributes, mistyped values or undeclared keys.
    pub fn apply_defaults_and_validate(&self, data: &mut ResourceData) -> ProviderResult<()> {
        for (name, schema) in &self.attributes {
            if data.get(name).is_none() {
                if let Some(default) = &schema.default {
                    data.set(name.clone(), default.clone());
                }
            }
        }

        for (name, value) in &data.attributes {
            let Some(schema) = self.attributes.get(name) else {
                return Err(ProviderError::InvalidAttribute {
                    name: name.clone(),
                    message: "not declared by the resource schema".to_string(),
                });
            };

            if !value.is_null() && !schema.attr_type.matches(value) {
                return Err(ProviderError::InvalidAttribute {
                    name: name.clone(),
                    message: format!("expected {:?}, got {}", schema.attr_type, value),
                });
            }
        }

        for (name, schema) in &self.attributes {
            if schema.required && data.get(name).map_or(true, Value::is_null) {
                return Err(ProviderError::MissingAttribute { name: name.clone() });
            }
        }

        Ok(())
    }
}

/// The caller-owned record of one managed object.
///
/// An empty `id` means the object does not exist remotely (never created, or
/// found to be gone on the last read).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
}

impl ResourceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get_str(&self, name: &str) -> ProviderResult<&str> {
        match self.get(name) {
            None | Some(Value::Null) => Err(ProviderError::MissingAttribute {
                name: name.to_string(),
            }),
            Some(value) => value.as_str().ok_or_else(|| ProviderError::InvalidAttribute {
                name: name.to_string(),
                message: format!("expected a string, got {}", value),
            }),
        }
    }

    /// String attribute, or `""` when absent or not a string.
    pub fn get_str_or_empty(&self, name: &str) -> &str {
        self.get(name).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn get_bool(&self, name: &str) -> ProviderResult<bool> {
        match self.get(name) {
            None | Some(Value::Null) => Err(ProviderError::MissingAttribute {
                name: name.to_string(),
            }),
            Some(value) => value.as_bool().ok_or_else(|| ProviderError::InvalidAttribute {
                name: name.to_string(),
                message: format!("expected a bool, got {}", value),
            }),
        }
    }
}
