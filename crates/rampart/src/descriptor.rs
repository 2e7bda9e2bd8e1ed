//! Service descriptors consumed by the policy compiler.
//!
//! The compiler only needs a small view of an RPC schema: services, their
//! methods (name, streaming flag, optional predicate text, input message) and
//! the field layout of messages. [`DescriptorSource`] is that view; [`Catalog`]
//! is a serde-loadable implementation that can be read from TOML or JSON.
//!
//! # Example (TOML)
//!
//! ```toml
//! [[services]]
//! name = "acme.library.v1.Library"
//!
//! [[services.methods]]
//! name = "CreateBook"
//! input_type = "acme.library.v1.CreateBookRequest"
//! predicate = 'hasAny(u, EDITOR, [r.parent + "/books/"])'
//!
//! [[messages]]
//! name = "acme.library.v1.CreateBookRequest"
//! fields = { parent = "string", book = "acme.library.v1.Book" }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Source of services and message schemas.
pub trait DescriptorSource: Sync {
    /// Every service exposed by the source.
    fn services(&self) -> &[ServiceDescriptor];

    /// Look up a message schema by fully-qualified name.
    fn message(&self, name: &str) -> Option<&MessageSchema>;
}

/// Key under which a method's policy is stored: `/<service>/<method>`.
#[must_use]
pub fn method_key(service: &str, method: &str) -> String {
    format!("/{service}/{method}")
}

// =============================================================================
// Field types
// =============================================================================

/// Type of a message field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Bool,
    /// Any integer kind, including enums.
    Int,
    /// `float` or `double`.
    Double,
    String,
    /// `repeated T`.
    List(Box<FieldType>),
    /// `map<string, T>`.
    Map(Box<FieldType>),
    /// Reference to another message by fully-qualified name.
    Message(String),
}

impl FieldType {
    /// The referenced message name, looking through lists and maps.
    #[must_use]
    pub fn message_name(&self) -> Option<&str> {
        match self {
            Self::Message(name) => Some(name),
            Self::List(inner) | Self::Map(inner) => inner.message_name(),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int64"),
            Self::Double => f.write_str("double"),
            Self::String => f.write_str("string"),
            Self::List(inner) => write!(f, "repeated {inner}"),
            Self::Map(inner) => write!(f, "map<string, {inner}>"),
            Self::Message(name) => f.write_str(name),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(inner) = s.strip_prefix("repeated ") {
            let inner: FieldType = inner.parse()?;
            if matches!(inner, Self::List(_) | Self::Map(_)) {
                return Err(format!("invalid field type '{s}': nested repeated or map"));
            }
            return Ok(Self::List(Box::new(inner)));
        }

        if let Some(body) = s.strip_prefix("map<").and_then(|rest| rest.strip_suffix('>')) {
            let Some((key, value)) = body.split_once(',') else {
                return Err(format!("invalid field type '{s}': expected map<string, T>"));
            };
            if key.trim() != "string" {
                return Err(format!("invalid field type '{s}': map keys must be string"));
            }
            let value: FieldType = value.parse()?;
            if matches!(value, Self::List(_) | Self::Map(_)) {
                return Err(format!("invalid field type '{s}': nested repeated or map"));
            }
            return Ok(Self::Map(Box::new(value)));
        }

        Ok(match s {
            "bool" => Self::Bool,
            "int32" | "int64" | "uint32" | "uint64" | "sint32" | "sint64" | "fixed32"
            | "fixed64" | "sfixed32" | "sfixed64" | "enum" => Self::Int,
            "float" | "double" => Self::Double,
            "string" => Self::String,
            name if is_message_name(name) => Self::Message(name.to_string()),
            other => return Err(format!("invalid field type '{other}'")),
        })
    }
}

impl TryFrom<String> for FieldType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

fn is_message_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

// =============================================================================
// Messages and services
// =============================================================================

/// Field layout of a request message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    /// Fully-qualified name, e.g. `acme.library.v1.Book`.
    pub name: String,
    #[serde(default)]
    pub fields: IndexMap<String, FieldType>,
}

impl MessageSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    /// Fully-qualified name of the request message.
    pub input_type: String,
    /// Predicate text; methods without one have no policy.
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub client_streaming: bool,
}

impl MethodDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, input_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_type: input_type.into(),
            predicate: None,
            client_streaming: false,
        }
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    #[must_use]
    pub fn client_streaming(mut self) -> Self {
        self.client_streaming = true;
        self
    }

    /// Predicate text with surrounding whitespace removed, if non-empty.
    #[must_use]
    pub fn predicate(&self) -> Option<&str> {
        self.predicate
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Fully-qualified service name, e.g. `acme.library.v1.Library`.
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Errors reading a catalog file.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse catalog '{path}': {message}")]
    Parse { path: String, message: String },
}

/// An in-memory descriptor source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default, with = "messages_as_list")]
    pub messages: IndexMap<String, MessageSchema>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: MessageSchema) -> Self {
        self.messages.insert(message.name.clone(), message);
        self
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Parse a catalog from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Load a catalog file; `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: display.clone(),
            source,
        })?;

        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text).map_err(|e| e.to_string()),
            _ => Self::from_toml(&text).map_err(|e| e.to_string()),
        };

        parsed.map_err(|message| CatalogError::Parse {
            path: display,
            message,
        })
    }
}

impl DescriptorSource for Catalog {
    fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    fn message(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.get(name)
    }
}

/// Messages are written as a list and indexed by name once loaded.
mod messages_as_list {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::MessageSchema;

    pub fn serialize<S: Serializer>(
        messages: &IndexMap<String, MessageSchema>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&MessageSchema> = messages.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<String, MessageSchema>, D::Error> {
        let list = Vec::<MessageSchema>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|m| (m.name.clone(), m)).collect())
    }
}
