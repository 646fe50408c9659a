//! Tool contracts: declared parameters in, validated descriptors out.
//!
//! Tools describe themselves with a [`ToolSpec`], a plain declaration that
//! can be assembled with the builder methods or deserialised from JSON.
//! [`ToolSpec::build`] derives the [`ToolDescriptor`] the registry stores:
//!
//! - parameter order is declaration order;
//! - a parameter is required exactly when it has no default (an
//!   `optional<T>` parameter without a default defaults to `null`);
//! - declared type names map onto [`SchemaType`]; anything else is a
//!   registration-time [`SchemaError`].
//!
//! Deriving a descriptor never invokes the handler.
//!
//! # Type names
//!
//! | declared                          | schema type        |
//! |-----------------------------------|--------------------|
//! | `string`, `str`                   | string             |
//! | `integer`, `int`                  | integer            |
//! | `float`, `number`                 | float              |
//! | `boolean`, `bool`                 | boolean            |
//! | `enum(a\|b\|c)`                   | enumerated literal |
//! | `object`, `dict`                  | object             |
//! | `array<T>`, `list<T>`             | array              |
//! | `null`, `none`                    | null               |
//! | `optional<T>`, `T?`               | optional           |

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use crate::error::SchemaError;
use crate::mcp::handler::{ResourceHandler, ToolHandler};

/// The fixed set of types a tool contract can use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaType {
    /// A JSON string.
    String,
    /// A signed 64-bit integer.
    Integer,
    /// A floating-point number.
    Float,
    /// `true` or `false`.
    Boolean,
    /// One string out of a closed set.
    Enum(Vec<String>),
    /// A JSON object with arbitrary members.
    Object,
    /// A homogeneous list.
    Array(Box<SchemaType>),
    /// The JSON `null` value.
    Null,
    /// `null` or the inner type.
    Optional(Box<SchemaType>),
}

impl SchemaType {
    /// Maps a declared type name onto a schema type.
    ///
    /// Returns `None` when the name has no equivalent.
    #[must_use]
    pub fn parse(declared: &str) -> Option<Self> {
        let s = declared.trim();

        if let Some(inner) = s.strip_suffix('?') {
            return Self::optional(Self::parse(inner)?);
        }
        if let Some(inner) = wrapped(s, "optional", '<', '>') {
            return Self::optional(Self::parse(inner)?);
        }
        if let Some(inner) = wrapped(s, "array", '<', '>').or_else(|| wrapped(s, "list", '<', '>'))
        {
            return Some(Self::Array(Box::new(Self::parse(inner)?)));
        }
        if let Some(body) = wrapped(s, "enum", '(', ')') {
            let variants: Vec<String> = body.split('|').map(|v| v.trim().to_string()).collect();
            if variants.iter().any(String::is_empty) {
                return None;
            }
            return Some(Self::Enum(variants));
        }

        match s.to_ascii_lowercase().as_str() {
            "string" | "str" => Some(Self::String),
            "integer" | "int" => Some(Self::Integer),
            "float" | "number" => Some(Self::Float),
            "boolean" | "bool" => Some(Self::Boolean),
            "object" | "dict" => Some(Self::Object),
            "array" | "list" => Some(Self::Array(Box::new(Self::Object))),
            "null" | "none" => Some(Self::Null),
            _ => None,
        }
    }

    fn optional(inner: Self) -> Option<Self> {
        match inner {
            Self::Optional(_) | Self::Null => None,
            other => Some(Self::Optional(Box::new(other))),
        }
    }

    /// Whether `null` is an acceptable value.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        matches!(self, Self::Optional(_) | Self::Null)
    }

    /// Renders the JSON Schema fragment for this type.
    #[must_use]
    pub fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Float => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Enum(variants) => json!({"type": "string", "enum": variants}),
            Self::Object => json!({"type": "object"}),
            Self::Array(items) => json!({"type": "array", "items": items.json_schema()}),
            Self::Null => json!({"type": "null"}),
            Self::Optional(inner) => json!({"anyOf": [inner.json_schema(), {"type": "null"}]}),
        }
    }

    /// Strict membership test, used for defaults and return values.
    #[must_use]
    pub fn conforms(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Enum(variants) => value
                .as_str()
                .is_some_and(|s| variants.iter().any(|v| v == s)),
            Self::Object => value.is_object(),
            Self::Array(items) => value
                .as_array()
                .is_some_and(|list| list.iter().all(|v| items.conforms(v))),
            Self::Null => value.is_null(),
            Self::Optional(inner) => value.is_null() || inner.conforms(value),
        }
    }

    /// Lenient conversion used on incoming arguments.
    ///
    /// Returns `None` when the value cannot be safely coerced. Array
    /// elements are checked by the caller so that errors can name the
    /// offending index.
    #[must_use]
    pub fn coerce_scalar(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Object, Value::Object(_))
            | (Self::Null, Value::Null) => Some(value.clone()),

            (Self::Integer, Value::Number(n)) => integer_from_number(n),
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

            (Self::Float, Value::Number(n)) => n.as_f64().and_then(float_value),
            (Self::Float, Value::String(s)) => {
                s.trim().parse::<f64>().ok().and_then(float_value)
            }

            (Self::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },

            (Self::Enum(variants), Value::String(s)) => {
                variants.iter().any(|v| v == s).then(|| value.clone())
            }

            (Self::Optional(_), Value::Null) => Some(Value::Null),
            (Self::Optional(inner), _) => inner.coerce_scalar(value),

            _ => None,
        }
    }
}

fn wrapped<'a>(s: &'a str, keyword: &str, open: char, close: char) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    s[keyword.len()..]
        .trim_start()
        .strip_prefix(open)?
        .strip_suffix(close)
        .map(str::trim)
        .filter(|inner| !inner.is_empty())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integer_from_number(n: &Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        return Some(Value::from(i));
    }
    let f = n.as_f64()?;
    let in_range = f >= i64::MIN as f64 && f <= i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then(|| Value::from(f as i64))
}

fn float_value(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::Boolean => f.write_str("boolean"),
            Self::Enum(variants) => write!(f, "enum({})", variants.join("|")),
            Self::Object => f.write_str("object"),
            Self::Array(items) => write!(f, "array<{items}>"),
            Self::Null => f.write_str("null"),
            Self::Optional(inner) => write!(f, "optional<{inner}>"),
        }
    }
}

/// Declaration of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    /// Parameter name as clients send it.
    pub name: String,
    /// Declared type name (see the module table).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Per-parameter documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default value; its presence makes the parameter optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    /// Declares a parameter with a type name.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            description: None,
            default: None,
        }
    }

    /// Adds documentation.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets a default, making the parameter optional.
    #[must_use]
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Declaration of the return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReturnSpec {
    /// Declared type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// What the value means.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Default for ReturnSpec {
    fn default() -> Self {
        Self {
            type_name: "object".to_string(),
            description: None,
        }
    }
}

/// Static declaration of a tool: name, documentation and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// One-line summary; required.
    #[serde(default)]
    pub summary: String,
    /// Longer explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameters in declaration order.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Return shape.
    #[serde(default)]
    pub returns: ReturnSpec,
    /// Usage example shown to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    /// Caveats and permission notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ToolSpec {
    /// Starts a declaration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: String::new(),
            description: None,
            params: Vec::new(),
            returns: ReturnSpec::default(),
            example: None,
            notes: Vec::new(),
        }
    }

    /// Sets the summary.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Sets the long description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Declares the return type and its meaning.
    #[must_use]
    pub fn returns(mut self, type_name: impl Into<String>, description: impl Into<String>) -> Self {
        self.returns = ReturnSpec {
            type_name: type_name.into(),
            description: Some(description.into()),
        };
        self
    }

    /// Sets the usage example.
    #[must_use]
    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    /// Appends a note.
    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Derives the descriptor, attaching `handler`.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the name or summary is empty, a type name
    /// is unsupported, a parameter is declared twice, or a default does not
    /// match its type.
    pub fn build(self, handler: impl ToolHandler + 'static) -> Result<ToolDescriptor, SchemaError> {
        self.build_shared(Arc::new(handler))
    }

    /// Like [`ToolSpec::build`] for an already shared handler.
    ///
    /// # Errors
    ///
    /// See [`ToolSpec::build`].
    pub fn build_shared(self, handler: Arc<dyn ToolHandler>) -> Result<ToolDescriptor, SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::MissingField {
                tool: self.name,
                field: "name",
            });
        }
        if self.summary.trim().is_empty() {
            return Err(SchemaError::MissingField {
                tool: self.name,
                field: "summary",
            });
        }

        let mut parameters: Vec<Parameter> = Vec::with_capacity(self.params.len());
        for spec in self.params {
            if parameters.iter().any(|p| p.name == spec.name) {
                return Err(SchemaError::DuplicateParameter {
                    tool: self.name,
                    parameter: spec.name,
                });
            }
            parameters.push(Parameter::derive(spec)?);
        }

        let returns =
            SchemaType::parse(&self.returns.type_name).ok_or_else(|| SchemaError::UnsupportedType {
                parameter: "return".to_string(),
                declared: self.returns.type_name.clone(),
            })?;

        Ok(ToolDescriptor {
            name: self.name,
            parameters,
            returns,
            doc: ToolDoc {
                summary: self.summary,
                description: self.description,
                returns: self.returns.description,
                example: self.example,
                notes: self.notes,
            },
            handler,
        })
    }
}

/// One derived parameter of a tool contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Mapped schema type.
    pub schema: SchemaType,
    /// Whether the caller must supply it.
    pub required: bool,
    /// Value used when the caller omits it.
    pub default: Option<Value>,
    /// Documentation.
    pub description: Option<String>,
}

impl Parameter {
    fn derive(spec: ParamSpec) -> Result<Self, SchemaError> {
        let schema =
            SchemaType::parse(&spec.type_name).ok_or_else(|| SchemaError::UnsupportedType {
                parameter: spec.name.clone(),
                declared: spec.type_name.clone(),
            })?;

        let default = match spec.default {
            Some(value) if !schema.conforms(&value) => {
                return Err(SchemaError::InvalidDefault {
                    parameter: spec.name,
                    expected: schema.to_string(),
                });
            }
            Some(value) => Some(value),
            None if schema.is_nullable() => Some(Value::Null),
            None => None,
        };

        Ok(Self {
            name: spec.name,
            schema,
            required: default.is_none(),
            default,
            description: spec.description,
        })
    }

    fn json_schema(&self) -> Value {
        let mut schema = self.schema.json_schema();
        if let Value::Object(ref mut obj) = schema {
            if let Some(ref description) = self.description {
                obj.insert("description".to_string(), json!(description));
            }
            if let Some(ref default) = self.default {
                obj.insert("default".to_string(), default.clone());
            }
        }
        schema
    }
}

/// Documentation attached to a tool, surfaced verbatim in listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDoc {
    /// One-line summary.
    pub summary: String,
    /// Longer explanation.
    pub description: Option<String>,
    /// Meaning of the return value.
    pub returns: Option<String>,
    /// Usage example.
    pub example: Option<String>,
    /// Caveats and permission notes.
    pub notes: Vec<String>,
}

impl ToolDoc {
    /// Joins every documentation field into one client-facing text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut sections = vec![self.summary.clone()];
        if let Some(ref description) = self.description {
            sections.push(description.clone());
        }
        if let Some(ref returns) = self.returns {
            sections.push(format!("Returns: {returns}"));
        }
        if let Some(ref example) = self.example {
            sections.push(format!("Example:\n{example}"));
        }
        if !self.notes.is_empty() {
            let notes: Vec<String> = self.notes.iter().map(|n| format!("- {n}")).collect();
            sections.push(format!("Notes:\n{}", notes.join("\n")));
        }
        sections.join("\n\n")
    }
}

/// A registered tool: derived contract plus the callable behind it.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    parameters: Vec<Parameter>,
    returns: SchemaType,
    doc: ToolDoc,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Declared return shape.
    #[must_use]
    pub const fn returns(&self) -> &SchemaType {
        &self.returns
    }

    /// Documentation.
    #[must_use]
    pub const fn doc(&self) -> &ToolDoc {
        &self.doc
    }

    /// The callable.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    /// JSON Schema for the arguments object.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// JSON Schema for the structured result, `{"result": <returns>}`.
    #[must_use]
    pub fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "result": self.returns.json_schema() },
            "required": ["result"],
        })
    }

    /// The entry advertised by `tools/list`.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: Some(self.doc.render()),
            input_schema: self.input_schema(),
            output_schema: Some(self.output_schema()),
        }
    }
}

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
    /// JSON Schema for the tool's structured output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// A registered resource: URI, metadata and producer.
#[derive(Clone)]
pub struct ResourceDescriptor {
    uri: String,
    name: String,
    description: Option<String>,
    mime_type: String,
    handler: Arc<dyn ResourceHandler>,
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("uri", &self.uri)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

impl ResourceDescriptor {
    /// Describes a resource served as `text/plain`.
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        handler: impl ResourceHandler + 'static,
    ) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: "text/plain".to_string(),
            handler: Arc::new(handler),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type hint.
    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Resource URI; doubles as its registry name.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// MIME type hint.
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime_type
    }

    /// The producer.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn ResourceHandler> {
        Arc::clone(&self.handler)
    }

    /// The entry advertised by `resources/list`.
    #[must_use]
    pub fn definition(&self) -> ResourceDefinition {
        ResourceDefinition {
            uri: self.uri.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// A resource entry for resources/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the content.
    pub mime_type: String,
}
