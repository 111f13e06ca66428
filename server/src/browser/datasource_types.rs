use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Fields every data source needs, whatever its type.
pub const GENERIC_REQUIRED: &[&str] = &["name", "ds_type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    LocalFileSystem,
    S3,
}

impl DataSourceKind {
    pub fn tag(self) -> &'static str {
        match self {
            DataSourceKind::LocalFileSystem => "LFS",
            DataSourceKind::S3 => "S3",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        get_type_def(tag).map(|d| d.kind)
    }
}

#[derive(Debug, Clone)]
pub enum FieldType {
    Text,
    Password,
    Checkbox,
    Color,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub key: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
    pub is_secret: bool,
}

#[derive(Debug)]
pub struct DataSourceTypeDef {
    pub kind: DataSourceKind,
    pub description: &'static str,
    /// Higher wins when classifying. The negative-priority entry is the catch-all.
    pub priority: i32,
    /// Type-specific required creation fields.
    pub required: &'static [&'static str],
    pub fields: Vec<FieldDef>,
}

impl DataSourceTypeDef {
    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    pub fn icon(&self) -> String {
        format!("{}.svg", self.tag().to_lowercase())
    }

    /// Generic fields followed by the type's own.
    pub fn required_fields(&self) -> Vec<&'static str> {
        GENERIC_REQUIRED
            .iter()
            .chain(self.required.iter())
            .copied()
            .collect()
    }

    /// Classification hook. The sentinel accepts everything.
    pub fn instance_of(&self, ds_type: &str) -> bool {
        self.priority < 0 || self.tag().eq_ignore_ascii_case(ds_type)
    }
}

fn common_fields() -> Vec<FieldDef> {
    vec![
        FieldDef {
            key: "name",
            label: "Name",
            field_type: FieldType::Text,
            is_secret: false,
        },
        FieldDef {
            key: "bgcolor",
            label: "Background",
            field_type: FieldType::Color,
            is_secret: false,
        },
        FieldDef {
            key: "fgcolor",
            label: "Foreground",
            field_type: FieldType::Color,
            is_secret: false,
        },
    ]
}

static TYPE_DEFS: OnceLock<Vec<DataSourceTypeDef>> = OnceLock::new();

/// All registered types, highest priority first.
pub fn types() -> &'static [DataSourceTypeDef] {
    TYPE_DEFS.get_or_init(|| {
        let mut s3_fields = common_fields();
        s3_fields.extend([
            FieldDef {
                key: "key_name",
                label: "Access key ID",
                field_type: FieldType::Text,
                is_secret: true,
            },
            FieldDef {
                key: "key_secret",
                label: "Secret access key",
                field_type: FieldType::Password,
                is_secret: true,
            },
            FieldDef {
                key: "save_secret",
                label: "Save secret?",
                field_type: FieldType::Checkbox,
                is_secret: false,
            },
            FieldDef {
                key: "pattern",
                label: "Bucket pattern",
                field_type: FieldType::Text,
                is_secret: false,
            },
            FieldDef {
                key: "prefix",
                label: "Key prefix",
                field_type: FieldType::Text,
                is_secret: false,
            },
        ]);

        let mut defs = vec![
            DataSourceTypeDef {
                kind: DataSourceKind::LocalFileSystem,
                description: "Local File System",
                priority: -1,
                required: &[],
                fields: common_fields(),
            },
            DataSourceTypeDef {
                kind: DataSourceKind::S3,
                description: "AWS S3",
                priority: 0,
                required: &["key_name", "key_secret"],
                fields: s3_fields,
            },
        ];
        defs.sort_by(|a, b| b.priority.cmp(&a.priority));
        defs
    })
}

pub fn get_type_def(tag: &str) -> Option<&'static DataSourceTypeDef> {
    types().iter().find(|d| d.tag().eq_ignore_ascii_case(tag))
}

/// The catch-all type (lowest, negative priority).
pub fn default_type() -> &'static DataSourceTypeDef {
    types()
        .iter()
        .find(|d| d.priority < 0)
        .unwrap_or(&types()[types().len() - 1])
}

/// Most specific registered type accepting `ds_type`.
pub fn classify(ds_type: &str) -> &'static DataSourceTypeDef {
    types()
        .iter()
        .find(|d| d.priority >= 0 && d.instance_of(ds_type))
        .unwrap_or_else(default_type)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown data source type: {0}")]
    UnknownType(String),
    #[error("Could not find the required parameter ({0}).")]
    MissingRequiredField(String),
}

fn is_present(body: &Map<String, Value>, key: &str) -> bool {
    match body.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Check generic then type-specific required fields, in that order.
/// Returns the type definition named by `ds_type`.
pub fn validate_required(
    body: &Map<String, Value>,
) -> Result<&'static DataSourceTypeDef, ConfigError> {
    for key in GENERIC_REQUIRED {
        if !is_present(body, key) {
            return Err(ConfigError::MissingRequiredField(key.to_string()));
        }
    }
    let tag = body.get("ds_type").and_then(Value::as_str).unwrap_or_default();
    let def = get_type_def(tag).ok_or_else(|| ConfigError::UnknownType(tag.to_string()))?;
    for key in def.required {
        if !is_present(body, key) {
            return Err(ConfigError::MissingRequiredField(key.to_string()));
        }
    }
    Ok(def)
}

// ---------- API response types ----------

#[derive(Debug, Serialize)]
pub struct FieldDefResponse {
    pub key: String,
    pub label: String,
    pub field_type: String,
    pub is_secret: bool,
}

#[derive(Debug, Serialize)]
pub struct DataSourceTypeResponse {
    pub ds_type: String,
    pub description: String,
    pub priority: i32,
    pub icon: String,
    pub required: Vec<String>,
    pub fields: Vec<FieldDefResponse>,
}

impl From<&DataSourceTypeDef> for DataSourceTypeResponse {
    fn from(def: &DataSourceTypeDef) -> Self {
        Self {
            ds_type: def.tag().to_string(),
            description: def.description.to_string(),
            priority: def.priority,
            icon: def.icon(),
            required: def.required_fields().iter().map(|s| s.to_string()).collect(),
            fields: def
                .fields
                .iter()
                .map(|f| FieldDefResponse {
                    key: f.key.to_string(),
                    label: f.label.to_string(),
                    field_type: match &f.field_type {
                        FieldType::Text => "text".to_string(),
                        FieldType::Password => "password".to_string(),
                        FieldType::Checkbox => "switch".to_string(),
                        FieldType::Color => "color".to_string(),
                    },
                    is_secret: f.is_secret,
                })
                .collect(),
        }
    }
}
