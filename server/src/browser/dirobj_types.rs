use serde::Serialize;
use std::sync::OnceLock;

use crate::storage::ObjectSummary;
use crate::storage::paths::is_dir;

/// Object kinds, from the generic sentinel to the most specific file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirObjKind {
    DirObj,
    Folder,
    File,
    Csv,
    Parquet,
}

impl DirObjKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DirObjKind::DirObj => "dirobj",
            DirObjKind::Folder => "folder",
            DirObjKind::File => "file",
            DirObjKind::Csv => "csv",
            DirObjKind::Parquet => "parquet",
        }
    }
}

fn is_folder(obj: &ObjectSummary) -> bool {
    is_dir(&obj.key) && obj.size == 0
}

fn is_file(obj: &ObjectSummary) -> bool {
    !is_dir(&obj.key) && obj.size > 0
}

fn has_suffix(obj: &ObjectSummary, suffix: &str) -> bool {
    obj.key.to_lowercase().ends_with(suffix)
}

fn is_csv(obj: &ObjectSummary) -> bool {
    is_file(obj) && has_suffix(obj, ".csv")
}

fn is_parquet(obj: &ObjectSummary) -> bool {
    is_file(obj) && has_suffix(obj, ".par")
}

pub struct DirObjTypeDef {
    pub kind: DirObjKind,
    pub description: &'static str,
    pub priority: i32,
    /// `None` for the sentinel, which accepts anything.
    matches: Option<fn(&ObjectSummary) -> bool>,
}

impl DirObjTypeDef {
    pub fn instance_of(&self, obj: &ObjectSummary) -> bool {
        self.matches.is_none_or(|f| f(obj))
    }

    pub fn icon(&self) -> String {
        format!("{}.svg", self.kind.as_str())
    }

    pub fn is_sentinel(&self) -> bool {
        self.matches.is_none()
    }
}

static TYPE_DEFS: OnceLock<Vec<DirObjTypeDef>> = OnceLock::new();

/// Registered object types, highest priority first.
pub fn types() -> &'static [DirObjTypeDef] {
    TYPE_DEFS.get_or_init(|| {
        let mut defs = vec![
            DirObjTypeDef {
                kind: DirObjKind::DirObj,
                description: "Object",
                priority: -1,
                matches: None,
            },
            DirObjTypeDef {
                kind: DirObjKind::Folder,
                description: "Folder",
                priority: 0,
                matches: Some(is_folder),
            },
            DirObjTypeDef {
                kind: DirObjKind::File,
                description: "File",
                priority: 1,
                matches: Some(is_file),
            },
            DirObjTypeDef {
                kind: DirObjKind::Csv,
                description: "CSV",
                priority: 2,
                matches: Some(is_csv),
            },
            DirObjTypeDef {
                kind: DirObjKind::Parquet,
                description: "Parquet",
                priority: 3,
                matches: Some(is_parquet),
            },
        ];
        defs.sort_by(|a, b| b.priority.cmp(&a.priority));
        defs
    })
}

pub fn get_type_def(kind: DirObjKind) -> Option<&'static DirObjTypeDef> {
    types().iter().find(|d| d.kind == kind)
}

/// Most specific matching kind; the sentinel when nothing else matches.
pub fn classify(obj: &ObjectSummary) -> DirObjKind {
    types()
        .iter()
        .find(|d| !d.is_sentinel() && d.instance_of(obj))
        .map(|d| d.kind)
        .unwrap_or(DirObjKind::DirObj)
}

#[derive(Debug, Serialize)]
pub struct DirObjTypeResponse {
    pub do_type: &'static str,
    pub description: &'static str,
    pub priority: i32,
    pub icon: String,
}

impl From<&DirObjTypeDef> for DirObjTypeResponse {
    fn from(def: &DirObjTypeDef) -> Self {
        Self {
            do_type: def.kind.as_str(),
            description: def.description,
            priority: def.priority,
            icon: def.icon(),
        }
    }
}
