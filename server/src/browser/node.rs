//! The uniform tree-node shape sent to the browser for every level of the tree.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::dirobj_types::{self, DirObjKind};
use crate::entity::{data_group, data_source};
use crate::storage::paths::{basename, is_leaf, parent_key};
use crate::storage::{BucketSummary, ObjectSummary};

/// Integer ids for persisted rows, names or keys for live S3 entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeId {
    Int(i32),
    Key(String),
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Int(i) => write!(f, "{i}"),
            NodeId::Key(k) => f.write_str(k),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NodeAttrs {
    DataGroup {
        can_delete: bool,
    },
    DataSource {
        ds_type: String,
        is_secret_saved: bool,
        bgcolor: Option<String>,
        fgcolor: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        errmsg: Option<String>,
    },
    Bucket {
        creationdate: Option<DateTime<Utc>>,
        dataowner: Option<String>,
    },
    DirObj {
        do_type: DirObjKind,
        size: i64,
        is_leaf: bool,
        bucket: String,
        mtime: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserNode {
    /// `"{type}/{_id}"`, unique across the whole tree.
    pub id: String,
    #[serde(rename = "_id")]
    pub node_id: NodeId,
    #[serde(rename = "_pid")]
    pub parent_id: Option<NodeId>,
    #[serde(rename = "_type")]
    pub node_type: &'static str,
    pub label: String,
    pub icon: String,
    /// Whether the node can have children.
    pub inode: bool,
    pub module: String,
    #[serde(flatten)]
    pub attrs: NodeAttrs,
}

impl BrowserNode {
    fn new(
        node_type: &'static str,
        node_id: NodeId,
        parent_id: Option<NodeId>,
        label: String,
        icon: String,
        inode: bool,
        attrs: NodeAttrs,
    ) -> Self {
        Self {
            id: format!("{node_type}/{node_id}"),
            node_id,
            parent_id,
            node_type,
            label,
            icon,
            inode,
            module: format!("pgadmin.node.{node_type}"),
            attrs,
        }
    }
}

pub fn datagroup_node(group: &data_group::Model) -> BrowserNode {
    BrowserNode::new(
        "data_group",
        NodeId::Int(group.id),
        None,
        group.name.clone(),
        "icon-data_group".to_string(),
        true,
        NodeAttrs::DataGroup {
            can_delete: group.can_delete,
        },
    )
}

pub fn datasource_icon(ds: &data_source::Model) -> String {
    let mut icon = format!("icon-{}", ds.ds_type.to_lowercase());
    for color in [&ds.bgcolor, &ds.fgcolor].into_iter().flatten() {
        icon.push(' ');
        icon.push_str(color);
    }
    icon
}

pub fn datasource_node(ds: &data_source::Model, errmsg: Option<String>) -> BrowserNode {
    BrowserNode::new(
        "datasource",
        NodeId::Int(ds.id),
        Some(NodeId::Int(ds.datagroup_id)),
        ds.name.clone(),
        datasource_icon(ds),
        true,
        NodeAttrs::DataSource {
            ds_type: ds.ds_type.clone(),
            is_secret_saved: ds.has_saved_secret(),
            bgcolor: ds.bgcolor.clone(),
            fgcolor: ds.fgcolor.clone(),
            errmsg,
        },
    )
}

pub fn bucket_node(source_id: i32, bucket: &BucketSummary, owner: Option<&str>) -> BrowserNode {
    BrowserNode::new(
        "bucket",
        NodeId::Key(bucket.name.clone()),
        Some(NodeId::Int(source_id)),
        bucket.name.clone(),
        "icon-bucket".to_string(),
        true,
        NodeAttrs::Bucket {
            creationdate: bucket.creation_date,
            dataowner: owner.map(str::to_string),
        },
    )
}

/// Object node; the id is the raw key and the parent is the containing folder
/// key, or the bucket for top-level keys.
pub fn dirobj_node(bucket: &str, obj: &ObjectSummary) -> BrowserNode {
    let kind = dirobj_types::classify(obj);
    let parent = parent_key(&obj.key).unwrap_or(bucket);
    BrowserNode::new(
        "dirobj",
        NodeId::Key(obj.key.clone()),
        Some(NodeId::Key(parent.to_string())),
        basename(&obj.key).to_string(),
        format!("icon-{}", kind.as_str()),
        !is_leaf(&obj.key),
        NodeAttrs::DirObj {
            do_type: kind,
            size: obj.size,
            is_leaf: is_leaf(&obj.key),
            bucket: bucket.to_string(),
            mtime: obj.last_modified,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn ds(bg: Option<&str>) -> data_source::Model {
        data_source::Model {
            id: 4,
            user_id: 1,
            datagroup_id: 2,
            name: "lake".into(),
            ds_type: "S3".into(),
            pattern: None,
            prefix: None,
            key_name: Some("enc".into()),
            key_secret: None,
            bgcolor: bg.map(str::to_string),
            fgcolor: None,
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn test_datasource_node_shape() {
        let node = datasource_node(&ds(Some("#ff0000")), None);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "datasource/4");
        assert_eq!(json["_id"], 4);
        assert_eq!(json["_pid"], 2);
        assert_eq!(json["_type"], "datasource");
        assert_eq!(json["icon"], "icon-s3 #ff0000");
        assert_eq!(json["is_secret_saved"], false);
        assert_eq!(json["module"], "pgadmin.node.datasource");
        assert!(json.get("errmsg").is_none());
    }

    #[test]
    fn test_dirobj_node_parent_and_label() {
        let obj = ObjectSummary {
            key: "a/c/".into(),
            size: 0,
            last_modified: None,
        };
        let node = dirobj_node("lake", &obj);
        assert_eq!(node.label, "c");
        assert_eq!(node.parent_id, Some(NodeId::Key("a/".into())));
        assert!(node.inode);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["do_type"], "folder");
        assert_eq!(json["id"], "dirobj/a/c/");

        let top = ObjectSummary {
            key: "x.csv".into(),
            size: 9,
            last_modified: None,
        };
        let node = dirobj_node("lake", &top);
        assert_eq!(node.parent_id, Some(NodeId::Key("lake".into())));
        assert_eq!(node.icon, "icon-csv");
        assert!(!node.inode);
    }
}
