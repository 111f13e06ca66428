use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::Value;

use crate::entity::data_source;
use crate::storage::paths::{
    SEPARATOR, basename, create_s3_uri, create_url, fix_path, is_direct_child, parent_key,
};
use crate::storage::{ObjectStorage, ObjectSummary};

use super::{
    ApiErr, BrowserState,
    bucket_handlers::{bucket_client, to_object},
    dirobj_types::{self, DirObjTypeResponse},
    dto::DirObjSummary,
    jwt::AuthClaims,
    node::{BrowserNode, dirobj_node},
    response::NodeResponse,
};

/// Listing root of a bucket for this data source: its configured prefix as a
/// directory key, or the bucket top.
fn root_prefix(ds: &data_source::Model) -> String {
    match ds.prefix.as_deref().map(|p| p.trim_start_matches(SEPARATOR)) {
        Some(p) if !p.is_empty() && !p.ends_with(SEPARATOR) => format!("{p}{SEPARATOR}"),
        Some(p) => p.to_string(),
        None => String::new(),
    }
}

/// One level of the key tree below `parent`.
async fn list_children(
    client: &dyn ObjectStorage,
    bucket: &str,
    parent: &str,
) -> Result<Vec<ObjectSummary>, ApiErr> {
    let prefix = (!parent.is_empty()).then_some(parent);
    let objects = client.list_objects(bucket, prefix).await?;
    Ok(objects
        .into_iter()
        .filter(|o| is_direct_child(&o.key, parent))
        .collect())
}

/// Find `key` among the children of its parent directory.
async fn find_object(
    client: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
) -> Result<ObjectSummary, ApiErr> {
    let parent = parent_key(key).unwrap_or("");
    list_children(client, bucket, parent)
        .await?
        .into_iter()
        .find(|o| o.key == key)
        .ok_or_else(|| ApiErr::gone("Could not find the object."))
}

fn object_key(oid: &str) -> Result<String, ApiErr> {
    fix_path(oid).ok_or_else(|| ApiErr::missing_parameter("oid"))
}

/// Keys outside the data source's prefix are not part of its tree.
fn ensure_in_prefix(ds: &data_source::Model, key: &str) -> Result<(), ApiErr> {
    if key.starts_with(&root_prefix(ds)) {
        Ok(())
    } else {
        Err(ApiErr::gone("Could not find the object."))
    }
}

fn summary(obj: &ObjectSummary) -> DirObjSummary {
    DirObjSummary {
        key: obj.key.clone(),
        name: basename(&obj.key).to_string(),
        do_type: dirobj_types::classify(obj).as_str(),
        size: obj.size,
        mtime: obj.last_modified,
    }
}

// ---------- GET /dirobj/supported_types ----------

pub async fn supported_types(_claims: AuthClaims) -> Json<Vec<DirObjTypeResponse>> {
    Json(
        dirobj_types::types()
            .iter()
            .map(DirObjTypeResponse::from)
            .collect(),
    )
}

// ---------- GET /dirobj/obj/{gid}/{sid}/{bid} ----------

pub async fn list(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid)): Path<(i32, i32, String)>,
) -> Result<Json<Vec<DirObjSummary>>, ApiErr> {
    let (ds, client) = bucket_client(&state, claims.user_id(), gid, sid, &bid).await?;
    let objects = list_children(client.as_ref(), &bid, &root_prefix(&ds)).await?;
    Ok(Json(objects.iter().map(summary).collect()))
}

// ---------- GET /dirobj/nodes/{gid}/{sid}/{bid} ----------

pub async fn nodes(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid)): Path<(i32, i32, String)>,
) -> Result<Json<Vec<BrowserNode>>, ApiErr> {
    let (ds, client) = bucket_client(&state, claims.user_id(), gid, sid, &bid).await?;
    let objects = list_children(client.as_ref(), &bid, &root_prefix(&ds)).await?;
    Ok(Json(objects.iter().map(|o| dirobj_node(&bid, o)).collect()))
}

// ---------- GET /dirobj/children/{gid}/{sid}/{bid}/{*oid} ----------

pub async fn children(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid, oid)): Path<(i32, i32, String, String)>,
) -> Result<Json<Vec<BrowserNode>>, ApiErr> {
    let (ds, client) = bucket_client(&state, claims.user_id(), gid, sid, &bid).await?;
    let parent = fix_path(&oid).unwrap_or_else(|| root_prefix(&ds));
    ensure_in_prefix(&ds, &parent)?;
    let objects = list_children(client.as_ref(), &bid, &parent).await?;
    Ok(Json(objects.iter().map(|o| dirobj_node(&bid, o)).collect()))
}

// ---------- GET /dirobj/nodes/{gid}/{sid}/{bid}/{*oid} ----------

pub async fn node(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid, oid)): Path<(i32, i32, String, String)>,
) -> Result<NodeResponse, ApiErr> {
    let key = object_key(&oid)?;
    let (ds, client) = bucket_client(&state, claims.user_id(), gid, sid, &bid).await?;
    ensure_in_prefix(&ds, &key)?;
    let obj = find_object(client.as_ref(), &bid, &key).await?;
    Ok(dirobj_node(&bid, &obj).into())
}

// ---------- GET /dirobj/obj/{gid}/{sid}/{bid}/{*oid} ----------

/// Object node plus its ACL and links.
pub async fn properties(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid, oid)): Path<(i32, i32, String, String)>,
) -> Result<Json<Value>, ApiErr> {
    let key = object_key(&oid)?;
    let (ds, client) = bucket_client(&state, claims.user_id(), gid, sid, &bid).await?;
    ensure_in_prefix(&ds, &key)?;
    let obj = find_object(client.as_ref(), &bid, &key).await?;
    let acl = client.object_acl(&bid, &key).await?;
    let url = create_url(&bid, &key)
        .map_err(|e| ApiErr::bad_request(format!("Invalid object URL: {e}")))?;

    let mut props = to_object(&dirobj_node(&bid, &obj))?;
    props.extend(to_object(&acl)?);
    props.insert("url".to_string(), Value::String(url.to_string()));
    props.insert("s3_uri".to_string(), Value::String(create_s3_uri(&bid, &key)));
    Ok(Json(Value::Object(props)))
}
