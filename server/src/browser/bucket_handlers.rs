use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{Map, Value};

use std::sync::Arc;

use crate::entity::data_source;
use crate::storage::{BucketListing, BucketSummary, ObjectStorage};

use super::{
    ApiErr, BrowserState,
    datasource_handlers::storage_client,
    dto::BucketSummaryResponse,
    jwt::AuthClaims,
    node::{BrowserNode, bucket_node},
    response::NodeResponse,
};

/// The data source's fnmatch-style bucket filter. `None` admits every bucket.
fn bucket_pattern(pattern: Option<&str>) -> Result<Option<glob::Pattern>, ApiErr> {
    pattern
        .filter(|p| !p.is_empty())
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| ApiErr::bad_request(format!("Invalid bucket pattern: {e}")))
}

/// Keep the buckets whose names match the data source's pattern.
fn filter_buckets(
    buckets: Vec<BucketSummary>,
    pattern: Option<&str>,
) -> Result<Vec<BucketSummary>, ApiErr> {
    let Some(pattern) = bucket_pattern(pattern)? else {
        return Ok(buckets);
    };
    Ok(buckets
        .into_iter()
        .filter(|b| pattern.matches(&b.name))
        .collect())
}

/// Reject a bucket the data source's pattern hides from its listing.
pub(crate) fn ensure_bucket_visible(ds: &data_source::Model, bid: &str) -> Result<(), ApiErr> {
    match bucket_pattern(ds.pattern.as_deref())? {
        Some(pattern) if !pattern.matches(bid) => Err(ApiErr::gone("Not found bucket")),
        _ => Ok(()),
    }
}

/// Storage client for a bucket the data source is allowed to show.
pub(crate) async fn bucket_client(
    state: &BrowserState,
    user_id: i32,
    gid: i32,
    sid: i32,
    bid: &str,
) -> Result<(data_source::Model, Arc<dyn ObjectStorage>), ApiErr> {
    let (ds, client) = storage_client(state, user_id, gid, sid).await?;
    ensure_bucket_visible(&ds, bid)?;
    Ok((ds, client))
}

async fn visible_buckets(
    client: &dyn ObjectStorage,
    pattern: Option<&str>,
) -> Result<BucketListing, ApiErr> {
    let listing = client.list_buckets().await?;
    Ok(BucketListing {
        buckets: filter_buckets(listing.buckets, pattern)?,
        owner: listing.owner,
    })
}

async fn find_bucket(
    client: &dyn ObjectStorage,
    pattern: Option<&str>,
    sid: i32,
    bid: &str,
) -> Result<BrowserNode, ApiErr> {
    let listing = visible_buckets(client, pattern).await?;
    listing
        .buckets
        .iter()
        .find(|b| b.name == bid)
        .map(|b| bucket_node(sid, b, listing.owner.as_deref()))
        .ok_or_else(|| ApiErr::gone("Not found bucket"))
}

// ---------- GET /bucket/obj/{gid}/{sid} ----------

pub async fn list(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
) -> Result<Json<Vec<BucketSummaryResponse>>, ApiErr> {
    let (ds, client) = storage_client(&state, claims.user_id(), gid, sid).await?;
    let listing = visible_buckets(client.as_ref(), ds.pattern.as_deref()).await?;
    Ok(Json(
        listing
            .buckets
            .into_iter()
            .map(|b| BucketSummaryResponse {
                name: b.name,
                creationdate: b.creation_date,
                dataowner: listing.owner.clone(),
            })
            .collect(),
    ))
}

// ---------- GET /bucket/nodes/{gid}/{sid} ----------

pub async fn nodes(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
) -> Result<Json<Vec<BrowserNode>>, ApiErr> {
    let (ds, client) = storage_client(&state, claims.user_id(), gid, sid).await?;
    let listing = visible_buckets(client.as_ref(), ds.pattern.as_deref()).await?;
    Ok(Json(
        listing
            .buckets
            .iter()
            .map(|b| bucket_node(sid, b, listing.owner.as_deref()))
            .collect(),
    ))
}

// ---------- GET /bucket/nodes/{gid}/{sid}/{bid} ----------

pub async fn node(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid)): Path<(i32, i32, String)>,
) -> Result<NodeResponse, ApiErr> {
    let (ds, client) = storage_client(&state, claims.user_id(), gid, sid).await?;
    let node = find_bucket(client.as_ref(), ds.pattern.as_deref(), sid, &bid).await?;
    Ok(node.into())
}

// ---------- GET /bucket/obj/{gid}/{sid}/{bid} ----------

/// The bucket node merged with its ACL.
pub async fn properties(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid)): Path<(i32, i32, String)>,
) -> Result<Json<Value>, ApiErr> {
    let (ds, client) = storage_client(&state, claims.user_id(), gid, sid).await?;
    let node = find_bucket(client.as_ref(), ds.pattern.as_deref(), sid, &bid).await?;
    let acl = client.bucket_acl(&bid).await?;

    let mut props = to_object(&node)?;
    props.extend(to_object(&acl)?);
    Ok(Json(Value::Object(props)))
}

// ---------- GET /bucket/get_bucket_acl/{gid}/{sid}/{bid} ----------

pub async fn get_bucket_acl(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid, bid)): Path<(i32, i32, String)>,
) -> Result<Json<Value>, ApiErr> {
    let (_, client) = bucket_client(&state, claims.user_id(), gid, sid, &bid).await?;
    let acl = client.bucket_acl(&bid).await?;

    let mut body = Map::new();
    body.insert("bucket".to_string(), Value::String(bid));
    body.extend(to_object(&acl)?);
    Ok(Json(Value::Object(body)))
}

pub(crate) fn to_object(value: &impl serde::Serialize) -> Result<Map<String, Value>, ApiErr> {
    match serde_json::to_value(value).map_err(ApiErr::internal)? {
        Value::Object(map) => Ok(map),
        other => Err(ApiErr::internal(format!("expected a JSON object, got {other}"))),
    }
}
