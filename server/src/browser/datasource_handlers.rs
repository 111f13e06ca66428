use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::json;

use crate::crypto;
use crate::entity::data_source;
use crate::storage::{Credentials, ObjectStorage, S3Session};

use super::{
    ApiErr, BrowserState,
    datagroup_handlers::find_group,
    datasource_types::{self, ConfigError, DataSourceKind, DataSourceTypeResponse},
    dto::{DataSourceProperties, DataSourceSummary},
    jwt::AuthClaims,
    node::{BrowserNode, datasource_node},
    payload::Payload,
    response::{Envelope, NodeResponse},
};

impl From<ConfigError> for ApiErr {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::MissingRequiredField(ref field) => ApiErr::missing_parameter(field),
            ConfigError::UnknownType(_) => ApiErr::bad_request(e.to_string()),
        }
    }
}

/// Load a data source owned by `user_id` inside group `gid`, or 410.
pub(crate) async fn find_datasource(
    db: &DatabaseConnection,
    user_id: i32,
    gid: i32,
    sid: i32,
) -> Result<data_source::Model, ApiErr> {
    data_source::Entity::find_by_id(sid)
        .filter(data_source::Column::UserId.eq(user_id))
        .filter(data_source::Column::DatagroupId.eq(gid))
        .one(db)
        .await?
        .ok_or_else(|| ApiErr::gone(format!("Could not find the datasource with id# {sid}")))
}

/// Authenticated storage client for an S3 data source.
pub(crate) async fn storage_client(
    state: &BrowserState,
    user_id: i32,
    gid: i32,
    sid: i32,
) -> Result<(data_source::Model, Arc<dyn ObjectStorage>), ApiErr> {
    let ds = find_datasource(&state.db, user_id, gid, sid).await?;
    if datasource_types::classify(&ds.ds_type).kind != DataSourceKind::S3 {
        return Err(ApiErr::bad_request(format!(
            "Data source '{}' is not an S3 data source",
            ds.name
        )));
    }

    let session = S3Session::new(state.storage.clone(), user_id);
    session
        .authenticate(&state.db, &state.key_ring, user_id, gid, sid, Some(&ds))
        .await?;
    let client = session.client(user_id).await?;
    Ok((ds, client))
}

fn unique_violation(e: DbErr) -> ApiErr {
    let msg = e.to_string();
    if msg.contains("UNIQUE") || msg.contains("unique") {
        ApiErr::bad_request("A data source with this name already exists in the group")
    } else {
        ApiErr::internal(e)
    }
}

fn validate_pattern(pattern: &str) -> Result<(), ApiErr> {
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| ApiErr::bad_request(format!("Invalid bucket pattern: {e}")))
}

// ---------- GET /datasource/supported_types ----------

pub async fn supported_types(_claims: AuthClaims) -> Json<Vec<DataSourceTypeResponse>> {
    Json(
        datasource_types::types()
            .iter()
            .map(DataSourceTypeResponse::from)
            .collect(),
    )
}

// ---------- GET /datasource/obj/{gid} ----------

pub async fn list(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(gid): Path<i32>,
) -> Result<Json<Vec<DataSourceSummary>>, ApiErr> {
    let group = find_group(&state.db, claims.user_id(), gid).await?;
    let sources = data_source::Entity::find()
        .filter(data_source::Column::UserId.eq(claims.user_id()))
        .filter(data_source::Column::DatagroupId.eq(group.id))
        .order_by_asc(data_source::Column::Name)
        .all(&state.db)
        .await?;

    Ok(Json(
        sources
            .into_iter()
            .map(|ds| DataSourceSummary::new(ds, &group.name))
            .collect(),
    ))
}

// ---------- GET /datasource/nodes/{gid} ----------

pub async fn nodes(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(gid): Path<i32>,
) -> Result<Json<Vec<BrowserNode>>, ApiErr> {
    let group = find_group(&state.db, claims.user_id(), gid).await?;
    let sources = data_source::Entity::find()
        .filter(data_source::Column::UserId.eq(claims.user_id()))
        .filter(data_source::Column::DatagroupId.eq(group.id))
        .order_by_asc(data_source::Column::Id)
        .all(&state.db)
        .await?;

    Ok(Json(
        sources.iter().map(|ds| datasource_node(ds, None)).collect(),
    ))
}

// ---------- GET /datasource/nodes/{gid}/{sid} ----------

pub async fn node(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
) -> Result<NodeResponse, ApiErr> {
    let ds = find_datasource(&state.db, claims.user_id(), gid, sid).await?;
    Ok(datasource_node(&ds, None).into())
}

// ---------- GET /datasource/obj/{gid}/{sid} ----------

pub async fn properties(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
) -> Result<Json<DataSourceProperties>, ApiErr> {
    let ds = find_datasource(&state.db, claims.user_id(), gid, sid).await?;
    Ok(Json(ds.into()))
}

// ---------- POST /datasource/obj/{gid} ----------

pub async fn create(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(gid): Path<i32>,
    payload: Payload,
) -> Result<NodeResponse, ApiErr> {
    let user_id = claims.user_id();
    let def = datasource_types::validate_required(payload.body())?;
    let group = find_group(&state.db, user_id, gid).await?;

    let pattern = payload.get_str("pattern");
    if let Some(p) = &pattern {
        validate_pattern(p)?;
    }

    let credentials = match (payload.get_raw("key_name"), payload.get_raw("key_secret")) {
        (Some(key_name), Some(key_secret)) if def.kind == DataSourceKind::S3 => Some(Credentials {
            key_name,
            key_secret,
        }),
        _ => None,
    };

    let save = state.allow_save_secret && payload.flag("save_secret");
    let (key_name, key_secret) = match &credentials {
        Some(c) => {
            let key = state.key_ring.require(user_id)?;
            if save {
                (
                    Some(crypto::encrypt(&c.key_name, &key).map_err(ApiErr::internal)?),
                    Some(crypto::encrypt(&c.key_secret, &key).map_err(ApiErr::internal)?),
                )
            } else {
                (None, None)
            }
        }
        None => (None, None),
    };

    let now = Utc::now().naive_utc();
    let ds = data_source::ActiveModel {
        user_id: Set(user_id),
        datagroup_id: Set(group.id),
        name: Set(payload.get_str("name").unwrap_or_default()),
        ds_type: Set(def.tag().to_string()),
        pattern: Set(pattern),
        prefix: Set(payload.get_str("prefix")),
        key_name: Set(key_name),
        key_secret: Set(key_secret),
        bgcolor: Set(payload.get_str("bgcolor")),
        fgcolor: Set(payload.get_str("fgcolor")),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await
    .map_err(unique_violation)?;

    if def.kind == DataSourceKind::S3 {
        let verified = match state.storage.connect(credentials.as_ref()).await {
            Ok(client) => client.list_buckets().await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = verified {
            tracing::warn!(sid = ds.id, error = %e, "data source verification failed, removing");
            data_source::Entity::delete_by_id(ds.id)
                .exec(&state.db)
                .await?;
            return Err(e.into());
        }
    }

    tracing::info!(user_id, gid = group.id, sid = ds.id, ds_type = %ds.ds_type, "data source created");
    Ok(datasource_node(&ds, None).into())
}

// ---------- PUT /datasource/obj/{gid}/{sid} ----------

pub async fn update(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
    payload: Payload,
) -> Result<Response, ApiErr> {
    let user_id = claims.user_id();
    let ds = find_datasource(&state.db, user_id, gid, sid).await?;
    let mut active: data_source::ActiveModel = ds.clone().into();
    let mut changed = false;

    if payload.contains("name") {
        let name = payload
            .get_str("name")
            .ok_or_else(|| ApiErr::missing_parameter("name"))?;
        if name != ds.name {
            active.name = Set(name);
            changed = true;
        }
    }

    if payload.contains("ds_type") {
        let tag = payload.get_str("ds_type").unwrap_or_default();
        let def = datasource_types::get_type_def(&tag)
            .ok_or_else(|| ApiErr::from(ConfigError::UnknownType(tag.clone())))?;
        if def.tag() != ds.ds_type {
            if ds.has_saved_secret() {
                return Err(ApiErr::forbidden(
                    "Data source type cannot be changed while credentials are saved.",
                ));
            }
            // the new type's fields come from this request or the stored row
            for key in def.required {
                let stored = match *key {
                    "key_name" => ds.key_name.is_some(),
                    "key_secret" => ds.key_secret.is_some(),
                    _ => false,
                };
                if !stored && payload.get_raw(key).is_none() {
                    return Err(ConfigError::MissingRequiredField(key.to_string()).into());
                }
            }
            active.ds_type = Set(def.tag().to_string());
            changed = true;
        }
    }

    let new_gid = payload
        .get_i64("gid")
        .map(|g| i32::try_from(g).map_err(|_| ApiErr::bad_request("Invalid data group id")))
        .transpose()?;
    if let Some(new_gid) = new_gid
        && new_gid != ds.datagroup_id
    {
        let target = find_group(&state.db, user_id, new_gid).await?;
        active.datagroup_id = Set(target.id);
        changed = true;
    }

    if payload.contains("pattern") {
        let pattern = payload.get_str("pattern");
        if let Some(p) = &pattern {
            validate_pattern(p)?;
        }
        if pattern != ds.pattern {
            active.pattern = Set(pattern);
            changed = true;
        }
    }

    for (key, current, column) in [
        ("prefix", &ds.prefix, data_source::Column::Prefix),
        ("bgcolor", &ds.bgcolor, data_source::Column::Bgcolor),
        ("fgcolor", &ds.fgcolor, data_source::Column::Fgcolor),
    ] {
        if payload.contains(key) {
            let value = payload.get_str(key);
            if &value != current {
                active.set(column, value.into());
                changed = true;
            }
        }
    }

    let new_name = payload.get_raw("key_name");
    let new_secret = payload.get_raw("key_secret");
    if new_name.is_some() || new_secret.is_some() {
        if !state.allow_save_secret {
            return Err(ApiErr::forbidden("Saving data source secrets is disabled."));
        }
        let key = state.key_ring.require(user_id)?;
        if let Some(v) = new_name {
            active.key_name = Set(Some(crypto::encrypt(&v, &key).map_err(ApiErr::internal)?));
        }
        if let Some(v) = new_secret {
            active.key_secret = Set(Some(crypto::encrypt(&v, &key).map_err(ApiErr::internal)?));
        }
        changed = true;
    }

    if !changed {
        return Ok(Envelope::ok().info("No parameters were changed.").into_response());
    }

    active.updated_at = Set(Utc::now().naive_utc());
    let ds = active.update(&state.db).await.map_err(unique_violation)?;
    tracing::info!(user_id, sid = ds.id, "data source updated");
    Ok(NodeResponse::from(datasource_node(&ds, None)).into_response())
}

// ---------- DELETE /datasource/obj/{gid}/{sid} ----------

pub async fn delete(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
) -> Result<Envelope, ApiErr> {
    let ds = find_datasource(&state.db, claims.user_id(), gid, sid).await?;
    data_source::Entity::delete_by_id(ds.id)
        .exec(&state.db)
        .await?;

    tracing::info!(user_id = claims.user_id(), sid = ds.id, "data source deleted");
    Ok(Envelope::ok().info("Data source deleted"))
}

// ---------- PUT /datasource/clear_saved_authentication/{gid}/{sid} ----------

pub async fn clear_saved_authentication(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
) -> Result<Envelope, ApiErr> {
    let ds = find_datasource(&state.db, claims.user_id(), gid, sid).await?;
    let mut active: data_source::ActiveModel = ds.into();
    active.key_secret = Set(None);
    active.updated_at = Set(Utc::now().naive_utc());
    active.update(&state.db).await?;

    Ok(Envelope::ok()
        .info("The saved password cleared successfully.")
        .data(json!({ "is_secret_saved": false })))
}

// ---------- POST /datasource/change_authentication/{gid}/{sid} ----------

pub async fn change_authentication(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path((gid, sid)): Path<(i32, i32)>,
    payload: Payload,
) -> Result<Envelope, ApiErr> {
    let user_id = claims.user_id();
    let ds = find_datasource(&state.db, user_id, gid, sid).await?;

    let current_name = payload.require("current_key_name")?;
    let current_secret = payload.require("current_key_secret")?;
    let new_name = payload.require("key_name")?;
    let new_secret = payload.require("key_secret")?;
    let confirm = payload.require("confirm_key_secret")?;

    let key = state.key_ring.require(user_id)?;

    let (Some(stored_name), Some(stored_secret)) = (&ds.key_name, &ds.key_secret) else {
        return Err(ApiErr::bad_request(
            "There are no saved credentials for this data source.",
        ));
    };
    let stored_name = crypto::decrypt(stored_name, &key)
        .map_err(|e| ApiErr::unauthorized(e.to_string()))?;
    let stored_secret = crypto::decrypt(stored_secret, &key)
        .map_err(|e| ApiErr::unauthorized(e.to_string()))?;
    if stored_name != current_name || stored_secret != current_secret {
        return Err(ApiErr::unauthorized("Incorrect credentials."));
    }

    if new_secret != confirm {
        return Err(ApiErr::bad_request("Key secrets do not match."));
    }

    let mut active: data_source::ActiveModel = ds.into();
    active.key_name = Set(Some(crypto::encrypt(&new_name, &key).map_err(ApiErr::internal)?));
    active.key_secret = Set(Some(crypto::encrypt(&new_secret, &key).map_err(ApiErr::internal)?));
    active.updated_at = Set(Utc::now().naive_utc());
    active.update(&state.db).await?;

    tracing::info!(user_id, sid, "data source credentials changed");
    Ok(Envelope::ok()
        .info("Credentials changed successfully.")
        .data(json!({ "is_secret_saved": true })))
}
