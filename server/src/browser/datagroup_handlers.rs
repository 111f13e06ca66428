use axum::{
    extract::{Path, State},
    response::Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

use crate::entity::{data_group, data_source};

use super::{
    ApiErr, BrowserState,
    dto::DataGroupSummary,
    jwt::AuthClaims,
    node::{BrowserNode, datagroup_node},
    payload::Payload,
    response::{Envelope, NodeResponse},
};

/// Load a group owned by `user_id`, or 410.
pub(crate) async fn find_group(
    db: &DatabaseConnection,
    user_id: i32,
    gid: i32,
) -> Result<data_group::Model, ApiErr> {
    data_group::Entity::find_by_id(gid)
        .filter(data_group::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| ApiErr::gone("Could not find the data group."))
}

fn unique_violation(e: DbErr) -> ApiErr {
    let msg = e.to_string();
    if msg.contains("UNIQUE") || msg.contains("unique") {
        ApiErr::bad_request("A data group with this name already exists")
    } else {
        ApiErr::internal(e)
    }
}

// ---------- GET /data_group/obj ----------

pub async fn list(
    claims: AuthClaims,
    State(state): State<BrowserState>,
) -> Result<Json<Vec<DataGroupSummary>>, ApiErr> {
    let groups = data_group::Entity::find()
        .filter(data_group::Column::UserId.eq(claims.user_id()))
        .order_by_asc(data_group::Column::Name)
        .all(&state.db)
        .await?;

    Ok(Json(groups.into_iter().map(DataGroupSummary::from).collect()))
}

// ---------- GET /data_group/nodes ----------

pub async fn nodes(
    claims: AuthClaims,
    State(state): State<BrowserState>,
) -> Result<Json<Vec<BrowserNode>>, ApiErr> {
    let groups = data_group::Entity::find()
        .filter(data_group::Column::UserId.eq(claims.user_id()))
        .order_by_asc(data_group::Column::Id)
        .all(&state.db)
        .await?;

    Ok(Json(groups.iter().map(datagroup_node).collect()))
}

// ---------- GET /data_group/nodes/{gid} ----------

pub async fn node(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(gid): Path<i32>,
) -> Result<NodeResponse, ApiErr> {
    let group = find_group(&state.db, claims.user_id(), gid).await?;
    Ok(datagroup_node(&group).into())
}

// ---------- GET /data_group/obj/{gid} ----------

pub async fn properties(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(gid): Path<i32>,
) -> Result<Json<DataGroupSummary>, ApiErr> {
    let group = find_group(&state.db, claims.user_id(), gid).await?;
    Ok(Json(group.into()))
}

// ---------- POST /data_group/obj ----------

pub async fn create(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    payload: Payload,
) -> Result<NodeResponse, ApiErr> {
    let name = payload
        .get_str("name")
        .ok_or_else(|| ApiErr::precondition_failed("No data group name was specified"))?;

    let group = data_group::ActiveModel {
        user_id: Set(claims.user_id()),
        name: Set(name),
        can_delete: Set(true),
        ..Default::default()
    }
    .insert(&state.db)
    .await
    .map_err(unique_violation)?;

    tracing::info!(user_id = claims.user_id(), gid = group.id, "data group created");
    Ok(datagroup_node(&group).into())
}

// ---------- PUT /data_group/obj/{gid} ----------

pub async fn update(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(gid): Path<i32>,
    payload: Payload,
) -> Result<NodeResponse, ApiErr> {
    let group = find_group(&state.db, claims.user_id(), gid).await?;

    if !payload.contains("name") {
        return Ok(datagroup_node(&group).into());
    }
    let name = payload
        .get_str("name")
        .ok_or_else(|| ApiErr::precondition_failed("No data group name was specified"))?;
    if name == group.name {
        return Ok(datagroup_node(&group).into());
    }

    let mut active: data_group::ActiveModel = group.into();
    active.name = Set(name);
    let group = active.update(&state.db).await.map_err(unique_violation)?;

    Ok(datagroup_node(&group).into())
}

// ---------- DELETE /data_group/obj/{gid} ----------

pub async fn delete(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Path(gid): Path<i32>,
) -> Result<Envelope, ApiErr> {
    let group = find_group(&state.db, claims.user_id(), gid).await?;

    let first = data_group::Entity::find()
        .filter(data_group::Column::UserId.eq(claims.user_id()))
        .order_by_asc(data_group::Column::Id)
        .one(&state.db)
        .await?;
    if !group.can_delete || first.is_some_and(|f| f.id == group.id) {
        return Err(ApiErr::precondition_failed(
            "The specified data group cannot be deleted.",
        ));
    }

    let txn = state.db.begin().await?;
    let removed = data_source::Entity::delete_many()
        .filter(data_source::Column::DatagroupId.eq(group.id))
        .exec(&txn)
        .await?
        .rows_affected;
    data_group::Entity::delete_by_id(group.id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!(gid = group.id, sources = removed, "data group deleted");
    Ok(Envelope::ok().info("Data group deleted"))
}
