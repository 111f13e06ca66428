use axum::{extract::State, response::Json};
use sea_orm::EntityTrait;

use crate::entity::app_user;
use crate::vault::{self, Unlock};

use super::{
    ApiErr, BrowserState,
    dto::{LoginRequest, LoginResponse, MasterPasswordRequest, MasterPasswordStatus, UserResponse},
    jwt::{AuthClaims, Claims, encode_jwt},
    response::Envelope,
};

pub async fn login(
    State(state): State<BrowserState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiErr> {
    let user = state
        .auth
        .authenticate(&body.username, &body.password)
        .await
        .map_err(|e| {
            tracing::info!(username = %body.username, error = %e, "login rejected");
            ApiErr::unauthorized("Invalid credentials")
        })?;

    let claims = Claims::for_user(user.id, &user.username, state.jwt_expiry_hours);
    let token = encode_jwt(&claims, &state.jwt_secret).map_err(ApiErr::internal)?;

    Ok(Json(LoginResponse {
        token,
        user: UserResponse::from(user),
    }))
}

pub async fn me(
    claims: AuthClaims,
    State(state): State<BrowserState>,
) -> Result<Json<UserResponse>, ApiErr> {
    let user = app_user::Entity::find_by_id(claims.user_id())
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiErr::gone("User not found"))?;

    Ok(Json(UserResponse::from(user)))
}

// ---------- master password ----------

pub async fn master_password_status(
    claims: AuthClaims,
    State(state): State<BrowserState>,
) -> Result<Json<MasterPasswordStatus>, ApiErr> {
    let user = app_user::Entity::find_by_id(claims.user_id())
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiErr::gone("User not found"))?;

    Ok(Json(MasterPasswordStatus {
        present: state.key_ring.get_crypt_key(user.id).is_some(),
        is_set: user.masterpass_check.is_some(),
    }))
}

pub async fn set_master_password(
    claims: AuthClaims,
    State(state): State<BrowserState>,
    Json(body): Json<MasterPasswordRequest>,
) -> Result<Envelope, ApiErr> {
    if body.password.is_empty() {
        return Err(ApiErr::missing_parameter("password"));
    }

    let outcome = vault::unlock(&state.db, &state.key_ring, claims.user_id(), &body.password).await?;
    let info = match outcome {
        Unlock::Created => "Master password set successfully.",
        Unlock::Validated => "Master password validated successfully.",
    };

    Ok(Envelope::ok()
        .info(info)
        .data(MasterPasswordStatus {
            present: true,
            is_set: true,
        }))
}

pub async fn reset_master_password(
    claims: AuthClaims,
    State(state): State<BrowserState>,
) -> Result<Envelope, ApiErr> {
    let cleared = vault::reset(&state.db, &state.key_ring, claims.user_id()).await?;

    Ok(Envelope::ok()
        .info("The master password has been reset. Saved secrets were removed.")
        .data(serde_json::json!({ "cleared": cleared })))
}
