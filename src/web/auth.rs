use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{Json, extract::State, http::StatusCode};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};

use crate::web::{
    AppState,
    guards::Role,
    responses::{ApiError, ApiJson, ApiMessage, ApiResult, require_field},
};

/// JWT payload. Only the employee identifier is embedded; role and
/// department are looked up fresh on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "employeeID")]
    pub employee_id: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct UserRow {
    pub employee_id: String,
    pub name: String,
    pub department: String,
    pub designation: String,
    pub shift: Option<String>,
    pub password_hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    name: Option<String>,
    #[serde(rename = "employeeID")]
    employee_id: Option<String>,
    department: Option<String>,
    designation: Option<String>,
    password: Option<String>,
    shift: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "employeeID")]
    employee_id: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "employeeID")]
    pub employee_id: String,
    pub name: String,
    pub department: String,
    pub designation: String,
    pub shift: Option<String>,
}

pub async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignupRequest>,
) -> ApiResult<(StatusCode, Json<ApiMessage>)> {
    let name = require_field(payload.name.as_deref(), "name")?;
    let employee_id = require_field(payload.employee_id.as_deref(), "employeeID")?;
    let department = require_field(payload.department.as_deref(), "department")?;
    let designation = require_field(payload.designation.as_deref(), "designation")?;
    let shift = require_field(payload.shift.as_deref(), "shift")?;
    // Passwords are taken verbatim; surrounding whitespace is significant.
    let password = payload
        .password
        .as_deref()
        .filter(|password| !password.is_empty())
        .ok_or_else(|| ApiError::validation("password is required"))?;

    let role: Role = designation.parse().map_err(ApiError::Validation)?;

    let password_hash = hash_password(password).map_err(|err| {
        error!(?err, "failed to hash password during signup");
        ApiError::Server(err.to_string())
    })?;

    sqlx::query(
        "INSERT INTO users (employee_id, name, department, designation, shift, password_hash)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(employee_id)
    .bind(name)
    .bind(department)
    .bind(role.as_str())
    .bind(shift)
    .bind(password_hash)
    .execute(state.pool_ref())
    .await?;

    info!(employee_id, department, "user signed up");

    Ok((
        StatusCode::CREATED,
        Json(ApiMessage::new("User created successfully")),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let employee_id = require_field(payload.employee_id.as_deref(), "employeeID")?;
    let password = payload
        .password
        .as_deref()
        .filter(|password| !password.is_empty())
        .ok_or_else(|| ApiError::validation("password is required"))?;

    let user = fetch_user(state.pool_ref(), employee_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password(password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let config = state.config();
    let token = issue_token(
        &user.employee_id,
        &config.jwt_secret,
        Duration::minutes(config.token_ttl_minutes),
    )
    .map_err(|err| {
        error!(?err, "failed to sign session token");
        ApiError::Server(err.to_string())
    })?;

    Ok(Json(LoginResponse {
        token,
        employee_id: user.employee_id,
        name: user.name,
        department: user.department,
        designation: user.designation,
        shift: user.shift,
    }))
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// Signs an HS256 token for `employee_id` valid for `ttl`.
pub fn issue_token(
    employee_id: &str,
    secret: &str,
    ttl: Duration,
) -> jsonwebtoken::errors::Result<String> {
    let now = Utc::now();
    let claims = Claims {
        employee_id: employee_id.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies signature and expiry, returning the embedded claims.
pub fn decode_token(token: &str, secret: &str) -> jsonwebtoken::errors::Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
}

pub async fn fetch_user(pool: &PgPool, employee_id: &str) -> sqlx::Result<Option<UserRow>> {
    sqlx::query_as::<_, UserRow>(
        "SELECT employee_id, name, department, designation, shift, password_hash
         FROM users WHERE employee_id = $1",
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("s3cret!").expect("hash");
        assert_ne!(hash, "s3cret!");
        assert!(verify_password("s3cret!", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("same").expect("hash");
        let second = hash_password("same").expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn token_embeds_employee_id() {
        let token = issue_token("EMP-001", SECRET, Duration::hours(1)).expect("token");
        let claims = decode_token(&token, SECRET).expect("claims");
        assert_eq!(claims.employee_id, "EMP-001");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let token = issue_token("EMP-001", SECRET, Duration::hours(1)).expect("token");
        assert!(decode_token(&token, "another-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("EMP-001", SECRET, Duration::minutes(-5)).expect("token");
        assert!(decode_token(&token, SECRET).is_err());
    }

    #[test]
    fn claims_serialize_with_original_key() {
        let claims = Claims {
            employee_id: "EMP-9".into(),
            iat: 1,
            exp: 2,
        };
        let value = serde_json::to_value(&claims).expect("json");
        assert_eq!(value["employeeID"], "EMP-9");
    }
}
