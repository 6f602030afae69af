use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::FromRequestParts,
    http::request::Parts,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::keys::generate_keypair;
use crate::models::User;
use crate::store::Database;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// user id
    pub sub: Uuid,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(
        min = 3,
        max = 30,
        message = "Username must be between 3 and 30 characters"
    ))]
    pub username: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(
        min = 1,
        max = 100,
        message = "Display name must be between 1 and 100 characters"
    ))]
    pub display_name: String,
}

/// Usernames become URL path segments and WebFinger subjects.
fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Validation(format!("Failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::AuthFailure)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn create_token(config: &AppConfig, user: &User) -> Result<String, AppError> {
    let now = OffsetDateTime::now_utc();
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        iat: now.unix_timestamp(),
        exp: now.unix_timestamp() + config.jwt_expiration_ms / 1000,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal)
}

pub fn verify_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::AuthFailure)
}

fn claims_from_parts(parts: &Parts) -> Option<Claims> {
    let config = parts.extensions.get::<AppConfig>()?;
    let token = parts
        .headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())?
        .strip_prefix("Bearer ")?;
    verify_token(config, token).ok()
}

/// Extractor for authenticated requests.
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        claims_from_parts(parts).map(AuthUser).ok_or(AppError::AuthFailure)
    }
}

/// Extractor that tolerates anonymous requests.
pub struct OptionalAuthUser(pub Option<Claims>);

impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuthUser(claims_from_parts(parts)))
    }
}

fn validation_message(e: validator::ValidationErrors) -> AppError {
    let messages: Vec<String> = e
        .field_errors()
        .into_iter()
        .flat_map(|(_, errors)| {
            errors
                .iter()
                .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
        })
        .collect();
    AppError::Validation(messages.join(", "))
}

/// Handler for user registration. The ActivityPub keypair is generated
/// eagerly: a user must be able to sign from the first second.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registration successful", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Registration disabled"),
        (status = 409, description = "Username or email already registered"),
    )
)]
pub async fn register(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if !config.registration_enabled {
        return Err(AppError::Forbidden);
    }
    req.validate().map_err(validation_message)?;
    if !valid_username(&req.username) {
        return Err(AppError::Validation(
            "Username may contain only letters, digits, dots, dashes and underscores".to_string(),
        ));
    }

    if db.get_user_by_username(&req.username).await?.is_some()
        || db.get_user_by_email(&req.email).await?.is_some()
    {
        return Err(AppError::Conflict);
    }

    let password_hash = hash_password(&req.password)?;
    let keypair = generate_keypair()?;
    let user = User {
        id: Uuid::new_v4(),
        username: req.username,
        email: req.email,
        password_hash,
        display_name: req.display_name,
        avatar_url: None,
        public_key_pem: keypair.public_key_pem,
        private_key_pem: keypair.private_key_pem,
        enabled: true,
        locked: false,
        created_at: OffsetDateTime::now_utc(),
    };
    db.create_user(&user).await?;

    let token = create_token(&config, &user)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

/// Handler for user login.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Invalid credentials"),
    )
)]
pub async fn login(
    Extension(db): Extension<Database>,
    Extension(config): Extension<AppConfig>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    req.validate().map_err(validation_message)?;

    let user = db
        .get_user_by_username(&req.username)
        .await?
        .ok_or(AppError::AuthFailure)?;
    if !user.enabled || user.locked {
        return Err(AppError::AuthFailure);
    }
    if !verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::AuthFailure);
    }

    let token = create_token(&config, &user)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

/// Handler to get the current user.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user info", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(
    Extension(db): Extension<Database>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    let user = db.get_user(claims.sub).await?.ok_or(AppError::AuthFailure)?;
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        AppConfig {
            domain: "trailpost.example".to_string(),
            base_url: "https://trailpost.example".to_string(),
            port: 3001,
            database_url: String::new(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiration_ms: 7 * 24 * 60 * 60 * 1000,
            weather_enabled: false,
            weather_api_key: None,
            osm_tiles_enabled: true,
            registration_enabled: true,
            default_timezone: "UTC".to_string(),
        }
    }

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "bob".to_string(),
            email: "bob@example.com".to_string(),
            password_hash: String::new(),
            display_name: "Bob".to_string(),
            avatar_url: None,
            public_key_pem: String::new(),
            private_key_pem: String::new(),
            enabled: true,
            locked: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_username_charset() {
        assert!(valid_username("bob"));
        assert!(valid_username("bob_42.x-y"));
        assert!(!valid_username("bob smith"));
        assert!(!valid_username("böb"));
        assert!(!valid_username(""));
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert!(verify_password("hunter2hunter2", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_token_roundtrip() {
        let config = test_config();
        let user = test_user();
        let token = create_token(&config, &user).unwrap();
        let claims = verify_token(&config, &token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, user.username);

        let lifetime = claims.exp - claims.iat;
        assert_eq!(lifetime, config.jwt_expiration_ms / 1000);
    }

    #[test]
    fn test_token_rejected_with_wrong_secret() {
        let config = test_config();
        let user = test_user();
        let token = create_token(&config, &user).unwrap();

        let mut other = test_config();
        other.jwt_secret = "different".to_string();
        assert!(verify_token(&other, &token).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let config = test_config();
        let user = test_user();
        let mut token = create_token(&config, &user).unwrap();
        token.pop();
        token.push('A');
        assert!(verify_token(&config, &token).is_err());
    }
}
