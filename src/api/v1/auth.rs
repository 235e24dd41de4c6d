use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization, Cookie},
    http::{header, request::Parts},
    RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    audit::{AuditLogCollection, EntityKind},
    collection,
    error::{is_duplicate_key, Error, UnauthorizedType},
    mail::{templates, EmailService},
    util::{hash_password, now, verify_password, FormattedDateTime, Json, ObjectIdString},
    validation::{validate_cui, validate_not_blank, PHONE_RE, REG_COM_RE},
};

use super::token::{
    decode_access_token, decode_refresh_token, generate_access_token, generate_refresh_token,
    JwtState, RefreshTokenClaims,
};

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

collection!(UserCollection, UserModel);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub company: Option<Company>,

    /// Hash of the refresh token issued at the last login.
    #[serde(default)]
    pub refresh_token: Option<String>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Client,
    Admin,
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Company {
    #[validate(length(min = 1, max = 200), custom = "validate_not_blank")]
    pub name: String,

    #[validate(custom = "validate_cui")]
    pub cui: String,

    #[validate(regex = "REG_COM_RE")]
    pub reg_com: String,

    #[validate(length(max = 300))]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UserAccess {
    pub id: ObjectId,
    pub role: UserRole,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        let token = decode_access_token(jwt_state, token)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidAccessToken));
        }

        Ok(Self {
            id: token.claims.sub.0,
            role: token.claims.role,
        })
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }

    /// Admins see everything, clients only what they own.
    pub fn can_access(&self, owner: ObjectId) -> bool {
        self.is_admin() || self.id == owner
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

/// An authenticated administrator; any other role is rejected with `Forbidden`.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess(pub UserAccess);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;

        if !access.is_admin() {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!(user = %access.id, "admin route as client"));
        }

        Ok(Self(access))
    }
}

/// Whether `user` is `owner` or an admin acting for them.
pub fn ensure_access(user: &UserAccess, owner: ObjectId) -> Result<(), Error> {
    if user.can_access(owner) {
        Ok(())
    } else {
        Err(Error::Forbidden).tap_err(|_| {
            tracing::debug!(user = %user.id, "tried accessing another client's data")
        })
    }
}

#[derive(Debug)]
pub struct RefreshToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshToken
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(token) = parts
            .headers
            .get(REFRESH_TOKEN_HEADER)
            .and_then(|it| it.to_str().ok())
        {
            return Ok(Self(token.to_string()));
        }

        let cookie = parts
            .extract::<TypedHeader<Cookie>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("cookie not found"))?;

        let refresh_token = cookie
            .get(REFRESH_TOKEN_COOKIE)
            .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("token not found"))?;

        Ok(Self(refresh_token.to_string()))
    }
}

#[derive(Debug)]
pub struct RefreshClaim(pub RefreshTokenClaims, pub String);

impl RefreshClaim {
    pub fn from_token(jwt_state: &JwtState, refresh_token: String) -> Result<Self, Error> {
        let token = decode_refresh_token(jwt_state, &refresh_token)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken));
        }

        Ok(Self(token.claims, refresh_token))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshClaim
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RefreshToken(refresh_token) = parts.extract::<RefreshToken>().await?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, refresh_token)
    }
}

impl UserModel {
    pub async fn from_id(id: ObjectId, users: &UserCollection) -> Result<Self, Error> {
        users
            .get_one_by_id(id)
            .await?
            .ok_or(Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserModel
where
    JwtState: FromRef<S>,
    UserCollection: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;
        let users = UserCollection::from_ref(state);
        Self::from_id(access.id, &users).await
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 124), custom = "validate_not_blank")]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,

    #[validate(regex = "PHONE_RE")]
    pub phone: Option<String>,

    #[validate]
    pub company: Option<Company>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserResponse {
    pub id: ObjectIdString,

    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub company: Option<Company>,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<UserModel> for UserResponse {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            phone: value.phone,
            role: value.role,
            company: value.company,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

pub struct CreateUserRequest {
    pub register: RegisterRequest,
    pub role: UserRole,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn create_user(
    users: &UserCollection,
    argon: &Argon2<'_>,
    CreateUserRequest { register, role }: CreateUserRequest,
) -> Result<UserModel, Error> {
    register.validate()?;

    let email = normalize_email(&register.email);
    let count = users
        .count_documents(bson::doc! { "email": &email }, None)
        .await?;

    if count > 0 {
        return Err(Error::MustUniqueError("email".to_string()));
    }

    let model = UserModel {
        id: ObjectId::new(),
        name: register.name.trim().to_string(),
        email,
        password: hash_password(argon, &register.password)?,
        phone: register.phone,
        role,
        company: register.company,
        refresh_token: None,
        created_at: now(),
        updated_at: now(),
    };

    // the unique index catches registrations racing past the count above
    users.insert_one(&model, None).await.map_err(|err| {
        if is_duplicate_key(&err) {
            Error::MustUniqueError("email".to_string())
        } else {
            err.into()
        }
    })?;

    Ok(model)
}

#[tracing::instrument(skip_all, fields(email = %request.email))]
pub async fn register(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    State(audit): State<AuditLogCollection>,
    State(email): State<EmailService>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, Error> {
    request.validate()?;

    let user = create_user(
        &users,
        &argon,
        CreateUserRequest {
            register: request,
            role: UserRole::Client,
        },
    )
    .await?;

    audit
        .record(
            None,
            "user.register",
            EntityKind::User,
            Some(user.id),
            bson::doc! { "email": &user.email },
        )
        .await;
    email.dispatch(&user.email, templates::welcome(&user.name));

    Ok(Json(user.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub refresh_token: String,
    pub access_token: String,
    pub expired_at: FormattedDateTime,
    pub user: UserResponse,
}

fn refresh_cookie(token: &str, max_age: i64) -> String {
    format!(
        "{REFRESH_TOKEN_COOKIE}={token}; HttpOnly; Secure; Path=/; \
         SameSite=Strict; Max-Age={max_age}"
    )
}

#[tracing::instrument(skip_all, fields(email = %request.email))]
pub async fn login(
    State(users): State<UserCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<LoginRequest>,
) -> Result<([(header::HeaderName, String); 1], Json<LoginResponse>), Error> {
    let user = users
        .find_one(bson::doc! { "email": normalize_email(&request.email) }, None)
        .await?;

    let user = match user {
        Some(user) if verify_password(&argon, &request.password, &user.password) => user,
        _ => {
            return Err(Error::Unauthorized(UnauthorizedType::WrongEmailOrPassword))
                .tap_err(|_| tracing::debug!("failed login"))
        }
    };

    let refresh_token = generate_refresh_token(&jwt_state, &user)?;
    let access_token = generate_access_token(&jwt_state, &user)?;

    users
        .update_one_by_id(
            user.id,
            bson::doc! {
                "$set": {
                    "refresh_token": hash_password(&argon, &refresh_token.token)?,
                }
            },
        )
        .await?;

    let max_age = (refresh_token.expired_at - time::OffsetDateTime::now_utc()).whole_seconds();

    Ok((
        [(header::SET_COOKIE, refresh_cookie(&refresh_token.token, max_age))],
        Json(LoginResponse {
            refresh_token: refresh_token.token,
            access_token: access_token.token,
            expired_at: access_token.expired_at.into(),
            user: user.into(),
        }),
    ))
}

/// Loads the user a refresh token was issued to, requiring it to be the current one.
async fn session_user(
    users: &UserCollection,
    argon: &Argon2<'_>,
    claim: &RefreshTokenClaims,
    refresh_token: &str,
) -> Result<UserModel, Error> {
    let user = users
        .get_one_by_id(claim.sub.0)
        .await?
        .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    match &user.refresh_token {
        Some(hashed) if verify_password(argon, refresh_token, hashed) => Ok(user),
        Some(_) => {
            // an old token being replayed: end the current session too
            users
                .update_one_by_id(user.id, bson::doc! { "$unset": { "refresh_token": "" } })
                .await?;
            tracing::warn!(user = %user.id, "stale refresh token presented");
            Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
        }
        None => Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken)),
    }
}

pub async fn logout(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    RefreshClaim(claim, refresh_token): RefreshClaim,
) -> Result<[(header::HeaderName, String); 1], Error> {
    let user = session_user(&users, &argon, &claim, &refresh_token).await?;

    users
        .update_one_by_id(user.id, bson::doc! { "$unset": { "refresh_token": "" } })
        .await?;

    Ok([(header::SET_COOKIE, refresh_cookie("", 0))])
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshAccessTokenResponse {
    pub access_token: String,
    pub expired_at: FormattedDateTime,
}

pub async fn refresh_access_token(
    State(users): State<UserCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    RefreshClaim(claim, refresh_token): RefreshClaim,
) -> Result<Json<RefreshAccessTokenResponse>, Error> {
    let user = session_user(&users, &argon, &claim, &refresh_token).await?;

    let access_token = generate_access_token(&jwt_state, &user)?;

    Ok(Json(RefreshAccessTokenResponse {
        access_token: access_token.token,
        expired_at: access_token.expired_at.into(),
    }))
}
