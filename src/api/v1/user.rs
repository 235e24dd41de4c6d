use argon2::Argon2;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    audit::{AuditLogCollection, EntityKind},
    error::{Error, UnauthorizedType},
    util::{
        contains_insensitive, double_option, hash_password, now, verify_password, Json, Page,
        PageQuery, PathObjectId, Query,
    },
    validation::{validate_not_blank, PHONE_RE},
};

use super::auth::{AdminAccess, Company, UserCollection, UserModel, UserResponse, UserRole};

pub async fn me(user: UserModel) -> Json<UserResponse> {
    Json(user.into())
}

/// Missing fields are kept; `null` clears `phone` and `company`.
#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 124), custom = "validate_not_blank")]
    pub name: Option<String>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    #[validate(regex = "PHONE_RE")]
    pub phone: Option<Option<String>>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    #[validate]
    pub company: Option<Option<Company>>,
}

pub async fn update_me(
    State(users): State<UserCollection>,
    user: UserModel,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, Error> {
    request.validate()?;

    let user = UserModel {
        name: request
            .name
            .map(|it| it.trim().to_string())
            .unwrap_or(user.name),
        phone: request.phone.unwrap_or(user.phone),
        company: request.company.unwrap_or(user.company),
        updated_at: now(),
        ..user
    };

    users
        .update_one_by_id(
            user.id,
            bson::doc! {
                "$set": {
                    "name": &user.name,
                    "phone": user.phone.clone(),
                    "company": bson::to_bson(&user.company)?,
                    "updated_at": user.updated_at,
                }
            },
        )
        .await?;

    Ok(Json(user.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct ChangePasswordRequest {
    pub current_password: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,
}

/// Also ends the current refresh session, forcing a fresh login.
#[tracing::instrument(skip_all, fields(user = %user.id))]
pub async fn change_password(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    State(audit): State<AuditLogCollection>,
    user: UserModel,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<(), Error> {
    request.validate()?;

    if !verify_password(&argon, &request.current_password, &user.password) {
        return Err(Error::Unauthorized(UnauthorizedType::WrongPassword));
    }

    users
        .update_one_by_id(
            user.id,
            bson::doc! {
                "$set": {
                    "password": hash_password(&argon, &request.password)?,
                    "updated_at": now(),
                },
                "$unset": { "refresh_token": "" },
            },
        )
        .await?;

    audit
        .record(
            Some(user.id),
            "user.change_password",
            EntityKind::User,
            Some(user.id),
            bson::Document::new(),
        )
        .await;

    Ok(())
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct UserListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub role: Option<UserRole>,
    pub search: Option<String>,
}

impl UserListQuery {
    pub fn filter(&self) -> Result<bson::Document, Error> {
        let mut filter = bson::Document::new();
        if let Some(role) = self.role {
            filter.insert("role", bson::to_bson(&role)?);
        }
        if let Some(search) = self.search.as_deref().filter(|it| !it.trim().is_empty()) {
            filter.insert(
                "$or",
                vec![
                    bson::doc! { "name": contains_insensitive(search) },
                    bson::doc! { "email": contains_insensitive(search) },
                ],
            );
        }

        Ok(filter)
    }
}

pub async fn index(
    State(users): State<UserCollection>,
    AdminAccess(_): AdminAccess,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Page<UserResponse>>, Error> {
    let page = users
        .find_page(
            query.filter()?,
            None,
            PageQuery {
                page: query.page,
                limit: query.limit,
            },
        )
        .await?;

    Ok(Json(page.map(Into::into)))
}

pub async fn show(
    State(users): State<UserCollection>,
    AdminAccess(_): AdminAccess,
    PathObjectId(id): PathObjectId,
) -> Result<Json<UserResponse>, Error> {
    let user = users.get_one_by_id(id).await?.ok_or(Error::NoResource)?;

    Ok(Json(user.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

#[tracing::instrument(skip_all, fields(admin = %admin.id, id = %id))]
pub async fn update_role(
    State(users): State<UserCollection>,
    State(audit): State<AuditLogCollection>,
    AdminAccess(admin): AdminAccess,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<UserResponse>, Error> {
    if id == admin.id {
        return Err(Error::Conflict("You cannot change your own role".to_string()))
            .tap_err(|_| tracing::debug!("tried changing own role"));
    }

    let user = users.get_one_by_id(id).await?.ok_or(Error::NoResource)?;
    let user = UserModel {
        role: request.role,
        updated_at: now(),
        ..user
    };

    users
        .update_one_by_id(
            id,
            bson::doc! {
                "$set": {
                    "role": bson::to_bson(&user.role)?,
                    "updated_at": user.updated_at,
                }
            },
        )
        .await?;

    audit
        .record(
            Some(admin.id),
            "user.update_role",
            EntityKind::User,
            Some(id),
            bson::doc! { "role": bson::to_bson(&user.role)? },
        )
        .await;

    Ok(Json(user.into()))
}

#[tracing::instrument(skip_all, fields(admin = %admin.id, id = %id))]
pub async fn delete(
    State(users): State<UserCollection>,
    State(audit): State<AuditLogCollection>,
    AdminAccess(admin): AdminAccess,
    PathObjectId(id): PathObjectId,
) -> Result<(), Error> {
    if id == admin.id {
        return Err(Error::Conflict("You cannot delete your own account".to_string()));
    }

    if !users.delete_one_by_id(id).await? {
        return Err(Error::NoResource);
    }

    audit
        .record(Some(admin.id), "user.delete", EntityKind::User, Some(id), bson::Document::new())
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use validator::Validate;

    use crate::{
        api::v1::{
            auth::{Company, UserRole},
            tests::{bootstrap, Bootstrap},
        },
        error::Error,
        util::PathObjectId,
    };

    use super::*;

    #[test]
    fn test_list_filter() {
        let filter = UserListQuery {
            role: Some(UserRole::Admin),
            search: Some("ana".to_string()),
            ..Default::default()
        }
        .filter()
        .unwrap();

        assert_eq!(filter.get_str("role").unwrap(), "admin");
        assert_eq!(filter.get_array("$or").unwrap().len(), 2);

        let filter = UserListQuery {
            search: Some("   ".to_string()),
            ..Default::default()
        }
        .filter()
        .unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn test_update_profile_validation() {
        assert!(UpdateProfileRequest::default().validate().is_ok());

        let request = UpdateProfileRequest {
            name: Some(" ".to_string()),
            ..Default::default()
        };
        assert!(request.validate().unwrap_err().field_errors().contains_key("name"));

        let request = UpdateProfileRequest {
            phone: Some(Some("0722".to_string())),
            ..Default::default()
        };
        assert!(request.validate().unwrap_err().field_errors().contains_key("phone"));

        let request: UpdateProfileRequest =
            serde_json::from_str(r#"{"phone":null,"company":null}"#).unwrap();
        assert_eq!(request.phone, Some(None));
        assert!(matches!(request.company, Some(None)));
        assert!(request.validate().is_ok());
    }

    async fn stored_user(bootstrap: &Bootstrap) -> UserModel {
        bootstrap
            .app_state
            .user_collection
            .get_one_by_id(bootstrap.user_id())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_update_me_clears_optional_fields() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;

        let Json(updated) = update_me(
            client.user_collection(),
            client.user_model(),
            Json(UpdateProfileRequest {
                phone: Some(Some("0722 123 456".to_string())),
                company: Some(Some(Company {
                    name: "Piese Auto SRL".to_string(),
                    cui: "RO18547290".to_string(),
                    reg_com: "J40/1234/2020".to_string(),
                    address: None,
                })),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.phone.as_deref(), Some("0722 123 456"));
        assert!(updated.company.is_some());

        // an absent key keeps the stored value
        let Json(renamed) = update_me(
            client.user_collection(),
            stored_user(&client).await,
            Json(UpdateProfileRequest {
                name: Some("Ana".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(renamed.name, "Ana");
        assert_eq!(renamed.phone.as_deref(), Some("0722 123 456"));
        assert!(renamed.company.is_some());

        let request = serde_json::from_str(r#"{"phone":null,"company":null}"#).unwrap();
        let Json(cleared) = update_me(
            client.user_collection(),
            stored_user(&client).await,
            Json(request),
        )
        .await
        .unwrap();
        assert_eq!(cleared.phone, None);
        assert!(cleared.company.is_none());

        let stored = stored_user(&client).await;
        assert_eq!(stored.name, "Ana");
        assert_eq!(stored.phone, None);
        assert!(stored.company.is_none());
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_change_password() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;

        let err = change_password(
            client.user_collection(),
            client.argon(),
            client.audit_collection(),
            client.user_model(),
            Json(ChangePasswordRequest {
                current_password: "wrong-password".to_string(),
                password: "new-password".to_string(),
                confirm_password: "new-password".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Unauthorized(UnauthorizedType::WrongPassword));

        change_password(
            client.user_collection(),
            client.argon(),
            client.audit_collection(),
            client.user_model(),
            Json(ChangePasswordRequest {
                current_password: "password".to_string(),
                password: "new-password".to_string(),
                confirm_password: "new-password".to_string(),
            }),
        )
        .await
        .unwrap();

        let stored = bootstrap
            .app_state
            .user_collection
            .get_one_by_id(client.user_id())
            .await
            .unwrap()
            .unwrap();
        assert!(crate::util::verify_password(
            &bootstrap.app_state.argon,
            "new-password",
            &stored.password
        ));
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_admin_manages_users() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;

        let Json(page) = index(
            bootstrap.user_collection(),
            bootstrap.admin_access(),
            Query(UserListQuery {
                role: Some(UserRole::Client),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);

        let Json(updated) = update_role(
            bootstrap.user_collection(),
            bootstrap.audit_collection(),
            bootstrap.admin_access(),
            PathObjectId(client.user_id()),
            Json(UpdateRoleRequest {
                role: UserRole::Admin,
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.role, UserRole::Admin);

        let err = delete(
            bootstrap.user_collection(),
            bootstrap.audit_collection(),
            bootstrap.admin_access(),
            PathObjectId(bootstrap.user_id()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Conflict(_));

        delete(
            bootstrap.user_collection(),
            bootstrap.audit_collection(),
            bootstrap.admin_access(),
            PathObjectId(client.user_id()),
        )
        .await
        .unwrap();

        let err = show(
            bootstrap.user_collection(),
            bootstrap.admin_access(),
            PathObjectId(client.user_id()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NoResource);
    }
}
