use axum::extract::State;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    audit::EntityKind,
    collection,
    error::Error,
    util::{now, FormattedDateTime, Json, ObjectIdString, Page, PageQuery, PathObjectId, Query},
};

use super::auth::{UserAccess, UserCollection, UserRole};

collection!(NotificationCollection, NotificationModel);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderCancelled,
    OfferCreated,
    OfferAccepted,
    OfferRejected,
    DeliveryUpdated,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub entity: EntityKind,
    pub id: ObjectId,
}

impl Reference {
    pub fn order(id: ObjectId) -> Self {
        Self {
            entity: EntityKind::Order,
            id,
        }
    }

    pub fn offer(id: ObjectId) -> Self {
        Self {
            entity: EntityKind::Offer,
            id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotificationModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub reference: Option<Reference>,
    pub read: bool,
    pub created_at: bson::DateTime,
}

/// What to tell a user, independent of who receives it.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub reference: Option<Reference>,
}

impl Notice {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            reference: None,
        }
    }

    pub fn about(self, reference: Reference) -> Self {
        Self {
            reference: Some(reference),
            ..self
        }
    }

    fn to_model(&self, user_id: ObjectId) -> NotificationModel {
        NotificationModel {
            id: ObjectId::new(),
            user_id,
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            reference: self.reference,
            read: false,
            created_at: now(),
        }
    }
}

impl NotificationCollection {
    /// Best effort: a failed notification is logged and never fails the triggering request.
    pub async fn notify(&self, user_id: ObjectId, notice: &Notice) {
        if let Err(err) = self.insert_one(notice.to_model(user_id), None).await {
            tracing::warn!(
                user = %user_id,
                kind = ?notice.kind,
                "failed to store notification: {}",
                err
            );
        }
    }

    pub async fn notify_admins(&self, users: &UserCollection, notice: &Notice) {
        let admins = match users
            .find_all(
                bson::doc! { "role": bson::to_bson(&UserRole::Admin).unwrap_or_default() },
                bson::doc! { "_id": 1 },
            )
            .await
        {
            Ok(admins) => admins,
            Err(err) => {
                tracing::warn!(kind = ?notice.kind, "failed to look up admins: {}", err);
                return;
            }
        };

        let models: Vec<NotificationModel> =
            admins.iter().map(|it| notice.to_model(it.id)).collect();
        if models.is_empty() {
            return;
        }

        if let Err(err) = self.insert_many(models, None).await {
            tracing::warn!(kind = ?notice.kind, "failed to store admin notifications: {}", err);
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotificationResponse {
    pub id: ObjectIdString,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub reference: Option<ReferenceResponse>,
    pub read: bool,
    pub created_at: FormattedDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReferenceResponse {
    pub entity: EntityKind,
    pub id: ObjectIdString,
}

impl From<NotificationModel> for NotificationResponse {
    fn from(value: NotificationModel) -> Self {
        Self {
            id: value.id.into(),
            kind: value.kind,
            title: value.title,
            message: value.message,
            reference: value.reference.map(|it| ReferenceResponse {
                entity: it.entity,
                id: it.id.into(),
            }),
            read: value.read,
            created_at: value.created_at.into(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct NotificationListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub unread: Option<bool>,
}

pub async fn index(
    State(notifications): State<NotificationCollection>,
    user: UserAccess,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Page<NotificationResponse>>, Error> {
    let mut filter = bson::doc! { "user_id": user.id };
    if query.unread == Some(true) {
        filter.insert("read", false);
    }

    let page = notifications
        .find_page(
            filter,
            None,
            PageQuery {
                page: query.page,
                limit: query.limit,
            },
        )
        .await?;

    Ok(Json(page.map(Into::into)))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UnreadCountResponse {
    pub unread: u64,
}

pub async fn unread_count(
    State(notifications): State<NotificationCollection>,
    user: UserAccess,
) -> Result<Json<UnreadCountResponse>, Error> {
    let unread = notifications
        .count_documents(bson::doc! { "user_id": user.id, "read": false }, None)
        .await?;

    Ok(Json(UnreadCountResponse { unread }))
}

pub async fn mark_read(
    State(notifications): State<NotificationCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<Json<NotificationResponse>, Error> {
    let notification = notifications
        .find_one_and_update(
            bson::doc! { "_id": id, "user_id": user.id },
            bson::doc! { "$set": { "read": true } },
            mongodb::options::FindOneAndUpdateOptions::builder()
                .return_document(mongodb::options::ReturnDocument::After)
                .build(),
        )
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(notification.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

pub async fn mark_all_read(
    State(notifications): State<NotificationCollection>,
    user: UserAccess,
) -> Result<Json<MarkAllReadResponse>, Error> {
    let result = notifications
        .update_many(
            bson::doc! { "user_id": user.id, "read": false },
            bson::doc! { "$set": { "read": true } },
            None,
        )
        .await?;

    Ok(Json(MarkAllReadResponse {
        updated: result.modified_count,
    }))
}

pub async fn delete(
    State(notifications): State<NotificationCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<(), Error> {
    let result = notifications
        .delete_one(bson::doc! { "_id": id, "user_id": user.id }, None)
        .await?;

    if result.deleted_count == 0 {
        return Err(Error::NoResource);
    }

    Ok(())
}
