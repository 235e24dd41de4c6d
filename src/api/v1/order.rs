use axum::extract::State;
use bson::oid::ObjectId;
use mongodb::ClientSession;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::{Validate, ValidationError};

use crate::{
    audit::{AuditLogCollection, EntityKind},
    collection, with_transaction,
    error::Error,
    mail::{templates, EmailService},
    util::{
        contains_insensitive, created_between, double_option, enum_label, now,
        FormattedDateTime, Json, ObjectIdString, Page, PageQuery, PathObjectId, Query,
    },
    validation::{validate_not_blank, validate_vehicle_year, PHONE_RE, VIN_RE},
};

use super::{
    auth::{ensure_access, UserAccess, UserCollection, UserRole},
    notification::{Notice, NotificationCollection, NotificationKind, Reference},
    offer::{OfferCollection, OfferStatus},
};

collection!(OrderCollection, OrderModel);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Offered,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (New, Offered)
                | (Offered, New)
                | (Offered, Accepted)
                | (Offered, Rejected)
                | (New, Cancelled)
                | (Offered, Cancelled)
                | (Accepted, Completed)
        )
    }

    pub fn transition(self, next: OrderStatus) -> Result<OrderStatus, Error> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::invalid_transition("order", self, next))
        }
    }

    /// Whether the request itself (vehicle, parts, contact) may still change.
    pub fn is_editable(self) -> bool {
        !matches!(self, OrderStatus::Cancelled | OrderStatus::Completed)
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Contact {
    #[validate(length(min = 1, max = 124), custom = "validate_not_blank")]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(regex = "PHONE_RE")]
    pub phone: Option<String>,
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[validate(schema(function = "validate_vehicle"))]
pub struct Vehicle {
    #[validate(length(min = 1, max = 64), custom = "validate_not_blank")]
    pub make: String,

    #[validate(length(min = 1, max = 64), custom = "validate_not_blank")]
    pub model: String,

    pub year: i32,

    #[validate(regex = "VIN_RE")]
    pub vin: Option<String>,

    #[validate(length(max = 64))]
    pub engine: Option<String>,
}

fn validate_vehicle(vehicle: &Vehicle) -> Result<(), ValidationError> {
    validate_vehicle_year(vehicle.year)
}

impl Vehicle {
    pub fn describe(&self) -> String {
        format!("{} {} ({})", self.make, self.model, self.year)
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestedPart {
    #[validate(length(min = 1, max = 200), custom = "validate_not_blank")]
    pub name: String,

    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,

    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

fn validate_parts(parts: &[RequestedPart]) -> Result<(), ValidationError> {
    if parts.is_empty() {
        return Err(ValidationError::new("parts_empty"));
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,

    pub contact: Contact,
    pub vehicle: Vehicle,
    pub parts: Vec<RequestedPart>,
    #[serde(default)]
    pub notes: Option<String>,

    pub status: OrderStatus,
    #[serde(default)]
    pub offer_id: Option<ObjectId>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderResponse {
    pub id: ObjectIdString,
    pub user_id: ObjectIdString,

    pub contact: Contact,
    pub vehicle: Vehicle,
    pub parts: Vec<RequestedPart>,
    pub notes: Option<String>,

    pub status: OrderStatus,
    pub offer_id: Option<ObjectIdString>,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<OrderModel> for OrderResponse {
    fn from(value: OrderModel) -> Self {
        Self {
            id: value.id.into(),
            user_id: value.user_id.into(),
            contact: value.contact,
            vehicle: value.vehicle,
            parts: value.parts,
            notes: value.notes,
            status: value.status,
            offer_id: value.offer_id.map(Into::into),
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

impl OrderCollection {
    /// Loads an order the caller may see: its owner or any admin.
    pub async fn get_accessible(
        &self,
        user: &UserAccess,
        id: ObjectId,
    ) -> Result<OrderModel, Error> {
        let order = self.get_one_by_id(id).await?.ok_or(Error::NoResource)?;
        ensure_access(user, order.user_id)?;
        Ok(order)
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateOrderRequest {
    /// Client the order is placed for. Only honoured for admins.
    pub user_id: Option<ObjectIdString>,

    /// Defaults to the owning client's profile.
    #[validate]
    pub contact: Option<Contact>,

    #[validate]
    pub vehicle: Vehicle,

    #[validate(custom = "validate_parts")]
    #[validate]
    pub parts: Vec<RequestedPart>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[tracing::instrument(skip_all, fields(user = %user.id))]
#[allow(clippy::too_many_arguments)]
pub async fn create(
    State(orders): State<OrderCollection>,
    State(users): State<UserCollection>,
    State(notifications): State<NotificationCollection>,
    State(audit): State<AuditLogCollection>,
    State(email): State<EmailService>,
    user: UserAccess,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<OrderResponse>, Error> {
    request.validate()?;

    let owner_id = match request.user_id {
        Some(id) if user.is_admin() => *id,
        _ => user.id,
    };

    let owner = users
        .get_one_by_id(owner_id)
        .await?
        .ok_or_else(|| Error::InvalidInput("Unknown client".to_string()))?;

    if owner.role != UserRole::Client {
        return Err(Error::InvalidInput("Orders can only be placed for clients".to_string()))
            .tap_err(|_| tracing::debug!(owner = %owner.id, "order for a non-client"));
    }

    let contact = request.contact.unwrap_or_else(|| Contact {
        name: owner.name.clone(),
        email: owner.email.clone(),
        phone: owner.phone.clone(),
    });

    let order = OrderModel {
        id: ObjectId::new(),
        user_id: owner.id,
        contact,
        vehicle: request.vehicle,
        parts: request.parts,
        notes: request.notes,
        status: OrderStatus::New,
        offer_id: None,
        created_at: now(),
        updated_at: now(),
    };

    orders.insert_one(&order, None).await?;

    audit
        .record(
            Some(user.id),
            "order.create",
            EntityKind::Order,
            Some(order.id),
            bson::doc! { "user_id": order.user_id, "parts": order.parts.len() as i64 },
        )
        .await;

    let vehicle = order.vehicle.describe();
    notifications
        .notify_admins(
            &users,
            &Notice::new(
                NotificationKind::OrderCreated,
                "New part request",
                format!(
                    "{} requested {} part(s) for a {}",
                    order.contact.name,
                    order.parts.len(),
                    vehicle
                ),
            )
            .about(Reference::order(order.id)),
        )
        .await;
    email.dispatch_to_admin(templates::order_received(
        &order.contact.name,
        &vehicle,
        order.parts.len(),
    ));

    Ok(Json(order.into()))
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<OrderStatus>,
    pub search: Option<String>,
    pub from: Option<FormattedDateTime>,
    pub to: Option<FormattedDateTime>,
    /// Admin only: restrict to one client.
    pub user_id: Option<ObjectIdString>,
}

impl OrderListQuery {
    pub fn filter(&self, user: &UserAccess) -> Result<bson::Document, Error> {
        let mut filter = bson::Document::new();

        if !user.is_admin() {
            filter.insert("user_id", user.id);
        } else if let Some(user_id) = self.user_id {
            filter.insert("user_id", user_id);
        }

        if let Some(status) = self.status {
            filter.insert("status", bson::to_bson(&status)?);
        }

        if let Some(search) = self.search.as_deref().filter(|it| !it.trim().is_empty()) {
            filter.insert(
                "$or",
                vec![
                    bson::doc! { "vehicle.make": contains_insensitive(search) },
                    bson::doc! { "vehicle.model": contains_insensitive(search) },
                    bson::doc! { "vehicle.vin": contains_insensitive(search) },
                    bson::doc! { "parts.name": contains_insensitive(search) },
                ],
            );
        }

        if let Some(range) = created_between(self.from, self.to) {
            filter.insert("created_at", range);
        }

        Ok(filter)
    }
}

pub async fn index(
    State(orders): State<OrderCollection>,
    user: UserAccess,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Page<OrderResponse>>, Error> {
    let page = orders
        .find_page(
            query.filter(&user)?,
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
    State(orders): State<OrderCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<Json<OrderResponse>, Error> {
    let order = orders.get_accessible(&user, id).await?;

    Ok(Json(order.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateOrderRequest {
    #[validate]
    pub contact: Option<Contact>,

    #[validate]
    pub vehicle: Option<Vehicle>,

    #[validate(custom = "validate_parts")]
    #[validate]
    pub parts: Option<Vec<RequestedPart>>,

    /// `null` clears the notes; a missing key keeps them.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    #[validate(length(max = 2000))]
    pub notes: Option<Option<String>>,
}

/// Owners edit while the order is new; admins until it is cancelled or completed.
pub fn ensure_editable(user: &UserAccess, order: &OrderModel) -> Result<(), Error> {
    let allowed = if user.is_admin() {
        order.status.is_editable()
    } else {
        order.status == OrderStatus::New
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::Conflict(format!(
            "Order can no longer be edited while {}",
            enum_label(&order.status)
        )))
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %id))]
pub async fn update(
    State(orders): State<OrderCollection>,
    State(audit): State<AuditLogCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateOrderRequest>,
) -> Result<Json<OrderResponse>, Error> {
    request.validate()?;

    let order = orders.get_accessible(&user, id).await?;
    ensure_editable(&user, &order)?;

    let order = OrderModel {
        contact: request.contact.unwrap_or(order.contact),
        vehicle: request.vehicle.unwrap_or(order.vehicle),
        parts: request.parts.unwrap_or(order.parts),
        notes: request.notes.unwrap_or(order.notes),
        updated_at: now(),
        ..order
    };

    // the status guard is repeated in the filter so a concurrent transition wins
    let result = orders
        .update_one(
            bson::doc! { "_id": id, "status": bson::to_bson(&order.status)? },
            bson::doc! {
                "$set": {
                    "contact": bson::to_bson(&order.contact)?,
                    "vehicle": bson::to_bson(&order.vehicle)?,
                    "parts": bson::to_bson(&order.parts)?,
                    "notes": order.notes.clone(),
                    "updated_at": order.updated_at,
                }
            },
            None,
        )
        .await?;

    if result.matched_count == 0 {
        return Err(Error::Conflict("Order changed while editing, try again".to_string()));
    }

    audit
        .record(Some(user.id), "order.update", EntityKind::Order, Some(id), bson::Document::new())
        .await;

    Ok(Json(order.into()))
}

/// Cancels the order and rejects its pending offer, if any.
async fn cancel_with_session(
    orders: &OrderCollection,
    offers: &OfferCollection,
    user: &UserAccess,
    id: ObjectId,
    session: &mut ClientSession,
) -> Result<OrderModel, Error> {
    let order = orders
        .get_one_by_id_with_session(id, session)
        .await?
        .ok_or(Error::NoResource)?;
    ensure_access(user, order.user_id)?;

    let status = order.status.transition(OrderStatus::Cancelled)?;

    if let Some(offer_id) = order.offer_id {
        let offer = offers.get_one_by_id_with_session(offer_id, session).await?;
        if let Some(offer) = offer.filter(|it| it.status == OfferStatus::Proposed) {
            let status = offer.status.transition(OfferStatus::Rejected)?;
            offers
                .update_one_by_id_with_session(
                    offer.id,
                    bson::doc! {
                        "$set": {
                            "status": bson::to_bson(&status)?,
                            "rejection_reason": "order cancelled",
                            "updated_at": now(),
                        }
                    },
                    session,
                )
                .await?;
        }
    }

    let order = OrderModel {
        status,
        updated_at: now(),
        ..order
    };

    orders
        .update_one_by_id_with_session(
            id,
            bson::doc! {
                "$set": {
                    "status": bson::to_bson(&order.status)?,
                    "updated_at": order.updated_at,
                }
            },
            session,
        )
        .await?;

    Ok(order)
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %id))]
#[allow(clippy::too_many_arguments)]
pub async fn cancel(
    State(mongo): State<mongodb::Client>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(users): State<UserCollection>,
    State(notifications): State<NotificationCollection>,
    State(audit): State<AuditLogCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<Json<OrderResponse>, Error> {
    let order = with_transaction!(mongo, session => {
        cancel_with_session(&orders, &offers, &user, id, &mut session).await
    })?;

    audit
        .record(Some(user.id), "order.cancel", EntityKind::Order, Some(id), bson::Document::new())
        .await;

    let notice = Notice::new(
        NotificationKind::OrderCancelled,
        "Order cancelled",
        format!("The request for {} was cancelled", order.vehicle.describe()),
    )
    .about(Reference::order(order.id));

    if user.id == order.user_id {
        notifications.notify_admins(&users, &notice).await;
    } else {
        notifications.notify(order.user_id, &notice).await;
    }

    Ok(Json(order.into()))
}

async fn delete_with_session(
    orders: &OrderCollection,
    offers: &OfferCollection,
    user: &UserAccess,
    id: ObjectId,
    session: &mut ClientSession,
) -> Result<OrderModel, Error> {
    let order = orders
        .get_one_by_id_with_session(id, session)
        .await?
        .ok_or(Error::NoResource)?;
    ensure_access(user, order.user_id)?;

    if !user.is_admin() && (order.status != OrderStatus::New || order.offer_id.is_some()) {
        return Err(Error::Conflict(
            "Only new orders without an offer can be deleted".to_string(),
        ));
    }

    if order.status == OrderStatus::Accepted {
        return Err(Error::Conflict(
            "Orders with an accepted offer awaiting delivery cannot be deleted".to_string(),
        ));
    }

    if let Some(offer_id) = order.offer_id {
        offers.delete_one_by_id_with_session(offer_id, session).await?;
    }

    orders.delete_one_by_id_with_session(id, session).await?;

    Ok(order)
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %id))]
pub async fn delete(
    State(mongo): State<mongodb::Client>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(audit): State<AuditLogCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<(), Error> {
    let order = with_transaction!(mongo, session => {
        delete_with_session(&orders, &offers, &user, id, &mut session).await
    })?;

    audit
        .record(
            Some(user.id),
            "order.delete",
            EntityKind::Order,
            Some(id),
            bson::doc! { "offer_id": order.offer_id },
        )
        .await;

    Ok(())
}
