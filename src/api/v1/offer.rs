use axum::{extract::State, http::header};
use bson::oid::ObjectId;
use mongodb::{
    options::{FindOneAndUpdateOptions, ReturnDocument},
    ClientSession,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::{Validate, ValidationError};

use crate::{
    audit::{AuditLogCollection, EntityKind},
    collection, with_transaction,
    error::{is_duplicate_key, Error},
    export::{pdf::PdfDocument, PDF_CONTENT_TYPE},
    mail::{templates, EmailService},
    util::{
        contains_insensitive, enum_label, now, FormattedDateTime, Json, ObjectIdString, Page,
        PageQuery, PathObjectId, Query,
    },
    validation::{validate_non_negative, validate_not_blank},
};

use super::{
    auth::{ensure_access, AdminAccess, UserAccess, UserCollection},
    notification::{Notice, NotificationCollection, NotificationKind, Reference},
    order::{OrderCollection, OrderModel, OrderStatus},
};

collection!(OfferCollection, OfferModel);
collection!(CounterCollection, CounterModel);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Proposed,
    Accepted,
    Rejected,
}

impl OfferStatus {
    pub fn can_transition_to(self, next: OfferStatus) -> bool {
        matches!(
            (self, next),
            (OfferStatus::Proposed, OfferStatus::Accepted)
                | (OfferStatus::Proposed, OfferStatus::Rejected)
        )
    }

    pub fn transition(self, next: OfferStatus) -> Result<OfferStatus, Error> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::invalid_transition("offer", self, next))
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Completed,
}

impl DeliveryStatus {
    /// Deliveries only move forward one step at a time.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (DeliveryStatus::Pending, DeliveryStatus::InProgress)
                | (DeliveryStatus::InProgress, DeliveryStatus::Completed)
        )
    }

    pub fn transition(self, next: DeliveryStatus) -> Result<DeliveryStatus, Error> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::invalid_transition("delivery", self, next))
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::InProgress => "in progress",
            DeliveryStatus::Completed => "completed",
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PartOption {
    #[validate(length(min = 1, max = 124), custom = "validate_not_blank")]
    pub manufacturer: String,

    #[validate(custom = "validate_non_negative")]
    pub price: Decimal,

    #[validate(range(max = 365))]
    pub delivery_days: u32,

    #[validate(range(max = 120))]
    pub warranty_months: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OfferedPart {
    pub name: String,
    pub code: Option<String>,
    pub quantity: u32,
    pub options: Vec<PartOption>,
    /// Index into `options`, set when the client accepts.
    #[serde(default)]
    pub selected_option: Option<u32>,
}

impl OfferedPart {
    pub fn cheapest_index(&self) -> Option<usize> {
        self.options
            .iter()
            .enumerate()
            .min_by_key(|(_, it)| it.price)
            .map(|(index, _)| index)
    }

    fn option_at(&self, index: Option<usize>) -> Option<&PartOption> {
        index.and_then(|it| self.options.get(it))
    }

    pub fn cheapest(&self) -> Option<&PartOption> {
        self.option_at(self.cheapest_index())
    }

    /// The chosen option, or the cheapest while nothing is chosen.
    pub fn selected(&self) -> Option<&PartOption> {
        match self.selected_option {
            Some(index) => self.options.get(index as usize),
            None => self.cheapest(),
        }
    }
}

fn line_total(quantity: u32, option: Option<&PartOption>) -> Decimal {
    option
        .map(|it| it.price * Decimal::from(quantity))
        .unwrap_or_default()
}

/// Lowest possible price: every part at its cheapest option.
pub fn quoted_total(parts: &[OfferedPart]) -> Decimal {
    parts
        .iter()
        .map(|it| line_total(it.quantity, it.cheapest()))
        .sum()
}

/// Price of the options the client picked.
pub fn selected_total(parts: &[OfferedPart]) -> Decimal {
    parts
        .iter()
        .map(|it| line_total(it.quantity, it.selected()))
        .sum()
}

/// Records one option per part. Without explicit selections every part takes
/// its cheapest option.
pub fn apply_selections(
    parts: &mut [OfferedPart],
    selections: Option<&[u32]>,
) -> Result<(), Error> {
    match selections {
        Some(selections) => {
            if selections.len() != parts.len() {
                return Err(Error::InvalidInput(format!(
                    "Expected {} selections, got {}",
                    parts.len(),
                    selections.len()
                )));
            }

            for (part, &selection) in parts.iter_mut().zip(selections) {
                if selection as usize >= part.options.len() {
                    return Err(Error::InvalidInput(format!(
                        "Part {} has no option {}",
                        part.name, selection
                    )));
                }
                part.selected_option = Some(selection);
            }
        }
        None => {
            for part in parts.iter_mut() {
                part.selected_option = part.cheapest_index().map(|it| it as u32);
            }
        }
    }

    Ok(())
}

pub fn format_offer_number(year: i32, sequence: i64) -> String {
    format!("OF-{year}-{sequence:06}")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Delivery {
    pub status: DeliveryStatus,
    pub tracking_number: Option<String>,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OfferModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub offer_number: String,

    pub order_id: ObjectId,
    pub user_id: ObjectId,
    pub created_by: ObjectId,

    pub parts: Vec<OfferedPart>,
    pub total: Decimal,
    pub status: OfferStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub delivery: Option<Delivery>,
    #[serde(default)]
    pub valid_until: Option<bson::DateTime>,
    #[serde(default)]
    pub notes: Option<String>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl OfferModel {
    pub fn is_expired(&self, at: bson::DateTime) -> bool {
        self.valid_until.map_or(false, |it| it < at)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CounterModel {
    #[serde(rename = "_id")]
    pub id: String,
    pub seq: i64,
}

impl CounterCollection {
    /// Atomically bumps the named sequence, creating it on first use.
    ///
    /// Runs outside any transaction: every offer touches the same counter document, and a
    /// number burnt by a failed creation only leaves a gap.
    pub async fn next(&self, name: &str) -> Result<i64, Error> {
        let counter = self
            .find_one_and_update(
                bson::doc! { "_id": name },
                bson::doc! { "$inc": { "seq": 1_i64 } },
                FindOneAndUpdateOptions::builder()
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?;

        Ok(counter.map_or(1, |it| it.seq))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeliveryResponse {
    pub status: DeliveryStatus,
    pub tracking_number: Option<String>,
    pub updated_at: FormattedDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OfferResponse {
    pub id: ObjectIdString,
    pub offer_number: String,
    pub order_id: ObjectIdString,
    pub user_id: ObjectIdString,
    pub created_by: ObjectIdString,

    pub parts: Vec<OfferedPart>,
    pub total: Decimal,
    pub status: OfferStatus,
    pub rejection_reason: Option<String>,
    pub delivery: Option<DeliveryResponse>,
    pub valid_until: Option<FormattedDateTime>,
    pub notes: Option<String>,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<OfferModel> for OfferResponse {
    fn from(value: OfferModel) -> Self {
        Self {
            id: value.id.into(),
            offer_number: value.offer_number,
            order_id: value.order_id.into(),
            user_id: value.user_id.into(),
            created_by: value.created_by.into(),
            parts: value.parts,
            total: value.total,
            status: value.status,
            rejection_reason: value.rejection_reason,
            delivery: value.delivery.map(|it| DeliveryResponse {
                status: it.status,
                tracking_number: it.tracking_number,
                updated_at: it.updated_at.into(),
            }),
            valid_until: value.valid_until.map(Into::into),
            notes: value.notes,
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

impl OfferCollection {
    pub async fn get_accessible(
        &self,
        user: &UserAccess,
        id: ObjectId,
    ) -> Result<OfferModel, Error> {
        let offer = self.get_one_by_id(id).await?.ok_or(Error::NoResource)?;
        ensure_access(user, offer.user_id)?;
        Ok(offer)
    }
}

fn validate_part_list(parts: &[OfferedPartRequest]) -> Result<(), ValidationError> {
    if parts.is_empty() {
        return Err(ValidationError::new("parts_empty"));
    }
    Ok(())
}

fn validate_option_list(options: &[PartOption]) -> Result<(), ValidationError> {
    if options.is_empty() {
        return Err(ValidationError::new("options_empty"));
    }
    Ok(())
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct OfferedPartRequest {
    #[validate(length(min = 1, max = 200), custom = "validate_not_blank")]
    pub name: String,

    #[validate(length(max = 64))]
    pub code: Option<String>,

    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,

    #[validate(custom = "validate_option_list")]
    #[validate]
    pub options: Vec<PartOption>,
}

impl From<OfferedPartRequest> for OfferedPart {
    fn from(value: OfferedPartRequest) -> Self {
        Self {
            name: value.name.trim().to_string(),
            code: value.code,
            quantity: value.quantity,
            options: value.options,
            selected_option: None,
        }
    }
}

fn ensure_future(valid_until: Option<FormattedDateTime>) -> Result<Option<bson::DateTime>, Error> {
    match valid_until.map(bson::DateTime::from) {
        Some(it) if it <= now() => Err(Error::InvalidInput(
            "valid_until must be in the future".to_string(),
        )),
        it => Ok(it),
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateOfferRequest {
    pub order_id: ObjectIdString,

    #[validate(custom = "validate_part_list")]
    #[validate]
    pub parts: Vec<OfferedPartRequest>,

    pub valid_until: Option<FormattedDateTime>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

async fn create_with_session(
    orders: &OrderCollection,
    offers: &OfferCollection,
    admin: &UserAccess,
    offer_number: String,
    request: CreateOfferRequest,
    valid_until: Option<bson::DateTime>,
    session: &mut ClientSession,
) -> Result<(OfferModel, OrderModel), Error> {
    let order = orders
        .get_one_by_id_with_session(*request.order_id, session)
        .await?
        .ok_or(Error::NoResource)?;

    if order.offer_id.is_some() {
        return Err(Error::Conflict("Order already has an offer".to_string()))
            .tap_err(|_| tracing::debug!(order = %order.id, "second offer for order"));
    }
    let status = order.status.transition(OrderStatus::Offered)?;

    let parts: Vec<OfferedPart> = request.parts.into_iter().map(Into::into).collect();
    let offer = OfferModel {
        id: ObjectId::new(),
        offer_number,
        order_id: order.id,
        user_id: order.user_id,
        created_by: admin.id,
        total: quoted_total(&parts),
        parts,
        status: OfferStatus::Proposed,
        rejection_reason: None,
        delivery: None,
        valid_until,
        notes: request.notes,
        created_at: now(),
        updated_at: now(),
    };

    offers
        .insert_one_with_session(&offer, None, session)
        .await
        .map_err(|err| {
            if is_duplicate_key(&err) {
                Error::Conflict("Order already has an offer".to_string())
            } else {
                err.into()
            }
        })?;

    let order = OrderModel {
        status,
        offer_id: Some(offer.id),
        updated_at: now(),
        ..order
    };

    orders
        .update_one_by_id_with_session(
            order.id,
            bson::doc! {
                "$set": {
                    "status": bson::to_bson(&order.status)?,
                    "offer_id": offer.id,
                    "updated_at": order.updated_at,
                }
            },
            session,
        )
        .await?;

    Ok((offer, order))
}

#[tracing::instrument(skip_all, fields(admin = %admin.id, order = %request.order_id))]
#[allow(clippy::too_many_arguments)]
pub async fn create(
    State(mongo): State<mongodb::Client>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(counters): State<CounterCollection>,
    State(notifications): State<NotificationCollection>,
    State(audit): State<AuditLogCollection>,
    State(email): State<EmailService>,
    AdminAccess(admin): AdminAccess,
    Json(request): Json<CreateOfferRequest>,
) -> Result<Json<OfferResponse>, Error> {
    request.validate()?;
    let valid_until = ensure_future(request.valid_until)?;

    let year = time::OffsetDateTime::now_utc().year();
    let offer_number = format_offer_number(year, counters.next(&format!("offer-{year}")).await?);

    let (offer, order) = with_transaction!(mongo, session => {
        create_with_session(
            &orders,
            &offers,
            &admin,
            offer_number.clone(),
            request.clone(),
            valid_until,
            &mut session,
        )
        .await
    })?;

    audit
        .record(
            Some(admin.id),
            "offer.create",
            EntityKind::Offer,
            Some(offer.id),
            bson::doc! {
                "order_id": order.id,
                "offer_number": &offer.offer_number,
                "total": offer.total.to_string(),
            },
        )
        .await;

    notifications
        .notify(
            offer.user_id,
            &Notice::new(
                NotificationKind::OfferCreated,
                "Your offer is ready",
                format!(
                    "Offer {} for your {} is ready",
                    offer.offer_number,
                    order.vehicle.describe()
                ),
            )
            .about(Reference::offer(offer.id)),
        )
        .await;
    email.dispatch(
        &order.contact.email,
        templates::offer_created(
            &order.contact.name,
            &offer.offer_number,
            &offer.total.round_dp(2).to_string(),
        ),
    );

    Ok(Json(offer.into()))
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct OfferListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<OfferStatus>,
    pub delivery_status: Option<DeliveryStatus>,
    pub search: Option<String>,
}

impl OfferListQuery {
    pub fn filter(&self, user: &UserAccess) -> Result<bson::Document, Error> {
        let mut filter = bson::Document::new();

        if !user.is_admin() {
            filter.insert("user_id", user.id);
        }
        if let Some(status) = self.status {
            filter.insert("status", bson::to_bson(&status)?);
        }
        if let Some(status) = self.delivery_status {
            filter.insert("delivery.status", bson::to_bson(&status)?);
        }
        if let Some(search) = self.search.as_deref().filter(|it| !it.trim().is_empty()) {
            filter.insert("offer_number", contains_insensitive(search));
        }

        Ok(filter)
    }
}

pub async fn index(
    State(offers): State<OfferCollection>,
    user: UserAccess,
    Query(query): Query<OfferListQuery>,
) -> Result<Json<Page<OfferResponse>>, Error> {
    let page = offers
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
    State(offers): State<OfferCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<Json<OfferResponse>, Error> {
    let offer = offers.get_accessible(&user, id).await?;

    Ok(Json(offer.into()))
}

pub async fn show_by_order(
    State(offers): State<OfferCollection>,
    user: UserAccess,
    PathObjectId(order_id): PathObjectId,
) -> Result<Json<OfferResponse>, Error> {
    let offer = offers
        .find_one(bson::doc! { "order_id": order_id }, None)
        .await?
        .ok_or(Error::NoResource)?;
    ensure_access(&user, offer.user_id)?;

    Ok(Json(offer.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateOfferRequest {
    #[validate(custom = "validate_part_list")]
    #[validate]
    pub parts: Option<Vec<OfferedPartRequest>>,

    pub valid_until: Option<FormattedDateTime>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[tracing::instrument(skip_all, fields(admin = %admin.id, id = %id))]
pub async fn update(
    State(offers): State<OfferCollection>,
    State(audit): State<AuditLogCollection>,
    AdminAccess(admin): AdminAccess,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateOfferRequest>,
) -> Result<Json<OfferResponse>, Error> {
    request.validate()?;
    let valid_until = ensure_future(request.valid_until)?;

    let offer = offers.get_one_by_id(id).await?.ok_or(Error::NoResource)?;
    if offer.status != OfferStatus::Proposed {
        return Err(Error::Conflict("Only proposed offers can be edited".to_string()));
    }

    let parts = match request.parts {
        Some(parts) => parts.into_iter().map(Into::into).collect(),
        None => offer.parts,
    };
    let offer = OfferModel {
        total: quoted_total(&parts),
        parts,
        valid_until: valid_until.or(offer.valid_until),
        notes: request.notes.or(offer.notes),
        updated_at: now(),
        ..offer
    };

    let result = offers
        .update_one(
            bson::doc! { "_id": id, "status": bson::to_bson(&OfferStatus::Proposed)? },
            bson::doc! {
                "$set": {
                    "parts": bson::to_bson(&offer.parts)?,
                    "total": bson::to_bson(&offer.total)?,
                    "valid_until": offer.valid_until,
                    "notes": offer.notes.clone(),
                    "updated_at": offer.updated_at,
                }
            },
            None,
        )
        .await?;

    if result.matched_count == 0 {
        return Err(Error::Conflict("Offer was answered while editing".to_string()));
    }

    audit
        .record(
            Some(admin.id),
            "offer.update",
            EntityKind::Offer,
            Some(id),
            bson::doc! { "total": offer.total.to_string() },
        )
        .await;

    Ok(Json(offer.into()))
}

/// The client's answer to a proposed offer.
enum Decision {
    Accept(Option<Vec<u32>>),
    Reject(Option<String>),
}

async fn decide_with_session(
    orders: &OrderCollection,
    offers: &OfferCollection,
    user: &UserAccess,
    id: ObjectId,
    decision: Decision,
    session: &mut ClientSession,
) -> Result<(OfferModel, OrderModel), Error> {
    let offer = offers
        .get_one_by_id_with_session(id, session)
        .await?
        .ok_or(Error::NoResource)?;

    if offer.user_id != user.id {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!(user = %user.id, "answering someone else's offer"));
    }

    let order = orders
        .get_one_by_id_with_session(offer.order_id, session)
        .await?
        .ok_or(Error::NoResource)?;

    let (offer, order_status) = match decision {
        Decision::Accept(selections) => {
            let status = offer.status.transition(OfferStatus::Accepted)?;
            if offer.is_expired(now()) {
                return Err(Error::OfferExpired);
            }

            let mut parts = offer.parts;
            apply_selections(&mut parts, selections.as_deref())?;

            let offer = OfferModel {
                status,
                total: selected_total(&parts),
                parts,
                delivery: Some(Delivery {
                    status: DeliveryStatus::Pending,
                    tracking_number: None,
                    updated_at: now(),
                }),
                updated_at: now(),
                ..offer
            };
            (offer, order.status.transition(OrderStatus::Accepted)?)
        }
        Decision::Reject(reason) => {
            let offer = OfferModel {
                status: offer.status.transition(OfferStatus::Rejected)?,
                rejection_reason: reason,
                updated_at: now(),
                ..offer
            };
            (offer, order.status.transition(OrderStatus::Rejected)?)
        }
    };

    offers
        .update_one_by_id_with_session(
            offer.id,
            bson::doc! {
                "$set": {
                    "status": bson::to_bson(&offer.status)?,
                    "parts": bson::to_bson(&offer.parts)?,
                    "total": bson::to_bson(&offer.total)?,
                    "delivery": bson::to_bson(&offer.delivery)?,
                    "rejection_reason": offer.rejection_reason.clone(),
                    "updated_at": offer.updated_at,
                }
            },
            session,
        )
        .await?;

    let order = OrderModel {
        status: order_status,
        updated_at: now(),
        ..order
    };
    orders
        .update_one_by_id_with_session(
            order.id,
            bson::doc! {
                "$set": {
                    "status": bson::to_bson(&order.status)?,
                    "updated_at": order.updated_at,
                }
            },
            session,
        )
        .await?;

    Ok((offer, order))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AcceptOfferRequest {
    /// One option index per offered part, in order.
    pub selections: Option<Vec<u32>>,
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %id))]
#[allow(clippy::too_many_arguments)]
pub async fn accept(
    State(mongo): State<mongodb::Client>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(users): State<UserCollection>,
    State(notifications): State<NotificationCollection>,
    State(audit): State<AuditLogCollection>,
    State(email): State<EmailService>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
    Json(request): Json<AcceptOfferRequest>,
) -> Result<Json<OfferResponse>, Error> {
    let (offer, order) = with_transaction!(mongo, session => {
        decide_with_session(
            &orders,
            &offers,
            &user,
            id,
            Decision::Accept(request.selections.clone()),
            &mut session,
        )
        .await
    })?;

    audit
        .record(
            Some(user.id),
            "offer.accept",
            EntityKind::Offer,
            Some(offer.id),
            bson::doc! { "total": offer.total.to_string() },
        )
        .await;

    let detail = format!("Total: {}", offer.total.round_dp(2));
    notifications
        .notify_admins(
            &users,
            &Notice::new(
                NotificationKind::OfferAccepted,
                "Offer accepted",
                format!(
                    "{} accepted offer {}. {}",
                    order.contact.name, offer.offer_number, detail
                ),
            )
            .about(Reference::offer(offer.id)),
        )
        .await;
    email.dispatch_to_admin(templates::offer_decision(&offer.offer_number, true, &detail));

    Ok(Json(offer.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct RejectOfferRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %id))]
#[allow(clippy::too_many_arguments)]
pub async fn reject(
    State(mongo): State<mongodb::Client>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(users): State<UserCollection>,
    State(notifications): State<NotificationCollection>,
    State(audit): State<AuditLogCollection>,
    State(email): State<EmailService>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
    Json(request): Json<RejectOfferRequest>,
) -> Result<Json<OfferResponse>, Error> {
    request.validate()?;
    let reason = request
        .reason
        .map(|it| it.trim().to_string())
        .filter(|it| !it.is_empty());

    let (offer, order) = with_transaction!(mongo, session => {
        let decision = Decision::Reject(reason.clone());
        decide_with_session(&orders, &offers, &user, id, decision, &mut session).await
    })?;

    audit
        .record(
            Some(user.id),
            "offer.reject",
            EntityKind::Offer,
            Some(offer.id),
            bson::doc! { "reason": offer.rejection_reason.clone() },
        )
        .await;

    let detail = offer
        .rejection_reason
        .as_deref()
        .map(|it| format!("Reason: {it}"))
        .unwrap_or_default();
    notifications
        .notify_admins(
            &users,
            &Notice::new(
                NotificationKind::OfferRejected,
                "Offer rejected",
                format!(
                    "{} rejected offer {}. {}",
                    order.contact.name, offer.offer_number, detail
                ),
            )
            .about(Reference::offer(offer.id)),
        )
        .await;
    email.dispatch_to_admin(templates::offer_decision(&offer.offer_number, false, &detail));

    Ok(Json(offer.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateDeliveryRequest {
    pub status: DeliveryStatus,

    #[validate(length(min = 1, max = 64))]
    pub tracking_number: Option<String>,
}

/// Applies a delivery change, returning the updated delivery.
///
/// Repeating the current status only updates the tracking number.
pub fn next_delivery(
    offer: &OfferModel,
    request: &UpdateDeliveryRequest,
) -> Result<Delivery, Error> {
    let current = match (&offer.delivery, offer.status) {
        (Some(delivery), OfferStatus::Accepted) => delivery,
        _ => {
            return Err(Error::Conflict(
                "Delivery can only be tracked for accepted offers".to_string(),
            ))
        }
    };

    let status = if request.status == current.status {
        if request.tracking_number.is_none() {
            return Err(Error::invalid_transition("delivery", current.status, request.status));
        }
        current.status
    } else {
        current.status.transition(request.status)?
    };

    Ok(Delivery {
        status,
        tracking_number: request
            .tracking_number
            .clone()
            .or_else(|| current.tracking_number.clone()),
        updated_at: now(),
    })
}

async fn delivery_with_session(
    orders: &OrderCollection,
    offers: &OfferCollection,
    id: ObjectId,
    request: &UpdateDeliveryRequest,
    session: &mut ClientSession,
) -> Result<(OfferModel, OrderModel), Error> {
    let offer = offers
        .get_one_by_id_with_session(id, session)
        .await?
        .ok_or(Error::NoResource)?;
    let delivery = next_delivery(&offer, request)?;

    let order = orders
        .get_one_by_id_with_session(offer.order_id, session)
        .await?
        .ok_or(Error::NoResource)?;

    let completes_order =
        delivery.status == DeliveryStatus::Completed && order.status != OrderStatus::Completed;
    let order = if completes_order {
        let order = OrderModel {
            status: order.status.transition(OrderStatus::Completed)?,
            updated_at: now(),
            ..order
        };
        orders
            .update_one_by_id_with_session(
                order.id,
                bson::doc! {
                    "$set": {
                        "status": bson::to_bson(&order.status)?,
                        "updated_at": order.updated_at,
                    }
                },
                session,
            )
            .await?;
        order
    } else {
        order
    };

    let offer = OfferModel {
        delivery: Some(delivery),
        updated_at: now(),
        ..offer
    };
    offers
        .update_one_by_id_with_session(
            offer.id,
            bson::doc! {
                "$set": {
                    "delivery": bson::to_bson(&offer.delivery)?,
                    "updated_at": offer.updated_at,
                }
            },
            session,
        )
        .await?;

    Ok((offer, order))
}

#[tracing::instrument(skip_all, fields(admin = %admin.id, id = %id))]
#[allow(clippy::too_many_arguments)]
pub async fn delivery(
    State(mongo): State<mongodb::Client>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(notifications): State<NotificationCollection>,
    State(audit): State<AuditLogCollection>,
    State(email): State<EmailService>,
    AdminAccess(admin): AdminAccess,
    PathObjectId(id): PathObjectId,
    Json(request): Json<UpdateDeliveryRequest>,
) -> Result<Json<OfferResponse>, Error> {
    request.validate()?;

    let (offer, order) = with_transaction!(mongo, session => {
        delivery_with_session(&orders, &offers, id, &request, &mut session).await
    })?;

    let (status, tracking) = match &offer.delivery {
        Some(delivery) => (delivery.status, delivery.tracking_number.clone()),
        None => (request.status, None),
    };

    audit
        .record(
            Some(admin.id),
            "offer.delivery",
            EntityKind::Offer,
            Some(offer.id),
            bson::doc! {
                "status": bson::to_bson(&status)?,
                "tracking_number": tracking.clone(),
            },
        )
        .await;

    notifications
        .notify(
            offer.user_id,
            &Notice::new(
                NotificationKind::DeliveryUpdated,
                "Delivery update",
                format!("Delivery for offer {} is {}", offer.offer_number, status.label()),
            )
            .about(Reference::offer(offer.id)),
        )
        .await;
    email.dispatch(
        &order.contact.email,
        templates::delivery_updated(
            &order.contact.name,
            &offer.offer_number,
            status.label(),
            tracking.as_deref(),
        ),
    );

    Ok(Json(offer.into()))
}

async fn delete_with_session(
    orders: &OrderCollection,
    offers: &OfferCollection,
    id: ObjectId,
    session: &mut ClientSession,
) -> Result<OfferModel, Error> {
    let offer = offers
        .get_one_by_id_with_session(id, session)
        .await?
        .ok_or(Error::NoResource)?;

    if offer.status != OfferStatus::Proposed {
        return Err(Error::Conflict("Only proposed offers can be deleted".to_string()));
    }

    offers.delete_one_by_id_with_session(id, session).await?;

    if let Some(order) = orders.get_one_by_id_with_session(offer.order_id, session).await? {
        let status = order.status.transition(OrderStatus::New)?;
        orders
            .update_one_by_id_with_session(
                order.id,
                bson::doc! {
                    "$set": { "status": bson::to_bson(&status)?, "updated_at": now() },
                    "$unset": { "offer_id": "" },
                },
                session,
            )
            .await?;
    }

    Ok(offer)
}

#[tracing::instrument(skip_all, fields(admin = %admin.id, id = %id))]
pub async fn delete(
    State(mongo): State<mongodb::Client>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(audit): State<AuditLogCollection>,
    AdminAccess(admin): AdminAccess,
    PathObjectId(id): PathObjectId,
) -> Result<(), Error> {
    let offer = with_transaction!(mongo, session => {
        delete_with_session(&orders, &offers, id, &mut session).await
    })?;

    audit
        .record(
            Some(admin.id),
            "offer.delete",
            EntityKind::Offer,
            Some(id),
            bson::doc! { "offer_number": &offer.offer_number, "order_id": offer.order_id },
        )
        .await;

    Ok(())
}

fn option_letter(index: usize) -> char {
    (b'a' + (index % 26) as u8) as char
}

fn format_date(date: bson::DateTime) -> String {
    let date: time::OffsetDateTime = date.into();
    format!("{}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Renders the printable quotation for an offer.
pub fn quotation_pdf(offer: &OfferModel, order: Option<&OrderModel>) -> PdfDocument {
    let mut doc = PdfDocument::new(format!("Offer {}", offer.offer_number));

    doc.line(format!("Issued: {}", format_date(offer.created_at)));
    if let Some(valid_until) = offer.valid_until {
        doc.line(format!("Valid until: {}", format_date(valid_until)));
    }
    doc.line(format!("Status: {}", enum_label(&offer.status)));

    if let Some(order) = order {
        doc.blank();
        doc.line(format!("Client: {} <{}>", order.contact.name, order.contact.email));
        if let Some(phone) = &order.contact.phone {
            doc.line(format!("Phone: {phone}"));
        }
        doc.line(format!("Vehicle: {}", order.vehicle.describe()));
        if let Some(vin) = &order.vehicle.vin {
            doc.line(format!("VIN: {vin}"));
        }
    }

    doc.blank();
    for (index, part) in offer.parts.iter().enumerate() {
        let code = part
            .code
            .as_deref()
            .map(|it| format!(" [{it}]"))
            .unwrap_or_default();
        doc.line(format!("{}. {}{} x{}", index + 1, part.name, code, part.quantity));

        let chosen = part.selected_option.map(|it| it as usize);
        for (option_index, option) in part.options.iter().enumerate() {
            let warranty = option
                .warranty_months
                .map(|it| format!(", warranty {it} months"))
                .unwrap_or_default();
            let marker = if chosen == Some(option_index) { " (selected)" } else { "" };

            doc.line(format!(
                "    {}) {}: {} per unit, delivery in {} days{}{}",
                option_letter(option_index),
                option.manufacturer,
                option.price.round_dp(2),
                option.delivery_days,
                warranty,
                marker
            ));
        }
    }

    doc.blank();
    let label = if offer.status == OfferStatus::Accepted {
        "Total"
    } else {
        "Total (cheapest options)"
    };
    doc.line(format!("{label}: {}", offer.total.round_dp(2)));

    if let Some(notes) = &offer.notes {
        doc.blank();
        doc.line(format!("Notes: {notes}"));
    }

    doc
}

pub async fn pdf(
    State(offers): State<OfferCollection>,
    State(orders): State<OrderCollection>,
    user: UserAccess,
    PathObjectId(id): PathObjectId,
) -> Result<([(header::HeaderName, String); 2], Vec<u8>), Error> {
    let offer = offers.get_accessible(&user, id).await?;
    let order = orders.get_one_by_id(offer.order_id).await?;

    let bytes = quotation_pdf(&offer, order.as_ref()).render();

    Ok((
        [
            (header::CONTENT_TYPE, PDF_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.pdf\"", offer.offer_number),
            ),
        ],
        bytes,
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use crate::api::v1::{
        auth::UserRole,
        order::tests::create_order,
        tests::{bootstrap, Bootstrap},
    };

    use super::*;

    fn price(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn option(manufacturer: &str, value: &str) -> PartOption {
        PartOption {
            manufacturer: manufacturer.to_string(),
            price: price(value),
            delivery_days: 2,
            warranty_months: Some(12),
        }
    }

    fn parts() -> Vec<OfferedPart> {
        vec![
            OfferedPart {
                name: "Brake pads".to_string(),
                code: Some("BP-1".to_string()),
                quantity: 2,
                options: vec![option("Bosch", "120.00"), option("ATE", "95.50")],
                selected_option: None,
            },
            OfferedPart {
                name: "Oil filter".to_string(),
                code: None,
                quantity: 1,
                options: vec![option("Mann", "30.25")],
                selected_option: None,
            },
        ]
    }

    fn part_requests() -> Vec<OfferedPartRequest> {
        parts()
            .into_iter()
            .map(|it| OfferedPartRequest {
                name: it.name,
                code: it.code,
                quantity: it.quantity,
                options: it.options,
            })
            .collect()
    }

    fn offer_model(status: OfferStatus, delivery: Option<DeliveryStatus>) -> OfferModel {
        OfferModel {
            id: ObjectId::new(),
            offer_number: format_offer_number(2024, 7),
            order_id: ObjectId::new(),
            user_id: ObjectId::new(),
            created_by: ObjectId::new(),
            total: quoted_total(&parts()),
            parts: parts(),
            status,
            rejection_reason: None,
            delivery: delivery.map(|status| Delivery {
                status,
                tracking_number: None,
                updated_at: now(),
            }),
            valid_until: None,
            notes: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_offer_number() {
        assert_eq!(format_offer_number(2024, 1), "OF-2024-000001");
        assert_eq!(format_offer_number(2025, 123456), "OF-2025-123456");
    }

    #[test]
    fn test_status_transitions() {
        assert!(OfferStatus::Proposed.can_transition_to(OfferStatus::Accepted));
        assert!(OfferStatus::Proposed.can_transition_to(OfferStatus::Rejected));
        assert!(!OfferStatus::Accepted.can_transition_to(OfferStatus::Rejected));
        assert!(!OfferStatus::Rejected.can_transition_to(OfferStatus::Accepted));

        assert!(DeliveryStatus::Pending.can_transition_to(DeliveryStatus::InProgress));
        assert!(DeliveryStatus::InProgress.can_transition_to(DeliveryStatus::Completed));
        assert!(!DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Completed));
        assert!(!DeliveryStatus::Completed.can_transition_to(DeliveryStatus::Pending));

        let err = DeliveryStatus::Pending
            .transition(DeliveryStatus::Completed)
            .unwrap_err();
        assert_eq!(err.to_string(), "delivery cannot move from pending to completed");
    }

    #[test]
    fn test_totals() {
        let mut parts = parts();
        // 2 * 95.50 + 30.25
        assert_eq!(quoted_total(&parts), price("221.25"));
        assert_eq!(selected_total(&parts), price("221.25"));

        apply_selections(&mut parts, Some(&[0, 0][..])).unwrap();
        assert_eq!(parts[0].selected_option, Some(0));
        // 2 * 120 + 30.25
        assert_eq!(selected_total(&parts), price("270.25"));
        assert_eq!(quoted_total(&parts), price("221.25"));
    }

    #[test]
    fn test_default_selection_is_cheapest() {
        let mut parts = parts();
        apply_selections(&mut parts, None).unwrap();

        assert_eq!(parts[0].selected_option, Some(1));
        assert_eq!(parts[1].selected_option, Some(0));
        assert_eq!(selected_total(&parts), quoted_total(&parts));
    }

    #[test]
    fn test_invalid_selections() {
        let mut parts = parts();
        assert_matches!(
            apply_selections(&mut parts, Some(&[0][..])),
            Err(Error::InvalidInput(_))
        );
        assert_matches!(
            apply_selections(&mut parts, Some(&[0, 1][..])),
            Err(Error::InvalidInput(_))
        );
    }

    #[test]
    fn test_create_validation() {
        let request = CreateOfferRequest {
            order_id: ObjectId::new().into(),
            parts: part_requests(),
            valid_until: None,
            notes: None,
        };
        assert!(request.validate().is_ok());

        let mut empty = request.clone();
        empty.parts.clear();
        assert!(empty.validate().unwrap_err().field_errors().contains_key("parts"));

        let mut no_options = request.clone();
        no_options.parts[0].options.clear();
        assert!(no_options.validate().unwrap_err().errors().contains_key("parts"));

        let mut negative = request;
        negative.parts[1].options[0].price = price("-1");
        assert!(negative.validate().unwrap_err().errors().contains_key("parts"));
    }

    #[test]
    fn test_expiry() {
        let mut offer = offer_model(OfferStatus::Proposed, None);
        assert!(!offer.is_expired(now()));

        offer.valid_until = Some(bson::DateTime::from_millis(0));
        assert!(offer.is_expired(now()));
    }

    #[test]
    fn test_next_delivery() {
        let request = |status, tracking: Option<&str>| UpdateDeliveryRequest {
            status,
            tracking_number: tracking.map(str::to_string),
        };

        let proposed = offer_model(OfferStatus::Proposed, None);
        assert_matches!(
            next_delivery(&proposed, &request(DeliveryStatus::InProgress, None)),
            Err(Error::Conflict(_))
        );

        let accepted = offer_model(OfferStatus::Accepted, Some(DeliveryStatus::Pending));
        assert_matches!(
            next_delivery(&accepted, &request(DeliveryStatus::Completed, None)),
            Err(Error::InvalidTransition { .. })
        );

        let delivery =
            next_delivery(&accepted, &request(DeliveryStatus::InProgress, Some("AWB1"))).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::InProgress);
        assert_eq!(delivery.tracking_number.as_deref(), Some("AWB1"));

        // tracking-only update keeps the status
        let delivery =
            next_delivery(&accepted, &request(DeliveryStatus::Pending, Some("AWB2"))).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_matches!(
            next_delivery(&accepted, &request(DeliveryStatus::Pending, None)),
            Err(Error::InvalidTransition { .. })
        );
    }

    #[test]
    fn test_quotation_pdf() {
        let mut offer = offer_model(OfferStatus::Accepted, Some(DeliveryStatus::Pending));
        apply_selections(&mut offer.parts, Some(&[0, 0][..])).unwrap();

        let bytes = quotation_pdf(&offer, None).render();
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.contains("(Offer OF-2024-000007) Tj"));
        assert!(text.contains(
            "a\\) Bosch: 120.00 per unit, delivery in 2 days, warranty 12 months \\(selected\\)"
        ));
    }

    pub async fn create_offer(
        admin: &Bootstrap,
        order_id: ObjectIdString,
    ) -> Result<OfferResponse, Error> {
        create(
            admin.mongo_client(),
            admin.order_collection(),
            admin.offer_collection(),
            admin.counter_collection(),
            admin.notification_collection(),
            admin.audit_collection(),
            admin.email(),
            admin.admin_access(),
            Json(CreateOfferRequest {
                order_id,
                parts: part_requests(),
                valid_until: None,
                notes: None,
            }),
        )
        .await
        .map(|Json(it)| it)
    }

    pub async fn accept_offer(
        client: &Bootstrap,
        offer_id: ObjectIdString,
    ) -> Result<OfferResponse, Error> {
        accept(
            client.mongo_client(),
            client.order_collection(),
            client.offer_collection(),
            client.user_collection(),
            client.notification_collection(),
            client.audit_collection(),
            client.email(),
            client.user_access(),
            PathObjectId(*offer_id),
            Json(AcceptOfferRequest::default()),
        )
        .await
        .map(|Json(it)| it)
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_one_offer_per_order() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;
        let order = create_order(&client).await;

        let offer = create_offer(&bootstrap, order.id).await.unwrap();
        assert_eq!(offer.status, OfferStatus::Proposed);
        assert!(offer.offer_number.starts_with("OF-"));
        assert_eq!(offer.total, price("221.25"));

        let err = create_offer(&bootstrap, order.id).await.unwrap_err();
        assert_matches!(err, Error::Conflict(_));

        let stored = bootstrap
            .app_state
            .order_collection
            .get_one_by_id(*order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Offered);
        assert_eq!(stored.offer_id, Some(*offer.id));

        delete(
            bootstrap.mongo_client(),
            bootstrap.order_collection(),
            bootstrap.offer_collection(),
            bootstrap.audit_collection(),
            bootstrap.admin_access(),
            PathObjectId(*offer.id),
        )
        .await
        .unwrap();

        let stored = bootstrap
            .app_state
            .order_collection
            .get_one_by_id(*order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::New);
        assert_eq!(stored.offer_id, None);

        let second = create_offer(&bootstrap, order.id).await.unwrap();
        assert_ne!(second.offer_number, offer.offer_number);
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_accept_and_deliver() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;
        let order = create_order(&client).await;
        let offer = create_offer(&bootstrap, order.id).await.unwrap();

        let Json(accepted) = accept(
            client.mongo_client(),
            client.order_collection(),
            client.offer_collection(),
            client.user_collection(),
            client.notification_collection(),
            client.audit_collection(),
            client.email(),
            client.user_access(),
            PathObjectId(*offer.id),
            Json(AcceptOfferRequest {
                selections: Some(vec![0, 0]),
            }),
        )
        .await
        .unwrap();
        assert_eq!(accepted.status, OfferStatus::Accepted);
        assert_eq!(accepted.total, price("270.25"));
        assert_eq!(accepted.delivery.unwrap().status, DeliveryStatus::Pending);

        let deliver = |status| {
            delivery(
                bootstrap.mongo_client(),
                bootstrap.order_collection(),
                bootstrap.offer_collection(),
                bootstrap.notification_collection(),
                bootstrap.audit_collection(),
                bootstrap.email(),
                bootstrap.admin_access(),
                PathObjectId(*offer.id),
                Json(UpdateDeliveryRequest {
                    status,
                    tracking_number: None,
                }),
            )
        };

        let err = deliver(DeliveryStatus::Completed).await.unwrap_err();
        assert_matches!(err, Error::InvalidTransition { .. });

        deliver(DeliveryStatus::InProgress).await.unwrap();
        let Json(done) = deliver(DeliveryStatus::Completed).await.unwrap();
        assert_eq!(done.delivery.unwrap().status, DeliveryStatus::Completed);

        let stored = bootstrap
            .app_state
            .order_collection
            .get_one_by_id(*order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_reject() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;
        let other = bootstrap
            .derive("other@test.com", "password", UserRole::Client)
            .await;
        let order = create_order(&client).await;
        let offer = create_offer(&bootstrap, order.id).await.unwrap();

        let reject_as = |who: &Bootstrap| {
            reject(
                who.mongo_client(),
                who.order_collection(),
                who.offer_collection(),
                who.user_collection(),
                who.notification_collection(),
                who.audit_collection(),
                who.email(),
                who.user_access(),
                PathObjectId(*offer.id),
                Json(RejectOfferRequest {
                    reason: Some("too expensive".to_string()),
                }),
            )
        };

        let err = reject_as(&other).await.unwrap_err();
        assert_matches!(err, Error::Forbidden);

        let Json(rejected) = reject_as(&client).await.unwrap();
        assert_eq!(rejected.status, OfferStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("too expensive"));

        let err = reject_as(&client).await.unwrap_err();
        assert_matches!(err, Error::InvalidTransition { .. });
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_concurrent_offers() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;

        let first = create_order(&client).await;
        let second = create_order(&client).await;
        let (a, b) = tokio::join!(
            create_offer(&bootstrap, first.id),
            create_offer(&bootstrap, second.id)
        );
        assert_ne!(a.unwrap().offer_number, b.unwrap().offer_number);

        let third = create_order(&client).await;
        let (a, b) = tokio::join!(
            create_offer(&bootstrap, third.id),
            create_offer(&bootstrap, third.id)
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|it| it.is_ok()).count(), 1);
        assert!(results.iter().any(|it| matches!(it, Err(Error::Conflict(_)))));
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_expired_offer_cannot_be_accepted() {
        let bootstrap = bootstrap().await;
        let client = bootstrap
            .derive("client@test.com", "password", UserRole::Client)
            .await;
        let order = create_order(&client).await;
        let offer = create_offer(&bootstrap, order.id).await.unwrap();

        bootstrap
            .app_state
            .offer_collection
            .update_one_by_id(
                *offer.id,
                bson::doc! { "$set": { "valid_until": bson::DateTime::from_millis(0) } },
            )
            .await
            .unwrap();

        let err = accept_offer(&client, offer.id).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::GONE);
        assert_matches!(err, Error::OfferExpired);

        let stored = bootstrap
            .app_state
            .offer_collection
            .get_one_by_id(*offer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OfferStatus::Proposed);
    }
}
