use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::{header, HeaderName},
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditLogCollection, AuditLogResponse, EntityKind},
    collection,
    error::Error,
    export::{csv::CsvWriter, pdf::PdfDocument, CSV_CONTENT_TYPE, PDF_CONTENT_TYPE},
    util::{
        created_between, enum_label, now, FormattedDateTime, Json, ObjectIdString, Page, PageQuery,
        Query,
    },
};

use super::{
    auth::AdminAccess,
    offer::{OfferCollection, OfferModel, OfferStatus},
    order::{OrderCollection, OrderModel, OrderStatus},
};

pub const REPORT_ID_HEADER: &str = "x-report-id";

collection!(ReportCollection, ReportModel);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Orders,
    Offers,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Csv,
    Pdf,
}

impl ReportFormat {
    fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Pdf => "pdf",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            ReportFormat::Csv => CSV_CONTENT_TYPE,
            ReportFormat::Pdf => PDF_CONTENT_TYPE,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReportModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub kind: ReportKind,
    pub format: ReportFormat,
    pub from: Option<bson::DateTime>,
    pub to: Option<bson::DateTime>,
    pub status: Option<String>,
    pub row_count: i64,
    pub generated_by: ObjectId,
    pub created_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReportResponse {
    pub id: ObjectIdString,
    pub kind: ReportKind,
    pub format: ReportFormat,
    pub from: Option<FormattedDateTime>,
    pub to: Option<FormattedDateTime>,
    pub status: Option<String>,
    pub row_count: i64,
    pub generated_by: ObjectIdString,
    pub created_at: FormattedDateTime,
}

impl From<ReportModel> for ReportResponse {
    fn from(value: ReportModel) -> Self {
        Self {
            id: value.id.into(),
            kind: value.kind,
            format: value.format,
            from: value.from.map(Into::into),
            to: value.to.map(Into::into),
            status: value.status,
            row_count: value.row_count,
            generated_by: value.generated_by.into(),
            created_at: value.created_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GenerateReportRequest {
    pub kind: ReportKind,
    pub format: ReportFormat,
    /// An order or offer status, matching `kind`.
    pub status: Option<String>,
    pub from: Option<FormattedDateTime>,
    pub to: Option<FormattedDateTime>,
}

impl GenerateReportRequest {
    /// Rejects statuses that don't exist for the report kind.
    fn status_filter(&self) -> Result<Option<String>, Error> {
        let status = match self.status.as_deref().map(str::trim).filter(|it| !it.is_empty()) {
            Some(status) => status,
            None => return Ok(None),
        };

        let value = serde_json::Value::String(status.to_string());
        let known = match self.kind {
            ReportKind::Orders => serde_json::from_value::<OrderStatus>(value).is_ok(),
            ReportKind::Offers => serde_json::from_value::<OfferStatus>(value).is_ok(),
        };

        if known {
            Ok(Some(status.to_string()))
        } else {
            Err(Error::InvalidInput(format!("Unknown status {status}")))
        }
    }

    pub fn filter(&self) -> Result<bson::Document, Error> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from.0 > to.0 {
                return Err(Error::InvalidInput("from must not be after to".to_string()));
            }
        }

        let mut filter = bson::Document::new();
        if let Some(status) = self.status_filter()? {
            filter.insert("status", status);
        }
        if let Some(range) = created_between(self.from, self.to) {
            filter.insert("created_at", range);
        }

        Ok(filter)
    }
}

fn format_datetime(date: bson::DateTime) -> String {
    FormattedDateTime::from(date)
        .0
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

const ORDER_COLUMNS: [&str; 10] = [
    "id",
    "created_at",
    "status",
    "client",
    "email",
    "phone",
    "vehicle",
    "vin",
    "parts",
    "offer_id",
];

fn order_row(order: &OrderModel) -> [String; 10] {
    let parts = order
        .parts
        .iter()
        .map(|it| format!("{} x{}", it.name, it.quantity))
        .collect::<Vec<_>>()
        .join("; ");

    [
        order.id.to_hex(),
        format_datetime(order.created_at),
        enum_label(&order.status),
        order.contact.name.clone(),
        order.contact.email.clone(),
        order.contact.phone.clone().unwrap_or_default(),
        order.vehicle.describe(),
        order.vehicle.vin.clone().unwrap_or_default(),
        parts,
        order.offer_id.map(|it| it.to_hex()).unwrap_or_default(),
    ]
}

const OFFER_COLUMNS: [&str; 8] = [
    "offer_number",
    "created_at",
    "status",
    "order_id",
    "total",
    "delivery_status",
    "tracking_number",
    "rejection_reason",
];

fn offer_row(offer: &OfferModel) -> [String; 8] {
    [
        offer.offer_number.clone(),
        format_datetime(offer.created_at),
        enum_label(&offer.status),
        offer.order_id.to_hex(),
        offer.total.round_dp(2).to_string(),
        offer
            .delivery
            .as_ref()
            .map(|it| enum_label(&it.status))
            .unwrap_or_default(),
        offer
            .delivery
            .as_ref()
            .and_then(|it| it.tracking_number.clone())
            .unwrap_or_default(),
        offer.rejection_reason.clone().unwrap_or_default(),
    ]
}

/// Rows of a report as plain strings, ready for either format.
pub struct Table {
    pub title: String,
    pub columns: &'static [&'static str],
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn to_csv(&self) -> Vec<u8> {
        let mut csv = CsvWriter::with_header(self.columns);
        for row in &self.rows {
            csv.row(row);
        }
        csv.into_bytes()
    }

    pub fn to_pdf(&self) -> Vec<u8> {
        let mut doc = PdfDocument::new(&self.title);
        doc.line(format!("Rows: {}", self.rows.len()));

        for row in &self.rows {
            doc.blank();
            for (column, value) in self.columns.iter().zip(row) {
                if !value.is_empty() {
                    doc.line(format!("{column}: {value}"));
                }
            }
        }

        doc.render()
    }

    pub fn render(&self, format: ReportFormat) -> Vec<u8> {
        match format {
            ReportFormat::Csv => self.to_csv(),
            ReportFormat::Pdf => self.to_pdf(),
        }
    }
}

pub fn orders_table(orders: &[OrderModel]) -> Table {
    Table {
        title: "Orders report".to_string(),
        columns: &ORDER_COLUMNS,
        rows: orders.iter().map(|it| order_row(it).to_vec()).collect(),
    }
}

pub fn offers_table(offers: &[OfferModel]) -> Table {
    Table {
        title: "Offers report".to_string(),
        columns: &OFFER_COLUMNS,
        rows: offers.iter().map(|it| offer_row(it).to_vec()).collect(),
    }
}

#[tracing::instrument(skip_all, fields(admin = %admin.id))]
pub async fn generate(
    State(reports): State<ReportCollection>,
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    State(audit): State<AuditLogCollection>,
    AdminAccess(admin): AdminAccess,
    Json(request): Json<GenerateReportRequest>,
) -> Result<([(HeaderName, String); 3], Vec<u8>), Error> {
    let filter = request.filter()?;
    let sort = bson::doc! { "created_at": 1, "_id": 1 };

    let table = match request.kind {
        ReportKind::Orders => orders_table(&orders.find_all(filter, sort).await?),
        ReportKind::Offers => offers_table(&offers.find_all(filter, sort).await?),
    };
    let bytes = table.render(request.format);

    let report = ReportModel {
        id: ObjectId::new(),
        kind: request.kind,
        format: request.format,
        from: request.from.map(Into::into),
        to: request.to.map(Into::into),
        status: request.status_filter()?,
        row_count: i64::try_from(table.rows.len()).unwrap_or(i64::MAX),
        generated_by: admin.id,
        created_at: now(),
    };
    reports.insert_one(&report, None).await?;

    audit
        .record(
            Some(admin.id),
            "report.generate",
            EntityKind::Report,
            Some(report.id),
            bson::doc! {
                "kind": enum_label(&report.kind),
                "format": enum_label(&report.format),
                "rows": report.row_count,
            },
        )
        .await;

    let filename = format!(
        "{}-report-{}.{}",
        enum_label(&report.kind),
        report.id.to_hex(),
        report.format.extension()
    );

    Ok((
        [
            (header::CONTENT_TYPE, report.format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (HeaderName::from_static(REPORT_ID_HEADER), report.id.to_hex()),
        ],
        bytes,
    ))
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ReportListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub kind: Option<ReportKind>,
}

pub async fn index(
    State(reports): State<ReportCollection>,
    AdminAccess(_): AdminAccess,
    Query(query): Query<ReportListQuery>,
) -> Result<Json<Page<ReportResponse>>, Error> {
    let mut filter = bson::Document::new();
    if let Some(kind) = query.kind {
        filter.insert("kind", bson::to_bson(&kind)?);
    }

    let page = reports
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
pub struct SummaryResponse {
    pub orders: BTreeMap<String, u64>,
    pub offers: BTreeMap<String, u64>,
    /// Sum of accepted offer totals.
    pub accepted_revenue: Decimal,
}

const ORDER_STATUSES: [OrderStatus; 6] = [
    OrderStatus::New,
    OrderStatus::Offered,
    OrderStatus::Accepted,
    OrderStatus::Rejected,
    OrderStatus::Cancelled,
    OrderStatus::Completed,
];

const OFFER_STATUSES: [OfferStatus; 3] = [
    OfferStatus::Proposed,
    OfferStatus::Accepted,
    OfferStatus::Rejected,
];

pub async fn summary(
    State(orders): State<OrderCollection>,
    State(offers): State<OfferCollection>,
    AdminAccess(_): AdminAccess,
) -> Result<Json<SummaryResponse>, Error> {
    let mut order_counts = BTreeMap::new();
    for status in ORDER_STATUSES {
        let count = orders
            .count_documents(bson::doc! { "status": bson::to_bson(&status)? }, None)
            .await?;
        order_counts.insert(enum_label(&status), count);
    }

    let mut offer_counts = BTreeMap::new();
    for status in OFFER_STATUSES {
        let count = offers
            .count_documents(bson::doc! { "status": bson::to_bson(&status)? }, None)
            .await?;
        offer_counts.insert(enum_label(&status), count);
    }

    // totals are stored as decimal strings, so they are summed here rather than in the database
    let accepted = offers
        .find_all(
            bson::doc! { "status": bson::to_bson(&OfferStatus::Accepted)? },
            bson::doc! { "_id": 1 },
        )
        .await?;
    let accepted_revenue: Decimal = accepted.iter().map(|it| it.total).sum();

    Ok(Json(SummaryResponse {
        orders: order_counts,
        offers: offer_counts,
        accepted_revenue,
    }))
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AuditListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub entity: Option<EntityKind>,
    pub actor_id: Option<ObjectIdString>,
    pub action: Option<String>,
    pub from: Option<FormattedDateTime>,
    pub to: Option<FormattedDateTime>,
}

impl AuditListQuery {
    pub fn filter(&self) -> Result<bson::Document, Error> {
        let mut filter = bson::Document::new();
        if let Some(entity) = self.entity {
            filter.insert("entity", bson::to_bson(&entity)?);
        }
        if let Some(actor_id) = self.actor_id {
            filter.insert("actor_id", actor_id);
        }
        if let Some(action) = self.action.as_deref().filter(|it| !it.trim().is_empty()) {
            filter.insert("action", action.trim());
        }
        if let Some(range) = created_between(self.from, self.to) {
            filter.insert("created_at", range);
        }

        Ok(filter)
    }
}

pub async fn audit(
    State(audit): State<AuditLogCollection>,
    AdminAccess(_): AdminAccess,
    Query(query): Query<AuditListQuery>,
) -> Result<Json<Page<AuditLogResponse>>, Error> {
    let page = audit
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
