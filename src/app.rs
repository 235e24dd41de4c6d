use std::time::Duration;

use axum::{
    extract::FromRef,
    http::{header, HeaderValue, Method, Uri},
    routing, Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    api::v1::{
        self,
        auth::UserCollection,
        notification::NotificationCollection,
        offer::{CounterCollection, OfferCollection},
        order::OrderCollection,
        report::{ReportCollection, REPORT_ID_HEADER},
        token::JwtState,
    },
    audit::AuditLogCollection,
    config::Config,
    error::Error,
    mail::EmailService,
    migrate::MigrationCollection,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub argon: argon2::Argon2<'static>,
    pub jwt_state: JwtState,

    pub mongo_client: mongodb::Client,
    pub user_collection: UserCollection,
    pub order_collection: OrderCollection,
    pub offer_collection: OfferCollection,
    pub counter_collection: CounterCollection,
    pub notification_collection: NotificationCollection,
    pub audit_collection: AuditLogCollection,
    pub report_collection: ReportCollection,
    pub migrate_collection: MigrationCollection,

    pub email: EmailService,
}

impl AppState {
    /// Builds the state without contacting the server; the driver connects lazily.
    pub async fn new(config: &Config) -> Result<Self, mongodb::error::Error> {
        let mongo_client_opt = mongodb::options::ClientOptions::parse(&config.mongodb_uri).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(&config.database_name);
        Ok(Self {
            argon: argon2::Argon2::default(),
            jwt_state: JwtState::from_config(config),

            user_collection: db.collection("users").into(),
            order_collection: db.collection("orders").into(),
            offer_collection: db.collection("offers").into(),
            counter_collection: db.collection("counters").into(),
            notification_collection: db.collection("notifications").into(),
            audit_collection: db.collection("audit_logs").into(),
            report_collection: db.collection("reports").into(),
            migrate_collection: db.collection("migrations").into(),
            mongo_client,

            email: EmailService::from_config(&config.mail),
        })
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn fallback(uri: Uri) -> Error {
    Error::NotFound(uri)
}

/// Allows the configured origin only; without one, cross-origin requests get no CORS headers.
pub fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, header::InvalidHeaderValue> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([
            header::CONTENT_DISPOSITION,
            header::HeaderName::from_static(REPORT_ID_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60));

    Ok(match origin {
        Some(origin) => layer
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_credentials(true),
        None => layer,
    })
}

fn api_v1() -> Router<AppState> {
    Router::new()
        .nest(
            "/auth",
            Router::new()
                .route("/register", routing::post(v1::auth::register))
                .route("/login", routing::post(v1::auth::login))
                .route("/logout", routing::post(v1::auth::logout))
                .route("/refresh", routing::post(v1::auth::refresh_access_token)),
        )
        .nest(
            "/user",
            Router::new()
                .route("/", routing::get(v1::user::index))
                .route("/me", routing::get(v1::user::me).patch(v1::user::update_me))
                .route("/me/password", routing::patch(v1::user::change_password))
                .route("/:id", routing::get(v1::user::show).delete(v1::user::delete))
                .route("/:id/role", routing::patch(v1::user::update_role)),
        )
        .nest(
            "/order",
            Router::new()
                .route("/", routing::get(v1::order::index).post(v1::order::create))
                .route(
                    "/:id",
                    routing::get(v1::order::show)
                        .patch(v1::order::update)
                        .delete(v1::order::delete),
                )
                .route("/:id/cancel", routing::patch(v1::order::cancel)),
        )
        .nest(
            "/offer",
            Router::new()
                .route("/", routing::get(v1::offer::index).post(v1::offer::create))
                .route("/by-order/:order_id", routing::get(v1::offer::show_by_order))
                .route(
                    "/:id",
                    routing::get(v1::offer::show)
                        .patch(v1::offer::update)
                        .delete(v1::offer::delete),
                )
                .route("/:id/accept", routing::patch(v1::offer::accept))
                .route("/:id/reject", routing::patch(v1::offer::reject))
                .route("/:id/delivery", routing::patch(v1::offer::delivery))
                .route("/:id/pdf", routing::get(v1::offer::pdf)),
        )
        .nest(
            "/notification",
            Router::new()
                .route("/", routing::get(v1::notification::index))
                .route("/unread-count", routing::get(v1::notification::unread_count))
                .route("/read-all", routing::patch(v1::notification::mark_all_read))
                .route("/:id", routing::delete(v1::notification::delete))
                .route("/:id/read", routing::patch(v1::notification::mark_read)),
        )
        .nest(
            "/report",
            Router::new()
                .route("/", routing::get(v1::report::index).post(v1::report::generate))
                .route("/summary", routing::get(v1::report::summary))
                .route("/audit", routing::get(v1::report::audit)),
        )
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", routing::get(health))
        .nest("/api/v1", api_v1())
        .fallback(fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::api::v1::{
        auth::UserRole,
        token::{generate_access_token, tests::user_model},
    };

    use super::*;

    async fn offline_state() -> AppState {
        let config = Config::from_lookup(|name| match name {
            "MONGODB_URI" => Some("mongodb://127.0.0.1:27017".to_string()),
            "JWT_SECRET" => Some("router-test-secret".to_string()),
            _ => None,
        })
        .unwrap();

        AppState::new(&config).await.unwrap()
    }

    async fn app() -> (Router, AppState) {
        let state = offline_state().await;
        (router(state.clone(), cors_layer(None).unwrap()), state)
    }

    fn bearer(state: &AppState, role: UserRole) -> String {
        let token = generate_access_token(&state.jwt_state, &user_model(role)).unwrap();
        format!("Bearer {}", token.token)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app().await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (app, _) = app().await;

        let response = app
            .oneshot(Request::builder().uri("/api/v1/user/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_registration_is_rejected_before_storage() {
        let (app, _) = app().await;

        let body = serde_json::json!({
            "name": "",
            "email": "not-an-email",
            "password": "short",
            "confirm_password": "different",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/auth/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["type"], "ValidationError");
        assert!(body["errors"].is_object());
    }

    #[tokio::test]
    async fn test_undecodable_body_uses_error_document() {
        let (app, _) = app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/auth/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let body = json_body(response).await;
        assert_eq!(body["type"], "InvalidInput");
        assert!(body["message"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn test_missing_content_type_uses_error_document() {
        let (app, state) = app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/api/v1/offer/{}/accept", bson::oid::ObjectId::new()))
                    .header(header::AUTHORIZATION, bearer(&state, UserRole::Client))
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["type"], "InvalidInput");
    }

    #[tokio::test]
    async fn test_bad_query_uses_error_document() {
        let (app, state) = app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/order?status=bogus")
                    .header(header::AUTHORIZATION, bearer(&state, UserRole::Client))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["type"], "InvalidInput");
    }

    #[tokio::test]
    async fn test_reports_are_admin_only() {
        let (app, state) = app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/report/summary")
                    .header(header::AUTHORIZATION, bearer(&state, UserRole::Client))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (app, _) = app().await;

        let response = app
            .oneshot(Request::builder().uri("/api/v2/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert!(body["message"].as_str().unwrap().contains("/api/v2/nothing"));
    }

    #[test]
    fn test_cors_origin_must_be_a_header_value() {
        assert!(cors_layer(Some("https://shop.example.com")).is_ok());
        assert!(cors_layer(Some("bad\norigin")).is_err());
    }
}
