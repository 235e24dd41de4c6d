pub mod auth;
pub mod notification;
pub mod offer;
pub mod order;
pub mod report;
pub mod token;
pub mod user;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use argon2::Argon2;
    use axum::extract::State;
    use bson::oid::ObjectId;

    use crate::{
        app::AppState,
        audit::AuditLogCollection,
        config::Config,
        mail::{EmailService, LogMailer},
    };

    use super::{
        auth::{
            create_user, AdminAccess, CreateUserRequest, RegisterRequest, UserAccess,
            UserCollection, UserModel, UserRole,
        },
        notification::NotificationCollection,
        offer::{CounterCollection, OfferCollection},
        order::OrderCollection,
        report::ReportCollection,
        token::JwtState,
    };

    /// A database-backed app state plus one signed-in user to act as.
    ///
    /// Every bootstrap gets a fresh database; `derive` adds users to the same one.
    pub struct Bootstrap {
        user_model: UserModel,
        user_password: String,
        pub app_state: AppState,
    }

    impl Bootstrap {
        pub fn user_id(&self) -> ObjectId {
            self.user_model.id
        }

        pub fn user_model(&self) -> UserModel {
            self.user_model.clone()
        }

        pub fn user_email(&self) -> String {
            self.user_model.email.clone()
        }

        pub fn user_password(&self) -> String {
            self.user_password.clone()
        }

        pub fn user_access(&self) -> UserAccess {
            let token =
                super::token::generate_access_token(&self.app_state.jwt_state, &self.user_model)
                    .unwrap();

            UserAccess::from_token(&self.app_state.jwt_state, &token.token).unwrap()
        }

        pub fn admin_access(&self) -> AdminAccess {
            let access = self.user_access();
            assert!(access.is_admin(), "bootstrap user is not an admin");
            AdminAccess(access)
        }

        pub async fn derive(&self, email: &str, password: &str, role: UserRole) -> Bootstrap {
            let user = insert_user(&self.app_state, email, password, role).await;

            Bootstrap {
                user_model: user,
                user_password: password.to_string(),
                app_state: self.app_state.clone(),
            }
        }

        pub fn mongo_client(&self) -> State<mongodb::Client> {
            State(self.app_state.mongo_client.clone())
        }

        pub fn argon(&self) -> State<Argon2<'static>> {
            State(self.app_state.argon.clone())
        }

        pub fn jwt_state(&self) -> State<JwtState> {
            State(self.app_state.jwt_state.clone())
        }

        pub fn email(&self) -> State<EmailService> {
            State(self.app_state.email.clone())
        }

        pub fn user_collection(&self) -> State<UserCollection> {
            State(self.app_state.user_collection.clone())
        }

        pub fn order_collection(&self) -> State<OrderCollection> {
            State(self.app_state.order_collection.clone())
        }

        pub fn offer_collection(&self) -> State<OfferCollection> {
            State(self.app_state.offer_collection.clone())
        }

        pub fn counter_collection(&self) -> State<CounterCollection> {
            State(self.app_state.counter_collection.clone())
        }

        pub fn notification_collection(&self) -> State<NotificationCollection> {
            State(self.app_state.notification_collection.clone())
        }

        pub fn audit_collection(&self) -> State<AuditLogCollection> {
            State(self.app_state.audit_collection.clone())
        }

        pub fn report_collection(&self) -> State<ReportCollection> {
            State(self.app_state.report_collection.clone())
        }
    }

    async fn insert_user(app: &AppState, email: &str, password: &str, role: UserRole) -> UserModel {
        create_user(
            &app.user_collection,
            &app.argon,
            CreateUserRequest {
                register: RegisterRequest {
                    name: email.split('@').next().unwrap_or(email).to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                    confirm_password: password.to_string(),
                    phone: None,
                    company: None,
                },
                role,
            },
        )
        .await
        .unwrap()
    }

    pub async fn bootstrap() -> Bootstrap {
        let _ = dotenvy::dotenv();
        let database_name = format!("autoparts-test-{}", ObjectId::new());

        let config = Config::from_lookup(|name| match name {
            "DATABASE_NAME" => Some(database_name.clone()),
            "JWT_SECRET" => Some("test-secret".to_string()),
            other => std::env::var(other).ok(),
        })
        .expect("MONGODB_URI must be set for database tests");

        let mut app_state = AppState::new(&config).await.unwrap();
        app_state.email =
            EmailService::new(Arc::new(LogMailer), "test@autoparts.local".to_string(), None);
        app_state.run_migration().await.unwrap();

        let password = "password";
        let user = insert_user(&app_state, "admin@example.com", password, UserRole::Admin).await;

        Bootstrap {
            user_model: user,
            user_password: password.to_string(),
            app_state,
        }
    }
}
