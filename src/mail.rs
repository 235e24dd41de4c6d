//! Outgoing email.
//!
//! Handlers never wait on delivery: [`EmailService`] renders a template and hands the message
//! to a background task, logging failures.

use std::sync::Arc;

use serde::Serialize;

use crate::{config::MailConfig, error::Error};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), Error>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogMailer;

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), Error> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "email (not delivered, no transport configured)\n{}",
            message.text
        );
        Ok(())
    }
}

/// Delivers through an HTTP mail API accepting the message as JSON.
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpMailer {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), Error> {
        let mut request = self.client.post(&self.url).json(message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        request
            .send()
            .await
            .and_then(|it| it.error_for_status())
            .map(|_| ())
            .map_err(|err| Error::MailError(err.to_string()))
    }
}

#[derive(Clone)]
pub struct EmailService {
    mailer: Arc<dyn Mailer>,
    from: String,
    admin_email: Option<String>,
}

impl EmailService {
    pub fn new(mailer: Arc<dyn Mailer>, from: String, admin_email: Option<String>) -> Self {
        Self {
            mailer,
            from,
            admin_email,
        }
    }

    pub fn from_config(config: &MailConfig) -> Self {
        let mailer: Arc<dyn Mailer> = match &config.api_url {
            Some(url) => Arc::new(HttpMailer::new(url.clone(), config.api_key.clone())),
            None => Arc::new(LogMailer),
        };

        Self::new(mailer, config.from.clone(), config.admin_email.clone())
    }

    pub fn message(&self, to: &str, template: Template) -> EmailMessage {
        EmailMessage {
            from: self.from.clone(),
            to: to.to_string(),
            subject: template.subject,
            text: template.text,
        }
    }

    pub async fn send_now(&self, message: &EmailMessage) -> Result<(), Error> {
        self.mailer.send(message).await
    }

    pub fn dispatch(&self, to: &str, template: Template) {
        let message = self.message(to, template);
        let service = self.clone();

        tokio::spawn(async move {
            if let Err(err) = service.send_now(&message).await {
                tracing::warn!(
                    to = %message.to,
                    subject = %message.subject,
                    "failed to send email: {}",
                    err
                );
            }
        });
    }

    /// Sends to the staff mailbox when one is configured.
    pub fn dispatch_to_admin(&self, template: Template) {
        match &self.admin_email {
            Some(admin) => self.dispatch(admin, template),
            None => tracing::debug!(subject = %template.subject, "no admin mailbox configured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub subject: String,
    pub text: String,
}

pub mod templates {
    use super::Template;

    pub fn welcome(name: &str) -> Template {
        Template {
            subject: "Welcome".to_string(),
            text: format!(
                "Hello {name},\n\nYour account has been created. You can now submit part requests \
                 and follow the offers we send you.\n"
            ),
        }
    }

    pub fn order_received(customer: &str, vehicle: &str, parts: usize) -> Template {
        Template {
            subject: format!("New part request for {vehicle}"),
            text: format!(
                "{customer} submitted a request for {parts} part(s) for a {vehicle}.\n"
            ),
        }
    }

    pub fn offer_created(name: &str, offer_number: &str, total: &str) -> Template {
        Template {
            subject: format!("Offer {offer_number} is ready"),
            text: format!(
                "Hello {name},\n\nWe prepared offer {offer_number} for your request. \
                 Prices start from {total}.\nOpen your account to choose the parts and accept \
                 or reject the offer.\n"
            ),
        }
    }

    pub fn offer_decision(offer_number: &str, accepted: bool, detail: &str) -> Template {
        let decision = if accepted { "accepted" } else { "rejected" };

        Template {
            subject: format!("Offer {offer_number} was {decision}"),
            text: format!("The client {decision} offer {offer_number}. {detail}\n"),
        }
    }

    pub fn delivery_updated(
        name: &str,
        offer_number: &str,
        status: &str,
        tracking: Option<&str>,
    ) -> Template {
        let tracking = tracking
            .map(|it| format!("Tracking number: {it}\n"))
            .unwrap_or_default();

        Template {
            subject: format!("Delivery update for offer {offer_number}"),
            text: format!(
                "Hello {name},\n\n\
                 The delivery for offer {offer_number} is now {status}.\n{tracking}"
            ),
        }
    }
}
