//! Notify administrators and users about new accounts.
//!
//! Emails are not sent from here: a CloudEvent describing the message is
//! published on a RabbitMQ queue and a mailing service renders and
//! delivers it.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, RecoveryConfig,
};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::Mail;

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

pub type Result<T> = std::result::Result<T, MailError>;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid mail server address: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid AMQP scheme `{0}`")]
    InvalidScheme(String),
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("cannot serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One templated email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub template: String,
    /// Values rendered by the template.
    pub context: Value,
}

/// Fire-and-forget email dispatch.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Queue `notification` for delivery without waiting for it.
    async fn enqueue(&self, notification: Notification) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: &'a Notification,
}

/// Publishes notifications on a RabbitMQ queue.
#[derive(Debug, Clone)]
pub struct MailManager {
    queue: String,
    conn: Arc<Connection>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address)?;
        let scheme = if config.tls.unwrap_or_default() {
            AMQPScheme::AMQPS
        } else {
            AMQPScheme::from_str(addr.scheme())
                .map_err(|_| MailError::InvalidScheme(addr.scheme().into()))?
        };
        let uri = AMQPUri {
            scheme,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let recovery_config =
            RecoveryConfig::default().auto_recover_connection();
        let conn_config = ConnectionProperties::default()
            .with_connection_name("ldapgate_mail_client".into())
            .with_experimental_recovery_config(recovery_config);
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Arc::new(conn),
        })
    }

    async fn create_channel(&self) -> Result<Channel> {
        let channel = self.conn.create_channel().await?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }
}

fn create_event(data: &Notification) -> Cloudevent<'_> {
    let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
    Cloudevent {
        specversion: CLOUDEVENT_VERSION,
        r#type: "com.ldapgate.email",
        source: "com.ldapgate.users",
        id,
        time: Utc::now().to_rfc3339(),
        datacontenttype: DATA_CONTENT_TYPE,
        data,
    }
}

#[async_trait]
impl Notifier for MailManager {
    async fn enqueue(&self, notification: Notification) -> Result<()> {
        let channel = self.create_channel().await?;
        let payload = serde_json::to_string(&create_event(&notification))?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::trace!(
            template = notification.template,
            recipients = notification.to.len(),
            "event sent"
        );

        Ok(())
    }
}
