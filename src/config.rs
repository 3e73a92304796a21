//! Configuration manager for ldapgate.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::allocator::IdRange;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_HOME: &str = "/home/{username}";
const DEFAULT_ID_ATTRIBUTE: &str = "employeeNumber";
const DEFAULT_RECOVERY_EMAIL_ATTRIBUTE: &str = "mail";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Socket address to listen on.
    pub address: String,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Domain searched for accounts and additional groups.
    pub base_domain: String,
    /// Home directory template, `{username}` and `{domain}` are replaced.
    pub home: String,
    /// Server helpdesk contact, also sender of notifications.
    pub admin: Admin,
    /// Username of a domain admin to the subdomain they look after.
    pub admins: BTreeMap<String, String>,
    /// Schema-specific attribute names.
    pub attributes: Attributes,
    /// Range UID and GID values are allocated from.
    pub uid_range: IdRange,
    /// Related to LDAP3 configuration.
    #[serde(skip_serializing)]
    pub ldap: Option<Ldap>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    #[serde(skip_serializing)]
    pub telemetry: Telemetry,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            address: DEFAULT_ADDRESS.to_owned(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            base_domain: String::default(),
            home: DEFAULT_HOME.to_owned(),
            admin: Admin::default(),
            admins: BTreeMap::default(),
            attributes: Attributes::default(),
            uid_range: IdRange::default(),
            ldap: None,
            mail: None,
            telemetry: Telemetry::default(),
        }
    }
}

/// Administrative contact.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    pub name: String,
    pub email: String,
}

/// Attribute names that differ between directory schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    /// External (national) identifier.
    pub id: String,
    /// Address used to recover the account.
    pub recovery_email: String,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            id: DEFAULT_ID_ATTRIBUTE.to_owned(),
            recovery_email: DEFAULT_RECOVERY_EMAIL_ATTRIBUTE.to_owned(),
        }
    }
}

/// LDAP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ldap {
    /// `ldap://` or `ldaps://` URL of the server.
    pub address: String,
    /// Admin DN credential to connect.
    pub user: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
}

/// RabbitMQ queue consumed by the mailing service.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
    /// Encryption layer.
    pub tls: Option<bool>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// OTLP collector receiving traces and logs.
    pub otlp_endpoint: Option<String>,
    /// Expose Prometheus metrics on `/metrics`.
    pub metrics: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            metrics: true,
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config,
                Err(err) => return Arc::new(self.error(err)),
            },
            Err(err) => return Arc::new(self.error(err)),
        };

        tracing::debug!(path = %file_path.display(), "configuration loaded");

        Arc::new(Self {
            version: VERSION.to_owned(),
            path: file_path,
            ..config
        })
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: directory
base_domain: example.com
home: /home/{domain}/{username}
admin:
  name: Server Helpdesk
  email: helpdesk@example.com
admins:
  mari: tartu.example.com
  jaan: example.com
attributes:
  id: personalIdentityCode
uid_range:
  min: 3000
  max: 3999
ldap:
  address: ldap://localhost:389
  user: cn=admin,dc=example,dc=com
  password: secret
"#;

    #[test]
    fn test_parse_sample() {
        let config: Configuration = serde_yaml::from_str(SAMPLE).unwrap();

        assert_eq!(config.base_domain, "example.com");
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.home, "/home/{domain}/{username}");
        assert_eq!(config.admins.len(), 2);
        assert_eq!(config.attributes.id, "personalIdentityCode");
        assert_eq!(
            config.attributes.recovery_email,
            DEFAULT_RECOVERY_EMAIL_ATTRIBUTE
        );
        assert_eq!(config.uid_range, IdRange { min: 3000, max: 3999 });
        assert!(config.mail.is_none());
        assert!(config.telemetry.metrics);
        assert_eq!(
            config.ldap.map(|l| l.address),
            Some("ldap://localhost:389".to_string())
        );
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/config.yaml"))
            .read();
        assert_eq!(config.version(), VERSION);
        assert!(config.ldap.is_none());
    }
}
