//! Listing and provisioning of accounts.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::allocator::IdRange;
use crate::config::{Admin, Attributes, Configuration};
use crate::error::{Result, ServerError};
use crate::ldap::{
    Directory, DirectoryError, EntryDraft, Scope, domain_to_dn,
    escape_filter,
};
use crate::mail::{Notification, Notifier};
use crate::telemetry::{self, Conflict};
use crate::user::{RESERVED_NAMES, ProvisionRequest, UserRecord, split_name};

pub const PASSWORD_LENGTH: usize = 8;
pub const NOTIFICATION_TEMPLATE: &str = "email-user-added";
const LOGIN_SHELL: &str = "/bin/bash";
const PREFERRED_LANGUAGE: &str = "en_US";
const USER_OBJECT_CLASSES: &[&str] = &[
    "top",
    "person",
    "organizationalPerson",
    "inetOrgPerson",
    "posixAccount",
    "shadowAccount",
    "gosaAccount",
];
const GROUP_OBJECT_CLASSES: &[&str] = &["top", "posixGroup"];
const LISTED_ATTRIBUTES: &[&str] = &[
    "mobile",
    "gender",
    "dateOfBirth",
    "cn",
    "givenName",
    "gn",
    "sn",
    "uid",
    "uidNumber",
    "gidNumber",
    "homeDirectory",
    "modifyTimestamp",
];

/// Settings the workflow depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_domain: String,
    /// Home directory template, `{username}` and `{domain}` are replaced.
    pub home: String,
    pub admin: Admin,
    /// Admin username to the subdomain they look after.
    pub admins: BTreeMap<String, String>,
    pub attributes: Attributes,
    pub uid_range: IdRange,
}

impl From<&Configuration> for Settings {
    fn from(config: &Configuration) -> Self {
        Self {
            base_domain: config.base_domain.clone(),
            home: config.home.clone(),
            admin: config.admin.clone(),
            admins: config.admins.clone(),
            attributes: config.attributes.clone(),
            uid_range: config.uid_range,
        }
    }
}

impl Settings {
    /// Home directory of `username` inside `domain`.
    pub fn home_of(&self, username: &str, domain: &str) -> String {
        self.home
            .replace("{username}", username)
            .replace("{domain}", domain)
    }
}

/// Summary returned once an account exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedUser {
    pub id: Option<String>,
    pub domain: String,
    pub cn: String,
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub first_name: String,
    pub last_name: String,
    pub home: String,
}

/// Contact shown in the notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Helpdesk {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Default, PartialEq)]
struct Recipients {
    to: Vec<String>,
    local_helpdesk: Option<Helpdesk>,
}

/// Account manager.
#[derive(Clone)]
pub struct UserService {
    directory: Arc<dyn Directory>,
    notifier: Option<Arc<dyn Notifier>>,
    settings: Arc<Settings>,
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(
        directory: Arc<dyn Directory>,
        notifier: Option<Arc<dyn Notifier>>,
        settings: Settings,
    ) -> Self {
        Self {
            directory,
            notifier,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn base_dn(&self) -> String {
        domain_to_dn(&self.settings.base_domain)
    }

    /// Every POSIX account under `domain`, keyed by DN.
    pub async fn list(
        &self,
        domain: &str,
    ) -> Result<BTreeMap<String, UserRecord>> {
        let attributes = &self.settings.attributes;
        let mut fields: Vec<&str> = LISTED_ATTRIBUTES.to_vec();
        fields.push(attributes.id.as_str());

        let entries = self
            .directory
            .search(
                &domain_to_dn(domain),
                Scope::Subtree,
                "(objectClass=posixAccount)",
                &fields,
            )
            .await?;

        entries
            .iter()
            .map(|entry| {
                let record = UserRecord::from_entry(
                    entry,
                    &attributes.id,
                    &attributes.recovery_email,
                )?;
                Ok((entry.dn.clone(), record))
            })
            .collect()
    }

    /// Check that `username` may provision accounts.
    pub async fn authorize(&self, username: &str, password: &str) -> Result<()> {
        match self.directory.authenticate(username, password).await {
            Ok(()) => (),
            Err(DirectoryError::InvalidCredentials) => {
                tracing::debug!(username, "invalid credentials");
                return Err(ServerError::Unauthorized);
            },
            Err(err) => return Err(err.into()),
        }

        if !self.settings.admins.contains_key(username) {
            tracing::warn!(username, "account is not an admin");
            return Err(ServerError::Forbidden);
        }
        Ok(())
    }

    /// Create an account, its personal group and notify helpdesks.
    ///
    /// The search for an existing username is only a fast path: two
    /// concurrent requests can both pass it, and the directory rejecting
    /// the second user entry is what decides.
    pub async fn create(&self, request: ProvisionRequest) -> Result<CreatedUser> {
        request.validate()?;

        let username = request.username.as_str();
        let domain = request.domain.as_str();
        let (first_name, last_name) = split_name(&request.cn).ok_or_else(|| {
            let mut errors = ValidationErrors::new();
            errors.add("cn", ValidationError::new("cn"));
            ServerError::Validation(errors)
        })?;

        if RESERVED_NAMES.contains(&username) {
            return Err(ServerError::ReservedName(username.to_owned()));
        }

        self.ensure_unique(username).await?;
        let uid = self.allocate_id().await?;
        let description = self.domain_description(domain).await?;
        let recipients = match self.notifier {
            Some(_) => {
                Some(self.recipients(domain, request.email.as_deref()).await?)
            },
            None => None,
        };

        let home = self.settings.home_of(username, domain);
        let domain_dn = domain_to_dn(domain);
        let user_dn =
            format!("cn={},ou=people,{domain_dn}", ldap3::dn_escape(&request.cn));
        let group_dn = format!("cn={username},ou=groups,{domain_dn}");

        self.ensure_container(&format!("ou=people,{domain_dn}"), "people")
            .await?;
        self.ensure_container(&format!("ou=groups,{domain_dn}"), "groups")
            .await?;

        let user = user_entry(
            &self.settings.attributes,
            &request,
            uid,
            &home,
            (first_name, last_name),
        );
        match self.directory.add(&user_dn, &user).await {
            Err(DirectoryError::AlreadyExists { .. }) => {
                telemetry::provisioning_conflict(Conflict::FullName);
                return Err(ServerError::Conflict(
                    "user with such full name already exists".into(),
                ));
            },
            result => result?,
        }

        let password = Alphanumeric.sample_string(&mut OsRng, PASSWORD_LENGTH);
        self.directory.set_password(&user_dn, None, &password).await?;

        match self
            .directory
            .add(&group_dn, &group_entry(username, &request.cn, uid))
            .await
        {
            Err(DirectoryError::AlreadyExists { .. }) => {
                telemetry::provisioning_conflict(Conflict::Group);
                return Err(ServerError::Conflict(
                    "group corresponding to the username already exists".into(),
                ));
            },
            result => result?,
        }

        if let Some(group) = &request.group {
            let dn = format!("cn={group},ou=groups,{}", self.base_dn());
            self.directory
                .add_value(&dn, "memberUid", username)
                .await?;
        }

        tracing::info!(%user_dn, uid, "user created");
        telemetry::account_created(domain);

        if let (Some(notifier), Some(recipients)) = (&self.notifier, recipients) {
            let server_helpdesk = Helpdesk {
                email: self.settings.admin.email.clone(),
                name: self.settings.admin.name.clone(),
            };
            let notification = Notification {
                from: self.settings.admin.email.clone(),
                to: recipients.to,
                subject: format!("{} jaoks loodi konto {username}", request.cn),
                template: NOTIFICATION_TEMPLATE.to_owned(),
                context: json!({
                    "domain": { "description": description },
                    "username": username,
                    "password": password,
                    "local_helpdesk": recipients.local_helpdesk,
                    "server_helpdesk": server_helpdesk,
                }),
            };

            // Accounts stay created when the queue is unavailable.
            let notifier = Arc::clone(notifier);
            let user_dn = user_dn.clone();
            tokio::spawn(async move {
                if let Err(err) = notifier.enqueue(notification).await {
                    tracing::error!(%user_dn, error = %err, "notification not sent");
                }
            });
        }

        Ok(CreatedUser {
            id: request.id.clone(),
            domain: domain.to_owned(),
            cn: request.cn.clone(),
            username: username.to_owned(),
            uid,
            gid: uid,
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            home,
        })
    }

    async fn ensure_unique(&self, username: &str) -> Result<()> {
        let filter = format!(
            "(&(objectClass=posixAccount)(uid={}))",
            escape_filter(username)
        );
        let found = self
            .directory
            .search(&self.base_dn(), Scope::Subtree, &filter, &["uid"])
            .await?;

        if let Some(entry) = found.first() {
            tracing::debug!(username, dn = %entry.dn, "username taken");
            telemetry::provisioning_conflict(Conflict::Username);
            return Err(ServerError::Conflict("username already exists".into()));
        }
        Ok(())
    }

    async fn allocate_id(&self) -> Result<u32> {
        let entries = self
            .directory
            .search(
                &self.base_dn(),
                Scope::Subtree,
                "(objectClass=posixAccount)",
                &["uidNumber"],
            )
            .await?;

        let ids = entries.iter().filter_map(|entry| {
            let id = entry.last("uidNumber").and_then(|v| v.parse().ok());
            if id.is_none() {
                tracing::warn!(dn = %entry.dn, "account without numeric uidNumber");
            }
            id
        });

        let uid = self
            .settings
            .uid_range
            .next(ids)
            .inspect_err(|_| telemetry::range_exhausted())?;
        Ok(uid)
    }

    async fn domain_description(&self, domain: &str) -> Result<String> {
        let entries = self
            .directory
            .search(
                &domain_to_dn(domain),
                Scope::Base,
                "(objectClass=domain)",
                &["description"],
            )
            .await?;

        Ok(entries
            .iter()
            .find_map(|entry| entry.last("description"))
            .unwrap_or(domain)
            .to_owned())
    }

    async fn recipients(
        &self,
        domain: &str,
        email: Option<&str>,
    ) -> Result<Recipients> {
        let mut recipients = Recipients {
            to: vec![self.settings.admin.email.clone()],
            local_helpdesk: None,
        };
        let recovery_email = self.settings.attributes.recovery_email.as_str();

        for (admin, subdomain) in &self.settings.admins {
            if subdomain != domain && !subdomain.ends_with(&format!(".{domain}")) {
                continue;
            }

            let filter = format!(
                "(&(objectClass=posixAccount)(uid={}))",
                escape_filter(admin)
            );
            let entries = self
                .directory
                .search(
                    &domain_to_dn(domain),
                    Scope::Subtree,
                    &filter,
                    &[recovery_email, "cn"],
                )
                .await?;

            for entry in entries {
                let Some(alias) = entry
                    .last(recovery_email)
                    .and_then(|email| helpdesk_alias(email, domain))
                else {
                    continue;
                };

                recipients.local_helpdesk.get_or_insert_with(|| Helpdesk {
                    email: alias.clone(),
                    name: entry.last("cn").unwrap_or(admin.as_str()).to_owned(),
                });
                recipients.to.push(alias);
            }
        }

        if let Some(email) = email {
            recipients.to.push(email.to_owned());
        }
        Ok(recipients)
    }

    async fn ensure_container(&self, dn: &str, ou: &str) -> Result<()> {
        let draft = EntryDraft::new()
            .attr("objectClass", "organizationalUnit")
            .attr("ou", ou);

        match self.directory.add(dn, &draft).await {
            Ok(()) => {
                tracing::debug!(dn, "organizational unit created");
                Ok(())
            },
            Err(DirectoryError::AlreadyExists { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Domain-scoped helpdesk address derived from an admin's mailbox.
///
/// `mari@example.org` becomes `mari+helpdesk+tartu.ee@example.org`;
/// the domain tag is omitted when the address already mentions it.
pub fn helpdesk_alias(email: &str, domain: &str) -> Option<String> {
    let (local, host) = email.split_once('@')?;
    let alias = format!("{local}+helpdesk@{host}");
    if alias.contains(domain) {
        Some(alias)
    } else {
        Some(format!("{local}+helpdesk+{domain}@{host}"))
    }
}

fn user_entry(
    attributes: &Attributes,
    request: &ProvisionRequest,
    uid: u32,
    home: &str,
    (first_name, last_name): (&str, &str),
) -> EntryDraft {
    let uid = uid.to_string();
    EntryDraft::new()
        .optional(&attributes.id, request.id.as_deref())
        .optional(&attributes.recovery_email, request.email.as_deref())
        .attr("uid", request.username.as_str())
        .attr("uidNumber", uid.as_str())
        .attr("gidNumber", uid)
        .attr("sn", last_name)
        .attr("givenName", first_name)
        .attr("cn", request.cn.as_str())
        .attr("preferredLanguage", PREFERRED_LANGUAGE)
        .attr("homeDirectory", home)
        .attr("loginShell", LOGIN_SHELL)
        .attrs("objectClass", USER_OBJECT_CLASSES.iter().copied())
}

fn group_entry(username: &str, cn: &str, gid: u32) -> EntryDraft {
    EntryDraft::new()
        .attrs("objectClass", GROUP_OBJECT_CLASSES.iter().copied())
        .attr("memberUid", username)
        .attr("gidNumber", gid.to_string())
        .attr("cn", username)
        .attr("description", format!("Group of user {cn}"))
}
