//! [`Directory`] backed by a real LDAP server.

use std::collections::HashSet;

use async_trait::async_trait;
use ldap3::exop::PasswordModify;
use ldap3::{Ldap as Ldap3, LdapConnAsync, LdapResult, Mod, SearchEntry};

use super::{
    ALREADY_EXISTS, Directory, DirectoryEntry, DirectoryError, EntryDraft,
    INVALID_CREDENTIALS, Result, Scope, escape_filter,
};

#[derive(Debug, Clone)]
pub struct LdapConfig {
    pub addr: String,
    /// Base used to resolve accounts during authentication.
    pub base_dn: String,
}

impl LdapConfig {
    /// Create a new [`LdapConfig`].
    pub fn new(addr: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            base_dn: base_dn.into(),
        }
    }
}

/// LDAP manager holding one bound connection.
#[derive(Clone, Debug)]
pub struct Ldap {
    conn: Ldap3,
    config: LdapConfig,
}

impl Ldap {
    /// Create a new [`Ldap3`] connection.
    pub async fn connect(
        config: LdapConfig,
        bind_dn: Option<&str>,
        bind_password: Option<&str>,
    ) -> Result<Self> {
        let (handle, mut conn) = LdapConnAsync::new(&config.addr).await?;
        ldap3::drive!(handle);

        if let Some(dn) = bind_dn {
            conn.simple_bind(dn, bind_password.unwrap_or_default())
                .await?
                .success()?;
            tracing::debug!(%dn, "ldap bound");
        }

        tracing::info!(addr = config.addr, "ldap connected");

        Ok(Self { conn, config })
    }
}

/// Map `entryAlreadyExists` to [`DirectoryError::AlreadyExists`].
fn check_add(dn: &str, result: LdapResult) -> Result<()> {
    if result.rc == ALREADY_EXISTS {
        return Err(DirectoryError::AlreadyExists { dn: dn.to_owned() });
    }
    result.success()?;
    Ok(())
}

/// Map `invalidCredentials` to [`DirectoryError::InvalidCredentials`].
fn check_bind(result: LdapResult) -> Result<()> {
    if result.rc == INVALID_CREDENTIALS {
        return Err(DirectoryError::InvalidCredentials);
    }
    result.success()?;
    Ok(())
}

#[async_trait]
impl Directory for Ldap {
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        let mut conn = self.conn.clone();
        let (entries, _) = conn
            .search(base, scope.into(), filter, attrs.to_vec())
            .await?
            .success()?;

        tracing::trace!(base, filter, count = entries.len(), "ldap search");

        Ok(entries
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).into())
            .collect())
    }

    async fn add(&self, dn: &str, entry: &EntryDraft) -> Result<()> {
        let mut conn = self.conn.clone();
        let result = conn.add(dn, entry.as_ldap3()).await?;
        check_add(dn, result)
    }

    async fn set_password(
        &self,
        dn: &str,
        old_password: Option<&str>,
        new_password: &str,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.extended(PasswordModify {
            user_id: Some(dn),
            old_pass: old_password,
            new_pass: Some(new_password),
        })
        .await?
        .success()?;
        Ok(())
    }

    async fn add_value(
        &self,
        dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        let change = Mod::Add(attribute, HashSet::from([value]));

        let mut conn = self.conn.clone();
        conn.modify(dn, vec![change]).await?.success()?;
        Ok(())
    }

    /// Bind as the account on a dedicated connection.
    ///
    /// The shared connection keeps its service identity.
    async fn authenticate(&self, uid: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            // An empty password would be an anonymous bind.
            return Err(DirectoryError::InvalidCredentials);
        }

        let filter =
            format!("(&(objectClass=posixAccount)(uid={}))", escape_filter(uid));
        let results = self
            .search(&self.config.base_dn, Scope::Subtree, &filter, &["dn"])
            .await?;

        let [entry] = results.as_slice() else {
            return Err(DirectoryError::InvalidCredentials);
        };

        let (handle, mut conn) =
            LdapConnAsync::new(&self.config.addr).await?;
        ldap3::drive!(handle);

        check_bind(conn.simple_bind(&entry.dn, password).await?)?;
        conn.unbind().await?;
        Ok(())
    }
}
