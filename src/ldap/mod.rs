//! LDAP support.
//!
//! [`Directory`] is the seam between the provisioning workflow and the
//! directory server. [`Ldap`] talks to a real server through `ldap3`.

mod client;
mod entry;
#[cfg(test)]
pub mod memory;

pub use client::{Ldap, LdapConfig};
pub use entry::EntryDraft;

use std::collections::HashMap;

use async_trait::async_trait;

/// LDAP result code returned when the target DN already exists.
pub const ALREADY_EXISTS: u32 = 68;
/// LDAP result code returned on a failed bind.
pub const INVALID_CREDENTIALS: u32 = 49;

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors raised by a [`Directory`].
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("entry `{dn}` already exists")]
    AlreadyExists { dn: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("LDAP operation failed: {0}")]
    Ldap(#[from] ldap3::LdapError),
}

/// Search breadth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the named entry.
    Base,
    /// The named entry and all of its descendants.
    Subtree,
}

impl From<Scope> for ldap3::Scope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::Subtree => ldap3::Scope::Subtree,
        }
    }
}

/// One search result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Values of `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// Last value of `name`, if any.
    pub fn last(&self, name: &str) -> Option<&str> {
        self.values(name).last().map(String::as_str)
    }
}

impl From<ldap3::SearchEntry> for DirectoryEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
        }
    }
}

/// Operations consumed from the directory server.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Search entries below `base`.
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>>;

    /// Create a new entry. Fails with [`DirectoryError::AlreadyExists`]
    /// when `dn` is taken.
    async fn add(&self, dn: &str, entry: &EntryDraft) -> Result<()>;

    /// Set the password of `dn` using the password modify extended
    /// operation.
    async fn set_password(
        &self,
        dn: &str,
        old_password: Option<&str>,
        new_password: &str,
    ) -> Result<()>;

    /// Add one value to a possibly multi-valued attribute of `dn`.
    async fn add_value(
        &self,
        dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()>;

    /// Check credentials of the account identified by `uid`.
    async fn authenticate(&self, uid: &str, password: &str) -> Result<()>;
}

/// Convert `example.com` into `dc=example,dc=com`.
pub fn domain_to_dn(domain: &str) -> String {
    domain
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("dc={part}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Convert `dc=example,dc=com` back into `example.com`.
///
/// Components other than `dc` are ignored.
pub fn dn_to_domain(dn: &str) -> String {
    dn.split(',')
        .filter_map(|rdn| {
            let (key, value) = rdn.trim().split_once('=')?;
            key.eq_ignore_ascii_case("dc").then_some(value)
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Escape a value before embedding it into a search filter.
pub fn escape_filter(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}
