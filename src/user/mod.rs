mod request;
mod service;

pub use request::*;
pub use service::*;

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::ldap::{DirectoryEntry, dn_to_domain};

/// Format of `modifyTimestamp` (GeneralizedTime, whole seconds).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%SZ";
const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";
/// Date part of a GeneralizedTime value.
const GENERALIZED_DATE_FORMAT: &str = "%Y%m%d";

static USER_DN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^cn=(.+?),ou=people,(.+)$").expect("valid regex")
});

/// Account as read from the directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// External identifier.
    pub id: Option<String>,
    pub domain: String,
    /// Name of the attribute holding the recovery address.
    pub recovery_email: String,
    pub born: Option<NaiveDate>,
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    #[serde(rename = "givenName")]
    pub given_name: Option<String>,
    pub sn: Option<String>,
    pub cn: String,
    pub modified: DateTime<Utc>,
}

/// Single value of a mandatory attribute.
fn required<'a>(entry: &'a DirectoryEntry, name: &str) -> Result<&'a str> {
    match entry.values(name) {
        [value] => Ok(value.as_str()),
        [] => Err(ServerError::malformed(
            &entry.dn,
            format!("missing `{name}`"),
        )),
        _ => Err(ServerError::malformed(
            &entry.dn,
            format!("`{name}` is multi-valued"),
        )),
    }
}

fn number(entry: &DirectoryEntry, name: &str) -> Result<u32> {
    let value = required(entry, name)?;
    value.trim().parse().map_err(|_| {
        ServerError::malformed(&entry.dn, format!("`{name}` is not a number"))
    })
}

/// Parse a `modifyTimestamp` value.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse `dateOfBirth`, either `YYYY-MM-DD` or GeneralizedTime.
pub fn parse_birth_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, BIRTH_DATE_FORMAT) {
        return Some(date);
    }

    let (date, time) = (value.get(..8)?, value.get(8..)?);
    let time_ok = time.chars().all(|c| {
        c.is_ascii_digit() || matches!(c, 'Z' | '.' | ',' | '+' | '-')
    });
    if !time_ok {
        return None;
    }
    NaiveDate::parse_from_str(date, GENERALIZED_DATE_FORMAT).ok()
}

impl UserRecord {
    /// Project a search result of `(objectClass=posixAccount)`.
    pub fn from_entry(
        entry: &DirectoryEntry,
        id_attribute: &str,
        recovery_email_attribute: &str,
    ) -> Result<Self> {
        let captures = USER_DN.captures(&entry.dn).ok_or_else(|| {
            ServerError::malformed(&entry.dn, "not below `ou=people`")
        })?;
        let domain = dn_to_domain(&captures[2]);

        let modified = required(entry, "modifyTimestamp")?;
        let modified = parse_timestamp(modified).ok_or_else(|| {
            ServerError::malformed(&entry.dn, "invalid `modifyTimestamp`")
        })?;

        let born = entry.last("dateOfBirth").and_then(|value| {
            let born = parse_birth_date(value);
            if born.is_none() {
                tracing::warn!(dn = %entry.dn, value, "unreadable `dateOfBirth`");
            }
            born
        });

        Ok(Self {
            id: entry.last(id_attribute).map(str::to_owned),
            domain,
            recovery_email: recovery_email_attribute.to_owned(),
            born,
            username: required(entry, "uid")?.to_owned(),
            uid: number(entry, "uidNumber")?,
            gid: number(entry, "gidNumber")?,
            home: required(entry, "homeDirectory")?.to_owned(),
            given_name: entry
                .last("givenName")
                .or_else(|| entry.last("gn"))
                .map(str::to_owned),
            sn: entry.last("sn").map(str::to_owned),
            cn: required(entry, "cn")?.to_owned(),
            modified,
        })
    }
}

/// Split a full name on its last space into given name and surname.
pub fn split_name(cn: &str) -> Option<(&str, &str)> {
    let (given, surname) = cn.trim().rsplit_once(' ')?;
    let given = given.trim_end();
    if given.is_empty() || surname.is_empty() {
        return None;
    }
    Some((given, surname))
}
