//! In-memory [`Directory`] used by tests.
//!
//! Understands equality filters and their conjunction, which is all the
//! service emits. DNs compare case-insensitively but keep their casing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    Directory, DirectoryEntry, DirectoryError, EntryDraft, Result,
    Scope,
};

type Attributes = HashMap<String, Vec<String>>;

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    /// Lowercased DN to (DN, attributes).
    entries: Mutex<BTreeMap<String, (String, Attributes)>>,
    passwords: Mutex<HashMap<String, String>>,
    /// Every write, in order, as `"<op> <dn>"`.
    journal: Mutex<Vec<String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry without going through [`Directory::add`].
    pub fn insert(&self, dn: &str, attrs: &[(&str, &[&str])]) {
        let attrs = attrs
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect();
        self.entries
            .lock()
            .unwrap()
            .insert(dn.to_lowercase(), (dn.to_owned(), attrs));
    }

    /// Seed a POSIX account.
    pub fn insert_account(
        &self,
        domain: &str,
        cn: &str,
        uid: &str,
        number: u32,
    ) -> String {
        let dn = format!("cn={cn},ou=people,{}", super::domain_to_dn(domain));
        let number = number.to_string();
        self.insert(
            &dn,
            &[
                ("objectClass", &["top", "posixAccount"]),
                ("cn", &[cn]),
                ("uid", &[uid]),
                ("uidNumber", &[number.as_str()]),
                ("gidNumber", &[number.as_str()]),
                ("homeDirectory", &["/home/x"]),
                ("modifyTimestamp", &["20240102030405Z"]),
            ],
        );
        dn
    }

    /// Add a value to an existing entry.
    pub fn push(&self, dn: &str, attribute: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        let (_, attrs) = entries
            .get_mut(&dn.to_lowercase())
            .expect("entry must exist");
        attrs
            .entry(attribute.to_owned())
            .or_default()
            .push(value.to_owned());
    }

    pub fn set_account_password(&self, dn: &str, password: &str) {
        self.passwords
            .lock()
            .unwrap()
            .insert(dn.to_lowercase(), password.to_owned());
    }

    pub fn get(&self, dn: &str) -> Option<Attributes> {
        self.entries
            .lock()
            .unwrap()
            .get(&dn.to_lowercase())
            .map(|(_, attrs)| attrs.clone())
    }

    pub fn password(&self, dn: &str) -> Option<String> {
        self.passwords.lock().unwrap().get(&dn.to_lowercase()).cloned()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn record(&self, op: &str, dn: &str) {
        self.journal.lock().unwrap().push(format!("{op} {dn}"));
    }
}

/// Split `(&(a=b)(c=d))` into `[("a", "b"), ("c", "d")]`.
fn parse_filter(filter: &str) -> Vec<(String, String)> {
    let inner = filter.trim();
    let inner = inner
        .strip_prefix("(&")
        .and_then(|f| f.strip_suffix(')'))
        .unwrap_or(inner);

    inner
        .split(')')
        .map(|part| part.trim_start_matches('('))
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn unescape(value: &str) -> String {
    value
        .replace(r"\2a", "*")
        .replace(r"\28", "(")
        .replace(r"\29", ")")
        .replace(r"\5c", "\\")
}

fn is_match(attrs: &Attributes, filter: &[(String, String)]) -> bool {
    filter.iter().all(|(key, value)| {
        let value = unescape(value);
        attrs
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(key))
            .flat_map(|(_, values)| values)
            .any(|v| value == "*" || v.eq_ignore_ascii_case(&value))
    })
}

fn no_such_object(dn: &str) -> DirectoryError {
    ldap3::LdapError::LdapResult {
        result: ldap3::LdapResult {
            rc: 32,
            matched: String::new(),
            text: format!("no such object: {dn}"),
            refs: Vec::new(),
            ctrls: Vec::new(),
        },
    }
    .into()
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        let base = base.to_lowercase();
        let suffix = format!(",{base}");
        let filter = parse_filter(filter);
        let entries = self.entries.lock().unwrap();

        Ok(entries
            .iter()
            .filter(|(key, _)| match scope {
                Scope::Base => key.as_str() == base,
                Scope::Subtree => key.as_str() == base || key.ends_with(&suffix),
            })
            .filter(|(_, (_, entry))| is_match(entry, &filter))
            .map(|(_, (dn, entry))| DirectoryEntry {
                dn: dn.clone(),
                attrs: entry
                    .iter()
                    .filter(|(name, _)| {
                        attrs.is_empty()
                            || attrs
                                .iter()
                                .any(|a| a.eq_ignore_ascii_case(name.as_str()))
                    })
                    .map(|(name, values)| (name.clone(), values.clone()))
                    .collect(),
            })
            .collect())
    }

    async fn add(&self, dn: &str, entry: &EntryDraft) -> Result<()> {
        {
            let mut entries = self.entries.lock().unwrap();
            let key = dn.to_lowercase();
            if entries.contains_key(&key) {
                return Err(DirectoryError::AlreadyExists {
                    dn: dn.to_owned(),
                });
            }

            let attrs = entry
                .iter()
                .map(|(name, values)| (name.to_owned(), values.to_vec()))
                .collect();
            entries.insert(key, (dn.to_owned(), attrs));
        }
        self.record("add", dn);
        Ok(())
    }

    async fn set_password(
        &self,
        dn: &str,
        _old_password: Option<&str>,
        new_password: &str,
    ) -> Result<()> {
        if !self.entries.lock().unwrap().contains_key(&dn.to_lowercase()) {
            return Err(no_such_object(dn));
        }
        self.set_account_password(dn, new_password);
        self.record("passwd", dn);
        Ok(())
    }

    async fn add_value(
        &self,
        dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        {
            let mut entries = self.entries.lock().unwrap();
            let Some((_, attrs)) = entries.get_mut(&dn.to_lowercase()) else {
                return Err(no_such_object(dn));
            };

            attrs
                .entry(attribute.to_owned())
                .or_default()
                .push(value.to_owned());
        }
        self.record("modify", dn);
        Ok(())
    }

    async fn authenticate(&self, uid: &str, password: &str) -> Result<()> {
        let filter =
            parse_filter(&format!("(&(objectClass=posixAccount)(uid={uid}))"));
        let key = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|(_, (_, attrs))| is_match(attrs, &filter))
            .map(|(key, _)| key.clone())
            .ok_or(DirectoryError::InvalidCredentials)?;

        match self.passwords.lock().unwrap().get(&key) {
            Some(stored) if stored == password && !password.is_empty() => {
                Ok(())
            },
            _ => Err(DirectoryError::InvalidCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_scopes() {
        let dir = MemoryDirectory::new();
        dir.insert("dc=example,dc=com", &[("objectClass", &["domain"])]);
        dir.insert_account("example.com", "Ann Lee", "annlee", 2000);

        let base = dir
            .search(
                "dc=example,dc=com",
                Scope::Base,
                "(objectClass=domain)",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(base.len(), 1);

        let accounts = dir
            .search(
                "dc=example,dc=com",
                Scope::Subtree,
                "(&(objectClass=posixAccount)(uid=annlee))",
                &["uidNumber"],
            )
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].dn, "cn=Ann Lee,ou=people,dc=example,dc=com");
        assert_eq!(accounts[0].attrs.len(), 1);
        assert_eq!(accounts[0].last("uidNumber"), Some("2000"));
    }

    #[tokio::test]
    async fn test_add_twice() {
        let dir = MemoryDirectory::new();
        let draft = EntryDraft::new().attr("ou", "people");
        dir.add("ou=people,dc=example,dc=com", &draft).await.unwrap();

        let err = dir.add("OU=people,dc=example,dc=com", &draft).await;
        assert!(matches!(err, Err(DirectoryError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let dir = MemoryDirectory::new();
        let dn = dir.insert_account("example.com", "Ann Lee", "annlee", 2000);
        dir.set_account_password(&dn, "secret");

        assert!(dir.authenticate("annlee", "secret").await.is_ok());
        assert!(dir.authenticate("annlee", "wrong").await.is_err());
        assert!(dir.authenticate("bob", "secret").await.is_err());
    }
}
