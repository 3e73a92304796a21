//! Payloads for the directory `add` operation.

use std::collections::HashSet;

/// Ordered attribute map for a new directory entry.
///
/// Attributes without any value are never sent to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDraft {
    attrs: Vec<(String, Vec<String>)>,
}

impl EntryDraft {
    /// Create an empty [`EntryDraft`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-valued attribute.
    pub fn attr(self, name: &str, value: impl Into<String>) -> Self {
        self.attrs(name, [value.into()])
    }

    /// Add an attribute when `value` is present.
    pub fn optional(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    /// Add a multi-valued attribute.
    pub fn attrs<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .filter(|value| !value.is_empty())
            .collect();

        if values.is_empty() {
            return self;
        }

        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => existing.extend(values),
            None => self.attrs.push((name.to_owned(), values)),
        }
        self
    }

    /// Values of `name`.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// Iterate attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attrs
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Shape expected by [`ldap3::Ldap::add`].
    pub(crate) fn as_ldap3(&self) -> Vec<(&str, HashSet<&str>)> {
        self.attrs
            .iter()
            .map(|(key, values)| {
                (key.as_str(), values.iter().map(String::as_str).collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_are_dropped() {
        let draft = EntryDraft::new()
            .attr("uid", "annlee")
            .optional("mail", None)
            .attr("employeeNumber", "")
            .attrs("objectClass", ["top", "posixGroup"]);

        let names: Vec<&str> = draft.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["uid", "objectClass"]);
        assert_eq!(
            draft.get("objectclass"),
            Some(["top".to_string(), "posixGroup".to_string()].as_slice())
        );
    }

    #[test]
    fn test_repeated_attribute_is_merged() {
        let draft = EntryDraft::new()
            .attr("memberUid", "annlee")
            .attr("memberUid", "bob");

        assert_eq!(draft.iter().count(), 1);
        assert_eq!(draft.get("memberUid").map(<[String]>::len), Some(2));
        assert_eq!(draft.as_ldap3()[0].1.len(), 2);
    }
}
