//! Inbound account creation request.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

use super::split_name;

static USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]{1,31}$").expect("valid regex")
});
/// Century/gender digit, birth date, serial and checksum.
static EXTERNAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[3-6][0-9][0-9][01][0-9][0-3][0-9][0-9]{4}$")
        .expect("valid regex")
});
static GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{1,32}$").expect("valid regex"));
static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
        .expect("valid regex")
});

/// Names owned by the operating system or by services.
pub const RESERVED_NAMES: &[&str] = &[
    "root", "audio", "video", "wheel", "sudo", "admin", "daemon", "bin", "lp",
    "pulse", "lightdm", "dnsmasq", "nobody", "nogroup", "shadow", "kvm",
    "tape", "floppy", "cdrom", "nslcd", "proxy", "man", "news", "tty", "adm",
    "disk",
];

/// Everything needed to create one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ProvisionRequest {
    /// Full name, `<given names> <surname>`.
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        length(min = 3, max = 255, message = "Full name must be 3 to 255 characters long."),
        custom(
            function = "crate::user::validate_cn",
            message = "Full name must contain a given name and a surname."
        )
    )]
    pub cn: String,
    #[validate(custom(
        function = "crate::user::validate_username",
        message = "Username must be 2 to 32 lowercase letters or digits, starting with a letter."
    ))]
    pub username: String,
    /// Target domain, defaults to the base domain.
    #[serde(skip)]
    pub domain: String,
    /// External (national) identifier.
    #[serde(default, deserialize_with = "non_empty")]
    #[validate(custom(
        function = "crate::user::validate_external_id",
        message = "Identifier must be a valid 11-digit personal code."
    ))]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    /// Additional group the user joins.
    #[serde(default, deserialize_with = "non_empty")]
    #[validate(custom(
        function = "crate::user::validate_group",
        message = "Group must be 1 to 32 lowercase letters."
    ))]
    pub group: Option<String>,
}

fn trimmed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    String::deserialize(deserializer).map(|value| value.trim().to_owned())
}

/// HTML forms send blank inputs as empty strings.
fn non_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty()))
}

fn check(
    re: &Regex,
    value: &str,
    code: &'static str,
) -> Result<(), ValidationError> {
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new(code))
    }
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    check(&USERNAME, username, "username")
}

pub fn validate_external_id(id: &str) -> Result<(), ValidationError> {
    check(&EXTERNAL_ID, id, "id")
}

pub fn validate_group(group: &str) -> Result<(), ValidationError> {
    check(&GROUP, group, "group")
}

pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    check(&DOMAIN, domain, "domain")
}

pub fn validate_cn(cn: &str) -> Result<(), ValidationError> {
    if cn.contains(',') || cn.contains('=') {
        return Err(ValidationError::new("cn"));
    }
    split_name(cn)
        .map(|_| ())
        .ok_or_else(|| ValidationError::new("cn"))
}
