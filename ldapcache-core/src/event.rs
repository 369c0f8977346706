//! Directory change events as delivered by the change listener.

use crate::error::EventError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Attribute snapshot of one directory object: attribute name to raw values.
///
/// Attribute names are matched case-insensitively, as LDAP does. The JSON
/// form maps names to lists of UTF-8 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Vec<String>>",
    into = "BTreeMap<String, Vec<String>>"
)]
pub struct Attributes {
    values: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        self.insert(name, values);
        self
    }

    /// Set all values of an attribute, replacing any previous ones.
    pub fn insert<I, V>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        self.values.insert(
            name.into(),
            values.into_iter().map(|v| v.as_ref().to_vec()).collect(),
        );
    }

    /// Values of `name`, or `None` when the attribute is absent.
    pub fn get(&self, name: &str) -> Option<&[Vec<u8>]> {
        if let Some(values) = self.values.get(name) {
            return Some(values);
        }
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// Values of `name` decoded as UTF-8. Absent attributes yield an empty list.
    pub fn get_strings(&self, name: &str) -> Result<Vec<String>, EventError> {
        self.get(name)
            .unwrap_or_default()
            .iter()
            .map(|raw| {
                String::from_utf8(raw.clone()).map_err(|_| EventError::InvalidAttributeValue {
                    attribute: name.to_string(),
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl From<BTreeMap<String, Vec<String>>> for Attributes {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        let mut attrs = Attributes::new();
        for (name, values) in map {
            attrs.insert(name, values);
        }
        attrs
    }
}

impl From<Attributes> for BTreeMap<String, Vec<String>> {
    fn from(attrs: Attributes) -> Self {
        attrs
            .values
            .into_iter()
            .map(|(name, values)| {
                let values = values
                    .iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect();
                (name, values)
            })
            .collect()
    }
}

/// Kind of directory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    #[serde(alias = "a")]
    Add,
    #[serde(alias = "m")]
    Modify,
    #[serde(alias = "d")]
    Delete,
    #[serde(alias = "r", alias = "modrdn")]
    Rename,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Add => "add",
            Command::Modify => "modify",
            Command::Delete => "delete",
            Command::Rename => "rename",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown command name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown change command: {0}")]
pub struct CommandParseError(pub String);

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" | "a" => Ok(Command::Add),
            "modify" | "m" => Ok(Command::Modify),
            "delete" | "d" => Ok(Command::Delete),
            "rename" | "modrdn" | "r" => Ok(Command::Rename),
            _ => Err(CommandParseError(s.to_string())),
        }
    }
}

/// One change of one directory object.
///
/// `old` is empty when the object did not exist before the change, `new` is
/// empty when it no longer exists. Renames carry the previous DN in `old_dn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub dn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_dn: Option<String>,
    pub command: Command,
    #[serde(default)]
    pub old: Attributes,
    #[serde(default)]
    pub new: Attributes,
}

impl ChangeEvent {
    pub fn add(dn: impl Into<String>, new: Attributes) -> Self {
        Self {
            dn: dn.into(),
            old_dn: None,
            command: Command::Add,
            old: Attributes::new(),
            new,
        }
    }

    pub fn modify(dn: impl Into<String>, old: Attributes, new: Attributes) -> Self {
        Self {
            dn: dn.into(),
            old_dn: None,
            command: Command::Modify,
            old,
            new,
        }
    }

    pub fn delete(dn: impl Into<String>, old: Attributes) -> Self {
        Self {
            dn: dn.into(),
            old_dn: None,
            command: Command::Delete,
            old,
            new: Attributes::new(),
        }
    }

    pub fn rename(
        old_dn: impl Into<String>,
        new_dn: impl Into<String>,
        old: Attributes,
        new: Attributes,
    ) -> Self {
        Self {
            dn: new_dn.into(),
            old_dn: Some(old_dn.into()),
            command: Command::Rename,
            old,
            new,
        }
    }

    /// Check that the snapshots agree with the command.
    pub fn validate(&self) -> Result<(), EventError> {
        let invalid = |reason: &str| EventError::InvalidEvent {
            dn: self.dn.clone(),
            reason: reason.to_string(),
        };
        if self.dn.is_empty() {
            return Err(invalid("empty dn"));
        }
        match self.command {
            Command::Add if self.new.is_empty() => Err(invalid("add without new attributes")),
            Command::Add if !self.old.is_empty() => Err(invalid("add with old attributes")),
            Command::Delete if self.old.is_empty() => Err(invalid("delete without old attributes")),
            Command::Delete if !self.new.is_empty() => Err(invalid("delete with new attributes")),
            Command::Modify if self.old.is_empty() || self.new.is_empty() => {
                Err(invalid("modify needs old and new attributes"))
            }
            Command::Rename if self.old_dn.as_deref().map_or(true, str::is_empty) => {
                Err(invalid("rename without old_dn"))
            }
            Command::Rename if self.old.is_empty() || self.new.is_empty() => {
                Err(invalid("rename needs old and new attributes"))
            }
            _ => Ok(()),
        }
    }

    /// DN and attributes of the object before the change, if it existed.
    pub fn old_snapshot(&self) -> Option<(&str, &Attributes)> {
        if self.old.is_empty() || self.command == Command::Add {
            return None;
        }
        let dn = match (self.command, self.old_dn.as_deref()) {
            (Command::Rename, Some(old_dn)) => old_dn,
            _ => self.dn.as_str(),
        };
        Some((dn, &self.old))
    }

    /// DN and attributes of the object after the change, if it still exists.
    pub fn new_snapshot(&self) -> Option<(&str, &Attributes)> {
        if self.new.is_empty() || self.command == Command::Delete {
            return None;
        }
        Some((self.dn.as_str(), &self.new))
    }
}
