//! Shard descriptors: which directory objects feed which cache table.

use crate::dn;
use crate::error::{ConfigError, EventError};
use crate::event::Attributes;
use crate::filter::Filter;
use serde::{Deserialize, Serialize};

/// Attribute name meaning "the object's own DN".
pub const DN_ATTRIBUTE: &str = "dn";

/// Built-in table: group DN -> POSIX member uids.
pub const MEMBER_UIDS: &str = "memberUids";

/// Built-in table: group DN -> member DNs.
pub const UNIQUE_MEMBERS: &str = "uniqueMembers";

/// Built-in LMDB side table: entryUUID -> DN.
pub const ENTRY_UUID: &str = "EntryUUID";

const GROUP_FILTER: &str = "(objectClass=posixGroup)";

/// Declarative description of one cache table.
///
/// The persisted form is a JSON object with exactly these six keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shard {
    pub db_name: String,
    pub single_value: bool,
    pub reverse: bool,
    pub key: String,
    pub value: String,
    pub ldap_filter: String,
}

/// Key and values a shard extracts from one object snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEntry {
    pub key: String,
    pub values: Vec<String>,
}

impl Shard {
    /// Create a shard descriptor. Reverse shards are always multi-valued.
    pub fn new(
        db_name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        ldap_filter: impl Into<String>,
        single_value: bool,
        reverse: bool,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            single_value: single_value && !reverse,
            reverse,
            key: key.into(),
            value: value.into(),
            ldap_filter: ldap_filter.into(),
        }
    }

    /// `memberUids`: group DN -> member uids.
    pub fn member_uids() -> Self {
        Self::new(MEMBER_UIDS, DN_ATTRIBUTE, "memberUid", GROUP_FILTER, false, false)
    }

    /// `uniqueMembers`: group DN -> member DNs.
    pub fn unique_members() -> Self {
        Self::new(UNIQUE_MEMBERS, DN_ATTRIBUTE, "uniqueMember", GROUP_FILTER, false, false)
    }

    /// `EntryUUID`: entryUUID -> DN, used to translate UUID keys on LMDB.
    pub fn entry_uuid() -> Self {
        Self::new(
            ENTRY_UUID,
            "entryUUID",
            DN_ATTRIBUTE,
            "(|(objectClass=posixGroup)(objectClass=posixAccount))",
            true,
            false,
        )
    }

    /// Shards every catalog carries regardless of configuration.
    pub fn defaults() -> Vec<Shard> {
        vec![Self::member_uids(), Self::unique_members()]
    }

    /// Whether keys of this shard are entryUUIDs rather than DN-like values.
    pub fn keyed_by_uuid(&self) -> bool {
        !self.reverse && self.key.eq_ignore_ascii_case("entryUUID")
    }

    /// Check the descriptor and compile its filter.
    pub fn validate(&self) -> Result<Filter, ConfigError> {
        let field_error = |field: &str, value: &str, reason: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        if self.db_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "db_name".to_string(),
            });
        }
        if self.db_name.contains(['/', '\0']) {
            return Err(field_error("db_name", &self.db_name, "must be a plain file name"));
        }
        if self.key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "key".to_string(),
            });
        }
        if self.value.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "value".to_string(),
            });
        }
        if self.reverse && self.single_value {
            return Err(field_error("single_value", "true", "reverse shards are multi-valued"));
        }
        Filter::parse(&self.ldap_filter).map_err(|e| ConfigError::InvalidFilter {
            filter: self.ldap_filter.clone(),
            reason: e.to_string(),
        })
    }

    /// Extract this shard's key and values from one object snapshot.
    ///
    /// Returns `Ok(None)` when the object carries no key or no values for
    /// this shard. Keys are lower-cased; reverse shards lower-case their
    /// values as well because those become keys.
    pub fn extract(&self, dn: &str, attrs: &Attributes) -> Result<Option<ShardEntry>, EventError> {
        let mut values = if self.value.eq_ignore_ascii_case(DN_ATTRIBUTE) {
            vec![dn.to_string()]
        } else {
            attrs.get_strings(&self.value)?
        };
        if values.is_empty() {
            return Ok(None);
        }

        let key = if self.key.eq_ignore_ascii_case(DN_ATTRIBUTE) {
            dn.to_string()
        } else {
            match attrs.get_strings(&self.key)?.into_iter().next() {
                Some(key) => key,
                None => return Ok(None),
            }
        };

        if self.single_value {
            values.truncate(1);
        }
        if self.reverse {
            values = values.iter().map(|v| dn::normalize(v)).collect();
        }

        Ok(Some(ShardEntry {
            key: dn::normalize(&key),
            values,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Attributes {
        Attributes::new()
            .with("objectClass", ["posixGroup"])
            .with("entryUUID", ["5A0B-11"])
            .with("uniqueMember", ["uid=Alice,dc=x", "uid=Bob,dc=x"])
            .with("memberUid", ["Alice", "Bob"])
    }

    #[test]
    fn test_reverse_forces_multi_value() {
        let shard = Shard::new("memberOf", "dn", "uniqueMember", "(objectClass=*)", true, true);
        assert!(!shard.single_value);
        assert!(shard.reverse);
    }

    #[test]
    fn test_extract_forward_keeps_value_case() {
        let entry = Shard::member_uids()
            .extract("CN=Staff,DC=x", &group())
            .expect("extract should succeed")
            .expect("shard should apply");
        assert_eq!(entry.key, "cn=staff,dc=x");
        assert_eq!(entry.values, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_extract_reverse_lowercases_values() {
        let shard = Shard::new("memberOf", "dn", "uniqueMember", "(objectClass=*)", false, true);
        let entry = shard
            .extract("cn=Staff,dc=x", &group())
            .expect("extract should succeed")
            .expect("shard should apply");
        assert_eq!(entry.values, vec!["uid=alice,dc=x", "uid=bob,dc=x"]);
    }

    #[test]
    fn test_extract_single_value_truncates() {
        let shard = Shard::new("firstMember", "dn", "memberUid", "(objectClass=*)", true, false);
        let entry = shard
            .extract("cn=staff", &group())
            .expect("extract should succeed")
            .expect("shard should apply");
        assert_eq!(entry.values, vec!["Alice"]);
    }

    #[test]
    fn test_extract_key_from_attribute_and_dn_value() {
        let entry = Shard::entry_uuid()
            .extract("cn=Staff,dc=x", &group())
            .expect("extract should succeed")
            .expect("shard should apply");
        assert_eq!(entry.key, "5a0b-11");
        assert_eq!(entry.values, vec!["cn=Staff,dc=x"]);
    }

    #[test]
    fn test_extract_without_values_or_key() {
        let attrs = Attributes::new().with("objectClass", ["posixGroup"]);
        assert_eq!(Shard::member_uids().extract("cn=empty", &attrs), Ok(None));
        assert_eq!(Shard::entry_uuid().extract("cn=empty", &attrs), Ok(None));
    }

    #[test]
    fn test_validate() {
        assert!(Shard::unique_members().validate().is_ok());
        let mut bad = Shard::unique_members();
        bad.ldap_filter = "(objectClass=".to_string();
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidFilter { .. })));
        bad = Shard::unique_members();
        bad.db_name = "../etc".to_string();
        assert!(bad.validate().is_err());
        bad = Shard::unique_members();
        bad.reverse = true;
        bad.single_value = true;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_json_form_has_six_keys() {
        let value = serde_json::to_value(Shard::member_uids()).expect("serialize");
        let object = value.as_object().expect("object");
        assert_eq!(object.len(), 6);
        let parsed: Result<Shard, _> = serde_json::from_str(
            r#"{"db_name":"x","single_value":true,"reverse":false,"key":"dn","value":"sn","ldap_filter":"(a=b)","extra":1}"#,
        );
        assert!(parsed.is_err());
    }
}
