//! Distinguished name helpers.
//!
//! Cache keys are lower-cased DNs. Nothing here parses a DN fully; the query
//! layer runs these helpers once per member of every resolved group, so they
//! stick to plain string splitting.

/// Normalize a DN (or any attribute value used as a key) for lookups.
pub fn normalize(dn: &str) -> String {
    dn.to_lowercase()
}

/// Value of the first RDN of `dn`.
///
/// Splits on the first `,`, then on the first `=`. A DN with no `=` in its
/// first component yields the whole component.
///
/// ```
/// use ldapcache_core::dn::first_rdn_value;
/// assert_eq!(first_rdn_value("uid=alice,cn=users,dc=x"), "alice");
/// assert_eq!(first_rdn_value("cn=host1,ou=x"), "host1");
/// ```
pub fn first_rdn_value(dn: &str) -> &str {
    let rdn = dn.split_once(',').map_or(dn, |(rdn, _)| rdn);
    rdn.split_once('=').map_or(rdn, |(_, value)| value)
}

/// Short user name derived from a user DN: the lower-cased first RDN value.
pub fn username(dn: &str) -> String {
    first_rdn_value(dn).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_rdn_value() {
        assert_eq!(first_rdn_value("uid=Alice,cn=users,dc=x"), "Alice");
        assert_eq!(first_rdn_value("cn=Domain Users,cn=groups"), "Domain Users");
        assert_eq!(first_rdn_value("cn=single"), "single");
        assert_eq!(first_rdn_value("noequals,dc=x"), "noequals");
        assert_eq!(first_rdn_value(""), "");
    }

    #[test]
    fn test_value_may_contain_equals() {
        assert_eq!(first_rdn_value("cn=a=b,dc=x"), "a=b");
    }

    #[test]
    fn test_username_is_lowercase() {
        assert_eq!(username("uid=Alice,dc=x"), "alice");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("CN=Alice,DC=X"), "cn=alice,dc=x");
    }
}
