//! Filter evaluation against directory entries
//!
//! The backend returns scope candidates only; the search handler runs the
//! parsed filter tree over each entry here. Attribute names compare ASCII
//! case-insensitively, attribute values compare as raw bytes.

use crate::backend::Entry;
use crate::filter::{Filter, SubstringFilter};

/// Does `entry` satisfy `filter`?
pub fn matches(filter: &Filter<'_>, entry: &Entry) -> bool {
    match filter {
        Filter::And(children) => children.iter().all(|f| matches(f, entry)),
        Filter::Or(children) => children.iter().any(|f| matches(f, entry)),
        Filter::Not(child) => !matches(child, entry),
        Filter::EqualityMatch(ava) | Filter::ApproxMatch(ava) => entry
            .attribute(&ava.attribute_desc.0)
            .is_some_and(|a| a.values.iter().any(|v| *v == *ava.assertion_value)),
        Filter::Present(attr) => entry.attribute(&attr.0).is_some(),
        Filter::GreaterOrEqual(ava) => entry
            .attribute(&ava.attribute_desc.0)
            .is_some_and(|a| a.values.iter().any(|v| v.as_slice() >= &*ava.assertion_value)),
        Filter::LessOrEqual(ava) => entry
            .attribute(&ava.attribute_desc.0)
            .is_some_and(|a| a.values.iter().any(|v| v.as_slice() <= &*ava.assertion_value)),
        Filter::Substrings(sub) => entry
            .attribute(&sub.filter_type.0)
            .is_some_and(|a| a.values.iter().any(|v| substring_match(v, sub))),
        // without a matching rule the assertion degrades to equality on
        // the named type; anything rule-based is undefined here
        Filter::ExtensibleMatch(assertion) => match (&assertion.matching_rule, &assertion.rule_type)
        {
            (None, Some(rule_type)) => entry
                .attribute(&rule_type.0)
                .is_some_and(|a| a.values.iter().any(|v| *v == *assertion.assertion_value.0)),
            _ => false,
        },
    }
}

fn substring_match(value: &[u8], sub: &SubstringFilter<'_>) -> bool {
    let mut at = 0;
    if let Some(initial) = sub.initial() {
        if !value.starts_with(initial) {
            return false;
        }
        at = initial.len();
    }
    for any in sub.any() {
        match find(&value[at..], any) {
            Some(pos) => at += pos + any.len(),
            None => return false,
        }
    }
    if let Some(final_) = sub.final_() {
        if value.len() < at + final_.len() || !value.ends_with(final_) {
            return false;
        }
    }
    true
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{
        AssertionValue, AttributeValueAssertion, MatchingRuleAssertion, Substring,
    };
    use crate::ldap::LdapString;
    use std::borrow::Cow;

    fn bob() -> Entry {
        let mut e = Entry::new("cn=bob,dc=example,dc=com");
        e.set_attribute("objectClass", vec![b"top".to_vec(), b"person".to_vec()]);
        e.set_attribute("cn", vec![b"bob".to_vec()]);
        e.set_attribute("mail", vec![b"bob@example.com".to_vec()]);
        e.set_attribute("uidNumber", vec![b"1000".to_vec()]);
        e
    }

    fn eq(attr: &str, value: &[u8]) -> Filter<'static> {
        Filter::EqualityMatch(AttributeValueAssertion {
            attribute_desc: LdapString(Cow::Owned(attr.to_owned())),
            assertion_value: Cow::Owned(value.to_vec()),
        })
    }

    #[test]
    fn test_present_and_equality() {
        let e = bob();
        assert!(matches(
            &Filter::Present(LdapString(Cow::Borrowed("objectClass"))),
            &e
        ));
        assert!(matches(
            &Filter::Present(LdapString(Cow::Borrowed("OBJECTCLASS"))),
            &e
        ));
        assert!(!matches(
            &Filter::Present(LdapString(Cow::Borrowed("telephoneNumber"))),
            &e
        ));
        assert!(matches(&eq("cn", b"bob"), &e));
        // values are byte-exact
        assert!(!matches(&eq("cn", b"Bob"), &e));
    }

    #[test]
    fn test_boolean_composition() {
        let e = bob();
        assert!(matches(
            &Filter::And(vec![eq("cn", b"bob"), eq("objectClass", b"person")]),
            &e
        ));
        assert!(matches(
            &Filter::Or(vec![eq("cn", b"alice"), eq("cn", b"bob")]),
            &e
        ));
        assert!(!matches(
            &Filter::And(vec![eq("cn", b"bob"), eq("cn", b"alice")]),
            &e
        ));
        assert!(matches(&Filter::Not(Box::new(eq("cn", b"alice"))), &e));
        // empty And is vacuously true, empty Or finds nothing
        assert!(matches(&Filter::And(vec![]), &e));
        assert!(!matches(&Filter::Or(vec![]), &e));
    }

    #[test]
    fn test_ordering_filters() {
        let e = bob();
        let ge = |v: &[u8]| {
            Filter::GreaterOrEqual(AttributeValueAssertion {
                attribute_desc: LdapString(Cow::Borrowed("uidNumber")),
                assertion_value: Cow::Owned(v.to_vec()),
            })
        };
        let le = |v: &[u8]| {
            Filter::LessOrEqual(AttributeValueAssertion {
                attribute_desc: LdapString(Cow::Borrowed("uidNumber")),
                assertion_value: Cow::Owned(v.to_vec()),
            })
        };
        assert!(matches(&ge(b"1000"), &e));
        assert!(matches(&ge(b"0999"), &e));
        assert!(!matches(&ge(b"2000"), &e));
        assert!(matches(&le(b"1000"), &e));
        assert!(!matches(&le(b"0999"), &e));
    }

    #[test]
    fn test_substring_matching() {
        let e = bob();
        let sub = |initial: Option<&[u8]>, any: &[&[u8]], final_: Option<&[u8]>| {
            let mut substrings = Vec::new();
            if let Some(i) = initial {
                substrings.push(Substring::Initial(AssertionValue(Cow::Owned(i.to_vec()))));
            }
            for a in any {
                substrings.push(Substring::Any(AssertionValue(Cow::Owned(a.to_vec()))));
            }
            if let Some(f) = final_ {
                substrings.push(Substring::Final(AssertionValue(Cow::Owned(f.to_vec()))));
            }
            Filter::Substrings(SubstringFilter {
                filter_type: LdapString(Cow::Borrowed("mail")),
                substrings,
            })
        };
        // bob@example.com
        assert!(matches(&sub(Some(b"bob"), &[], None), &e));
        assert!(matches(&sub(None, &[b"@example"], None), &e));
        assert!(matches(&sub(None, &[], Some(b".com")), &e));
        assert!(matches(&sub(Some(b"bob"), &[b"example"], Some(b"com")), &e));
        assert!(!matches(&sub(Some(b"alice"), &[], None), &e));
        assert!(!matches(&sub(None, &[b"zzz"], None), &e));
        // components must appear in order without overlap
        assert!(!matches(&sub(None, &[b"com", b"bob"], None), &e));
        assert!(!matches(&sub(Some(b"bob@example.com"), &[], Some(b"com")), &e));
    }

    #[test]
    fn test_extensible_match_degrades_to_equality() {
        let e = bob();
        let f = Filter::ExtensibleMatch(MatchingRuleAssertion {
            matching_rule: None,
            rule_type: Some(crate::filter::AttributeDescription(Cow::Borrowed("cn"))),
            assertion_value: AssertionValue(Cow::Borrowed(b"bob")),
            dn_attributes: None,
        });
        assert!(matches(&f, &e));
        let f = Filter::ExtensibleMatch(MatchingRuleAssertion {
            matching_rule: Some(LdapString(Cow::Borrowed("caseIgnoreMatch"))),
            rule_type: Some(crate::filter::AttributeDescription(Cow::Borrowed("cn"))),
            assertion_value: AssertionValue(Cow::Borrowed(b"bob")),
            dn_attributes: None,
        });
        assert!(!matches(&f, &e));
    }
}
