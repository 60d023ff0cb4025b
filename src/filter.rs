//! Definition for types used in LDAP filters

use crate::ldap::LdapString;
use std::borrow::Cow;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Filter<'a> {
    And(Vec<Filter<'a>>),
    Or(Vec<Filter<'a>>),
    Not(Box<Filter<'a>>),
    EqualityMatch(AttributeValueAssertion<'a>),
    Substrings(SubstringFilter<'a>),
    GreaterOrEqual(AttributeValueAssertion<'a>),
    LessOrEqual(AttributeValueAssertion<'a>),
    Present(LdapString<'a>),
    ApproxMatch(AttributeValueAssertion<'a>),
    ExtensibleMatch(MatchingRuleAssertion<'a>),
}

impl<'a> Filter<'a> {
    /// Context tag number selecting this filter node on the wire
    pub fn tag_number(&self) -> u32 {
        match self {
            Filter::And(_) => 0,
            Filter::Or(_) => 1,
            Filter::Not(_) => 2,
            Filter::EqualityMatch(_) => 3,
            Filter::Substrings(_) => 4,
            Filter::GreaterOrEqual(_) => 5,
            Filter::LessOrEqual(_) => 6,
            Filter::Present(_) => 7,
            Filter::ApproxMatch(_) => 8,
            Filter::ExtensibleMatch(_) => 9,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartialAttribute<'a> {
    pub attr_type: LdapString<'a>,
    pub attr_vals: Vec<AttributeValue<'a>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attribute<'a> {
    pub attr_type: LdapString<'a>,
    pub attr_vals: Vec<AttributeValue<'a>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeValueAssertion<'a> {
    pub attribute_desc: LdapString<'a>,
    pub assertion_value: Cow<'a, [u8]>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeDescription<'a>(pub Cow<'a, str>);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MatchingRuleAssertion<'a> {
    pub matching_rule: Option<LdapString<'a>>,
    pub rule_type: Option<AttributeDescription<'a>>,
    pub assertion_value: AssertionValue<'a>,
    pub dn_attributes: Option<bool>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubstringFilter<'a> {
    pub filter_type: LdapString<'a>,
    pub substrings: Vec<Substring<'a>>,
}

impl SubstringFilter<'_> {
    pub fn initial(&self) -> Option<&[u8]> {
        self.substrings.iter().find_map(|s| match s {
            Substring::Initial(v) => Some(v.0.as_ref()),
            _ => None,
        })
    }

    pub fn any(&self) -> impl Iterator<Item = &[u8]> {
        self.substrings.iter().filter_map(|s| match s {
            Substring::Any(v) => Some(v.0.as_ref()),
            _ => None,
        })
    }

    pub fn final_(&self) -> Option<&[u8]> {
        self.substrings.iter().find_map(|s| match s {
            Substring::Final(v) => Some(v.0.as_ref()),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Substring<'a> {
    Initial(AssertionValue<'a>),
    Any(AssertionValue<'a>),
    Final(AssertionValue<'a>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssertionValue<'a>(pub Cow<'a, [u8]>);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeValue<'a>(pub Cow<'a, [u8]>);
