use crate::ber::BerClass;
use crate::ber_reader::BerReader;
use crate::error::*;
use crate::filter::*;
use crate::ldap_parser::{parse_ldap_attribute_description, parse_ldap_string};
use std::borrow::Cow;

/// Hard cap on filter nesting, so hostile input cannot blow the stack
const MAX_FILTER_DEPTH: usize = 64;

// AttributeValueAssertion ::= SEQUENCE {
//      attributeDesc   AttributeDescription,
//      assertionValue  AssertionValue }
fn parse_attribute_value_assertion_content<'a>(
    rd: &mut BerReader<'a>,
) -> Result<AttributeValueAssertion<'a>> {
    let attribute_desc = parse_ldap_attribute_description(rd)?;
    let assertion_value = rd.read_octet_string()?;
    let assertion = AttributeValueAssertion {
        attribute_desc,
        assertion_value: Cow::Borrowed(assertion_value),
    };
    Ok(assertion)
}

// PartialAttribute ::= SEQUENCE {
//      type       AttributeDescription,
//      vals       SET OF value AttributeValue }
pub(crate) fn parse_partial_attribute<'a>(rd: &mut BerReader<'a>) -> Result<PartialAttribute<'a>> {
    let mut inner = rd.read_sequence_contents()?;
    let attr_type = parse_ldap_string(&mut inner)?;
    let mut vals = inner.read_set_contents()?;
    let mut attr_vals = Vec::new();
    while !vals.is_empty() {
        attr_vals.push(AttributeValue(Cow::Borrowed(vals.read_octet_string()?)));
    }
    Ok(PartialAttribute {
        attr_type,
        attr_vals,
    })
}

// Attribute ::= PartialAttribute(WITH COMPONENTS {
//      ...,
//      vals (SIZE(1..MAX))})
pub(crate) fn parse_attribute<'a>(rd: &mut BerReader<'a>) -> Result<Attribute<'a>> {
    let attr = parse_partial_attribute(rd)?;
    Ok(Attribute {
        attr_type: attr.attr_type,
        attr_vals: attr.attr_vals,
    })
}

// Filter ::= CHOICE {
//     and             [0] SET SIZE (1..MAX) OF filter Filter,
//     or              [1] SET SIZE (1..MAX) OF filter Filter,
//     not             [2] Filter,
//     equalityMatch   [3] AttributeValueAssertion,
//     substrings      [4] SubstringFilter,
//     greaterOrEqual  [5] AttributeValueAssertion,
//     lessOrEqual     [6] AttributeValueAssertion,
//     present         [7] AttributeDescription,
//     approxMatch     [8] AttributeValueAssertion,
//     extensibleMatch [9] MatchingRuleAssertion,
//     ...  }
pub fn parse_filter<'a>(rd: &mut BerReader<'a>) -> Result<Filter<'a>> {
    parse_filter_at_depth(rd, 0)
}

fn parse_filter_at_depth<'a>(rd: &mut BerReader<'a>, depth: usize) -> Result<Filter<'a>> {
    if depth > MAX_FILTER_DEPTH {
        return Err(LdapError::InvalidFilterType);
    }
    let (tag, mut inner) = rd.read_any_contents()?;
    if tag.class != BerClass::ContextSpecific {
        return Err(LdapError::InvalidFilterType);
    }
    let filter = match tag.number {
        0 => Filter::And(parse_filter_set(&mut inner, depth)?),
        1 => Filter::Or(parse_filter_set(&mut inner, depth)?),
        2 => Filter::Not(Box::new(parse_filter_at_depth(&mut inner, depth + 1)?)),
        3 => Filter::EqualityMatch(parse_attribute_value_assertion_content(&mut inner)?),
        4 => Filter::Substrings(parse_substrings_filter_content(&mut inner)?),
        5 => Filter::GreaterOrEqual(parse_attribute_value_assertion_content(&mut inner)?),
        6 => Filter::LessOrEqual(parse_attribute_value_assertion_content(&mut inner)?),
        7 => {
            // the filter data is the attribute description itself
            let s = std::str::from_utf8(inner.take_all()).or(Err(LdapError::InvalidString))?;
            Filter::Present(crate::ldap::LdapString(Cow::Borrowed(s)))
        }
        8 => Filter::ApproxMatch(parse_attribute_value_assertion_content(&mut inner)?),
        9 => Filter::ExtensibleMatch(parse_matching_rule_assertion_content(&mut inner)?),
        _ => return Err(LdapError::InvalidFilterType),
    };
    Ok(filter)
}

// and/or carry a set of children, parsed until the content is drained
fn parse_filter_set<'a>(rd: &mut BerReader<'a>, depth: usize) -> Result<Vec<Filter<'a>>> {
    let mut filters = Vec::new();
    while !rd.is_empty() {
        filters.push(parse_filter_at_depth(rd, depth + 1)?);
    }
    if filters.is_empty() {
        return Err(LdapError::InvalidFilterType);
    }
    Ok(filters)
}

// SubstringFilter ::= SEQUENCE {
//      type           AttributeDescription,
//      substrings     SEQUENCE SIZE (1..MAX) OF substring CHOICE {
//           initial [0] AssertionValue,  -- can occur at most once
//           any     [1] AssertionValue,
//           final   [2] AssertionValue } -- can occur at most once
//      }
fn parse_substrings_filter_content<'a>(rd: &mut BerReader<'a>) -> Result<SubstringFilter<'a>> {
    let filter_type = parse_ldap_attribute_description(rd)?;
    let mut inner = rd.read_sequence_contents()?;
    let mut substrings = Vec::new();
    while !inner.is_empty() {
        let sub = parse_substring(&mut inner)?;
        match &sub {
            Substring::Initial(_) if !substrings.is_empty() => {
                return Err(LdapError::InvalidSubstring)
            }
            Substring::Any(_) | Substring::Initial(_) => {}
            Substring::Final(_) if !inner.is_empty() => return Err(LdapError::InvalidSubstring),
            Substring::Final(_) => {}
        }
        substrings.push(sub);
    }
    if substrings.is_empty() {
        return Err(LdapError::InvalidSubstring);
    }
    Ok(SubstringFilter {
        filter_type,
        substrings,
    })
}

fn parse_substring<'a>(rd: &mut BerReader<'a>) -> Result<Substring<'a>> {
    let (tag, mut inner) = rd.read_any_contents()?;
    if tag.class != BerClass::ContextSpecific {
        return Err(LdapError::InvalidSubstring);
    }
    // in any case, this is an AssertionValue (== OCTET STRING)
    let value = AssertionValue(Cow::Borrowed(inner.take_all()));
    match tag.number {
        0 => Ok(Substring::Initial(value)),
        1 => Ok(Substring::Any(value)),
        2 => Ok(Substring::Final(value)),
        _ => Err(LdapError::InvalidSubstring),
    }
}

// MatchingRuleAssertion ::= SEQUENCE {
//     matchingRule    [1] MatchingRuleId OPTIONAL,
//     type            [2] AttributeDescription OPTIONAL,
//     matchValue      [3] AssertionValue,
//     dnAttributes    [4] BOOLEAN DEFAULT FALSE }
fn parse_matching_rule_assertion_content<'a>(
    rd: &mut BerReader<'a>,
) -> Result<MatchingRuleAssertion<'a>> {
    // MatchingRuleId ::= LDAPString
    let matching_rule = match rd.peek_tag() {
        Ok(t) if t.is_context(1) => {
            let (_, mut inner) = rd.read_context_contents(1)?;
            let s = std::str::from_utf8(inner.take_all())
                .or(Err(LdapError::InvalidString))?;
            Some(crate::ldap::LdapString(Cow::Borrowed(s)))
        }
        _ => None,
    };
    let rule_type = match rd.peek_tag() {
        Ok(t) if t.is_context(2) => {
            let (_, mut inner) = rd.read_context_contents(2)?;
            let s = std::str::from_utf8(inner.take_all())
                .or(Err(LdapError::InvalidString))?;
            Some(AttributeDescription(Cow::Borrowed(s)))
        }
        _ => None,
    };
    let (_, mut inner) = rd.read_context_contents(3)?;
    let assertion_value = AssertionValue(Cow::Borrowed(inner.take_all()));
    let dn_attributes = match rd.peek_tag() {
        Ok(t) if t.is_context(4) => {
            let (_, mut inner) = rd.read_context_contents(4)?;
            let content = inner.take_all();
            if content.len() != 1 {
                return Err(LdapError::InvalidFilterType);
            }
            Some(content[0] != 0)
        }
        _ => None,
    };
    Ok(MatchingRuleAssertion {
        matching_rule,
        rule_type,
        assertion_value,
        dn_attributes,
    })
}
