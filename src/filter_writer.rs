//! Filter encoding
//!
//! The substrings value keeps its components as context-tagged primitives
//! inside a universal SEQUENCE; the parser accepts both this form and a
//! constructed wrapper, but this is the only form emitted.

use crate::ber_writer::BerWriter;
use crate::filter::*;

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
pub fn write_filter(w: &mut BerWriter, filter: &Filter<'_>) {
    match filter {
        Filter::And(children) | Filter::Or(children) => {
            let pos = w.begin_context_tag(filter.tag_number(), true);
            for child in children {
                write_filter(w, child);
            }
            w.end_tag(pos);
        }
        Filter::Not(child) => {
            let pos = w.begin_context_tag(2, true);
            write_filter(w, child);
            w.end_tag(pos);
        }
        Filter::EqualityMatch(ava)
        | Filter::GreaterOrEqual(ava)
        | Filter::LessOrEqual(ava)
        | Filter::ApproxMatch(ava) => {
            write_attribute_value_assertion(w, filter.tag_number(), ava);
        }
        Filter::Substrings(sub) => write_substrings_filter(w, sub),
        Filter::Present(attr) => {
            // the attribute description is the filter data itself
            w.write_context_value(7, false, attr.0.as_bytes());
        }
        Filter::ExtensibleMatch(assertion) => write_matching_rule_assertion(w, assertion),
    }
}

// AttributeValueAssertion ::= SEQUENCE {
//      attributeDesc   AttributeDescription,
//      assertionValue  AssertionValue }
fn write_attribute_value_assertion(
    w: &mut BerWriter,
    tag_number: u32,
    ava: &AttributeValueAssertion<'_>,
) {
    let pos = w.begin_context_tag(tag_number, true);
    w.write_octet_string(ava.attribute_desc.0.as_bytes());
    w.write_octet_string(&ava.assertion_value);
    w.end_tag(pos);
}

// SubstringFilter ::= SEQUENCE {
//      type           AttributeDescription,
//      substrings     SEQUENCE SIZE (1..MAX) OF substring CHOICE { ... } }
fn write_substrings_filter(w: &mut BerWriter, sub: &SubstringFilter<'_>) {
    let pos = w.begin_context_tag(4, true);
    w.write_octet_string(sub.filter_type.0.as_bytes());
    let seq = w.begin_sequence();
    for component in &sub.substrings {
        let (number, value) = match component {
            Substring::Initial(v) => (0, v),
            Substring::Any(v) => (1, v),
            Substring::Final(v) => (2, v),
        };
        w.write_context_value(number, false, &value.0);
    }
    w.end_sequence(seq);
    w.end_tag(pos);
}

// MatchingRuleAssertion ::= SEQUENCE {
//     matchingRule    [1] MatchingRuleId OPTIONAL,
//     type            [2] AttributeDescription OPTIONAL,
//     matchValue      [3] AssertionValue,
//     dnAttributes    [4] BOOLEAN DEFAULT FALSE }
fn write_matching_rule_assertion(w: &mut BerWriter, assertion: &MatchingRuleAssertion<'_>) {
    let pos = w.begin_context_tag(9, true);
    if let Some(rule) = &assertion.matching_rule {
        w.write_context_value(1, false, rule.0.as_bytes());
    }
    if let Some(rule_type) = &assertion.rule_type {
        w.write_context_value(2, false, rule_type.0.as_bytes());
    }
    w.write_context_value(3, false, &assertion.assertion_value.0);
    if let Some(dn_attributes) = assertion.dn_attributes {
        w.write_context_value(4, false, &[if dn_attributes { 0xff } else { 0x00 }]);
    }
    w.end_tag(pos);
}
