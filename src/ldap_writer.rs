//! LDAP PDU encoding
//!
//! Mirrors the parsers in [`crate::ldap_parser`]. Unbind, Abandon and Del
//! are primitive application tags; everything else is constructed. The
//! encoder is infallible, see [`crate::ber_writer`].

use crate::ber::BerTag;
use crate::ber_writer::{minimal_int_bytes, BerWriter};
use crate::filter::PartialAttribute;
use crate::filter_writer::write_filter;
use crate::ldap::*;

/// Encode a whole LDAPMessage into a fresh buffer
pub fn message_to_bytes(msg: &LdapMessage<'_>) -> Vec<u8> {
    let mut w = BerWriter::new();
    write_message(&mut w, msg);
    w.into_bytes()
}

// LDAPMessage ::= SEQUENCE {
//      messageID       MessageID,
//      protocolOp      CHOICE { ... },
//      controls       [0] Controls OPTIONAL }
pub fn write_message(w: &mut BerWriter, msg: &LdapMessage<'_>) {
    let seq = w.begin_sequence();
    w.write_integer(msg.message_id.0 as i64);
    write_protocol_op(w, &msg.protocol_op);
    if let Some(controls) = &msg.controls {
        write_controls(w, controls);
    }
    w.end_sequence(seq);
}

fn write_protocol_op(w: &mut BerWriter, op: &ProtocolOp<'_>) {
    let tag = op.tag().0;
    match op {
        ProtocolOp::BindRequest(req) => {
            let pos = w.begin_application_tag(tag, true);
            write_bind_request(w, req);
            w.end_tag(pos);
        }
        ProtocolOp::BindResponse(resp) => {
            let pos = w.begin_application_tag(tag, true);
            write_ldap_result_content(w, &resp.result);
            if let Some(creds) = &resp.server_sasl_creds {
                w.write_context_value(7, false, creds);
            }
            w.end_tag(pos);
        }
        // UnbindRequest ::= [APPLICATION 2] NULL, primitive with no content
        ProtocolOp::UnbindRequest => {
            w.write_tagged_value(BerTag::application(false, tag), &[]);
        }
        ProtocolOp::SearchRequest(req) => {
            let pos = w.begin_application_tag(tag, true);
            write_search_request(w, req);
            w.end_tag(pos);
        }
        ProtocolOp::SearchResultEntry(entry) => {
            let pos = w.begin_application_tag(tag, true);
            write_search_result_entry(w, entry);
            w.end_tag(pos);
        }
        ProtocolOp::SearchResultReference(uris) => {
            let pos = w.begin_application_tag(tag, true);
            for uri in uris {
                w.write_octet_string(uri.0.as_bytes());
            }
            w.end_tag(pos);
        }
        ProtocolOp::ModifyRequest(req) => {
            let pos = w.begin_application_tag(tag, true);
            write_modify_request(w, req);
            w.end_tag(pos);
        }
        ProtocolOp::AddRequest(req) => {
            let pos = w.begin_application_tag(tag, true);
            write_add_request(w, req);
            w.end_tag(pos);
        }
        // DelRequest ::= [APPLICATION 10] LDAPDN, the content is the raw
        // DN octets without any inner structure
        ProtocolOp::DelRequest(dn) => {
            w.write_tagged_value(BerTag::application(false, tag), dn.0.as_bytes());
        }
        ProtocolOp::ModDnRequest(req) => {
            let pos = w.begin_application_tag(tag, true);
            write_moddn_request(w, req);
            w.end_tag(pos);
        }
        ProtocolOp::CompareRequest(req) => {
            let pos = w.begin_application_tag(tag, true);
            w.write_octet_string(req.entry.0.as_bytes());
            let ava = w.begin_sequence();
            w.write_octet_string(req.ava.attribute_desc.0.as_bytes());
            w.write_octet_string(&req.ava.assertion_value);
            w.end_sequence(ava);
            w.end_tag(pos);
        }
        // AbandonRequest ::= [APPLICATION 16] MessageID, the content is the
        // raw big-endian messageID bytes without an inner INTEGER header
        ProtocolOp::AbandonRequest(id) => {
            w.write_tagged_value(
                BerTag::application(false, tag),
                &minimal_int_bytes(id.0 as i64),
            );
        }
        ProtocolOp::ExtendedRequest(req) => {
            let pos = w.begin_application_tag(tag, true);
            w.write_context_value(0, false, req.request_name.0.as_bytes());
            if let Some(value) = &req.request_value {
                w.write_context_value(1, false, value);
            }
            w.end_tag(pos);
        }
        ProtocolOp::ExtendedResponse(resp) => {
            let pos = w.begin_application_tag(tag, true);
            write_ldap_result_content(w, &resp.result);
            if let Some(name) = &resp.response_name {
                w.write_context_value(10, false, name.0.as_bytes());
            }
            if let Some(value) = &resp.response_value {
                w.write_context_value(11, false, value);
            }
            w.end_tag(pos);
        }
        ProtocolOp::IntermediateResponse(resp) => {
            let pos = w.begin_application_tag(tag, true);
            if let Some(name) = &resp.response_name {
                w.write_context_value(0, false, name.0.as_bytes());
            }
            if let Some(value) = &resp.response_value {
                w.write_context_value(1, false, value);
            }
            w.end_tag(pos);
        }
        ProtocolOp::SearchResultDone(result)
        | ProtocolOp::ModifyResponse(ModifyResponse { result })
        | ProtocolOp::AddResponse(result)
        | ProtocolOp::DelResponse(result)
        | ProtocolOp::ModDnResponse(result)
        | ProtocolOp::CompareResponse(result) => {
            let pos = w.begin_application_tag(tag, true);
            write_ldap_result_content(w, result);
            w.end_tag(pos);
        }
    }
}

// LDAPResult ::= SEQUENCE {
//      resultCode         ENUMERATED,
//      matchedDN          LDAPDN,
//      diagnosticMessage  LDAPString,
//      referral           [3] Referral OPTIONAL }
fn write_ldap_result_content(w: &mut BerWriter, result: &LdapResult<'_>) {
    w.write_enumerated(result.result_code.0 as i64);
    w.write_octet_string(result.matched_dn.0.as_bytes());
    w.write_octet_string(result.diagnostic_message.0.as_bytes());
    if let Some(referral) = &result.referral {
        let pos = w.begin_context_tag(3, true);
        for uri in referral {
            w.write_octet_string(uri.0.as_bytes());
        }
        w.end_tag(pos);
    }
}

// BindRequest ::= [APPLICATION 0] SEQUENCE {
//      version                 INTEGER (1 ..  127),
//      name                    LDAPDN,
//      authentication          AuthenticationChoice }
fn write_bind_request(w: &mut BerWriter, req: &BindRequest<'_>) {
    w.write_integer(req.version as i64);
    w.write_octet_string(req.name.0.as_bytes());
    match &req.authentication {
        AuthenticationChoice::Simple(password) => {
            w.write_context_value(0, false, password);
        }
        AuthenticationChoice::Sasl(creds) => {
            let pos = w.begin_context_tag(3, true);
            w.write_octet_string(creds.mechanism.0.as_bytes());
            if let Some(credentials) = &creds.credentials {
                w.write_octet_string(credentials);
            }
            w.end_tag(pos);
        }
    }
}

// SearchRequest ::= [APPLICATION 3] SEQUENCE { ... }
fn write_search_request(w: &mut BerWriter, req: &SearchRequest<'_>) {
    w.write_octet_string(req.base_object.0.as_bytes());
    w.write_enumerated(req.scope.0 as i64);
    w.write_enumerated(req.deref_aliases.0 as i64);
    w.write_integer(req.size_limit as i64);
    w.write_integer(req.time_limit as i64);
    w.write_boolean(req.types_only);
    write_filter(w, &req.filter);
    let attrs = w.begin_sequence();
    for attr in &req.attributes {
        w.write_octet_string(attr.0.as_bytes());
    }
    w.end_sequence(attrs);
}

// SearchResultEntry ::= [APPLICATION 4] SEQUENCE {
//     objectName      LDAPDN,
//     attributes      PartialAttributeList }
fn write_search_result_entry(w: &mut BerWriter, entry: &SearchResultEntry<'_>) {
    w.write_octet_string(entry.object_name.0.as_bytes());
    let list = w.begin_sequence();
    for attribute in &entry.attributes {
        write_partial_attribute(w, attribute);
    }
    w.end_sequence(list);
}

// PartialAttribute ::= SEQUENCE {
//      type       AttributeDescription,
//      vals       SET OF value AttributeValue }
fn write_partial_attribute(w: &mut BerWriter, attribute: &PartialAttribute<'_>) {
    let seq = w.begin_sequence();
    w.write_octet_string(attribute.attr_type.0.as_bytes());
    let vals = w.begin_set();
    for value in &attribute.attr_vals {
        w.write_octet_string(&value.0);
    }
    w.end_set(vals);
    w.end_sequence(seq);
}

// ModifyRequest ::= [APPLICATION 6] SEQUENCE {
//     object          LDAPDN,
//     changes         SEQUENCE OF change SEQUENCE { ... } }
fn write_modify_request(w: &mut BerWriter, req: &ModifyRequest<'_>) {
    w.write_octet_string(req.object.0.as_bytes());
    let changes = w.begin_sequence();
    for change in &req.changes {
        let seq = w.begin_sequence();
        w.write_enumerated(change.operation.0 as i64);
        write_partial_attribute(w, &change.modification);
        w.end_sequence(seq);
    }
    w.end_sequence(changes);
}

// AddRequest ::= [APPLICATION 8] SEQUENCE {
//     entry           LDAPDN,
//     attributes      AttributeList }
fn write_add_request(w: &mut BerWriter, req: &AddRequest<'_>) {
    w.write_octet_string(req.entry.0.as_bytes());
    let list = w.begin_sequence();
    for attribute in &req.attributes {
        let seq = w.begin_sequence();
        w.write_octet_string(attribute.attr_type.0.as_bytes());
        let vals = w.begin_set();
        for value in &attribute.attr_vals {
            w.write_octet_string(&value.0);
        }
        w.end_set(vals);
        w.end_sequence(seq);
    }
    w.end_sequence(list);
}

// ModifyDNRequest ::= [APPLICATION 12] SEQUENCE {
//     entry           LDAPDN,
//     newrdn          RelativeLDAPDN,
//     deleteoldrdn    BOOLEAN,
//     newSuperior     [0] LDAPDN OPTIONAL }
fn write_moddn_request(w: &mut BerWriter, req: &ModDnRequest<'_>) {
    w.write_octet_string(req.entry.0.as_bytes());
    w.write_octet_string(req.newrdn.0.as_bytes());
    w.write_boolean(req.deleteoldrdn);
    if let Some(superior) = &req.newsuperior {
        // primitive, content is the new parent DN octets
        w.write_context_value(0, false, superior.0.as_bytes());
    }
}

// Control ::= SEQUENCE {
//     controlType             LDAPOID,
//     criticality             BOOLEAN DEFAULT FALSE,
//     controlValue            OCTET STRING OPTIONAL }
fn write_controls(w: &mut BerWriter, controls: &[Control<'_>]) {
    let pos = w.begin_context_tag(0, true);
    for control in controls {
        let seq = w.begin_sequence();
        w.write_octet_string(control.control_type.0.as_bytes());
        if control.criticality {
            w.write_boolean(true);
        }
        if let Some(value) = &control.control_value {
            w.write_octet_string(value);
        }
        w.end_sequence(seq);
    }
    w.end_tag(pos);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AssertionValue, Attribute, AttributeValue, Filter, SubstringFilter, Substring};
    use std::borrow::Cow;

    fn round_trip(msg: &LdapMessage<'_>) {
        let bytes = message_to_bytes(msg);
        let parsed = LdapMessage::parse(&bytes).expect("round trip parse failed");
        assert_eq!(&parsed, msg);
    }

    #[test]
    fn test_round_trip_search_request() {
        // ldapsearch -b dc=example,dc=com -s sub '(objectClass=*)' cn mail
        round_trip(&LdapMessage::new(
            MessageID(4),
            ProtocolOp::SearchRequest(SearchRequest {
                base_object: LdapDN(Cow::Borrowed("dc=example,dc=com")),
                scope: SearchScope::WholeSubtree,
                deref_aliases: DerefAliases::NeverDerefAliases,
                size_limit: 0,
                time_limit: 0,
                types_only: false,
                filter: Filter::Present(LdapString(Cow::Borrowed("objectClass"))),
                attributes: vec![
                    LdapString(Cow::Borrowed("cn")),
                    LdapString(Cow::Borrowed("mail")),
                ],
            }),
        ));
    }

    #[test]
    fn test_search_request_wire_fields_survive() {
        let msg = LdapMessage::new(
            MessageID(4),
            ProtocolOp::SearchRequest(SearchRequest {
                base_object: LdapDN(Cow::Borrowed("dc=example,dc=com")),
                scope: SearchScope::WholeSubtree,
                deref_aliases: DerefAliases::NeverDerefAliases,
                size_limit: 0,
                time_limit: 0,
                types_only: false,
                filter: Filter::Present(LdapString(Cow::Borrowed("objectClass"))),
                attributes: vec![LdapString(Cow::Borrowed("cn"))],
            }),
        );
        let bytes = message_to_bytes(&msg);
        let raw = crate::ldap_parser::parse_message(&bytes).unwrap();
        assert_eq!(raw.message_id, MessageID(4));
        assert_eq!(raw.op.tag, ProtocolOpTag::SearchRequest);
        match raw.parse_operation().unwrap() {
            ProtocolOp::SearchRequest(req) => {
                assert_eq!(&req.base_object.0, "dc=example,dc=com");
                assert_eq!(req.scope, SearchScope::WholeSubtree);
                assert_eq!(req.deref_aliases, DerefAliases::NeverDerefAliases);
                assert!(!req.types_only);
            }
            op => panic!("unexpected op {:?}", op),
        }
    }

    #[test]
    fn test_round_trip_anonymous_bind() {
        round_trip(&LdapMessage::new(
            MessageID(1),
            ProtocolOp::BindRequest(BindRequest {
                version: 3,
                name: LdapDN(Cow::Borrowed("")),
                authentication: AuthenticationChoice::Simple(Cow::Borrowed(b"")),
            }),
        ));
        round_trip(&LdapMessage::new(
            MessageID(1),
            ProtocolOp::BindResponse(BindResponse {
                result: LdapResult::new(ResultCode::Success),
                server_sasl_creds: None,
            }),
        ));
    }

    #[test]
    fn test_round_trip_substring_search() {
        // (cn=Jo*hn*Doe)
        round_trip(&LdapMessage::new(
            MessageID(9),
            ProtocolOp::SearchRequest(SearchRequest {
                base_object: LdapDN(Cow::Borrowed("ou=people,dc=example,dc=com")),
                scope: SearchScope::SingleLevel,
                deref_aliases: DerefAliases::DerefAlways,
                size_limit: 100,
                time_limit: 30,
                types_only: true,
                filter: Filter::Substrings(SubstringFilter {
                    filter_type: LdapString(Cow::Borrowed("cn")),
                    substrings: vec![
                        Substring::Initial(AssertionValue(Cow::Borrowed(b"Jo"))),
                        Substring::Any(AssertionValue(Cow::Borrowed(b"hn"))),
                        Substring::Final(AssertionValue(Cow::Borrowed(b"Doe"))),
                    ],
                }),
                attributes: vec![],
            }),
        ));
    }

    #[test]
    fn test_round_trip_search_result_entry() {
        round_trip(&LdapMessage::new(
            MessageID(2),
            ProtocolOp::SearchResultEntry(SearchResultEntry {
                object_name: LdapDN(Cow::Borrowed("cn=bob,dc=example,dc=com")),
                attributes: vec![PartialAttribute {
                    attr_type: LdapString(Cow::Borrowed("objectClass")),
                    attr_vals: vec![
                        AttributeValue(Cow::Borrowed(b"top")),
                        AttributeValue(Cow::Borrowed(b"person")),
                    ],
                }],
            }),
        ));
    }

    #[test]
    fn test_round_trip_modify_request() {
        round_trip(&LdapMessage::new(
            MessageID(5),
            ProtocolOp::ModifyRequest(ModifyRequest {
                object: LdapDN(Cow::Borrowed("cn=bob,dc=example,dc=com")),
                changes: vec![Change {
                    operation: Operation::Replace,
                    modification: PartialAttribute {
                        attr_type: LdapString(Cow::Borrowed("mail")),
                        attr_vals: vec![AttributeValue(Cow::Borrowed(b"bob@example.com"))],
                    },
                }],
            }),
        ));
    }

    #[test]
    fn test_round_trip_add_and_moddn() {
        round_trip(&LdapMessage::new(
            MessageID(6),
            ProtocolOp::AddRequest(AddRequest {
                entry: LdapDN(Cow::Borrowed("cn=new,dc=example,dc=com")),
                attributes: vec![Attribute {
                    attr_type: LdapString(Cow::Borrowed("cn")),
                    attr_vals: vec![AttributeValue(Cow::Borrowed(b"new"))],
                }],
            }),
        ));
        round_trip(&LdapMessage::new(
            MessageID(7),
            ProtocolOp::ModDnRequest(ModDnRequest {
                entry: LdapDN(Cow::Borrowed("cn=new,dc=example,dc=com")),
                newrdn: RelativeLdapDN(Cow::Borrowed("cn=newer")),
                deleteoldrdn: true,
                newsuperior: Some(LdapDN(Cow::Borrowed("ou=people,dc=example,dc=com"))),
            }),
        ));
    }

    #[test]
    fn test_primitive_operations_on_the_wire() {
        // Unbind (0x42), Del (0x4a) and Abandon (0x50) must not carry the
        // constructed bit
        let bytes = message_to_bytes(&LdapMessage::new(
            MessageID(3),
            ProtocolOp::UnbindRequest,
        ));
        assert_eq!(&bytes[5..], [0x42, 0x00]);

        let bytes = message_to_bytes(&LdapMessage::new(
            MessageID(3),
            ProtocolOp::DelRequest(LdapDN(Cow::Borrowed("dc=example"))),
        ));
        assert_eq!(bytes[5], 0x4a);
        assert_eq!(&bytes[7..], &b"dc=example"[..]);

        let bytes = message_to_bytes(&LdapMessage::new(
            MessageID(3),
            ProtocolOp::AbandonRequest(MessageID(300)),
        ));
        assert_eq!(&bytes[5..], [0x50, 0x02, 0x01, 0x2c]);
    }

    #[test]
    fn test_round_trip_del_and_abandon() {
        round_trip(&LdapMessage::new(
            MessageID(3),
            ProtocolOp::DelRequest(LdapDN(Cow::Borrowed("cn=bob,dc=example,dc=com"))),
        ));
        round_trip(&LdapMessage::new(
            MessageID(8),
            ProtocolOp::AbandonRequest(MessageID(5)),
        ));
    }

    #[test]
    fn test_round_trip_compare_and_extended() {
        round_trip(&LdapMessage::new(
            MessageID(11),
            ProtocolOp::CompareRequest(CompareRequest {
                entry: LdapDN(Cow::Borrowed("cn=bob,dc=example,dc=com")),
                ava: crate::filter::AttributeValueAssertion {
                    attribute_desc: LdapString(Cow::Borrowed("mail")),
                    assertion_value: Cow::Borrowed(b"bob@example.com"),
                },
            }),
        ));
        round_trip(&LdapMessage::new(
            MessageID(12),
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                request_name: LdapOID(Cow::Borrowed("1.3.6.1.4.1.4203.1.11.3")),
                request_value: None,
            }),
        ));
        round_trip(&LdapMessage::new(
            MessageID(12),
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: LdapResult::new(ResultCode::Success),
                response_name: Some(LdapOID(Cow::Borrowed("1.3.6.1.4.1.4203.1.11.3"))),
                response_value: Some(Cow::Borrowed(b"dn:cn=admin")),
            }),
        ));
    }

    #[test]
    fn test_round_trip_result_with_referral() {
        round_trip(&LdapMessage::new(
            MessageID(13),
            ProtocolOp::SearchResultDone(LdapResult {
                result_code: ResultCode::Referral,
                matched_dn: LdapDN(Cow::Borrowed("")),
                diagnostic_message: LdapString(Cow::Borrowed("")),
                referral: Some(vec![LdapString(Cow::Borrowed(
                    "ldap://other.example.com/dc=example,dc=com",
                ))]),
            }),
        ));
    }

    #[test]
    fn test_round_trip_with_controls() {
        let mut msg = LdapMessage::new(
            MessageID(14),
            ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::Success)),
        );
        msg.controls = Some(vec![Control {
            control_type: LdapOID(Cow::Borrowed("1.2.840.113556.1.4.319")),
            criticality: true,
            control_value: Some(Cow::Borrowed(&[0x30, 0x05, 0x02, 0x01, 0x0a, 0x04, 0x00][..])),
        }]);
        // controls with a value round-trip including the value bytes
        let bytes = message_to_bytes(&msg);
        let parsed = LdapMessage::parse(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_round_trip_sasl_bind() {
        round_trip(&LdapMessage::new(
            MessageID(15),
            ProtocolOp::BindRequest(BindRequest {
                version: 3,
                name: LdapDN(Cow::Borrowed("")),
                authentication: AuthenticationChoice::Sasl(SaslCredentials {
                    mechanism: LdapString(Cow::Borrowed("EXTERNAL")),
                    credentials: None,
                }),
            }),
        ));
        round_trip(&LdapMessage::new(
            MessageID(15),
            ProtocolOp::BindResponse(BindResponse {
                result: LdapResult::new(ResultCode::SaslBindInProgress),
                server_sasl_creds: Some(Cow::Borrowed(b"challenge")),
            }),
        ));
    }

    #[test]
    fn test_round_trip_intermediate_and_reference() {
        round_trip(&LdapMessage::new(
            MessageID(16),
            ProtocolOp::IntermediateResponse(IntermediateResponse {
                response_name: Some(LdapOID(Cow::Borrowed("1.3.6.1.4.1.4203.1.9.1.4"))),
                response_value: None,
            }),
        ));
        round_trip(&LdapMessage::new(
            MessageID(17),
            ProtocolOp::SearchResultReference(vec![LdapString(Cow::Borrowed(
                "ldap://other.example.com/dc=example,dc=com??sub",
            ))]),
        ));
    }
}
