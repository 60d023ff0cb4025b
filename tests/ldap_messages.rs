//! Wire-level scenarios exercised through the public API only

use hex_literal::hex;
use ldapd::ber::{universal, BerError, BerTag};
use ldapd::filter::{Filter, Substring};
use ldapd::ldap::*;
use ldapd::{message_to_bytes, parse_message, BerReader, LdapError};
use std::borrow::Cow;

#[test]
fn test_malformed_empty() {
    assert_eq!(parse_message(&[]), Err(LdapError::EmptyMessage));
}

#[test]
fn test_search_request_round_trip() {
    // base dc=example,dc=com, wholeSubtree, never deref, no limits,
    // (objectClass=*), attributes cn + mail
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
            attributes: vec![
                LdapString(Cow::Borrowed("cn")),
                LdapString(Cow::Borrowed("mail")),
            ],
        }),
    );
    let bytes = message_to_bytes(&msg);

    // the envelope keeps the operation raw
    let raw = parse_message(&bytes).expect("envelope parse failed");
    assert_eq!(raw.message_id, MessageID(4));
    assert_eq!(raw.op.tag, ProtocolOpTag::SearchRequest);
    assert!(raw.controls.is_none());

    // the deferred parse reproduces every field
    match raw.parse_operation().expect("operation parse failed") {
        ProtocolOp::SearchRequest(req) => {
            assert_eq!(&req.base_object.0, "dc=example,dc=com");
            assert_eq!(req.scope, SearchScope::WholeSubtree);
            assert_eq!(req.deref_aliases, DerefAliases::NeverDerefAliases);
            assert_eq!(req.size_limit, 0);
            assert_eq!(req.time_limit, 0);
            assert!(!req.types_only);
            assert_eq!(
                req.filter,
                Filter::Present(LdapString(Cow::Borrowed("objectClass")))
            );
            assert_eq!(req.attributes.len(), 2);
        }
        op => panic!("unexpected operation {:?}", op.tag()),
    }
}

#[test]
fn test_anonymous_bind_round_trip() {
    let request = LdapMessage::new(
        MessageID(1),
        ProtocolOp::BindRequest(BindRequest {
            version: 3,
            name: LdapDN(Cow::Borrowed("")),
            authentication: AuthenticationChoice::Simple(Cow::Borrowed(b"")),
        }),
    );
    let request_bytes = message_to_bytes(&request);
    let parsed = LdapMessage::parse(&request_bytes).unwrap();
    match &parsed.protocol_op {
        ProtocolOp::BindRequest(req) => assert!(req.is_anonymous()),
        op => panic!("unexpected operation {:?}", op.tag()),
    }

    let response = LdapMessage::new(
        MessageID(1),
        ProtocolOp::BindResponse(BindResponse {
            result: LdapResult::new(ResultCode::Success),
            server_sasl_creds: None,
        }),
    );
    let response_bytes = message_to_bytes(&response);
    let parsed = LdapMessage::parse(&response_bytes).unwrap();
    let result = parsed.protocol_op.result().unwrap();
    assert_eq!(result.result_code, ResultCode::Success);
    assert_eq!(&result.matched_dn.0, "");
    assert_eq!(&result.diagnostic_message.0, "");
}

#[test]
fn test_tag_mismatch_on_integer() {
    let mut rd = BerReader::new(&hex!("010100"));
    let err = rd.read_integer().unwrap_err();
    assert_eq!(
        err,
        BerError::TagMismatch {
            expected: BerTag::universal(universal::INTEGER),
            actual: BerTag::universal(universal::BOOLEAN),
            offset: 0,
        }
    );
}

#[test]
fn test_truncated_sequence() {
    let mut rd = BerReader::new(&hex!("3010"));
    assert_eq!(
        rd.expect_sequence(),
        Err(BerError::UnexpectedEof { offset: 0 })
    );
}

#[test]
fn test_substring_filter_message() {
    // (cn=Jo*hn*Doe) inside a search request
    let data = hex!(
        "303e 020102
         6339
           0411 6f753d70656f706c652c64633d74657374
           0a0102
           0a0100
           020100
           020100
           010100
           a413
             0402 636e
             300d 8002 4a6f 8102 686e 8203 446f65
           3000"
    );
    let msg = LdapMessage::parse(&data).expect("parsing failed");
    match msg.protocol_op {
        ProtocolOp::SearchRequest(req) => match req.filter {
            Filter::Substrings(sub) => {
                assert_eq!(&sub.filter_type.0, "cn");
                assert_eq!(sub.substrings.len(), 3);
                assert!(matches!(&sub.substrings[0], Substring::Initial(v) if &*v.0 == b"Jo"));
                assert!(matches!(&sub.substrings[1], Substring::Any(v) if &*v.0 == b"hn"));
                assert!(matches!(&sub.substrings[2], Substring::Final(v) if &*v.0 == b"Doe"));
            }
            filter => panic!("unexpected filter {:?}", filter),
        },
        op => panic!("unexpected operation {:?}", op.tag()),
    }
}

#[test]
fn test_boolean_wire_forms() {
    // the encoder writes 0xFF for true, the decoder takes any non-zero
    let msg = LdapMessage::new(
        MessageID(2),
        ProtocolOp::ModDnRequest(ModDnRequest {
            entry: LdapDN(Cow::Borrowed("cn=a,dc=test")),
            newrdn: RelativeLdapDN(Cow::Borrowed("cn=b")),
            deleteoldrdn: true,
            newsuperior: None,
        }),
    );
    let bytes = message_to_bytes(&msg);
    assert!(bytes.windows(3).any(|w| w == [0x01, 0x01, 0xff]));

    let mut relaxed = bytes.clone();
    let at = relaxed.len() - 1;
    relaxed[at] = 0x01;
    match LdapMessage::parse(&relaxed).unwrap().protocol_op {
        ProtocolOp::ModDnRequest(req) => assert!(req.deleteoldrdn),
        op => panic!("unexpected operation {:?}", op.tag()),
    }
}

#[test]
fn test_length_boundaries_on_the_wire() {
    // a diagnostic message long enough for long-form lengths
    let msg = LdapMessage::new(
        MessageID(5),
        ProtocolOp::DelResponse(LdapResult::with_message(
            ResultCode::Other,
            "x".repeat(200),
        )),
    );
    let bytes = message_to_bytes(&msg);
    // outer sequence must use the two-byte long form 0x81 len
    assert_eq!(bytes[0], 0x30);
    assert_eq!(bytes[1], 0x81);
    let parsed = LdapMessage::parse(&bytes).unwrap();
    assert_eq!(
        parsed.protocol_op.result().unwrap().diagnostic_message.0.len(),
        200
    );
}

#[test]
fn test_indefinite_length_rejected() {
    let data = hex!("3080 020101 4200 0000");
    match parse_message(&data) {
        Err(LdapError::Ber(BerError::IndefiniteLength { offset })) => assert_eq!(offset, 1),
        other => panic!("unexpected result {:?}", other),
    }
}
