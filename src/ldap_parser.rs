// DEFINITIONS
// IMPLICIT TAGS
// EXTENSIBILITY IMPLIED

use crate::ber::{BerClass, BerError};
use crate::ber_reader::BerReader;
use crate::error::*;
use crate::filter_parser::{parse_attribute, parse_filter, parse_partial_attribute};
use crate::ldap::*;
use std::borrow::Cow;

// // maxInt INTEGER ::= 2147483647 -- (2^^31 - 1) --
// handled through MessageID::MAX

// LDAPString ::= OCTET STRING -- UTF-8 encoded,
//                             -- [ISO10646] characters
pub(crate) fn parse_ldap_string<'a>(rd: &mut BerReader<'a>) -> Result<LdapString<'a>> {
    let b = rd.read_octet_string()?;
    let s = std::str::from_utf8(b).or(Err(LdapError::InvalidString))?;
    Ok(LdapString(Cow::Borrowed(s)))
}

// AttributeDescription ::= LDAPString
//                         -- Constrained to <attributedescription>
//                         -- [RFC4512]
#[inline]
pub(crate) fn parse_ldap_attribute_description<'a>(
    rd: &mut BerReader<'a>,
) -> Result<LdapString<'a>> {
    parse_ldap_string(rd)
}

// LDAPDN ::= LDAPString -- Constrained to <distinguishedName>
//                       -- [RFC4514]
fn parse_ldap_dn<'a>(rd: &mut BerReader<'a>) -> Result<LdapDN<'a>> {
    let b = rd.read_octet_string()?;
    let s = std::str::from_utf8(b).or(Err(LdapError::InvalidDN))?;
    Ok(LdapDN(Cow::Borrowed(s)))
}

fn dn_from_slice(b: &[u8]) -> Result<LdapDN<'_>> {
    let s = std::str::from_utf8(b).or(Err(LdapError::InvalidDN))?;
    Ok(LdapDN(Cow::Borrowed(s)))
}

// RelativeLDAPDN ::= LDAPString -- Constrained to <name-component>
//                               -- [RFC4514]
fn parse_relative_ldap_dn<'a>(rd: &mut BerReader<'a>) -> Result<RelativeLdapDN<'a>> {
    let b = rd.read_octet_string()?;
    let s = std::str::from_utf8(b).or(Err(LdapError::InvalidDN))?;
    Ok(RelativeLdapDN(Cow::Borrowed(s)))
}

fn oid_from_slice(b: &[u8]) -> Result<LdapOID<'_>> {
    let s = std::str::from_utf8(b).or(Err(LdapError::InvalidDN))?;
    Ok(LdapOID(Cow::Borrowed(s)))
}

// MessageID ::= INTEGER (0 ..  maxInt)
fn parse_message_id(rd: &mut BerReader<'_>) -> Result<MessageID> {
    let v = rd.read_integer()?;
    if !(0..=MessageID::MAX as i64).contains(&v) {
        return Err(LdapError::InvalidMessageId);
    }
    Ok(MessageID(v as u32))
}

// INTEGER (0 ..  maxInt), e.g. sizeLimit and timeLimit
fn parse_ldap_int_as_u32(rd: &mut BerReader<'_>) -> Result<u32> {
    let at = rd.offset();
    let v = rd.read_integer()?;
    u32::try_from(v).or(Err(LdapError::Ber(BerError::InvalidLength { offset: at })))
}

/// Parse one LDAP message envelope, leaving the operation raw
///
/// The operation's application tag and content bytes are captured into a
/// [`RawOperation`] without parsing the operation internals, so a dispatcher
/// can route on the tag and defer (or skip) the inner parse. Use
/// [`RawMessage::parse_operation`] or [`LdapMessage::parse`] for the full
/// structure.
pub fn parse_message(input: &[u8]) -> Result<RawMessage<'_>> {
    if input.is_empty() {
        return Err(LdapError::EmptyMessage);
    }
    let mut rd = BerReader::new(input);
    let mut msg = rd.read_sequence_contents()?;
    let message_id = parse_message_id(&mut msg)?;
    if msg.is_empty() {
        return Err(LdapError::MissingOperation);
    }
    let tag = msg.peek_tag()?;
    if tag.class != BerClass::Application {
        return Err(LdapError::InvalidOperation);
    }
    if !KNOWN_OPS.contains(&tag.number) {
        return Err(LdapError::InvalidMessageType(tag.number));
    }
    let (tag, mut content) = msg.read_any_contents()?;
    let op = RawOperation {
        tag: ProtocolOpTag(tag.number),
        constructed: tag.constructed,
        content: content.take_all(),
    };
    let controls = parse_controls(&mut msg)?;
    Ok(RawMessage {
        message_id,
        op,
        controls,
    })
}

const KNOWN_OPS: [u32; 21] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 19, 23, 24, 25,
];

// Controls ::= SEQUENCE OF control Control
//
// attached to the message as [0] Controls OPTIONAL
fn parse_controls<'a>(msg: &mut BerReader<'a>) -> Result<Option<Vec<Control<'a>>>> {
    if msg.is_empty() {
        return Ok(None);
    }
    let tag = msg.peek_tag()?;
    if !tag.is_context(0) || !tag.constructed {
        return Err(LdapError::InvalidControlSequence);
    }
    let (_, mut inner) = msg.read_context_contents(0)?;
    let mut controls = Vec::new();
    while !inner.is_empty() {
        controls.push(parse_control(&mut inner)?);
    }
    Ok(Some(controls))
}

// Control ::= SEQUENCE {
//     controlType             LDAPOID,
//     criticality             BOOLEAN DEFAULT FALSE,
//     controlValue            OCTET STRING OPTIONAL }
fn parse_control<'a>(rd: &mut BerReader<'a>) -> Result<Control<'a>> {
    let mut inner = rd.read_sequence_contents()?;
    let control_type = oid_from_slice(inner.read_octet_string()?)?;
    let mut criticality = false;
    if let Ok(t) = inner.peek_tag() {
        if t.is_universal(crate::ber::universal::BOOLEAN) {
            criticality = inner.read_boolean()?;
        }
    }
    let control_value = if inner.is_empty() {
        None
    } else {
        Some(Cow::Borrowed(inner.read_octet_string()?))
    };
    Ok(Control {
        control_type,
        criticality,
        control_value,
    })
}

impl<'a> RawMessage<'a> {
    /// Parse the deferred operation into its typed form
    pub fn parse_operation(&self) -> Result<ProtocolOp<'a>> {
        let mut rd = BerReader::new(self.op.content);
        let op = match self.op.tag.0 {
            0 => ProtocolOp::BindRequest(parse_ldap_bind_request(&mut rd)?),
            1 => ProtocolOp::BindResponse(parse_ldap_bind_response(&mut rd)?),
            2 => parse_ldap_unbind_request(&mut rd)?,
            3 => ProtocolOp::SearchRequest(parse_ldap_search_request(&mut rd)?),
            4 => ProtocolOp::SearchResultEntry(parse_ldap_search_result_entry(&mut rd)?),
            5 => ProtocolOp::SearchResultDone(parse_ldap_result_content(&mut rd)?),
            6 => ProtocolOp::ModifyRequest(parse_ldap_modify_request(&mut rd)?),
            7 => ProtocolOp::ModifyResponse(ModifyResponse {
                result: parse_ldap_result_content(&mut rd)?,
            }),
            8 => ProtocolOp::AddRequest(parse_ldap_add_request(&mut rd)?),
            9 => ProtocolOp::AddResponse(parse_ldap_result_content(&mut rd)?),
            10 => ProtocolOp::DelRequest(parse_ldap_del_request(&mut rd)?),
            11 => ProtocolOp::DelResponse(parse_ldap_result_content(&mut rd)?),
            12 => ProtocolOp::ModDnRequest(parse_ldap_moddn_request(&mut rd)?),
            13 => ProtocolOp::ModDnResponse(parse_ldap_result_content(&mut rd)?),
            14 => ProtocolOp::CompareRequest(parse_ldap_compare_request(&mut rd)?),
            15 => ProtocolOp::CompareResponse(parse_ldap_result_content(&mut rd)?),
            16 => ProtocolOp::AbandonRequest(parse_ldap_abandon_request(&mut rd)?),
            19 => ProtocolOp::SearchResultReference(parse_ldap_search_result_ref(&mut rd)?),
            23 => ProtocolOp::ExtendedRequest(parse_ldap_extended_request(&mut rd)?),
            24 => ProtocolOp::ExtendedResponse(parse_ldap_extended_response(&mut rd)?),
            25 => ProtocolOp::IntermediateResponse(parse_ldap_intermediate_response(&mut rd)?),
            n => return Err(LdapError::InvalidMessageType(n)),
        };
        Ok(op)
    }
}

// LDAPMessage ::= SEQUENCE {
//      messageID       MessageID,
//      protocolOp      CHOICE { ... },
//      controls       [0] Controls OPTIONAL }
impl<'a> LdapMessage<'a> {
    /// Parse a single LDAP message and return a structure borrowing fields
    /// from the input buffer
    pub fn parse(input: &'a [u8]) -> Result<LdapMessage<'a>> {
        let raw = parse_message(input)?;
        let protocol_op = raw.parse_operation()?;
        Ok(LdapMessage {
            message_id: raw.message_id,
            protocol_op,
            controls: raw.controls,
        })
    }
}

// LDAPResult ::= SEQUENCE {
//      resultCode         ENUMERATED,
//      matchedDN          LDAPDN,
//      diagnosticMessage  LDAPString,
//      referral           [3] Referral OPTIONAL }
pub(crate) fn parse_ldap_result_content<'a>(rd: &mut BerReader<'a>) -> Result<LdapResult<'a>> {
    let result_code = ResultCode(rd.read_enumerated()? as u32);
    let matched_dn = parse_ldap_dn(rd)?;
    let diagnostic_message = parse_ldap_string(rd)?;
    // Referral ::= SEQUENCE SIZE (1..MAX) OF uri URI
    let referral = match rd.peek_tag() {
        Ok(t) if t.is_context(3) => {
            let (_, mut inner) = rd.read_context_contents(3)?;
            let mut uris = Vec::new();
            while !inner.is_empty() {
                uris.push(LdapString(Cow::Borrowed(
                    std::str::from_utf8(inner.read_octet_string()?)
                        .or(Err(LdapError::InvalidString))?,
                )));
            }
            Some(uris)
        }
        _ => None,
    };
    Ok(LdapResult {
        result_code,
        matched_dn,
        diagnostic_message,
        referral,
    })
}

// BindRequest ::= [APPLICATION 0] SEQUENCE {
//      version                 INTEGER (1 ..  127),
//      name                    LDAPDN,
//      authentication          AuthenticationChoice }
fn parse_ldap_bind_request<'a>(rd: &mut BerReader<'a>) -> Result<BindRequest<'a>> {
    let version = rd.read_integer()?;
    if !(1..=127).contains(&version) {
        return Err(LdapError::InvalidBindVersion);
    }
    let name = parse_ldap_dn(rd)?;
    let authentication = parse_authentication_choice(rd)?;
    Ok(BindRequest {
        version: version as u8,
        name,
        authentication,
    })
}

// AuthenticationChoice ::= CHOICE {
//      simple                  [0] OCTET STRING,
//                              -- 1 and 2 reserved
//      sasl                    [3] SaslCredentials,
//      ...  }
fn parse_authentication_choice<'a>(rd: &mut BerReader<'a>) -> Result<AuthenticationChoice<'a>> {
    let tag = rd.peek_tag()?;
    if tag.class != BerClass::ContextSpecific {
        return Err(LdapError::InvalidAuthenticationType);
    }
    match tag.number {
        0 => {
            let (_, mut inner) = rd.read_context_contents(0)?;
            Ok(AuthenticationChoice::Simple(Cow::Borrowed(
                inner.take_all(),
            )))
        }
        3 => {
            let (constructed, mut inner) = rd.read_context_contents(3)?;
            if !constructed {
                return Err(LdapError::InvalidSaslCredentials);
            }
            Ok(AuthenticationChoice::Sasl(parse_sasl_credentials(
                &mut inner,
            )?))
        }
        _ => Err(LdapError::InvalidAuthenticationType),
    }
}

// SaslCredentials ::= SEQUENCE {
//      mechanism               LDAPString,
//      credentials             OCTET STRING OPTIONAL }
fn parse_sasl_credentials<'a>(rd: &mut BerReader<'a>) -> Result<SaslCredentials<'a>> {
    let mechanism = parse_ldap_string(rd)?;
    let credentials = if rd.is_empty() {
        None
    } else {
        Some(Cow::Borrowed(rd.read_octet_string()?))
    };
    Ok(SaslCredentials {
        mechanism,
        credentials,
    })
}

// BindResponse ::= [APPLICATION 1] SEQUENCE {
//      COMPONENTS OF LDAPResult,
//      serverSaslCreds    [7] OCTET STRING OPTIONAL }
fn parse_ldap_bind_response<'a>(rd: &mut BerReader<'a>) -> Result<BindResponse<'a>> {
    let result = parse_ldap_result_content(rd)?;
    let server_sasl_creds = match rd.peek_tag() {
        Ok(t) if t.is_context(7) => {
            let (_, mut inner) = rd.read_context_contents(7)?;
            Some(Cow::Borrowed(inner.take_all()))
        }
        _ => None,
    };
    Ok(BindResponse {
        result,
        server_sasl_creds,
    })
}

// UnbindRequest ::= [APPLICATION 2] NULL
fn parse_ldap_unbind_request<'a>(rd: &mut BerReader<'a>) -> Result<ProtocolOp<'a>> {
    // accept empty content, otherwise expect NULL
    if !rd.is_empty() {
        rd.read_null()?;
    }
    Ok(ProtocolOp::UnbindRequest)
}

// SearchRequest ::= [APPLICATION 3] SEQUENCE {
//      baseObject      LDAPDN,
//      scope           ENUMERATED {
//           baseObject              (0),
//           singleLevel             (1),
//           wholeSubtree            (2),
//           ...  },
//      derefAliases    ENUMERATED {
//           neverDerefAliases       (0),
//           derefInSearching        (1),
//           derefFindingBaseObj     (2),
//           derefAlways             (3) },
//      sizeLimit       INTEGER (0 ..  maxInt),
//      timeLimit       INTEGER (0 ..  maxInt),
//      typesOnly       BOOLEAN,
//      filter          Filter,
//      attributes      AttributeSelection }
fn parse_ldap_search_request<'a>(rd: &mut BerReader<'a>) -> Result<SearchRequest<'a>> {
    let base_object = parse_ldap_dn(rd)?;
    let scope = rd.read_enumerated()?;
    if !(0..=2).contains(&scope) {
        return Err(LdapError::InvalidSearchScope);
    }
    let deref_aliases = rd.read_enumerated()?;
    if !(0..=3).contains(&deref_aliases) {
        return Err(LdapError::InvalidDerefAliases);
    }
    let size_limit = parse_ldap_int_as_u32(rd)?;
    let time_limit = parse_ldap_int_as_u32(rd)?;
    let types_only = rd.read_boolean()?;
    let filter = parse_filter(rd)?;
    let attributes = parse_attribute_selection(rd)?;
    Ok(SearchRequest {
        base_object,
        scope: SearchScope(scope as u32),
        deref_aliases: DerefAliases(deref_aliases as u32),
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
    })
}

// AttributeSelection ::= SEQUENCE OF selector LDAPString
//      -- The LDAPString is constrained to
//      -- <attributeSelector> in Section 4.5.1.8
fn parse_attribute_selection<'a>(rd: &mut BerReader<'a>) -> Result<Vec<LdapString<'a>>> {
    let mut inner = rd.read_sequence_contents()?;
    let mut attributes = Vec::new();
    while !inner.is_empty() {
        attributes.push(parse_ldap_string(&mut inner)?);
    }
    Ok(attributes)
}

// SearchResultEntry ::= [APPLICATION 4] SEQUENCE {
//     objectName      LDAPDN,
//     attributes      PartialAttributeList }
//
// PartialAttributeList ::= SEQUENCE OF partialAttribute PartialAttribute
fn parse_ldap_search_result_entry<'a>(rd: &mut BerReader<'a>) -> Result<SearchResultEntry<'a>> {
    let object_name = parse_ldap_dn(rd)?;
    let mut inner = rd.read_sequence_contents()?;
    let mut attributes = Vec::new();
    while !inner.is_empty() {
        attributes.push(parse_partial_attribute(&mut inner)?);
    }
    Ok(SearchResultEntry {
        object_name,
        attributes,
    })
}

// SearchResultReference ::= [APPLICATION 19] SEQUENCE
//                                   SIZE (1..MAX) OF uri URI
fn parse_ldap_search_result_ref<'a>(rd: &mut BerReader<'a>) -> Result<Vec<LdapString<'a>>> {
    let mut uris = Vec::new();
    while !rd.is_empty() {
        uris.push(parse_ldap_string(rd)?);
    }
    if uris.is_empty() {
        return Err(LdapError::EmptyMessage);
    }
    Ok(uris)
}

// ModifyRequest ::= [APPLICATION 6] SEQUENCE {
//     object          LDAPDN,
//     changes         SEQUENCE OF change SEQUENCE {
//          operation       ENUMERATED {
//               add     (0),
//               delete  (1),
//               replace (2),
//               ...  },
//          modification    PartialAttribute } }
fn parse_ldap_modify_request<'a>(rd: &mut BerReader<'a>) -> Result<ModifyRequest<'a>> {
    let object = parse_ldap_dn(rd)?;
    if object.is_empty() {
        return Err(LdapError::EmptyDN);
    }
    let mut inner = rd.read_sequence_contents()?;
    let mut changes = Vec::new();
    while !inner.is_empty() {
        changes.push(parse_ldap_change(&mut inner)?);
    }
    if changes.is_empty() {
        return Err(LdapError::EmptyModificationList);
    }
    Ok(ModifyRequest { object, changes })
}

fn parse_ldap_change<'a>(rd: &mut BerReader<'a>) -> Result<Change<'a>> {
    let mut inner = rd.read_sequence_contents()?;
    let operation = inner.read_enumerated()?;
    if !(0..=2).contains(&operation) {
        return Err(LdapError::InvalidModifyOperation);
    }
    let modification = parse_partial_attribute(&mut inner)?;
    Ok(Change {
        operation: Operation(operation as u32),
        modification,
    })
}

// AddRequest ::= [APPLICATION 8] SEQUENCE {
//     entry           LDAPDN,
//     attributes      AttributeList }
//
// AttributeList ::= SEQUENCE OF attribute Attribute
fn parse_ldap_add_request<'a>(rd: &mut BerReader<'a>) -> Result<AddRequest<'a>> {
    let entry = parse_ldap_dn(rd)?;
    if entry.is_empty() {
        return Err(LdapError::EmptyDN);
    }
    let mut inner = rd.read_sequence_contents()?;
    let mut attributes = Vec::new();
    while !inner.is_empty() {
        attributes.push(parse_attribute(&mut inner)?);
    }
    Ok(AddRequest { entry, attributes })
}

// DelRequest ::= [APPLICATION 10] LDAPDN
//
// the application tag is primitive and its content is the DN octets
fn parse_ldap_del_request<'a>(rd: &mut BerReader<'a>) -> Result<LdapDN<'a>> {
    let dn = dn_from_slice(rd.take_all())?;
    if dn.is_empty() {
        return Err(LdapError::EmptyDN);
    }
    Ok(dn)
}

// ModifyDNRequest ::= [APPLICATION 12] SEQUENCE {
//     entry           LDAPDN,
//     newrdn          RelativeLDAPDN,
//     deleteoldrdn    BOOLEAN,
//     newSuperior     [0] LDAPDN OPTIONAL }
fn parse_ldap_moddn_request<'a>(rd: &mut BerReader<'a>) -> Result<ModDnRequest<'a>> {
    let entry = parse_ldap_dn(rd)?;
    if entry.is_empty() {
        return Err(LdapError::EmptyDN);
    }
    let newrdn = parse_relative_ldap_dn(rd)?;
    if newrdn.0.is_empty() {
        return Err(LdapError::EmptyRDN);
    }
    let deleteoldrdn = rd.read_boolean()?;
    // newSuperior is primitive, its content is the new parent DN octets
    let newsuperior = match rd.peek_tag() {
        Ok(t) if t.is_context(0) => {
            let (_, mut inner) = rd.read_context_contents(0)?;
            Some(dn_from_slice(inner.take_all())?)
        }
        _ => None,
    };
    Ok(ModDnRequest {
        entry,
        newrdn,
        deleteoldrdn,
        newsuperior,
    })
}

// CompareRequest ::= [APPLICATION 14] SEQUENCE {
//     entry           LDAPDN,
//     ava             AttributeValueAssertion }
fn parse_ldap_compare_request<'a>(rd: &mut BerReader<'a>) -> Result<CompareRequest<'a>> {
    let entry = parse_ldap_dn(rd)?;
    let mut inner = rd.read_sequence_contents()?;
    let attribute_desc = parse_ldap_attribute_description(&mut inner)?;
    let assertion_value = inner.read_octet_string()?;
    Ok(CompareRequest {
        entry,
        ava: crate::filter::AttributeValueAssertion {
            attribute_desc,
            assertion_value: Cow::Borrowed(assertion_value),
        },
    })
}

// AbandonRequest ::= [APPLICATION 16] MessageID
//
// the content is the raw big-endian bytes of the messageID, without an
// inner INTEGER header
fn parse_ldap_abandon_request(rd: &mut BerReader<'_>) -> Result<MessageID> {
    let content = rd.take_all();
    if content.is_empty() || content.len() > 8 {
        return Err(LdapError::InvalidMessageId);
    }
    let mut id = if content[0] & 0x80 != 0 { -1i64 } else { 0 };
    for &b in content {
        id = (id << 8) | b as i64;
    }
    if !(0..=MessageID::MAX as i64).contains(&id) {
        return Err(LdapError::InvalidMessageId);
    }
    Ok(MessageID(id as u32))
}

// ExtendedRequest ::= [APPLICATION 23] SEQUENCE {
//     requestName      [0] LDAPOID,
//     requestValue     [1] OCTET STRING OPTIONAL }
fn parse_ldap_extended_request<'a>(rd: &mut BerReader<'a>) -> Result<ExtendedRequest<'a>> {
    let (_, mut inner) = rd.read_context_contents(0)?;
    let request_name = oid_from_slice(inner.take_all())?;
    let request_value = match rd.peek_tag() {
        Ok(t) if t.is_context(1) => {
            let (_, mut inner) = rd.read_context_contents(1)?;
            Some(Cow::Borrowed(inner.take_all()))
        }
        _ => None,
    };
    Ok(ExtendedRequest {
        request_name,
        request_value,
    })
}

// ExtendedResponse ::= [APPLICATION 24] SEQUENCE {
//     COMPONENTS OF LDAPResult,
//     responseName     [10] LDAPOID OPTIONAL,
//     responseValue    [11] OCTET STRING OPTIONAL }
fn parse_ldap_extended_response<'a>(rd: &mut BerReader<'a>) -> Result<ExtendedResponse<'a>> {
    let result = parse_ldap_result_content(rd)?;
    let response_name = match rd.peek_tag() {
        Ok(t) if t.is_context(10) => {
            let (_, mut inner) = rd.read_context_contents(10)?;
            Some(oid_from_slice(inner.take_all())?)
        }
        _ => None,
    };
    let response_value = match rd.peek_tag() {
        Ok(t) if t.is_context(11) => {
            let (_, mut inner) = rd.read_context_contents(11)?;
            Some(Cow::Borrowed(inner.take_all()))
        }
        _ => None,
    };
    Ok(ExtendedResponse {
        result,
        response_name,
        response_value,
    })
}

// IntermediateResponse ::= [APPLICATION 25] SEQUENCE {
//      responseName     [0] LDAPOID OPTIONAL,
//      responseValue    [1] OCTET STRING OPTIONAL }
fn parse_ldap_intermediate_response<'a>(rd: &mut BerReader<'a>) -> Result<IntermediateResponse<'a>> {
    let response_name = match rd.peek_tag() {
        Ok(t) if t.is_context(0) => {
            let (_, mut inner) = rd.read_context_contents(0)?;
            Some(oid_from_slice(inner.take_all())?)
        }
        _ => None,
    };
    let response_value = match rd.peek_tag() {
        Ok(t) if t.is_context(1) => {
            let (_, mut inner) = rd.read_context_contents(1)?;
            Some(Cow::Borrowed(inner.take_all()))
        }
        _ => None,
    };
    Ok(IntermediateResponse {
        response_name,
        response_value,
    })
}
