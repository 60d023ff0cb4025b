//! Per-connection operation dispatch
//!
//! A connection worker reads one PDU, parses the envelope and hands the
//! [`RawMessage`] here. Reads go straight to the backend; mutations are
//! packaged as commands, submitted to the replicator and answered only
//! after the commit future resolves. Search responses are streamed through
//! the [`ResponseSink`] one PDU at a time.

use crate::backend::{normalize_dn, parent_dn, Backend, BindHandler, BindOutcome, Entry};
use crate::command::Command;
use crate::error::LdapError;
use crate::filter::PartialAttribute;
use crate::filter_matcher;
use crate::ldap::*;
use crate::replication::{ReplicationError, Replicator};
use log::{debug, error, warn};
use std::borrow::Cow;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// RFC 4532 "Who am I?" extended operation
pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// RFC 4511 4.4.1 Notice of Disconnection
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

/// Per-connection state, owned by the connection's worker
#[derive(Debug, Default)]
pub struct SessionState {
    pub bind_dn: Option<String>,
    pub tls: bool,
    /// messageIDs abandoned by the client; searches consult this between
    /// result entries
    pub abandoned: HashSet<u32>,
}

impl SessionState {
    pub fn new(tls: bool) -> Self {
        SessionState {
            tls,
            ..SessionState::default()
        }
    }
}

/// Where response PDUs go; implemented by the connection writer
pub trait ResponseSink {
    fn send(&mut self, msg: &LdapMessage<'_>) -> io::Result<()>;
}

/// What the worker should do with the connection after a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
    /// the node cannot guarantee durability anymore and must stop
    Fatal,
}

/// The unsolicited notification sent before the server closes a
/// connection on a protocol failure (messageID 0)
pub fn disconnection_notice(
    code: ResultCode,
    message: impl Into<String>,
) -> LdapMessage<'static> {
    LdapMessage::new(
        MessageID(0),
        ProtocolOp::ExtendedResponse(ExtendedResponse {
            result: LdapResult::with_message(code, message),
            response_name: Some(LdapOID(Cow::Borrowed(NOTICE_OF_DISCONNECTION_OID))),
            response_value: None,
        }),
    )
}

pub struct Handler {
    backend: Arc<dyn Backend>,
    binds: Arc<dyn BindHandler>,
    replicator: Arc<dyn Replicator>,
    commit_timeout: Duration,
    database_id: u8,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("commit_timeout", &self.commit_timeout)
            .field("database_id", &self.database_id)
            .finish_non_exhaustive()
    }
}

impl Handler {
    pub fn new(
        backend: Arc<dyn Backend>,
        binds: Arc<dyn BindHandler>,
        replicator: Arc<dyn Replicator>,
        commit_timeout: Duration,
    ) -> Self {
        Handler {
            backend,
            binds,
            replicator,
            commit_timeout,
            database_id: 0,
        }
    }

    /// Dispatch one request and write its response(s)
    pub fn handle(
        &self,
        session: &mut SessionState,
        raw: &RawMessage<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        let id = raw.message_id;
        let op = match raw.parse_operation() {
            Ok(op) => op,
            Err(LdapError::Ber(e)) => {
                // structural damage inside the operation: BER is not
                // self-synchronizing, so the connection cannot survive
                warn!("malformed {} at offset {}: {}", raw.op.tag, e.offset(), e);
                let _ = sink.send(&disconnection_notice(
                    ResultCode::ProtocolError,
                    "malformed PDU",
                ));
                return Ok(Disposition::Close);
            }
            Err(e) => {
                debug!("invalid {} request: {}", raw.op.tag, e);
                return match error_response(raw.op.tag, id, ResultCode::ProtocolError, &e.to_string())
                {
                    Some(msg) => {
                        sink.send(&msg)?;
                        Ok(Disposition::Continue)
                    }
                    None => Ok(Disposition::Close),
                };
            }
        };
        match op {
            ProtocolOp::BindRequest(req) => self.do_bind(session, id, &req, sink),
            ProtocolOp::UnbindRequest => Ok(Disposition::Close),
            ProtocolOp::SearchRequest(req) => self.do_search(session, id, &req, sink),
            ProtocolOp::AddRequest(req) => self.do_add(session, id, &req, sink),
            ProtocolOp::ModifyRequest(req) => self.do_modify(session, id, &req, sink),
            ProtocolOp::DelRequest(dn) => self.do_delete(session, id, &dn, sink),
            ProtocolOp::ModDnRequest(req) => self.do_modify_dn(session, id, &req, sink),
            ProtocolOp::CompareRequest(req) => self.do_compare(session, id, &req, sink),
            ProtocolOp::AbandonRequest(abandoned_id) => {
                // no response, per RFC 4511; the mark is checked by any
                // search still streaming on this connection
                session.abandoned.insert(abandoned_id.0);
                Ok(Disposition::Continue)
            }
            ProtocolOp::ExtendedRequest(req) => self.do_extended(session, id, &req, sink),
            _ => {
                // a client has no business sending response PDUs
                warn!("unexpected {} from client", raw.op.tag);
                let _ = sink.send(&disconnection_notice(
                    ResultCode::ProtocolError,
                    "unexpected response PDU",
                ));
                Ok(Disposition::Close)
            }
        }
    }

    fn do_bind(
        &self,
        session: &mut SessionState,
        id: MessageID,
        req: &BindRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        // a bind request resets any prior authentication state
        session.bind_dn = None;
        let (code, creds) = match self.binds.bind(&req.name.0, &req.authentication) {
            BindOutcome::Success => {
                if !req.name.0.is_empty() {
                    session.bind_dn = Some(normalize_dn(&req.name.0));
                }
                (ResultCode::Success, None)
            }
            BindOutcome::InvalidCredentials => (ResultCode::InvalidCredentials, None),
            BindOutcome::UnsupportedMethod => (ResultCode::AuthMethodNotSupported, None),
            BindOutcome::SaslInProgress(server_creds) => {
                (ResultCode::SaslBindInProgress, Some(server_creds))
            }
        };
        debug!("bind name={:?} -> {:?}", req.name.0, code);
        sink.send(&LdapMessage::new(
            id,
            ProtocolOp::BindResponse(BindResponse {
                result: LdapResult::new(code),
                server_sasl_creds: creds.map(Cow::Owned),
            }),
        ))?;
        Ok(Disposition::Continue)
    }

    fn do_search(
        &self,
        session: &mut SessionState,
        id: MessageID,
        req: &SearchRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        let entries = match self.backend.search(
            session.bind_dn.as_deref(),
            &req.base_object.0,
            req.scope,
        ) {
            Ok(entries) => entries,
            Err(e) => {
                sink.send(&LdapMessage::new(
                    id,
                    ProtocolOp::SearchResultDone(LdapResult::with_message(
                        e.result_code(),
                        e.to_string(),
                    )),
                ))?;
                return Ok(Disposition::Continue);
            }
        };
        let mut returned: u32 = 0;
        for entry in entries {
            if session.abandoned.contains(&id.0) {
                // stop streaming, no SearchResultDone
                debug!("search {} abandoned after {} entries", id.0, returned);
                return Ok(Disposition::Continue);
            }
            if !filter_matcher::matches(&req.filter, &entry) {
                continue;
            }
            if req.size_limit != 0 && returned >= req.size_limit {
                sink.send(&LdapMessage::new(
                    id,
                    ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::SizeLimitExceeded)),
                ))?;
                return Ok(Disposition::Continue);
            }
            sink.send(&LdapMessage::new(
                id,
                ProtocolOp::SearchResultEntry(to_result_entry(
                    entry,
                    &req.attributes,
                    req.types_only,
                )),
            ))?;
            returned += 1;
        }
        sink.send(&LdapMessage::new(
            id,
            ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::Success)),
        ))?;
        Ok(Disposition::Continue)
    }

    fn do_add(
        &self,
        session: &mut SessionState,
        id: MessageID,
        req: &AddRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        if self
            .backend
            .get(session.bind_dn.as_deref(), &req.entry.0)
            .is_ok()
        {
            return self.send_result(
                sink,
                id,
                ProtocolOpTag::AddRequest,
                ResultCode::EntryAlreadyExists,
                "entry already exists",
            );
        }
        let mut entry = Entry::new(req.entry.0.as_ref());
        for attribute in &req.attributes {
            entry.add_values(
                &attribute.attr_type.0,
                attribute.attr_vals.iter().map(|v| v.0.to_vec()).collect(),
            );
        }
        let command = Command::put(self.database_id, entry.dn.clone(), entry.to_bytes());
        self.commit_and_respond(sink, id, ProtocolOpTag::AddRequest, command)
    }

    fn do_modify(
        &self,
        session: &mut SessionState,
        id: MessageID,
        req: &ModifyRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        let mut entry = match self.backend.get(session.bind_dn.as_deref(), &req.object.0) {
            Ok(entry) => entry,
            Err(e) => {
                return self.send_result(
                    sink,
                    id,
                    ProtocolOpTag::ModifyRequest,
                    e.result_code(),
                    &e.to_string(),
                )
            }
        };
        for change in &req.changes {
            let name = change.modification.attr_type.0.as_ref();
            let values: Vec<Vec<u8>> = change
                .modification
                .attr_vals
                .iter()
                .map(|v| v.0.to_vec())
                .collect();
            match change.operation {
                Operation::Add => entry.add_values(name, values),
                Operation::Delete => {
                    if entry.attribute(name).is_none() {
                        return self.send_result(
                            sink,
                            id,
                            ProtocolOpTag::ModifyRequest,
                            ResultCode::NoSuchAttribute,
                            "no such attribute",
                        );
                    }
                    entry.delete_values(name, &values);
                }
                Operation::Replace => entry.set_attribute(name, values),
                _ => {
                    return self.send_result(
                        sink,
                        id,
                        ProtocolOpTag::ModifyRequest,
                        ResultCode::ProtocolError,
                        "invalid modify operation",
                    )
                }
            }
        }
        let command = Command::put(self.database_id, entry.dn.clone(), entry.to_bytes());
        self.commit_and_respond(sink, id, ProtocolOpTag::ModifyRequest, command)
    }

    fn do_delete(
        &self,
        _session: &mut SessionState,
        id: MessageID,
        dn: &LdapDN<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        let command = Command::delete(self.database_id, dn.0.as_ref());
        self.commit_and_respond(sink, id, ProtocolOpTag::DelRequest, command)
    }

    fn do_modify_dn(
        &self,
        session: &mut SessionState,
        id: MessageID,
        req: &ModDnRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        let mut entry = match self.backend.get(session.bind_dn.as_deref(), &req.entry.0) {
            Ok(entry) => entry,
            Err(e) => {
                return self.send_result(
                    sink,
                    id,
                    ProtocolOpTag::ModDnRequest,
                    e.result_code(),
                    &e.to_string(),
                )
            }
        };
        let parent = match &req.newsuperior {
            Some(superior) => superior.0.to_string(),
            None => parent_dn(&req.entry.0).unwrap_or_default().to_string(),
        };
        let new_dn = if parent.is_empty() {
            req.newrdn.0.to_string()
        } else {
            format!("{},{}", req.newrdn.0, parent)
        };
        if self
            .backend
            .get(session.bind_dn.as_deref(), &new_dn)
            .is_ok()
        {
            return self.send_result(
                sink,
                id,
                ProtocolOpTag::ModDnRequest,
                ResultCode::EntryAlreadyExists,
                "target entry already exists",
            );
        }
        // rewrite the naming attribute: drop the old RDN value when asked,
        // make sure the new RDN value is present
        if req.deleteoldrdn {
            if let Some((name, value)) = split_rdn(&req.entry.0) {
                entry.delete_values(name, &[value.as_bytes().to_vec()]);
            }
        }
        if let Some((name, value)) = split_rdn(&req.newrdn.0) {
            let value = value.as_bytes().to_vec();
            let present = entry
                .attribute(name)
                .is_some_and(|a| a.values.contains(&value));
            if !present {
                entry.add_values(name, vec![value]);
            }
        }
        entry.dn = new_dn.clone();
        let command = Command::modify_dn(
            self.database_id,
            req.entry.0.as_ref(),
            new_dn,
            entry.to_bytes(),
        );
        self.commit_and_respond(sink, id, ProtocolOpTag::ModDnRequest, command)
    }

    fn do_compare(
        &self,
        session: &mut SessionState,
        id: MessageID,
        req: &CompareRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        let code = match self.backend.compare(
            session.bind_dn.as_deref(),
            &req.entry.0,
            &req.ava.attribute_desc.0,
            &req.ava.assertion_value,
        ) {
            Ok(true) => ResultCode::CompareTrue,
            Ok(false) => ResultCode::CompareFalse,
            Err(e) => e.result_code(),
        };
        sink.send(&LdapMessage::new(
            id,
            ProtocolOp::CompareResponse(LdapResult::new(code)),
        ))?;
        Ok(Disposition::Continue)
    }

    fn do_extended(
        &self,
        session: &mut SessionState,
        id: MessageID,
        req: &ExtendedRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<Disposition> {
        let response = match req.request_name.0.as_ref() {
            WHOAMI_OID => {
                let authz_id = match &session.bind_dn {
                    Some(dn) => format!("dn:{}", dn),
                    None => String::new(),
                };
                ExtendedResponse {
                    result: LdapResult::new(ResultCode::Success),
                    response_name: None,
                    response_value: Some(Cow::Owned(authz_id.into_bytes())),
                }
            }
            oid => {
                debug!("unsupported extended operation {}", oid);
                ExtendedResponse {
                    result: LdapResult::with_message(
                        ResultCode::ProtocolError,
                        "unsupported extended operation",
                    ),
                    response_name: None,
                    response_value: None,
                }
            }
        };
        sink.send(&LdapMessage::new(id, ProtocolOp::ExtendedResponse(response)))?;
        Ok(Disposition::Continue)
    }

    /// Submit a command, block on the commit future, answer accordingly
    fn commit_and_respond(
        &self,
        sink: &mut dyn ResponseSink,
        id: MessageID,
        request_tag: ProtocolOpTag,
        command: Command,
    ) -> io::Result<Disposition> {
        let outcome = self.replicator.submit(command).wait(self.commit_timeout);
        let (code, diagnostic) = match &outcome {
            Ok(index) => {
                debug!("{} committed at index {}", request_tag, index);
                (ResultCode::Success, String::new())
            }
            Err(ReplicationError::Timeout) => (ResultCode::Busy, "commit timed out".to_owned()),
            Err(ReplicationError::Closed) => {
                (ResultCode::Unavailable, "replication unavailable".to_owned())
            }
            Err(ReplicationError::Apply(e)) => (e.result_code(), e.to_string()),
            Err(ReplicationError::Command(e)) => (ResultCode::OperationsError, e.to_string()),
            Err(ReplicationError::Log(e)) => {
                // durability is gone; never acknowledge and never continue
                error!("log failure, refusing service: {}", e);
                let _ = sink.send(&disconnection_notice(
                    ResultCode::Unavailable,
                    "durable log failure",
                ));
                return Ok(Disposition::Fatal);
            }
        };
        self.send_result(sink, id, request_tag, code, &diagnostic)
    }

    fn send_result(
        &self,
        sink: &mut dyn ResponseSink,
        id: MessageID,
        request_tag: ProtocolOpTag,
        code: ResultCode,
        diagnostic: &str,
    ) -> io::Result<Disposition> {
        match error_response(request_tag, id, code, diagnostic) {
            Some(msg) => {
                sink.send(&msg)?;
                Ok(Disposition::Continue)
            }
            None => Ok(Disposition::Close),
        }
    }
}

/// The response PDU matching a request tag, carrying the given result
fn error_response(
    request_tag: ProtocolOpTag,
    id: MessageID,
    code: ResultCode,
    diagnostic: &str,
) -> Option<LdapMessage<'static>> {
    let result = if diagnostic.is_empty() {
        LdapResult::new(code)
    } else {
        LdapResult::with_message(code, diagnostic)
    };
    let op = match request_tag {
        ProtocolOpTag::BindRequest => ProtocolOp::BindResponse(BindResponse {
            result,
            server_sasl_creds: None,
        }),
        ProtocolOpTag::SearchRequest => ProtocolOp::SearchResultDone(result),
        ProtocolOpTag::ModifyRequest => ProtocolOp::ModifyResponse(ModifyResponse { result }),
        ProtocolOpTag::AddRequest => ProtocolOp::AddResponse(result),
        ProtocolOpTag::DelRequest => ProtocolOp::DelResponse(result),
        ProtocolOpTag::ModDnRequest => ProtocolOp::ModDnResponse(result),
        ProtocolOpTag::CompareRequest => ProtocolOp::CompareResponse(result),
        ProtocolOpTag::ExtendedRequest => ProtocolOp::ExtendedResponse(ExtendedResponse {
            result,
            response_name: None,
            response_value: None,
        }),
        _ => return None,
    };
    Some(LdapMessage::new(id, op))
}

/// Apply typesOnly and the attribute selection list to an entry
fn to_result_entry(
    entry: Entry,
    selection: &[LdapString<'_>],
    types_only: bool,
) -> SearchResultEntry<'static> {
    let all = selection.is_empty() || selection.iter().any(|s| s.0 == "*");
    let wanted = |name: &str| {
        all || selection
            .iter()
            .any(|s| s.0.eq_ignore_ascii_case(name))
    };
    let attributes = entry
        .attributes
        .into_iter()
        .filter(|a| wanted(&a.name))
        .map(|a| PartialAttribute {
            attr_type: LdapString(Cow::Owned(a.name)),
            attr_vals: if types_only {
                Vec::new()
            } else {
                a.values
                    .into_iter()
                    .map(|v| crate::filter::AttributeValue(Cow::Owned(v)))
                    .collect()
            },
        })
        .collect();
    SearchResultEntry {
        object_name: LdapDN(Cow::Owned(entry.dn)),
        attributes,
    }
}

/// The first RDN of a DN, split into attribute and value
fn split_rdn(dn: &str) -> Option<(&str, &str)> {
    let rdn = dn.split(',').next()?;
    let (name, value) = rdn.split_once('=')?;
    Some((name.trim(), value.trim()))
}

/// Bind handler used by the standalone server
///
/// Accepts the configured root DN with its password, falls back to a
/// `userPassword` comparison against the backend, and gates anonymous
/// binds on configuration. SASL is not offered. Credentials are compared
/// as opaque bytes and never logged.
pub struct SimpleBindHandler {
    root_dn: String,
    root_password: Vec<u8>,
    allow_anonymous: bool,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for SimpleBindHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never expose the password
        f.debug_struct("SimpleBindHandler")
            .field("root_dn", &self.root_dn)
            .field("allow_anonymous", &self.allow_anonymous)
            .finish_non_exhaustive()
    }
}

impl SimpleBindHandler {
    pub fn new(
        backend: Arc<dyn Backend>,
        root_dn: &str,
        root_password: impl Into<Vec<u8>>,
        allow_anonymous: bool,
    ) -> Self {
        SimpleBindHandler {
            root_dn: normalize_dn(root_dn),
            root_password: root_password.into(),
            allow_anonymous,
            backend,
        }
    }
}

impl BindHandler for SimpleBindHandler {
    fn bind(&self, name: &str, authentication: &AuthenticationChoice<'_>) -> BindOutcome {
        let password = match authentication {
            AuthenticationChoice::Simple(password) => password,
            AuthenticationChoice::Sasl(_) => return BindOutcome::UnsupportedMethod,
        };
        if name.is_empty() && password.is_empty() {
            return if self.allow_anonymous {
                BindOutcome::Success
            } else {
                BindOutcome::InvalidCredentials
            };
        }
        // RFC 4513 5.1.2: refuse unauthenticated binds with a name
        if name.is_empty() || password.is_empty() {
            return BindOutcome::InvalidCredentials;
        }
        if !self.root_dn.is_empty()
            && !self.root_password.is_empty()
            && normalize_dn(name) == self.root_dn
            && **password == *self.root_password
        {
            return BindOutcome::Success;
        }
        match self.backend.get(None, name) {
            Ok(entry) => {
                let valid = entry
                    .attribute("userPassword")
                    .is_some_and(|a| a.values.iter().any(|v| **v == **password));
                if valid {
                    BindOutcome::Success
                } else {
                    BindOutcome::InvalidCredentials
                }
            }
            Err(_) => BindOutcome::InvalidCredentials,
        }
    }
}

impl Drop for SimpleBindHandler {
    fn drop(&mut self) {
        for byte in self.root_password.iter_mut() {
            *byte = 0;
        }
    }
}
