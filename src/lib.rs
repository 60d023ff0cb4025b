//! # ldapd
//!
//! Core of a replicated LDAPv3 ([RFC4511]) directory server, written in
//! pure Rust: a hand-rolled BER (ITU-T X.690) codec with byte-exact wire
//! compatibility, a zero-copy protocol layer covering every RFC 4511
//! operation including the full search filter grammar, and a durable
//! append-only command log with the append/truncate/term-query surface a
//! Raft-style consensus module drives.
//!
//! A lot of care is taken to ensure security and safety: decoding is
//! bounded (recursion limit, length guards, offset-annotated errors),
//! defensive against hostile inputs, and panic-free.
//!
//! The storage backend, the consensus algorithm itself, ACL evaluation
//! and schema checking are external collaborators behind the traits in
//! [`backend`] and [`replication`]; bundled in-memory/single-node
//! implementations make the standalone binary work end to end.
//!
//! [RFC4511]: https://www.rfc-editor.org/rfc/rfc4511

#![deny(unstable_features, unused_import_braces, unused_qualifications)]
#![warn(missing_debug_implementations, unreachable_pub)]
#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod ber;
pub mod ber_reader;
pub mod ber_writer;
pub mod command;
pub mod config;
pub mod error;
pub mod filter;
mod filter_matcher;
mod filter_parser;
mod filter_writer;
pub mod handler;
pub mod ldap;
pub mod ldap_parser;
pub mod ldap_writer;
pub mod raft_log;
pub mod replication;
pub mod server;

pub use crate::ber_reader::BerReader;
pub use crate::ber_writer::BerWriter;
pub use crate::error::LdapError;
pub use crate::filter_matcher::matches as filter_matches;
pub use crate::filter_parser::parse_filter;
pub use crate::filter_writer::write_filter;
pub use crate::ldap_parser::parse_message;
pub use crate::ldap_writer::message_to_bytes;
