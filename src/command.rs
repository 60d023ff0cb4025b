//! Typed command records carried by the replicated log
//!
//! A [`Command`] is one mutating operation: an LDAP write (Put, Delete,
//! ModifyDn) or a configuration/ACL change whose body rides along as a
//! nested serialized blob. The wire layout is fixed: little-endian length
//! prefixes, `u16` for strings and `u32` for opaque byte blobs. Records
//! written before the config/ACL fields existed simply end early; such
//! truncated records parse with those fields empty.

use bytes::{Buf, BufMut};
use rusticata_macros::newtype_enum;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandType(pub u8);

newtype_enum! {
impl debug CommandType {
    Put = 0,
    Delete = 1,
    ModifyDn = 2,
    ConfigUpdate = 3,
    AclFull = 4,
    AclAddRule = 5,
    AclUpdateRule = 6,
    AclDeleteRule = 7,
    AclSetDefault = 8,
}
}

impl CommandType {
    pub fn is_acl(self) -> bool {
        matches!(
            self,
            CommandType::AclFull
                | CommandType::AclAddRule
                | CommandType::AclUpdateRule
                | CommandType::AclDeleteRule
                | CommandType::AclSetDefault
        )
    }
}

/// An error raised while decoding a command record
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("truncated command record")]
    Truncated,

    #[error("command field is not valid UTF-8")]
    InvalidString,
}

/// One mutating operation recorded in the replicated log
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Command {
    pub command_type: CommandType,
    pub database_id: u8,
    pub dn: String,
    pub old_dn: String,
    pub entry_dn: String,
    pub entry_data: Vec<u8>,
    /// serialized [`ConfigCommand`]
    pub config_data: Vec<u8>,
    /// serialized [`AclCommand`]
    pub acl_data: Vec<u8>,
}

impl Command {
    pub fn put(database_id: u8, dn: impl Into<String>, entry_data: Vec<u8>) -> Self {
        Command {
            command_type: CommandType::Put,
            database_id,
            dn: dn.into(),
            entry_data,
            ..Command::default()
        }
    }

    pub fn delete(database_id: u8, dn: impl Into<String>) -> Self {
        Command {
            command_type: CommandType::Delete,
            database_id,
            dn: dn.into(),
            ..Command::default()
        }
    }

    pub fn modify_dn(
        database_id: u8,
        old_dn: impl Into<String>,
        new_dn: impl Into<String>,
        entry_data: Vec<u8>,
    ) -> Self {
        Command {
            command_type: CommandType::ModifyDn,
            database_id,
            dn: new_dn.into(),
            old_dn: old_dn.into(),
            entry_data,
            ..Command::default()
        }
    }

    /// `[type:u8][databaseID:u8]` then six length-prefixed fields:
    /// DN, OldDN, EntryDN (u16 LE), EntryData, ConfigData, ACLData (u32 LE)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            2 + self.dn.len()
                + self.old_dn.len()
                + self.entry_dn.len()
                + self.entry_data.len()
                + self.config_data.len()
                + self.acl_data.len()
                + 18,
        );
        buf.put_u8(self.command_type.0);
        buf.put_u8(self.database_id);
        put_string(&mut buf, &self.dn);
        put_string(&mut buf, &self.old_dn);
        put_string(&mut buf, &self.entry_dn);
        put_blob(&mut buf, &self.entry_data);
        put_blob(&mut buf, &self.config_data);
        put_blob(&mut buf, &self.acl_data);
        buf
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<Command, CommandError> {
        if buf.remaining() < 2 {
            return Err(CommandError::Truncated);
        }
        let command_type = CommandType(buf.get_u8());
        let database_id = buf.get_u8();
        let dn = get_string(&mut buf)?;
        let old_dn = get_string(&mut buf)?;
        let entry_dn = get_string(&mut buf)?;
        let entry_data = get_blob(&mut buf)?;
        // older records end here, the remaining fields default to empty
        let config_data = if buf.has_remaining() {
            get_blob(&mut buf)?
        } else {
            Vec::new()
        };
        let acl_data = if buf.has_remaining() {
            get_blob(&mut buf)?
        } else {
            Vec::new()
        };
        Ok(Command {
            command_type,
            database_id,
            dn,
            old_dn,
            entry_dn,
            entry_data,
            config_data,
            acl_data,
        })
    }
}

/// A cluster configuration change
///
/// ConfigCommand is serialized as: u16 section length + section, u64
/// version, u16 pair count, then count x (u16-length key, u16-length value).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigCommand {
    pub section: String,
    pub version: u64,
    pub data: BTreeMap<String, String>,
}

impl ConfigCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, &self.section);
        buf.put_u64_le(self.version);
        buf.put_u16_le(self.data.len() as u16);
        for (key, value) in &self.data {
            put_string(&mut buf, key);
            put_string(&mut buf, value);
        }
        buf
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<ConfigCommand, CommandError> {
        let section = get_string(&mut buf)?;
        if buf.remaining() < 8 + 2 {
            return Err(CommandError::Truncated);
        }
        let version = buf.get_u64_le();
        let count = buf.get_u16_le();
        let mut data = BTreeMap::new();
        for _ in 0..count {
            let key = get_string(&mut buf)?;
            let value = get_string(&mut buf)?;
            data.insert(key, value);
        }
        Ok(ConfigCommand {
            section,
            version,
            data,
        })
    }
}

/// One access-control rule
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AclRule {
    pub target: String,
    pub subject: String,
    pub scope: String,
    pub rights: Vec<String>,
    pub attributes: Vec<String>,
    pub deny: bool,
}

impl AclRule {
    fn put(&self, buf: &mut Vec<u8>) {
        put_string(buf, &self.target);
        put_string(buf, &self.subject);
        put_string(buf, &self.scope);
        put_string_list(buf, &self.rights);
        put_string_list(buf, &self.attributes);
        buf.put_u8(self.deny as u8);
    }

    fn get(buf: &mut &[u8]) -> Result<AclRule, CommandError> {
        let target = get_string(buf)?;
        let subject = get_string(buf)?;
        let scope = get_string(buf)?;
        let rights = get_string_list(buf)?;
        let attributes = get_string_list(buf)?;
        if !buf.has_remaining() {
            return Err(CommandError::Truncated);
        }
        let deny = buf.get_u8() != 0;
        Ok(AclRule {
            target,
            subject,
            scope,
            rights,
            attributes,
            deny,
        })
    }
}

/// An ACL change
///
/// The optional singleton rule is flagged by a boolean byte that follows
/// the rule array.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AclCommand {
    pub default_policy: String,
    pub version: u64,
    pub rule_index: i32,
    pub rules: Vec<AclRule>,
    pub rule: Option<AclRule>,
}

impl AclCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, &self.default_policy);
        buf.put_u64_le(self.version);
        buf.put_i32_le(self.rule_index);
        buf.put_u16_le(self.rules.len() as u16);
        for rule in &self.rules {
            rule.put(&mut buf);
        }
        buf.put_u8(self.rule.is_some() as u8);
        if let Some(rule) = &self.rule {
            rule.put(&mut buf);
        }
        buf
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<AclCommand, CommandError> {
        let default_policy = get_string(&mut buf)?;
        if buf.remaining() < 8 + 4 + 2 {
            return Err(CommandError::Truncated);
        }
        let version = buf.get_u64_le();
        let rule_index = buf.get_i32_le();
        let count = buf.get_u16_le();
        let mut rules = Vec::with_capacity(count as usize);
        for _ in 0..count {
            rules.push(AclRule::get(&mut buf)?);
        }
        if !buf.has_remaining() {
            return Err(CommandError::Truncated);
        }
        let rule = if buf.get_u8() != 0 {
            Some(AclRule::get(&mut buf)?)
        } else {
            None
        };
        Ok(AclCommand {
            default_policy,
            version,
            rule_index,
            rules,
            rule,
        })
    }
}

pub(crate) fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

pub(crate) fn get_string(buf: &mut &[u8]) -> Result<String, CommandError> {
    if buf.remaining() < 2 {
        return Err(CommandError::Truncated);
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(CommandError::Truncated);
    }
    let s = std::str::from_utf8(&buf[..len]).or(Err(CommandError::InvalidString))?;
    let s = s.to_owned();
    buf.advance(len);
    Ok(s)
}

pub(crate) fn put_blob(buf: &mut Vec<u8>, b: &[u8]) {
    buf.put_u32_le(b.len() as u32);
    buf.put_slice(b);
}

pub(crate) fn get_blob(buf: &mut &[u8]) -> Result<Vec<u8>, CommandError> {
    if buf.remaining() < 4 {
        return Err(CommandError::Truncated);
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(CommandError::Truncated);
    }
    let b = buf[..len].to_vec();
    buf.advance(len);
    Ok(b)
}

fn put_string_list(buf: &mut Vec<u8>, list: &[String]) {
    buf.put_u16_le(list.len() as u16);
    for s in list {
        put_string(buf, s);
    }
}

fn get_string_list(buf: &mut &[u8]) -> Result<Vec<String>, CommandError> {
    if buf.remaining() < 2 {
        return Err(CommandError::Truncated);
    }
    let count = buf.get_u16_le();
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        list.push(get_string(buf)?);
    }
    Ok(list)
}
