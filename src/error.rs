//! LDAP protocol errors

use crate::ber::BerError;

/// Result of the protocol parsing and encoding functions
///
/// Not named `LdapResult` to avoid conflicts with the LDAP standard type.
pub type Result<T> = std::result::Result<T, LdapError>;

/// An error raised while parsing or validating an LDAP PDU
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum LdapError {
    #[error("empty message")]
    EmptyMessage,

    #[error("message ID out of range")]
    InvalidMessageId,

    #[error("message carries no operation")]
    MissingOperation,

    #[error("operation tag is not in the application class")]
    InvalidOperation,

    #[error("unknown operation tag {0}")]
    InvalidMessageType(u32),

    #[error("invalid control sequence")]
    InvalidControlSequence,

    #[error("invalid LDAP string encoding")]
    InvalidString,

    #[error("invalid DN encoding")]
    InvalidDN,

    #[error("empty DN")]
    EmptyDN,

    #[error("empty RDN")]
    EmptyRDN,

    #[error("modify request carries no changes")]
    EmptyModificationList,

    #[error("bind version out of range")]
    InvalidBindVersion,

    #[error("invalid LDAP authentication type")]
    InvalidAuthenticationType,

    #[error("invalid SASL credentials encoding")]
    InvalidSaslCredentials,

    #[error("invalid search scope")]
    InvalidSearchScope,

    #[error("invalid alias dereferencing policy")]
    InvalidDerefAliases,

    #[error("invalid type for filter")]
    InvalidFilterType,

    #[error("invalid substring filter")]
    InvalidSubstring,

    #[error("invalid modify operation")]
    InvalidModifyOperation,

    #[error("BER error: {0}")]
    Ber(#[from] BerError),
}

impl LdapError {
    /// Absolute input offset for byte-level failures, if known
    pub fn offset(&self) -> Option<usize> {
        match self {
            LdapError::Ber(e) => Some(e.offset()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::{universal, BerTag};

    #[test]
    fn test_ber_cause_is_preserved() {
        let cause = BerError::TagMismatch {
            expected: BerTag::universal(universal::INTEGER),
            actual: BerTag::universal(universal::BOOLEAN),
            offset: 17,
        };
        let err = LdapError::from(cause);
        assert_eq!(err.offset(), Some(17));
        assert!(err.to_string().starts_with("BER error:"));
    }

    #[test]
    fn test_domain_errors_have_no_offset() {
        assert_eq!(LdapError::InvalidBindVersion.offset(), None);
    }
}
