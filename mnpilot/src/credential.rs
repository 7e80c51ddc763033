//! Credential memory for the privilege-escalation secret.
//!
//! The secret is stored once behind an `Arc<SecretString>`. Handles can be
//! passed to the reader task (for masking) and the driver (for writing)
//! without copying the bytes. The only transient copy is the buffer built
//! for a write, which is zeroized when dropped.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};

/// Replacement shown in place of the secret.
pub const MASK: &str = "********";

/// Shared, read-only handle to the escalation secret.
#[derive(Clone)]
pub struct Credential {
    secret: Arc<SecretString>,
}

impl Credential {
    /// Wrap a secret. The string is moved, never copied.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Arc::new(SecretString::from(secret.into())),
        }
    }

    /// Returns true if no secret was supplied.
    pub fn is_empty(&self) -> bool {
        self.secret.expose_secret().is_empty()
    }

    /// Build the bytes for a single secret write (`secret\n`).
    ///
    /// The returned buffer wipes itself on drop.
    pub fn line_bytes(&self) -> Zeroizing<Vec<u8>> {
        let secret = self.secret.expose_secret().as_bytes();
        let mut buf = Zeroizing::new(Vec::with_capacity(secret.len() + 1));
        buf.extend_from_slice(secret);
        buf.push(b'\n');
        buf
    }

    /// Replace every verbatim occurrence of the secret in `line`.
    pub fn mask<'a>(&self, line: &'a str) -> Cow<'a, str> {
        if !self.appears_in(line) {
            return Cow::Borrowed(line);
        }
        Cow::Owned(line.replace(self.secret.expose_secret(), MASK))
    }

    /// Check whether `line` contains the secret verbatim.
    pub fn appears_in(&self, line: &str) -> bool {
        let secret = self.secret.expose_secret();
        !secret.is_empty() && line.contains(secret)
    }

    /// Borrow the secret for SSH password authentication.
    pub(crate) fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<SecretString> for Credential {
    fn from(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_replaces_every_occurrence() {
        let cred = Credential::new("hunter2");
        assert_eq!(cred.mask("hunter2 and hunter2"), "******** and ********");
        assert!(matches!(cred.mask("nothing here"), Cow::Borrowed(_)));
        assert!(cred.appears_in("echo hunter2"));
        assert!(!cred.appears_in("echo hunter"));
    }

    #[test]
    fn test_empty_secret_masks_nothing() {
        let cred = Credential::new("");
        assert!(cred.is_empty());
        assert_eq!(cred.mask("abc"), "abc");
        assert!(!cred.appears_in("abc"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let cred = Credential::new("hunter2");
        let shown = format!("{:?}", cred);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("REDACTED"));
    }

    #[test]
    fn test_line_bytes_appends_newline() {
        let cred = Credential::new("pw");
        assert_eq!(cred.line_bytes().as_slice(), b"pw\n");
    }

    #[test]
    fn test_clones_share_storage() {
        let a = Credential::new("pw");
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.secret, &b.secret));
    }
}
