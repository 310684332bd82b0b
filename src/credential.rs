//! In-memory elevation secret.
//!
//! # Security Model
//!
//! The sudo password is held only in process memory for the duration of a
//! run. It is never written to disk, never placed in an argument vector or an
//! environment variable, and never formatted into logs: `Debug` is redacted
//! and there is no `Display` impl. Runners write it straight to the
//! elevation program's stdin.
//!
//! The backing buffer is overwritten with zeros when the value is dropped.

use std::fmt;
use std::sync::atomic::{Ordering, compiler_fence};

const REDACTED: &str = "********";

/// Opaque elevation secret (e.g. a sudo password)
pub struct Credential {
    secret: String,
}

impl Credential {
    /// Wrap a secret. Trailing line terminators from terminal input are stripped.
    pub fn new(secret: impl Into<String>) -> Self {
        let mut secret = secret.into();
        while secret.ends_with('\n') || secret.ends_with('\r') {
            secret.pop();
        }
        Self { secret }
    }

    /// A credential with no secret, for runs that never elevate
    pub fn empty() -> Self {
        Self {
            secret: String::new(),
        }
    }

    /// Returns true if no secret was supplied
    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }

    /// Borrow the secret bytes.
    ///
    /// Only command runners should call this, and only to write the value to
    /// a child's stdin.
    pub fn expose_secret(&self) -> &str {
        &self.secret
    }

    /// Replace every occurrence of the secret in `text` with a mask.
    ///
    /// Captured output passes through this before it is stored in a report,
    /// so a tool that echoes its stdin cannot leak the password.
    pub fn redact(&self, text: &str) -> String {
        if self.secret.is_empty() {
            return text.to_string();
        }
        text.replace(&self.secret, REDACTED)
    }

    fn wipe(&mut self) {
        let mut bytes = std::mem::take(&mut self.secret).into_bytes();
        for byte in bytes.iter_mut() {
            // SAFETY: `byte` is a valid, aligned, exclusively borrowed u8
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
        compiler_fence(Ordering::SeqCst);
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let cred = Credential::new("hunter2");
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(rendered, "Credential(<redacted>)");
    }

    #[test]
    fn test_trailing_newline_stripped() {
        let cred = Credential::new("pa55\r\n");
        assert_eq!(cred.expose_secret(), "pa55");
    }

    #[test]
    fn test_redact_masks_every_occurrence() {
        let cred = Credential::new("s3cret");
        let out = cred.redact("[sudo] s3cret ok s3cret");
        assert_eq!(out, "[sudo] ******** ok ********");
    }

    #[test]
    fn test_empty_credential_redacts_nothing() {
        let cred = Credential::empty();
        assert!(cred.is_empty());
        assert_eq!(cred.redact("plain output"), "plain output");
    }

    #[test]
    fn test_wipe_clears_secret() {
        let mut cred = Credential::new("wipe-me");
        cred.wipe();
        assert!(cred.is_empty());
    }
}
