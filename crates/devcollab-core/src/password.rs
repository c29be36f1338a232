//! bcrypt password digests, shared by the board and habit services.

use secrecy::{ExposeSecret, SecretString};

pub use bcrypt::BcryptError as PasswordError;

/// Work factor for new digests. Existing digests carry their own cost.
pub const COST: u32 = 10;

pub fn hash_password(password: &SecretString) -> Result<String, PasswordError> {
    bcrypt::hash(password.expose_secret(), COST)
}

/// Check a password against a stored digest. Malformed digests never match.
pub fn verify_password(password: &SecretString, stored: &str) -> bool {
    bcrypt::verify(password.expose_secret(), stored).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn hash_then_verify() {
        let stored = hash_password(&secret("hunter2")).unwrap();
        assert!(stored.starts_with("$2b$10$"));
        assert!(verify_password(&secret("hunter2"), &stored));
        assert!(!verify_password(&secret("hunter3"), &stored));
    }

    #[test]
    fn same_password_different_salts() {
        let a = hash_password(&secret("password")).unwrap();
        let b = hash_password(&secret("password")).unwrap();
        assert_ne!(a, b);
        assert!(verify_password(&secret("password"), &b));
    }

    #[test]
    fn malformed_digest_never_matches() {
        for stored in ["", "plain-text", "sha256$10000$AAAA$AAAA", "$2b$10$short"] {
            assert!(!verify_password(&secret("x"), stored), "{stored}");
        }
    }

    #[test]
    fn cheaper_stored_cost_still_verifies() {
        let stored = bcrypt::hash_with_salt("s3cret", 4, [7u8; 16])
            .unwrap()
            .format_for_version(bcrypt::Version::TwoB);
        assert!(stored.starts_with("$2b$04$"));
        assert!(verify_password(&secret("s3cret"), &stored));
        assert!(!verify_password(&secret("S3cret"), &stored));
    }
}
