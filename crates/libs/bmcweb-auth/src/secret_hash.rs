//! Argon2 hashing of local account passwords.
//!
//! Local accounts are configured with a PHC-format argon2 hash instead of a
//! plaintext password. Basic authentication verifies the presented password
//! against that hash.
//!
//! # Examples
//!
//! ```rust
//! use bmcweb_auth::secret_hash::{generate_secret_hash, is_secret_valid};
//!
//! let hash = generate_secret_hash("0penBmc").unwrap();
//! assert!(hash.starts_with("$argon2"));
//! assert!(is_secret_valid("0penBmc", &hash).unwrap());
//! assert!(!is_secret_valid("0penbmc", &hash).unwrap());
//! ```

use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{self, PasswordHashString, SaltString},
};
use rand::rngs::OsRng;

use crate::prelude::*;

/// Hashes a password with a fresh random salt, returning the PHC string.
pub fn generate_secret_hash(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Verifies a password against a PHC string.
///
/// A malformed hash is an error, a wrong password is `Ok(false)`.
pub fn is_secret_valid(password: &str, hash: &str) -> Result<bool> {
    let hash = PasswordHashString::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &hash.password_hash())
        .is_ok())
}

impl From<password_hash::Error> for Error {
    fn from(value: password_hash::Error) -> Self {
        Self::PasswordHash(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salts_differ_between_hashes() {
        let a = generate_secret_hash("secret").unwrap();
        let b = generate_secret_hash("secret").unwrap();
        assert_ne!(a, b);
        assert!(is_secret_valid("secret", &a).unwrap());
        assert!(is_secret_valid("secret", &b).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(is_secret_valid("secret", "plaintext").is_err());
    }
}
