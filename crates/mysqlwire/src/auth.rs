//! Authentication plugins.
//!
//! Two plugins are supported:
//! - `mysql_native_password`: SHA1-based (MySQL < 8.0 default)
//! - `caching_sha2_password`: SHA256-based (MySQL 8.0+ default)
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (the server has the password hash cached):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```
//!
//! Full auth sends the password itself, either in clear over TLS or
//! RSA-encrypted with the server's public key.

use mysqlwire_core::error::{AuthError, AuthErrorKind};
use mysqlwire_core::{Error, Result};
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
}

/// Follow-up codes in caching_sha2_password AuthMoreData packets.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// The cached hash matched; an OK packet follows
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Cache miss; the client must send the full password
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Length of the scramble the server sends in the handshake.
pub const SCRAMBLE_LENGTH: usize = 20;

/// An authentication plugin the client can answer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
}

impl AuthPlugin {
    /// Look up a plugin by the name the server announces.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Ok(AuthPlugin::NativePassword),
            plugins::CACHING_SHA2_PASSWORD => Ok(AuthPlugin::CachingSha2Password),
            other => Err(auth_error(
                AuthErrorKind::UnsupportedPlugin,
                format!("unsupported authentication plugin '{other}'"),
            )),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
        }
    }

    /// First-round response to a challenge.
    pub fn scramble(self, password: &str, seed: &[u8]) -> Vec<u8> {
        match self {
            AuthPlugin::NativePassword => mysql_native_password(password, seed),
            AuthPlugin::CachingSha2Password => caching_sha2_password(password, seed),
        }
    }
}

pub(crate) fn auth_error(kind: AuthErrorKind, message: impl Into<String>) -> Error {
    Error::Auth(AuthError {
        kind,
        message: message.into(),
    })
}

/// Servers send the 20-byte scramble followed by a NUL; only the first
/// 20 bytes take part in hashing.
fn scramble_seed(auth_data: &[u8]) -> &[u8] {
    &auth_data[..auth_data.len().min(SCRAMBLE_LENGTH)]
}

/// Compute the mysql_native_password response.
///
/// Returns an empty response for an empty password.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }
    let seed = scramble_seed(auth_data);

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// Compute the caching_sha2_password fast-auth scramble.
///
/// Returns an empty response for an empty password.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }
    let seed = scramble_seed(auth_data);

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// The NUL-terminated password, sent in clear over an encrypted channel.
pub fn cleartext_password(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// XOR the NUL-terminated password with the seed, repeating the seed as
/// needed.
pub fn xor_password_with_seed(password: &str, seed: &[u8]) -> Vec<u8> {
    let mut pw = cleartext_password(password);
    if seed.is_empty() {
        return pw;
    }
    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }
    pw
}

/// Parse the server's RSA public key (SPKI or PKCS#1 PEM).
pub fn parse_public_key(pem: &[u8]) -> Result<RsaPublicKey> {
    let pem = std::str::from_utf8(pem).map_err(|e| {
        auth_error(
            AuthErrorKind::RsaKeyUnavailable,
            format!("server public key is not valid UTF-8 PEM: {e}"),
        )
    })?;
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| {
            auth_error(
                AuthErrorKind::RsaKeyUnavailable,
                format!("failed to parse server public key: {e}"),
            )
        })
}

/// Encrypt the password for caching_sha2_password full auth without TLS:
/// `RSA_OAEP(password + NUL XOR seed)`.
pub fn encrypt_password_rsa(password: &str, auth_data: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>> {
    let key = parse_public_key(public_key_pem)?;
    let pw = xor_password_with_seed(password, scramble_seed(auth_data));
    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &pw)
        .map_err(|e| {
            auth_error(
                AuthErrorKind::RsaKeyUnavailable,
                format!("RSA encryption with server public key failed: {e}"),
            )
        })
}


#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8; 20] = b"0123456789abcdefghij";

    #[test]
    fn test_native_password_empty() {
        assert!(mysql_native_password("", SALT).is_empty());
        assert!(caching_sha2_password("", SALT).is_empty());
    }

    #[test]
    fn test_native_password_formula() {
        let response = mysql_native_password("password", SALT);
        assert_eq!(response.len(), 20);

        // Unmask with the server-side stored hash to recover SHA1(password).
        let stage1 = Sha1::digest(b"password");
        let stored = Sha1::digest(stage1);
        let mut hasher = Sha1::new();
        hasher.update(SALT);
        hasher.update(stored);
        let mask = hasher.finalize();
        let recovered: Vec<u8> = response.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(recovered, stage1.to_vec());
    }

    #[test]
    fn test_native_password_vector() {
        assert_eq!(
            mysql_native_password("password", SALT),
            vec![
                0xa4, 0x1b, 0x08, 0x69, 0x92, 0xbe, 0x10, 0x81, 0x94, 0xf8, 0x0b, 0xdc, 0x92,
                0x2a, 0x1a, 0xf8, 0x5d, 0x38, 0xa1, 0x42,
            ]
        );
    }

    #[test]
    fn test_trailing_nul_is_ignored() {
        let mut with_nul = SALT.to_vec();
        with_nul.push(0);
        assert_eq!(
            mysql_native_password("secret", &with_nul),
            mysql_native_password("secret", SALT)
        );
        assert_eq!(
            caching_sha2_password("secret", &with_nul),
            caching_sha2_password("secret", SALT)
        );
    }

    #[test]
    fn test_caching_sha2_scramble_hides_password() {
        let response = caching_sha2_password("secret", SALT);
        assert_eq!(response.len(), 32);
        assert!(!response.windows(6).any(|w| w == b"secret"));
        assert_ne!(response, caching_sha2_password("secret", &[0u8; 20]));
    }

    #[test]
    fn test_plugin_lookup() {
        assert_eq!(
            AuthPlugin::from_name("mysql_native_password").unwrap(),
            AuthPlugin::NativePassword
        );
        assert_eq!(
            AuthPlugin::from_name("caching_sha2_password").unwrap().name(),
            plugins::CACHING_SHA2_PASSWORD
        );
        let err = AuthPlugin::from_name("auth_gssapi_client").unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::UnsupportedPlugin));
    }

    #[test]
    fn test_xor_password_with_seed() {
        let seed = [1, 2, 3];
        let result = xor_password_with_seed("test", &seed);
        assert_eq!(result.len(), 5);
        let recovered: Vec<u8> = result
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ seed[i % seed.len()])
            .collect();
        assert_eq!(recovered, b"test\0");
        assert_eq!(cleartext_password("pw"), b"pw\0");
    }

    #[test]
    fn test_rsa_round_trip() {
        let (private, pem) = test_keys::key_pair();
        let encrypted = encrypt_password_rsa("secret", SALT, pem.as_bytes()).unwrap();
        let decrypted = private.decrypt(rsa::Oaep::new::<Sha1>(), &encrypted).unwrap();
        assert_eq!(decrypted, xor_password_with_seed("secret", SALT));
    }

    #[test]
    fn test_bad_public_key() {
        let err = encrypt_password_rsa("secret", SALT, b"not a key").unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::RsaKeyUnavailable));
    }
}
