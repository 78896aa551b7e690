//! Decryption of provider-encrypted administrator passwords.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

use super::CredentialError;

/// Decrypts a base64, RSA PKCS#1 v1.5 encrypted password with `private_key_pem`.
///
/// The key is parsed before the ciphertext is looked at, so malformed key
/// material is always reported as such. An empty blob means the platform has
/// not published the password yet.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidKeyMaterial`],
/// [`CredentialError::PasswordNotAvailable`],
/// [`CredentialError::MalformedCiphertext`], or
/// [`CredentialError::DecryptionFailed`].
pub fn decrypt_remote_password(
    private_key_pem: &str,
    cipher_blob: &str,
) -> Result<String, CredentialError> {
    let pem = private_key_pem.trim();
    let key = RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|err| CredentialError::InvalidKeyMaterial {
            reason: err.to_string(),
        })?;

    let compact: String = cipher_blob.split_whitespace().collect();
    if compact.is_empty() {
        return Err(CredentialError::PasswordNotAvailable);
    }
    let ciphertext = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| CredentialError::MalformedCiphertext {
            reason: err.to_string(),
        })?;

    let plaintext = key
        .decrypt(Pkcs1v15Encrypt, &ciphertext)
        .map_err(|err| CredentialError::DecryptionFailed {
            reason: err.to_string(),
        })?;
    String::from_utf8(plaintext).map_err(|_| CredentialError::DecryptionFailed {
        reason: String::from("plaintext is not valid UTF-8"),
    })
}
