//! Symmetric crypto helper for secrets embedded in configuration.
//!
//! Key material is derived once at configure time: PBKDF2-HMAC-SHA256 with
//! 10,000 iterations and an empty salt produces 48 bytes, split into a
//! 32-byte AES-256 key and a 16-byte CBC IV. The wire form is base64 over
//! the PKCS7-padded ciphertext, which keeps stored values interchangeable
//! with `openssl enc -base64 -aes-256-cbc -pbkdf2 -nosalt`.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::config::ConfigStore;
use crate::constants::{DERIVED_KEY_IV_LEN, MIN_PASSWORD_FILE_LEN, PBKDF2_ITERATIONS};
use crate::error::{Error, Result};
use crate::{log_error, log_info, log_warning};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC helper with a single derived key.
///
/// [`CryptoHelper::configure`] must run before any cipher operation; the
/// other methods report [`Error::NotConfigured`] until then.
#[derive(Default)]
pub struct CryptoHelper {
    key_iv: Option<[u8; DERIVED_KEY_IV_LEN]>,
}

impl CryptoHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the password and derive the key material.
    ///
    /// Password resolution order: the file named by `passwordFile` in
    /// `section` (visible ASCII bytes only, at least
    /// [`MIN_PASSWORD_FILE_LEN`] of them), then `default_password`.
    pub fn configure(&mut self, cfg: &ConfigStore, section: &str, default_password: &str) {
        let mut password = String::new();

        let password_file = if section.is_empty() {
            String::new()
        } else {
            cfg.get_string(section, "passwordFile", "")
        };

        if !password_file.is_empty() {
            match std::fs::read(&password_file) {
                Ok(data) => {
                    // Visible ASCII only: line endings, tabs and stray
                    // spaces from editors must not become key material.
                    password = data
                        .iter()
                        .filter(|&&b| b > 0x20 && b < 0x7f)
                        .map(|&b| b as char)
                        .collect();

                    if password.len() < MIN_PASSWORD_FILE_LEN {
                        log_error!(
                            "password file {password_file} is too short, at least {MIN_PASSWORD_FILE_LEN} characters are required"
                        );
                        password.clear();
                    }
                }
                Err(e) => {
                    log_error!("unable to load default password from {password_file}: {e}");
                }
            }
        }

        if password.is_empty() {
            password = default_password.to_string();
        }

        let mut key_iv = [0u8; DERIVED_KEY_IV_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), b"", PBKDF2_ITERATIONS, &mut key_iv);
        self.key_iv = Some(key_iv);
    }

    fn key_iv(&self) -> Result<(&[u8], &[u8])> {
        let key_iv = self.key_iv.as_ref().ok_or(Error::NotConfigured)?;
        Ok(key_iv.split_at(32))
    }

    /// Encrypt `plain_text` and return the base64 wire form.
    ///
    /// # Errors
    ///
    /// [`Error::NotConfigured`] before [`CryptoHelper::configure`].
    pub fn encrypt(&self, plain_text: &str) -> Result<String> {
        let (key, iv) = self.key_iv()?;
        let cipher = Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|e| Error::Cipher(format!("key setup failed: {e}")))?;
        let cipher_text = cipher.encrypt_padded_vec_mut::<Pkcs7>(plain_text.as_bytes());
        Ok(BASE64.encode(cipher_text))
    }

    /// Decrypt a base64 wire-form value back to plain text.
    ///
    /// # Errors
    ///
    /// [`Error::NotConfigured`] before configure; [`Error::Cipher`] for
    /// malformed base64, bad padding (wrong password) or non-UTF-8 output.
    pub fn decrypt(&self, base64_cipher_text: &str) -> Result<String> {
        let (key, iv) = self.key_iv()?;
        let cipher_text = BASE64
            .decode(base64_cipher_text.trim())
            .map_err(|e| Error::Cipher(format!("invalid base64: {e}")))?;
        let cipher = Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| Error::Cipher(format!("key setup failed: {e}")))?;
        let plain = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&cipher_text)
            .map_err(|_| Error::Cipher("decryption failed (bad padding or wrong key)".into()))?;
        String::from_utf8(plain).map_err(|_| Error::Cipher("decrypted data is not UTF-8".into()))
    }

    /// Read a configuration value that is preferably stored encrypted.
    ///
    /// An empty value yields `default`. A value that does not decrypt is
    /// returned as-is, with a warning and its would-be ciphertext logged so
    /// the operator can move to the encrypted form.
    pub fn get_possibly_encrypted(
        &self,
        cfg: &ConfigStore,
        path: &str,
        key: &str,
        default: &str,
    ) -> String {
        let raw = cfg.get_string(path, key, "");
        if raw.is_empty() {
            return default.to_string();
        }

        match self.decrypt(&raw) {
            Ok(plain) => plain,
            Err(_) => {
                log_warning!(
                    "configuration value {path}.{key} is not encrypted, consider storing the encrypted form"
                );
                if let Ok(cipher_text) = self.encrypt(&raw) {
                    log_info!("encrypted form of {path}.{key}: {cipher_text}");
                }
                raw
            }
        }
    }
}
