use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::SecretString;

use crate::error::{DeployError, DeployResult};

/// Bytes of OS randomness behind every generated secret.
pub const SECRET_BYTES: usize = 32;

/// Generate a 256-bit secret, URL-safe base64 without padding. The
/// alphabet (`A-Z a-z 0-9 - _`) is safe in `.env` files, shell
/// words, and connection strings.
pub fn generate() -> DeployResult<SecretString> {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| DeployError::EntropySourceUnavailable(e.to_string()))?;
    Ok(SecretString::from(URL_SAFE_NO_PAD.encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn length_covers_256_bits() {
        let secret = generate().unwrap();

        // 32 bytes -> 43 unpadded base64 characters.
        assert_eq!(secret.expose_secret().len(), 43);
    }

    #[test]
    fn alphabet_is_url_and_shell_safe() {
        for _ in 0..32 {
            let secret = generate().unwrap();
            assert!(
                secret
                    .expose_secret()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
    }

    #[test]
    fn secrets_differ() {
        let a = generate().unwrap();
        let b = generate().unwrap();

        assert_ne!(a.expose_secret(), b.expose_secret());
    }
}
