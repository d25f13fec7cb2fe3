//! Secret generation and format validation per [`SecretClass`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};

use super::types::{SecretClass, SecretString};

const TOKEN_BYTES: usize = 32;
const SYMMETRIC_KEY_BYTES: usize = 32;
const PASSPHRASE_LEN: usize = 24;

const TOKEN_MIN_LEN: usize = 32;
const PASSPHRASE_MIN_LEN: usize = 16;

const PLACEHOLDERS: &[&str] =
    &["changeme", "change-me", "change_me", "secret", "password", "todo", "xxx", "null", "none"];

/// Generate a fresh value for `class` from the operating system RNG
pub fn generate(class: SecretClass) -> SecretString {
    match class {
        SecretClass::Token => {
            let mut bytes = [0u8; TOKEN_BYTES];
            OsRng.fill_bytes(&mut bytes);
            SecretString::new(URL_SAFE_NO_PAD.encode(bytes))
        }
        SecretClass::Passphrase => SecretString::new(
            OsRng.sample_iter(&Alphanumeric).take(PASSPHRASE_LEN).map(char::from).collect::<String>(),
        ),
        SecretClass::SymmetricKey => {
            let mut bytes = [0u8; SYMMETRIC_KEY_BYTES];
            OsRng.fill_bytes(&mut bytes);
            SecretString::new(hex::encode(bytes))
        }
    }
}

/// Check an existing value against the class rules. The error is a
/// human-readable reason that never includes the value.
pub fn validate(class: SecretClass, value: &str, min_length: Option<usize>) -> Result<(), String> {
    if is_placeholder(value) {
        return Err("value is a placeholder".to_string());
    }
    if value.chars().any(char::is_whitespace) {
        return Err("value contains whitespace".to_string());
    }

    match class {
        SecretClass::Token => {
            let min = min_length.unwrap_or(TOKEN_MIN_LEN);
            if value.len() < min {
                return Err(format!("token shorter than {} characters", min));
            }
            if !value.chars().all(|c| c.is_ascii_alphanumeric() || "-_.~+/=".contains(c)) {
                return Err("token contains characters outside the base64/url-safe set".to_string());
            }
        }
        SecretClass::Passphrase => {
            let min = min_length.unwrap_or(PASSPHRASE_MIN_LEN);
            if value.chars().count() < min {
                return Err(format!("passphrase shorter than {} characters", min));
            }
        }
        SecretClass::SymmetricKey => {
            let expected = min_length.unwrap_or(SYMMETRIC_KEY_BYTES * 2);
            if value.len() != expected {
                return Err(format!("symmetric key must be exactly {} hex characters", expected));
            }
            if !value.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err("symmetric key is not hex encoded".to_string());
            }
        }
    }

    Ok(())
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    PLACEHOLDERS.contains(&lower.as_str())
        || (lower.starts_with('<') && lower.ends_with('>'))
        || (lower.starts_with("${") && lower.ends_with('}'))
        || lower.starts_with("your")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_values_validate() {
        for class in [SecretClass::Token, SecretClass::Passphrase, SecretClass::SymmetricKey] {
            let value = generate(class);
            assert!(
                validate(class, value.expose_secret(), None).is_ok(),
                "generated {} must pass its own validation",
                class
            );
        }
    }

    #[test]
    fn test_token_is_32_bytes_of_entropy() {
        let token = generate(SecretClass::Token);
        let decoded = URL_SAFE_NO_PAD.decode(token.expose_secret()).unwrap();
        assert_eq!(decoded.len(), 32);
        assert_eq!(token.len(), 43);
    }

    #[test]
    fn test_symmetric_key_is_hex() {
        let key = generate(SecretClass::SymmetricKey);
        assert_eq!(key.len(), 64);
        assert!(hex::decode(key.expose_secret()).is_ok());
    }

    #[test]
    fn test_generated_values_are_unique() {
        let values: std::collections::HashSet<String> = (0..50)
            .map(|_| generate(SecretClass::Token).expose_secret().to_string())
            .collect();
        assert_eq!(values.len(), 50);
    }

    #[test]
    fn test_placeholders_rejected() {
        for value in ["changeme", "CHANGE_ME", "<your-key>", "${GATEWAY_KEY}", "your-api-key-here"] {
            assert!(validate(SecretClass::Passphrase, value, Some(1)).is_err(), "{value}");
        }
    }

    #[test]
    fn test_token_rules() {
        assert!(validate(SecretClass::Token, "short", None).is_err());
        assert!(validate(SecretClass::Token, &"a".repeat(32), None).is_ok());
        assert!(validate(SecretClass::Token, &format!("{}!", "a".repeat(32)), None).is_err());
        assert!(validate(SecretClass::Token, &"a b".repeat(20), None).is_err());
    }

    #[test]
    fn test_min_length_override() {
        let value = "a".repeat(40);
        assert!(validate(SecretClass::Token, &value, Some(48)).is_err());
        assert!(validate(SecretClass::Passphrase, "abcdefgh", Some(8)).is_ok());
    }

    #[test]
    fn test_symmetric_key_rules() {
        assert!(validate(SecretClass::SymmetricKey, &"ab".repeat(32), None).is_ok());
        assert!(validate(SecretClass::SymmetricKey, &"zz".repeat(32), None).is_err());
        assert!(validate(SecretClass::SymmetricKey, "abcd", None).is_err());
        let long = validate(SecretClass::SymmetricKey, &"ab".repeat(40), None).unwrap_err();
        assert_eq!(long, "symmetric key must be exactly 64 hex characters");
        assert!(validate(SecretClass::SymmetricKey, &"ab".repeat(33), None).is_err());
    }
}
