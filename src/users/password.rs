use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand::rngs::SysRng;
use rand::TryRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AvaBotError, Result};

const SALT_BYTES: usize = 16;
const OUTPUT_LEN: usize = 32;
const LEGACY_PREFIX: &str = "pbkdf2:sha256";

/// PHC string, `$pbkdf2-sha256$i=<rounds>,l=32$<salt>$<hash>`.
pub fn hash_password(password: &str, rounds: u32) -> Result<String> {
    let mut bytes = [0u8; SALT_BYTES];
    let mut rng = SysRng;
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    let salt = SaltString::encode_b64(&bytes).map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    let params = Params {
        rounds,
        output_length: OUTPUT_LEN,
    };
    let hash = Pbkdf2
        .hash_password_customized(password.as_bytes(), None, None, params, &salt)
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    Ok(hash.to_string())
}

/// Accepts PHC strings and the `pbkdf2:sha256:<n>$<salt>$<hex>` form found
/// in imported databases. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if stored.starts_with(LEGACY_PREFIX) {
        return verify_legacy(password, stored);
    }
    match PasswordHash::new(stored) {
        Ok(parsed) => Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn verify_legacy(password: &str, stored: &str) -> bool {
    let mut sections = stored.splitn(3, '$');
    let (Some(method), Some(salt), Some(expected_hex)) =
        (sections.next(), sections.next(), sections.next())
    else {
        return false;
    };
    let rounds = match method.strip_prefix(LEGACY_PREFIX) {
        Some("") => 260_000,
        Some(rest) => match rest.strip_prefix(':').and_then(|n| n.parse::<u32>().ok()) {
            Some(rounds) if rounds > 0 => rounds,
            _ => return false,
        },
        None => return false,
    };
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    // Full SHA-256 length; `ct_eq` rejects any other length.
    let mut derived = [0u8; OUTPUT_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut derived);
    derived[..].ct_eq(&expected[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted_phc_strings() {
        let first = hash_password("secreto1", 1_000).unwrap();
        let second = hash_password("secreto1", 1_000).unwrap();
        assert!(first.starts_with("$pbkdf2-sha256$i=1000,l=32$"));
        assert_ne!(first, second);
        assert_ne!(first, "secreto1");
        assert!(verify_password("secreto1", &first));
        assert!(!verify_password("secreto2", &first));
    }

    #[test]
    fn legacy_hashes_still_verify() {
        let mut derived = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(b"clave123", b"abcSALT", 1_000, &mut derived);
        let stored = format!("pbkdf2:sha256:1000$abcSALT${}", hex::encode(derived));
        assert!(verify_password("clave123", &stored));
        assert!(!verify_password("clave124", &stored));
    }

    #[test]
    fn legacy_digests_of_the_wrong_length_never_verify() {
        let mut derived = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(b"clave123", b"abcSALT", 1_000, &mut derived);
        let truncated = format!("pbkdf2:sha256:1000$abcSALT${}", hex::encode(&derived[..16]));
        assert!(!verify_password("clave123", &truncated));
        let extended = format!("pbkdf2:sha256:1000$abcSALT${}00", hex::encode(derived));
        assert!(!verify_password("clave123", &extended));
        assert!(!verify_password("clave123", "pbkdf2:sha256:1000$abcSALT$"));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "plaintext"));
        assert!(!verify_password("x", "pbkdf2:sha256:abc$salt$00"));
        assert!(!verify_password("x", "pbkdf2:sha256:1000$salt"));
    }
}
