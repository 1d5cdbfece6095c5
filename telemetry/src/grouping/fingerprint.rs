use super::sanitize::sanitize;
use crate::metrics_defs::FINGERPRINT_FALLBACKS;
use sha2::{Digest, Sha256};
use shared::counter;

/// Stable identity of an error, as lowercase hex SHA-256.
///
/// The type, message and traceback are joined with `:` and sanitized as one
/// string before hashing. If sanitization is unavailable the fingerprint
/// covers only the unsanitized type and message.
pub fn fingerprint(error_type: &str, error_message: &str, traceback: &str) -> String {
    let base = format!("{error_type}:{error_message}:{traceback}");
    match sanitize(&base) {
        Some(sanitized) => digest(&sanitized),
        None => {
            counter!(FINGERPRINT_FALLBACKS).increment(1);
            fallback_fingerprint(error_type, error_message)
        }
    }
}

pub(crate) fn fallback_fingerprint(error_type: &str, error_message: &str) -> String {
    digest(&format!("{error_type}:{error_message}"))
}

fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint("KeyError", "'user'", "File views.py");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, fingerprint("KeyError", "'user'", "File views.py"));
    }

    #[test]
    fn test_variable_parts_collapse() {
        let a = fingerprint(
            "ValueError",
            "user 42 at 0xdeadbeef",
            "File app.py, line 17",
        );
        let b = fingerprint(
            "ValueError",
            "user 7 at 0x1f",
            "File app.py, line 230",
        );
        assert_eq!(a, b);

        let a = fingerprint("LookupError", "no order 123e4567-e89b-12d3-a456-426614174000", "tb");
        let b = fingerprint("LookupError", "no order 9b2f1c3e-0000-4aaa-8bbb-ccccdddd0000", "tb");
        assert_eq!(a, b);

        let a = fingerprint("AuthError", "denied for bob@example.com", "tb");
        let b = fingerprint("AuthError", "denied for carol@corp.io", "tb");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_errors_differ() {
        assert_ne!(
            fingerprint("KeyError", "'user'", "tb"),
            fingerprint("KeyError", "'order'", "tb")
        );
        assert_ne!(
            fingerprint("KeyError", "'user'", "tb"),
            fingerprint("IndexError", "'user'", "tb")
        );
    }

    #[test]
    fn test_fallback_ignores_traceback() {
        assert_eq!(
            fallback_fingerprint("KeyError", "'user'"),
            hex::encode(Sha256::digest(b"KeyError:'user'"))
        );
    }
}
