//! Key Validator: defense-in-depth rejection of malformed or weak unseal
//! key shares, and redaction of sensitive-looking values in error output.
//!
//! Behavior here is pure (no I/O), so both variants are trivially
//! parallel-safe and tested with plain `#[test]`s.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::UnsealError;

const MIN_LEN: usize = 1;
const MAX_LEN: usize = 1024;

const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "token",
    "credential",
    "admin",
    "root",
    "auth",
    "login",
    "session",
    "/etc/passwd",
    "/proc/",
    "c:\\windows\\",
    "127.0.0.1",
    "localhost",
    "192.168.",
    "10.0.0.",
];

const REDACTED: &str = "[REDACTED]";

/// Returns true when `value`'s lowercase form contains a known sensitive
/// substring. Shared by both validator variants and by callers that need to
/// decide whether to redact a value before logging it.
#[must_use]
pub fn is_sensitive(value: &str) -> bool {
    let lower = value.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

fn redact_if_sensitive(value: &str) -> &str {
    if is_sensitive(value) {
        REDACTED
    } else {
        value
    }
}

/// Shared validation contract implemented by [`DefaultKeyValidator`] and
/// [`StrictKeyValidator`].
pub trait KeyValidator: Send + Sync {
    /// Validates every key in `keys` plus the set-level invariants
    /// (non-empty, threshold in range, no duplicates).
    ///
    /// # Errors
    ///
    /// Returns [`UnsealError::Validation`] on the first violation found, in
    /// declaration order: emptiness, threshold bounds, per-key validity,
    /// duplicates.
    fn validate_set(&self, keys: &[String], threshold: u32) -> Result<(), UnsealError>;

    /// Validates a single key share in isolation.
    ///
    /// # Errors
    ///
    /// Returns [`UnsealError::Validation`] describing the violated
    /// invariant, with the key substituted for `[REDACTED]` when it looks
    /// sensitive.
    fn validate_one(&self, key: &str) -> Result<(), UnsealError>;
}

fn find_duplicates(keys: &[String]) -> Option<(usize, usize)> {
    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            if keys[i] == keys[j] {
                return Some((i, j));
            }
        }
    }
    None
}

fn validate_set_common(
    validator: &dyn KeyValidator,
    keys: &[String],
    threshold: u32,
) -> Result<(), UnsealError> {
    if keys.is_empty() {
        return Err(UnsealError::validation("key list must not be empty"));
    }
    if threshold < 1 {
        return Err(UnsealError::validation("threshold must be at least 1"));
    }
    if threshold as usize > keys.len() {
        return Err(UnsealError::validation(format!(
            "threshold ({threshold}) exceeds number of keys ({})",
            keys.len()
        )));
    }
    for key in keys {
        validator.validate_one(key)?;
    }
    if let Some((i, j)) = find_duplicates(keys) {
        return Err(UnsealError::validation(format!(
            "duplicate key at indices {i} and {j}"
        )));
    }
    Ok(())
}

/// Decodes base64 and runs the shared weak-key heuristics. Shared by both
/// variants; `Strict` layers its own checks on top of this result.
fn decode_and_check_weakness(key: &str) -> Result<Vec<u8>, UnsealError> {
    let decoded = STANDARD.decode(key).map_err(|_| {
        UnsealError::validation(format!(
            "key '{}' is not valid standard base64",
            redact_if_sensitive(key)
        ))
    })?;

    if is_sensitive(key) || is_sensitive(&String::from_utf8_lossy(&decoded)) {
        return Err(UnsealError::validation(format!(
            "key '{REDACTED}' looks like a credential or sensitive value, not a key share"
        )));
    }

    if decoded.is_empty() {
        return Err(UnsealError::validation(format!(
            "key '{}' decodes to zero bytes",
            redact_if_sensitive(key)
        )));
    }
    if decoded.iter().all(|&b| b == 0) {
        return Err(UnsealError::validation(format!(
            "key '{}' decodes to all-zero bytes",
            redact_if_sensitive(key)
        )));
    }
    if decoded.len() > 1 && decoded.iter().all(|&b| b == decoded[0]) {
        return Err(UnsealError::validation(format!(
            "key '{}' decodes to a single repeated byte",
            redact_if_sensitive(key)
        )));
    }
    if is_periodic(&decoded, 2) || is_periodic(&decoded, 4) {
        return Err(UnsealError::validation(format!(
            "key '{}' decodes to a periodic pattern and is cryptographically weak",
            redact_if_sensitive(key)
        )));
    }
    Ok(decoded)
}

/// True when `decoded` is at least 8 bytes and is exactly `bytes` repeated.
fn is_periodic(decoded: &[u8], period: usize) -> bool {
    if decoded.len() < 8 || decoded.len() % period != 0 {
        return false;
    }
    let cycle = &decoded[..period];
    decoded.chunks_exact(period).all(|chunk| chunk == cycle)
}

/// Reference validator: base64 well-formedness, length bounds, and the
/// shared weak-key heuristics. No content allow/deny lists.
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyValidator;

impl KeyValidator for DefaultKeyValidator {
    fn validate_set(&self, keys: &[String], threshold: u32) -> Result<(), UnsealError> {
        validate_set_common(self, keys, threshold)
    }

    fn validate_one(&self, key: &str) -> Result<(), UnsealError> {
        if key.is_empty() {
            return Err(UnsealError::validation("key must not be empty"));
        }
        if key.len() < MIN_LEN || key.len() > MAX_LEN {
            return Err(UnsealError::validation(format!(
                "key length {} is outside the allowed range [{MIN_LEN}, {MAX_LEN}]",
                key.len()
            )));
        }
        decode_and_check_weakness(key)?;
        Ok(())
    }
}

/// Stricter validator layered on top of the default checks: an optional
/// required decoded length, a decoded-content prefix allowlist, and a
/// case-insensitive substring denylist checked against both raw and decoded
/// forms.
#[derive(Debug, Clone, Default)]
pub struct StrictKeyValidator {
    /// Exact decoded length required, when non-zero.
    pub required_decoded_len: usize,
    /// Decoded content must start with one of these; empty allows all.
    pub allowed_prefixes: Vec<Vec<u8>>,
    /// Case-insensitive substrings forbidden in the raw or decoded form.
    pub denylist: Vec<String>,
}

impl StrictKeyValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_denylist(&self, key: &str, decoded: &[u8]) -> Result<(), UnsealError> {
        if self.denylist.is_empty() {
            return Ok(());
        }
        let raw_lower = key.to_lowercase();
        let decoded_lossy_lower = String::from_utf8_lossy(decoded).to_lowercase();
        for term in &self.denylist {
            let term_lower = term.to_lowercase();
            if raw_lower.contains(&term_lower) || decoded_lossy_lower.contains(&term_lower) {
                return Err(UnsealError::validation(format!(
                    "key '{}' matches a denylisted term",
                    redact_if_sensitive(key)
                )));
            }
        }
        Ok(())
    }
}

impl KeyValidator for StrictKeyValidator {
    fn validate_set(&self, keys: &[String], threshold: u32) -> Result<(), UnsealError> {
        validate_set_common(self, keys, threshold)
    }

    fn validate_one(&self, key: &str) -> Result<(), UnsealError> {
        if key.is_empty() {
            return Err(UnsealError::validation("key must not be empty"));
        }
        if key.len() < MIN_LEN || key.len() > MAX_LEN {
            return Err(UnsealError::validation(format!(
                "key length {} is outside the allowed range [{MIN_LEN}, {MAX_LEN}]",
                key.len()
            )));
        }
        let decoded = decode_and_check_weakness(key)?;

        if self.required_decoded_len > 0 && decoded.len() != self.required_decoded_len {
            return Err(UnsealError::validation(format!(
                "key '{}' decodes to {} bytes, expected {}",
                redact_if_sensitive(key),
                decoded.len(),
                self.required_decoded_len
            )));
        }
        if !self.allowed_prefixes.is_empty()
            && !self
                .allowed_prefixes
                .iter()
                .any(|prefix| decoded.starts_with(prefix))
        {
            return Err(UnsealError::validation(format!(
                "key '{}' does not match any allowed decoded prefix",
                redact_if_sensitive(key)
            )));
        }
        self.check_denylist(key, &decoded)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn is_sensitive_matches_known_patterns() {
        assert!(is_sensitive("my-password-123"));
        assert!(is_sensitive("contains LOCALHOST uppercased"));
        assert!(!is_sensitive("perfectly ordinary value"));
    }

    #[test]
    fn default_rejects_empty_key() {
        let v = DefaultKeyValidator;
        assert!(v.validate_one("").is_err());
    }

    #[test]
    fn default_rejects_non_base64() {
        let v = DefaultKeyValidator;
        assert!(v.validate_one("not-base64!!!").is_err());
    }

    #[test]
    fn default_rejects_all_zero_bytes() {
        let v = DefaultKeyValidator;
        let key = b64(&[0u8; 16]);
        assert!(v.validate_one(&key).is_err());
    }

    #[test]
    fn default_rejects_all_identical_bytes() {
        let v = DefaultKeyValidator;
        let key = b64(&[7u8; 16]);
        assert!(v.validate_one(&key).is_err());
    }

    #[test]
    fn default_rejects_two_byte_periodic_pattern() {
        let v = DefaultKeyValidator;
        let bytes: Vec<u8> = [1u8, 2].iter().cycle().take(16).copied().collect();
        let key = b64(&bytes);
        assert!(v.validate_one(&key).is_err());
    }

    #[test]
    fn default_rejects_four_byte_periodic_pattern() {
        let v = DefaultKeyValidator;
        let bytes: Vec<u8> = [1u8, 2, 3, 4].iter().cycle().take(16).copied().collect();
        let key = b64(&bytes);
        assert!(v.validate_one(&key).is_err());
    }

    #[test]
    fn default_accepts_plausible_random_key() {
        let v = DefaultKeyValidator;
        let key = b64(&[
            0x4a, 0x1f, 0x9c, 0x77, 0x03, 0xe8, 0x5b, 0x22, 0xd1, 0x6e, 0x90, 0xab, 0x3c, 0xf4,
            0x17, 0x88,
        ]);
        assert!(v.validate_one(&key).is_ok());
    }

    #[test]
    fn default_redacts_sensitive_looking_key_in_error() {
        let v = DefaultKeyValidator;
        let err = v.validate_one("password").unwrap_err();
        let message = err.to_string();
        assert!(message.contains(REDACTED));
        assert!(!message.contains("password-decodes") && !message.to_lowercase().contains("password"));
    }

    #[test]
    fn validate_set_rejects_empty_list() {
        let v = DefaultKeyValidator;
        assert!(v.validate_set(&[], 1).is_err());
    }

    #[test]
    fn validate_set_rejects_threshold_out_of_range() {
        let v = DefaultKeyValidator;
        let keys = vec![b64(b"plausible-key-material-1")];
        assert!(v.validate_set(&keys, 0).is_err());
        assert!(v.validate_set(&keys, 2).is_err());
    }

    #[test]
    fn validate_set_rejects_duplicates() {
        let v = DefaultKeyValidator;
        let key = b64(b"plausible-key-material-1");
        let keys = vec![key.clone(), key];
        assert!(v.validate_set(&keys, 1).is_err());
    }

    #[test]
    fn validate_set_accepts_distinct_valid_keys() {
        let v = DefaultKeyValidator;
        let keys = vec![
            b64(b"plausible-key-material-111"),
            b64(b"plausible-key-material-222"),
        ];
        assert!(v.validate_set(&keys, 2).is_ok());
    }

    #[test]
    fn strict_enforces_required_decoded_length() {
        let v = StrictKeyValidator {
            required_decoded_len: 32,
            ..StrictKeyValidator::new()
        };
        let short = b64(b"plausible-key-material-1");
        assert!(v.validate_one(&short).is_err());
    }

    #[test]
    fn strict_enforces_allowed_prefixes() {
        let v = StrictKeyValidator {
            allowed_prefixes: vec![b"vlt-".to_vec()],
            ..StrictKeyValidator::new()
        };
        let matching = b64(b"vlt-plausible-key-material-1");
        let non_matching = b64(b"other-plausible-key-material");
        assert!(v.validate_one(&matching).is_ok());
        assert!(v.validate_one(&non_matching).is_err());
    }

    #[test]
    fn strict_enforces_denylist_on_raw_and_decoded_forms() {
        let v = StrictKeyValidator {
            denylist: vec!["forbidden".to_owned()],
            ..StrictKeyValidator::new()
        };
        let key = b64(b"this-is-a-forbidden-value-here");
        assert!(v.validate_one(&key).is_err());
    }
}
