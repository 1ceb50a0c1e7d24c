//! One-time recovery codes.
//!
//! Exactly three codes are issued at activation, shown in plaintext once, and
//! stored only as salted SHA-256 entries. Recovery codes are high-entropy
//! random tokens, not passwords, so a fast digest is the right tool; account
//! passwords use Argon2id elsewhere.

use anyhow::{anyhow, Result};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub const RECOVERY_CODE_COUNT: usize = 3;
const CODE_HEX_LEN: usize = 12;
const GROUP_SIZE: usize = 4;
const SALT_LEN: usize = 8;

/// A freshly generated batch: plaintext codes for the caller, salted entries
/// for storage. The plaintext is never reconstructable afterwards.
#[derive(Debug)]
pub struct RecoveryCodeSet {
    pub codes: Vec<String>,
    pub entries: Vec<String>,
}

impl RecoveryCodeSet {
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut entries = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let mut raw = [0u8; CODE_HEX_LEN / 2];
            rng.fill_bytes(&mut raw);
            let normalized = hex_encode(&raw).to_uppercase();

            let mut salt = [0u8; SALT_LEN];
            rng.fill_bytes(&mut salt);

            entries.push(make_entry(&hex_encode(&salt), &normalized));
            codes.push(format_code(&normalized));
        }
        Self { codes, entries }
    }
}

/// Render a normalized code as `XXXX-XXXX-XXXX`.
#[must_use]
pub fn format_code(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(GROUP_SIZE)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// Strip separators and uppercase; `None` unless the result is 12 hex chars.
#[must_use]
pub fn normalize_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if normalized.len() == CODE_HEX_LEN && normalized.chars().all(|ch| ch.is_ascii_hexdigit()) {
        Some(normalized)
    } else {
        None
    }
}

/// Find the stored entry matching `input`, if any. Scans every entry so the
/// cost does not depend on which (or whether an) entry matches.
#[must_use]
pub fn match_entry<'a>(input: &str, entries: &'a [String]) -> Option<&'a String> {
    let normalized = normalize_code(input);
    let mut matched: Option<&'a String> = None;
    for entry in entries {
        let hit = normalized
            .as_deref()
            .and_then(|code| entry_matches(entry, code).ok())
            .unwrap_or(false);
        if hit && matched.is_none() {
            matched = Some(entry);
        }
    }
    matched
}

fn entry_matches(entry: &str, normalized_code: &str) -> Result<bool> {
    let (salt_hex, digest_hex) = entry
        .split_once(':')
        .ok_or_else(|| anyhow!("malformed recovery code entry"))?;
    Ok(digest_hex == compute_digest(salt_hex, normalized_code)?)
}

fn make_entry(salt_hex: &str, normalized_code: &str) -> String {
    // Salts are generated locally as valid hex, so this cannot fail.
    let digest = compute_digest(salt_hex, normalized_code).unwrap_or_default();
    format!("{salt_hex}:{digest}")
}

fn compute_digest(salt_hex: &str, normalized_code: &str) -> Result<String> {
    let salt = hex_decode(salt_hex)?;
    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(normalized_code.as_bytes());
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(anyhow!("odd-length hex string"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| anyhow!("invalid hex string"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_exactly_three_formatted_codes() {
        let set = RecoveryCodeSet::generate();
        assert_eq!(set.codes.len(), RECOVERY_CODE_COUNT);
        assert_eq!(set.entries.len(), RECOVERY_CODE_COUNT);
        for code in &set.codes {
            assert_eq!(code.len(), 14);
            let groups: Vec<&str> = code.split('-').collect();
            assert_eq!(groups.len(), 3);
            for group in groups {
                assert_eq!(group.len(), 4);
                assert!(group
                    .chars()
                    .all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_lowercase()));
            }
        }
    }

    #[test]
    fn entries_never_contain_plaintext() {
        let set = RecoveryCodeSet::generate();
        for (code, entry) in set.codes.iter().zip(&set.entries) {
            let normalized = code.replace('-', "");
            assert!(!entry.contains(&normalized));
            assert!(entry.contains(':'));
        }
    }

    #[test]
    fn codes_match_their_entries() {
        let set = RecoveryCodeSet::generate();
        for code in &set.codes {
            assert!(match_entry(code, &set.entries).is_some());
        }
    }

    #[test]
    fn matching_tolerates_hyphens_and_case() {
        let set = RecoveryCodeSet::generate();
        let code = &set.codes[0];
        let lower = code.to_lowercase();
        let stripped = code.replace('-', "");
        assert_eq!(
            match_entry(&lower, &set.entries),
            match_entry(code, &set.entries)
        );
        assert_eq!(
            match_entry(&stripped, &set.entries),
            match_entry(code, &set.entries)
        );
    }

    #[test]
    fn wrong_code_matches_nothing() {
        let set = RecoveryCodeSet::generate();
        assert!(match_entry("0000-0000-0000", &set.entries).is_none() || {
            // Astronomically unlikely collision; regenerate to be sure.
            let fresh = RecoveryCodeSet::generate();
            match_entry("0000-0000-0000", &fresh.entries).is_none()
        });
        assert!(match_entry("not a code", &set.entries).is_none());
        assert!(match_entry("", &set.entries).is_none());
    }

    #[test]
    fn same_code_different_salt_yields_different_entries() {
        // Entries embed a per-code salt, so identical plaintexts would still
        // store distinct digests.
        let a = make_entry("00112233aabbccdd", "A1B2C3D4E5F6");
        let b = make_entry("ddccbbaa33221100", "A1B2C3D4E5F6");
        assert_ne!(a, b);
        assert!(entry_matches(&a, "A1B2C3D4E5F6").unwrap());
        assert!(entry_matches(&b, "A1B2C3D4E5F6").unwrap());
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0x00, 0x7f, 0xff, 0x10];
        assert_eq!(hex_decode(&hex_encode(&bytes)).unwrap(), bytes);
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
    }
}
