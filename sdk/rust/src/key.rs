//! License key shape: `XXXXX-XXXXX-XXXXX-XXXXX-XXXXX`.

use rand::Rng;
use rand::rngs::OsRng;

/// Upper-case letters and digits without the look-alikes I, O, 0 and 1.
pub const KEY_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const GROUPS: usize = 5;
const GROUP_LEN: usize = 5;
const MASK: &str = "*****";

/// Validation, canonicalization and redaction of license keys.
pub struct KeyFormat;

impl KeyFormat {
    /// Whether `key` is already in canonical form.
    pub fn validate(key: &str) -> bool {
        let groups: Vec<&str> = key.split('-').collect();
        groups.len() == GROUPS
            && groups
                .iter()
                .all(|g| g.len() == GROUP_LEN && g.chars().all(is_key_char))
    }

    /// Canonical form of user input, or `None` if it cannot be a key.
    ///
    /// Accepts any case, surrounding whitespace, spaces or underscores as
    /// separators, and the 25 characters with no separators at all.
    pub fn normalize(input: &str) -> Option<String> {
        let upper = input.trim().to_uppercase();
        let bare: String = upper
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' ' | '\t'))
            .collect();

        if bare.chars().count() != GROUPS * GROUP_LEN || !bare.chars().all(is_key_char) {
            return None;
        }

        // Separators, if any, must sit on group boundaries
        let has_separators = bare.len() != upper.len();
        if has_separators {
            let groups: Vec<&str> = upper
                .split(|c: char| matches!(c, '-' | '_' | ' ' | '\t'))
                .filter(|g| !g.is_empty())
                .collect();
            if groups.len() != GROUPS || groups.iter().any(|g| g.len() != GROUP_LEN) {
                return None;
            }
        }

        let chars: Vec<char> = bare.chars().collect();
        Some(
            chars
                .chunks(GROUP_LEN)
                .map(|chunk| chunk.iter().collect::<String>())
                .collect::<Vec<_>>()
                .join("-"),
        )
    }

    /// Log-safe form: first and last groups kept, the rest starred out.
    pub fn mask(key: &str) -> String {
        let groups: Vec<&str> = key.split('-').collect();
        if groups.len() < 2 {
            return MASK.to_string();
        }
        let mut masked = Vec::with_capacity(groups.len());
        masked.push(groups[0]);
        masked.extend(std::iter::repeat_n(MASK, groups.len() - 2));
        masked.push(groups[groups.len() - 1]);
        masked.join("-")
    }

    /// A fresh random key in canonical form.
    pub fn generate() -> String {
        let chars: Vec<char> = KEY_ALPHABET.chars().collect();
        let mut rng = OsRng;

        let mut part = || -> String {
            (0..GROUP_LEN)
                .map(|_| chars[rng.gen_range(0..chars.len())])
                .collect()
        };

        (0..GROUPS).map(|_| part()).collect::<Vec<_>>().join("-")
    }
}

fn is_key_char(c: char) -> bool {
    KEY_ALPHABET.contains(c)
}
