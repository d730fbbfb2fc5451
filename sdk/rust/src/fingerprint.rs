//! Hardware fingerprinting.
//!
//! A machine identity is built from up to six weighted components. The
//! combined id is a keyed hash over every present component, while the
//! per-component digests are kept so two fingerprints can be compared
//! fuzzily: a single replaced part (a new NIC, a swapped disk) lowers the
//! similarity score instead of breaking the binding.

use std::collections::BTreeMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use strum::{AsRefStr, EnumString};

use crate::probe::HardwareProbe;

/// Minimum component score for an identity to be usable for activation.
pub const MIN_VALID_SCORE: u8 = 55;

/// Minimum similarity for a stored fingerprint to match the current machine.
pub const SIMILARITY_THRESHOLD: u8 = 60;

/// Application-embedded HMAC key. Recoverable from the binary; it only keeps
/// raw serial numbers off the wire, it is not a secret boundary.
const FINGERPRINT_KEY: &[u8] = b"licensegate/fingerprint/v1:7f3a9c21e84b5d60";

/// Separator between `NAME:value` pairs in the hashed material.
const PAIR_SEPARATOR: &str = "|";

/// Hex characters of a component digest kept in the serialized map.
const COMPONENT_DIGEST_LEN: usize = 32;

/// Values vendors ship when a field was never filled in.
const PLACEHOLDER_VALUES: &[&str] = &[
    "to be filled by o.e.m.",
    "to be filled by oem",
    "default string",
    "system serial number",
    "base board serial number",
    "chassis serial number",
    "not applicable",
    "not specified",
    "none",
    "n/a",
    "oem",
    "o.e.m.",
    "unknown",
    "invalid",
    "123456789",
];

type HmacSha256 = Hmac<Sha256>;

/// Variant order is the canonical (alphabetical) hashing order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum HardwareComponent {
    Bios,
    Cpu,
    Disk,
    Mac,
    Motherboard,
    Tpm,
}

impl HardwareComponent {
    pub const ALL: [HardwareComponent; 6] = [
        Self::Bios,
        Self::Cpu,
        Self::Disk,
        Self::Mac,
        Self::Motherboard,
        Self::Tpm,
    ];

    /// Weights sum to 100.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Cpu => 20,
            Self::Bios => 15,
            Self::Disk => 20,
            Self::Mac => 10,
            Self::Motherboard => 25,
            Self::Tpm => 10,
        }
    }
}

/// Raw values for the components that could be read on this machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareComponentSet {
    values: BTreeMap<HardwareComponent, String>,
}

impl HardwareComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value unless it is empty or a known placeholder.
    /// Returns whether the value was kept.
    pub fn insert(&mut self, component: HardwareComponent, value: &str) -> bool {
        let value = value.trim();
        if is_placeholder(value) {
            return false;
        }
        self.values.insert(component, value.to_string());
        true
    }

    pub fn get(&self, component: HardwareComponent) -> Option<&str> {
        self.values.get(&component).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of the weights of present components.
    pub fn score(&self) -> u8 {
        self.values.keys().map(|c| c.weight()).sum::<u32>().min(100) as u8
    }

    /// Keyed hash over the ordered `NAME:value` pairs, upper-case hex.
    pub fn hash(&self) -> String {
        let material = self
            .values
            .iter()
            .map(|(component, value)| format!("{}:{}", component.as_ref(), value))
            .collect::<Vec<_>>()
            .join(PAIR_SEPARATOR);
        hex::encode_upper(keyed_digest(material.as_bytes()))
    }

    /// Per-component keyed digests, the form that leaves the machine.
    pub fn digests(&self) -> BTreeMap<HardwareComponent, String> {
        self.values
            .iter()
            .map(|(component, value)| {
                let digest = keyed_digest(format!("{}:{}", component.as_ref(), value).as_bytes());
                let mut hex = hex::encode(digest);
                hex.truncate(COMPONENT_DIGEST_LEN);
                (*component, hex)
            })
            .collect()
    }
}

impl FromIterator<(HardwareComponent, String)> for HardwareComponentSet {
    fn from_iter<I: IntoIterator<Item = (HardwareComponent, String)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (component, value) in iter {
            set.insert(component, &value);
        }
        set
    }
}

/// The identity presented to the license server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareIdentity {
    pub hashed_id: String,
    pub short_id: String,
    pub score: u8,
    pub is_valid: bool,
    /// Serialized component digest map (the wire `componentsHash`).
    pub raw_components: String,
}

impl HardwareIdentity {
    pub fn from_components(set: &HardwareComponentSet) -> Self {
        let hashed_id = set.hash();
        let score = set.score();
        let raw_components = serde_json::to_string(&set.digests()).unwrap_or_default();
        Self {
            short_id: short_form(&hashed_id),
            hashed_id,
            score,
            is_valid: score >= MIN_VALID_SCORE,
            raw_components,
        }
    }
}

/// Collects and compares fingerprints through a [`HardwareProbe`].
#[derive(Clone)]
pub struct Fingerprinter {
    probe: Arc<dyn HardwareProbe>,
}

impl Fingerprinter {
    pub fn new(probe: Arc<dyn HardwareProbe>) -> Self {
        Self { probe }
    }

    /// Query every component; failures and placeholders are skipped.
    pub fn collect(&self) -> HardwareComponentSet {
        let mut set = HardwareComponentSet::new();
        for component in HardwareComponent::ALL {
            match self.probe.query(component) {
                Some(value) => {
                    if !set.insert(component, &value) {
                        tracing::debug!(component = component.as_ref(), "Ignoring placeholder hardware value");
                    }
                }
                None => {
                    tracing::debug!(component = component.as_ref(), "Hardware component unavailable");
                }
            }
        }
        set
    }

    pub fn identity(&self) -> HardwareIdentity {
        let identity = HardwareIdentity::from_components(&self.collect());
        if !identity.is_valid {
            tracing::warn!(
                score = identity.score,
                "Hardware fingerprint below minimum score"
            );
        }
        identity
    }

    /// Whether a stored component map still describes this machine.
    pub fn is_match(&self, stored_raw: &str) -> bool {
        let current = HardwareIdentity::from_components(&self.collect());
        similarity_serialized(stored_raw, &current.raw_components) >= SIMILARITY_THRESHOLD
    }
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter").field("probe", &"<probe>").finish()
    }
}

/// Weighted share of components present on either side that match.
///
/// Components missing on both sides are not comparable and do not count.
/// Returns 0 when nothing is comparable.
pub fn similarity(
    a: &BTreeMap<HardwareComponent, String>,
    b: &BTreeMap<HardwareComponent, String>,
) -> u8 {
    let mut total_weight = 0u32;
    let mut matched_weight = 0u32;

    for component in HardwareComponent::ALL {
        let left = a.get(&component);
        let right = b.get(&component);
        if left.is_none() && right.is_none() {
            continue;
        }
        total_weight += component.weight();
        if let (Some(l), Some(r)) = (left, right)
            && l == r
        {
            matched_weight += component.weight();
        }
    }

    if total_weight == 0 {
        return 0;
    }
    (matched_weight * 100 / total_weight) as u8
}

/// [`similarity`] over two serialized component maps; unparsable input
/// compares as empty.
pub fn similarity_serialized(a: &str, b: &str) -> u8 {
    similarity(&parse_components(a), &parse_components(b))
}

pub fn parse_components(raw: &str) -> BTreeMap<HardwareComponent, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Human-readable form: the first 16 hex characters in groups of four.
pub fn short_form(hashed_id: &str) -> String {
    let head: Vec<char> = hashed_id.chars().take(16).collect();
    head.chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

fn keyed_digest(material: &[u8]) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(FINGERPRINT_KEY).expect("HMAC can take key of any size");
    mac.update(material);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn is_placeholder(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let lower = value.to_lowercase();
    if PLACEHOLDER_VALUES.contains(&lower.as_str()) {
        return true;
    }
    // All-zero or all-F serials and MACs ("0000-0000", "FF:FF:FF:FF:FF:FF")
    let significant: Vec<char> = lower.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    significant.is_empty()
        || significant.iter().all(|c| *c == '0')
        || significant.iter().all(|c| *c == 'f')
}
