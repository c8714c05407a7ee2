use crate::core::domain::error::ValidationError;
use regex::Regex;

/// Interface name patterns excluded from collection by default: container
/// bridges, veth pairs, libvirt/SDN bridges, USB gadgets and loopback.
pub const DEFAULT_INTERFACE_BLACKLIST: &[&str] = &[
    "docker.*", "veth.*", "vnet.*", "virbr.*", "br-.*", "usb.*", "lo",
];

/// A validated set of regular expressions matched against guest interface names.
///
/// Every pattern must match the whole name, so `lo` excludes `lo` but not `lo0`.
#[derive(Debug, Clone)]
pub struct InterfaceBlacklist {
    patterns: Vec<Regex>,
}

impl InterfaceBlacklist {
    /// Compiles the given patterns, anchoring each one to the full name.
    pub fn new<I, S>(patterns: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| validate_pattern(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// An empty blacklist that keeps every interface.
    pub fn allow_all() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Returns true if `name` matches any pattern.
    #[must_use]
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

impl Default for InterfaceBlacklist {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_INTERFACE_BLACKLIST
                .iter()
                .filter_map(|pattern| validate_pattern(pattern).ok())
                .collect(),
        }
    }
}

/// Validates and compiles a single blacklist pattern.
pub(crate) fn validate_pattern(pattern: &str) -> Result<Regex, ValidationError> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(ValidationError::field(
            "INTERFACES_BLACKLIST",
            "Pattern cannot be empty",
        ));
    }
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        ValidationError::field(
            "INTERFACES_BLACKLIST",
            format!("Invalid pattern '{pattern}': {e}"),
        )
    })
}
