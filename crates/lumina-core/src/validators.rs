//! Input validation for configuration actions.
//!
//! Pure functions: no I/O, no logging. Every caller that rejects input
//! is responsible for auditing the rejection.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Default maximum length of an operator comment attached to a blacklist entry
pub const DEFAULT_COMMENT_MAX_LEN: usize = 128;

/// WAF protection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WafMode {
    /// Actively block detected attacks
    Block,
    /// Log detected attacks without blocking
    Detect,
    /// Protection disabled
    Off,
}

impl WafMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WafMode::Block => "block",
            WafMode::Detect => "detect",
            WafMode::Off => "off",
        }
    }
}

impl std::fmt::Display for WafMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map a free-form mode token onto a protection mode.
///
/// Aliases: `default` means detect, `disable` means off.
pub fn normalize_mode(raw: &str) -> Option<WafMode> {
    match raw.trim().to_lowercase().as_str() {
        "block" => Some(WafMode::Block),
        "detect" | "default" => Some(WafMode::Detect),
        "off" | "disable" => Some(WafMode::Off),
        _ => None,
    }
}

/// Validate an IPv4/IPv6 address or CIDR block and return its canonical form.
///
/// CIDR blocks are non-strict: host bits are masked off, so `10.0.0.5/24`
/// canonicalizes to `10.0.0.0/24`.
pub fn validate_ip_or_cidr(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let Some((addr, prefix)) = value.split_once('/') else {
        return value.parse::<IpAddr>().ok().map(|ip| ip.to_string());
    };

    let prefix = prefix.trim();
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let prefix: u8 = prefix.parse().ok()?;

    match addr.trim().parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            if prefix > 32 {
                return None;
            }
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            let network = Ipv4Addr::from(u32::from(v4) & mask);
            Some(format!("{}/{}", network, prefix))
        }
        IpAddr::V6(v6) => {
            if prefix > 128 {
                return None;
            }
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            let network = Ipv6Addr::from(u128::from(v6) & mask);
            Some(format!("{}/{}", network, prefix))
        }
    }
}

/// Strip control characters, collapse whitespace and bound length.
///
/// Never fails; an empty input yields an empty string.
pub fn sanitize_comment(raw: &str, max_len: usize) -> String {
    let without_controls: String = raw
        .chars()
        .filter(|c| !matches!(*c, '\u{0}'..='\u{1f}' | '\u{7f}'))
        .collect();
    let collapsed = without_controls.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_len {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(max_len).collect();
    truncated.trim_end().to_string()
}
