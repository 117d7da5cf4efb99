//! Address normalization helpers.
//!
//! Network addresses follow the `<local>@<server>` convention: individual
//! accounts live under [`USER_SERVER`], groups under [`GROUP_SERVER`]. The
//! functions here are total: malformed input still yields a syntactically
//! valid address, which the network will simply reject at resolution time.

/// Server suffix for individual accounts.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server suffix for groups.
pub const GROUP_SERVER: &str = "g.us";

/// Normalize a human-entered phone number into an individual address.
///
/// Accepts `08123...`, `628123...`, `+628123...`, or an already-normalized
/// `628123...@s.whatsapp.net`; the leading trunk digit is rewritten to the
/// deployment's country code when the number does not already carry it.
/// Idempotent: normalizing an already-normalized address returns it
/// unchanged.
pub fn normalize_user(raw: &str, country_code: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        return trimmed.to_string();
    }

    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let local = if digits.starts_with(country_code) {
        digits.to_string()
    } else {
        // Drop the trunk digit (usually "0") and prefix the country code.
        let mut rewritten = String::from(country_code);
        rewritten.extend(digits.chars().skip(1));
        rewritten
    };

    format!("{}@{}", local, USER_SERVER)
}

/// Normalize a group identifier into a group address.
///
/// Appends the group server suffix when the input carries none. Idempotent.
pub fn normalize_group(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        return trimmed.to_string();
    }
    format!("{}@{}", trimmed, GROUP_SERVER)
}

/// Whether an address points at a group.
pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SERVER)
}
