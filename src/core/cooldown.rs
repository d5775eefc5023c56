//! Cooldown-duration policy for provider failures.

use crate::core::budget::Cooldown;

/// Cooldown when no rule matches.
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;
/// Cooldown for a resource without a usable credential.
pub const CREDENTIAL_MISSING_COOLDOWN_SECS: u64 = 300;
/// Cooldown after a transport failure or timeout.
pub const NETWORK_COOLDOWN_SECS: u64 = 120;

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// (code, subcode) pairs, checked before [`CODE_RULES`].
const SUBCODE_RULES: &[((i64, i64), u64)] = &[((80004, 2_446_079), 1800)];

/// Error code rules.
const CODE_RULES: &[(i64, u64)] = &[(429, 3600), (4, 900), (17, 1800), (80004, 1800)];

/// Seconds to cool down for a failed response, most specific rule first.
#[must_use]
pub fn cooldown_seconds(
    error_code: Option<i64>,
    error_subcode: Option<i64>,
    http_status: Option<u16>,
) -> u64 {
    if let (Some(code), Some(subcode)) = (error_code, error_subcode) {
        if let Some((_, s)) = SUBCODE_RULES.iter().find(|(pair, _)| *pair == (code, subcode)) {
            return *s;
        }
    }
    if let Some(code) = error_code {
        if let Some((_, s)) = CODE_RULES.iter().find(|(c, _)| *c == code) {
            return *s;
        }
    }
    if http_status == Some(HTTP_TOO_MANY_REQUESTS) {
        return 3600;
    }
    DEFAULT_COOLDOWN_SECS
}

/// Whether a failed response carries a rate-limit signal worth a cooldown:
/// any provider error code, or HTTP 429.
#[must_use]
pub const fn is_rate_limit_signal(error_code: Option<i64>, http_status: Option<u16>) -> bool {
    error_code.is_some() || matches!(http_status, Some(HTTP_TOO_MANY_REQUESTS))
}

/// Build the cooldown for a failed response, if it signals one.
#[must_use]
pub fn cooldown_for_response(
    error_code: Option<i64>,
    error_subcode: Option<i64>,
    http_status: Option<u16>,
) -> Option<Cooldown> {
    is_rate_limit_signal(error_code, http_status).then(|| Cooldown {
        seconds: cooldown_seconds(error_code, error_subcode, http_status),
        error_code,
        error_subcode,
    })
}
