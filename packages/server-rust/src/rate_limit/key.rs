//! Client-address derivation for rate limiting.

use http::HeaderMap;

/// Bucket shared by every request whose origin cannot be attributed.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the rate-limit key for a request.
///
/// Uses the first address in `x-forwarded-for`, then `x-real-ip`, and
/// otherwise the shared [`UNKNOWN_CLIENT`] bucket so that unattributable
/// clients still consume one common budget.
#[must_use]
pub fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
