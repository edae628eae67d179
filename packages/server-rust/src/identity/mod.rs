//! Identity resolution: turns request credentials into a session and
//! principal for the [`AuthGuard`](crate::guard::AuthGuard).
//!
//! - [`jwt`]: stateless HS256 session tokens
//! - [`memory`]: server-side session store keyed by opaque token

pub mod jwt;
pub mod memory;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, COOKIE};
use http::HeaderMap;

use crate::guard::Incoming;

pub use jwt::{JwtIdentityResolver, SessionClaims};
pub use memory::MemorySessionStore;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Resolves the caller's identity from request headers.
///
/// Missing or invalid credentials resolve to [`Incoming::anonymous`];
/// errors are reserved for the resolver's own infrastructure failing.
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an error if the backing session store cannot be reached.
    async fn resolve(&self, headers: &HeaderMap) -> anyhow::Result<Incoming>;
}

/// Extracts the session token from `Authorization: Bearer` or, failing
/// that, from the session cookie.
#[must_use]
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| cookie_token(headers))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_header_is_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(COOKIE, HeaderValue::from_static("session=xyz"));
        assert_eq!(session_token(&headers), Some("abc"));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(session_token(&headers), Some("abc"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; session=tok-1; lang=en"));
        assert_eq!(session_token(&headers), Some("tok-1"));
    }

    #[test]
    fn no_credentials() {
        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
