//! Caller identity from headers set by the fronting auth layer.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use pagedrop_core::{AnonymousClaim, CallerIdentity};

use super::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ANONYMOUS_TOKEN_HEADER: &str = "x-anonymous-token";
pub const ANONYMOUS_ISSUED_AT_HEADER: &str = "x-anonymous-issued-at";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Extracted [`CallerIdentity`]. Never rejects: a request without identity
/// headers becomes an identity with neither id, and the operation decides.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerIdentity);

impl FromRequestParts<AppState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self(identity_from_headers(
            &parts.headers,
            peer,
            state.config.trust_forwarded_for,
        )))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Builds the identity. The network origin is the socket peer, or with
/// `trust_forwarded_for` the first `x-forwarded-for` hop when present.
#[must_use]
pub fn identity_from_headers(
    headers: &HeaderMap,
    peer: Option<String>,
    trust_forwarded_for: bool,
) -> CallerIdentity {
    let forwarded = if trust_forwarded_for {
        header_str(headers, FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    } else {
        None
    };
    let network_origin = forwarded
        .or(peer)
        .unwrap_or_else(|| "unknown".to_string());

    CallerIdentity {
        network_origin,
        user_id: header_str(headers, USER_ID_HEADER).map(str::to_string),
        anonymous_token: header_str(headers, ANONYMOUS_TOKEN_HEADER).map(str::to_string),
    }
}

/// The anonymous claim carried alongside the identity, when both the token
/// and its mint time are present. An unparsable timestamp yields `None`.
#[must_use]
pub fn anonymous_claim(headers: &HeaderMap) -> Option<AnonymousClaim> {
    let token = header_str(headers, ANONYMOUS_TOKEN_HEADER)?;
    let issued_at = header_str(headers, ANONYMOUS_ISSUED_AT_HEADER)?
        .parse::<i64>()
        .ok()?;
    Some(AnonymousClaim {
        token: token.to_string(),
        issued_at,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn trusted_forwarded_for_takes_first_hop() {
        let h = headers(&[
            (FORWARDED_FOR_HEADER, "203.0.113.9, 10.0.0.1"),
            (USER_ID_HEADER, "u1"),
        ]);
        let id = identity_from_headers(&h, Some("10.0.0.2".into()), true);
        assert_eq!(id.network_origin, "203.0.113.9");
        assert_eq!(id.user_id.as_deref(), Some("u1"));
        assert!(id.anonymous_token.is_none());
    }

    #[test]
    fn untrusted_forwarded_for_is_ignored() {
        let h = headers(&[(FORWARDED_FOR_HEADER, "203.0.113.9")]);
        let id = identity_from_headers(&h, Some("10.0.0.2".into()), false);
        assert_eq!(id.network_origin, "10.0.0.2");

        // Rotating the header must not change the admission key.
        let rotated = headers(&[(FORWARDED_FOR_HEADER, "198.51.100.77")]);
        let again = identity_from_headers(&rotated, Some("10.0.0.2".into()), false);
        assert_eq!(id.admission_key(), again.admission_key());
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        let id = identity_from_headers(&HeaderMap::new(), Some("10.0.0.2".into()), true);
        assert_eq!(id.network_origin, "10.0.0.2");
        assert_eq!(id.owner_token(), None);

        let id = identity_from_headers(&HeaderMap::new(), None, true);
        assert_eq!(id.network_origin, "unknown");
    }

    #[test]
    fn blank_headers_are_ignored() {
        let h = headers(&[(USER_ID_HEADER, "  "), (ANONYMOUS_TOKEN_HEADER, "anon_abc")]);
        let id = identity_from_headers(&h, None, false);
        assert!(id.user_id.is_none());
        assert_eq!(id.owner_token(), Some("anon_abc"));
    }

    #[test]
    fn claim_requires_token_and_timestamp() {
        let h = headers(&[
            (ANONYMOUS_TOKEN_HEADER, "anon_abc"),
            (ANONYMOUS_ISSUED_AT_HEADER, "1700000000000"),
        ]);
        let claim = anonymous_claim(&h).unwrap();
        assert_eq!(claim.token, "anon_abc");
        assert_eq!(claim.issued_at, 1_700_000_000_000);

        let h = headers(&[(ANONYMOUS_TOKEN_HEADER, "anon_abc")]);
        assert!(anonymous_claim(&h).is_none());

        let h = headers(&[
            (ANONYMOUS_TOKEN_HEADER, "anon_abc"),
            (ANONYMOUS_ISSUED_AT_HEADER, "yesterday"),
        ]);
        assert!(anonymous_claim(&h).is_none());
    }
}
