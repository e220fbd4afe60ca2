use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::ValidationError;

/// Prefix of every anonymous owner token.
pub const ANONYMOUS_TOKEN_PREFIX: &str = "anon_";

/// Per-request caller identity, supplied by the session layer.
///
/// Passed explicitly into every operation so ownership checks and admission
/// control never read ambient request state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Network origin of the request (client address as seen by the edge).
    pub network_origin: String,
    /// Authenticated user id, if the caller is logged in.
    pub user_id: Option<String>,
    /// Anonymous session token, if the caller carries one.
    pub anonymous_token: Option<String>,
}

impl CallerIdentity {
    #[must_use]
    pub fn anonymous(network_origin: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            network_origin: network_origin.into(),
            user_id: None,
            anonymous_token: Some(token.into()),
        }
    }

    #[must_use]
    pub fn user(network_origin: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            network_origin: network_origin.into(),
            user_id: Some(user_id.into()),
            anonymous_token: None,
        }
    }

    /// Attaches an anonymous token (an authenticated caller that still holds
    /// the cookie from before login).
    #[must_use]
    pub fn with_anonymous_token(mut self, token: impl Into<String>) -> Self {
        self.anonymous_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Token new pages are owned by: the user id when logged in, otherwise
    /// the anonymous token.
    #[must_use]
    pub fn owner_token(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.anonymous_token.as_deref())
    }

    /// Key used by the admission controller: origin plus whichever id the
    /// caller presents.
    #[must_use]
    pub fn admission_key(&self) -> String {
        let who = match (&self.user_id, &self.anonymous_token) {
            (Some(user), _) => format!("u:{user}"),
            (None, Some(token)) => format!("a:{token}"),
            (None, None) => "-".to_string(),
        };
        format!("{}|{who}", self.network_origin)
    }
}

/// Anonymous ownership claim as carried by the client (cookie value plus the
/// time it was minted). Not persisted beyond the page's `owner_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousClaim {
    pub token: String,
    /// Epoch millis at which the token was minted.
    pub issued_at: i64,
}

impl AnonymousClaim {
    /// Checks the token shape (see [`is_well_formed_token`]).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidToken`] for anything else.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_well_formed_token(&self.token) {
            Ok(())
        } else {
            Err(ValidationError::InvalidToken)
        }
    }

    /// Whether the claim is older than `max_age_millis` at `now`.
    #[must_use]
    pub fn is_expired(&self, now: i64, max_age_millis: i64) -> bool {
        now.saturating_sub(self.issued_at) > max_age_millis
    }
}

/// Returns `true` for tokens of the form `anon_<1..=64 of [a-z0-9_-]>`.
///
/// Freshly minted tokens carry 32 hex digits; older clients used shorter ids,
/// which are still accepted.
#[must_use]
pub fn is_well_formed_token(token: &str) -> bool {
    token.strip_prefix(ANONYMOUS_TOKEN_PREFIX).is_some_and(|rest| {
        (1..=64).contains(&rest.len())
            && rest
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'_' | b'-'))
    })
}

/// Constant-time equality for owner tokens.
#[must_use]
pub fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "anon_0123456789abcdef0123456789abcdef";

    #[test]
    fn owner_token_prefers_user() {
        let id = CallerIdentity::user("10.0.0.1", "u1").with_anonymous_token(TOKEN);
        assert_eq!(id.owner_token(), Some("u1"));
        assert!(id.is_authenticated());

        let anon = CallerIdentity::anonymous("10.0.0.1", TOKEN);
        assert_eq!(anon.owner_token(), Some(TOKEN));
        assert!(!anon.is_authenticated());

        assert_eq!(CallerIdentity::default().owner_token(), None);
    }

    #[test]
    fn admission_key_distinguishes_identities() {
        let a = CallerIdentity::anonymous("1.2.3.4", TOKEN).admission_key();
        let u = CallerIdentity::user("1.2.3.4", "u1").admission_key();
        assert_ne!(a, u);
        assert_eq!(u, "1.2.3.4|u:u1");
    }

    #[test]
    fn token_shape() {
        assert!(is_well_formed_token(TOKEN));
        assert!(is_well_formed_token("anon_abc"));
        assert!(!is_well_formed_token("anon_"));
        assert!(!is_well_formed_token("anon_ABC"));
        assert!(!is_well_formed_token("anon_a b"));
        assert!(!is_well_formed_token("0123456789abcdef0123456789abcdef"));
    }

    #[test]
    fn claim_expiry() {
        let claim = AnonymousClaim {
            token: TOKEN.to_string(),
            issued_at: 1_000,
        };
        assert!(claim.validate().is_ok());
        assert!(!claim.is_expired(2_000, 1_000));
        assert!(claim.is_expired(2_001, 1_000));
    }

    #[test]
    fn tokens_match_is_exact() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "abcd"));
    }
}
