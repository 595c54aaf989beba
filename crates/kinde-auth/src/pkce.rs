//! CSRF state and PKCE (RFC 7636) material for one login attempt
//!
//! The state nonce is echoed back by the identity provider and must match
//! exactly. The PKCE verifier stays client-side until the token exchange;
//! only its S256 challenge goes into the authorize redirect.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Ephemeral values for a single in-flight login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub state: String,
    pub code_verifier: Option<String>,
    pub code_challenge: Option<String>,
}

impl AuthState {
    /// Fresh state nonce, plus a verifier/challenge pair when `pkce` is set.
    pub fn generate(pkce: bool) -> Self {
        let state = generate_state();
        if !pkce {
            return Self {
                state,
                code_verifier: None,
                code_challenge: None,
            };
        }
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            state,
            code_verifier: Some(verifier),
            code_challenge: Some(challenge),
        }
    }
}

/// Random CSRF nonce: 32 bytes, URL-safe base64 (43 characters).
pub fn generate_state() -> String {
    random_url_safe::<32>()
}

/// Random PKCE code verifier.
///
/// 64 random bytes encode to 86 URL-safe characters, inside the 43-128
/// range RFC 7636 allows.
pub fn generate_verifier() -> String {
    random_url_safe::<64>()
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

fn random_url_safe<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn verifier_length_within_rfc_range() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(is_url_safe(&verifier), "verifier: {verifier}");
    }

    #[test]
    fn state_is_url_safe_and_unique() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 43);
        assert!(is_url_safe(&a));
        assert_ne!(a, b, "two state nonces must not collide");
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") in base64url
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn pkce_state_carries_matching_challenge() {
        let auth = AuthState::generate(true);
        let verifier = auth.code_verifier.as_deref().unwrap();
        assert_eq!(
            auth.code_challenge.as_deref(),
            Some(compute_challenge(verifier).as_str())
        );
        let decoded = URL_SAFE_NO_PAD
            .decode(auth.code_challenge.unwrap())
            .expect("valid base64url");
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn plain_state_has_no_verifier() {
        let auth = AuthState::generate(false);
        assert!(auth.code_verifier.is_none());
        assert!(auth.code_challenge.is_none());
        assert!(!auth.state.is_empty());
    }
}
