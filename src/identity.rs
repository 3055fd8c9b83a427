//! Bearer-token verification.
//!
//! Only the subject id matters to the rest of the service: it selects the
//! pools a caller may touch and the throttle key alerts are tracked under.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid token")]
    Invalid,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub subject_id: String,
}

pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Subject, IdentityError>;
}

/// One configured token, as read from `[[identity.tokens]]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub subject: String,
}

/// Verifies tokens against a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(grants: &[TokenGrant]) -> Self {
        let tokens = grants
            .iter()
            .map(|g| (g.token.clone(), g.subject.clone()))
            .collect();
        Self { tokens }
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Subject, IdentityError> {
        // Accept both a raw token and an `Authorization` header value.
        let token = token.trim();
        let token = match token.strip_prefix("Bearer") {
            Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
            _ => token,
        };
        if token.is_empty() {
            return Err(IdentityError::Missing);
        }
        self.tokens
            .get(token)
            .map(|subject_id| Subject {
                subject_id: subject_id.clone(),
            })
            .ok_or(IdentityError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(&[TokenGrant {
            token: "s3cret".into(),
            subject: "user1".into(),
        }])
    }

    #[test]
    fn test_known_token_yields_subject() {
        assert_eq!(verifier().verify("s3cret").unwrap().subject_id, "user1");
        assert_eq!(verifier().verify("Bearer s3cret").unwrap().subject_id, "user1");
    }

    #[test]
    fn test_unknown_or_empty_token_is_rejected() {
        assert_eq!(verifier().verify("nope"), Err(IdentityError::Invalid));
        assert_eq!(verifier().verify("  "), Err(IdentityError::Missing));
        assert_eq!(verifier().verify("Bearer "), Err(IdentityError::Missing));
    }
}
