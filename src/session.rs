//! Session values handed to the synchronizer by the session provider.

use crate::error::{FeedError, Result};
use crate::types::SubjectId;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fmt;

/// Claims checked, in order, for the subject identifier.
const SUBJECT_CLAIMS: [&str; 3] = ["id", "userId", "sub"];

/// Credential plus subject, immutable for the lifetime of one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    credential: String,
    subject: SubjectId,
}

impl Session {
    pub fn new(credential: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            subject: SubjectId(subject.into()),
        }
    }

    /// Build a session from a JWT-shaped bearer token.
    ///
    /// Only the claims segment is decoded; the signature is the server's
    /// business. The subject is the first present claim of `id`, `userId`
    /// and `sub`.
    pub fn from_bearer_token(token: &str) -> Result<Self> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let mut segments = token.split('.');
        let claims_segment = match (segments.next(), segments.next()) {
            (Some(_), Some(claims)) if !claims.is_empty() => claims,
            _ => {
                return Err(FeedError::InvalidCredential(
                    "token has no claims segment".to_string(),
                ))
            }
        };

        let bytes = URL_SAFE_NO_PAD.decode(claims_segment.trim_end_matches('='))?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| FeedError::InvalidCredential(e.to_string()))?;

        let subject = SUBJECT_CLAIMS
            .iter()
            .find_map(|claim| match claims.get(*claim) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                FeedError::InvalidCredential("token carries no subject claim".to_string())
            })?;

        Ok(Self {
            credential: token.to_string(),
            subject: SubjectId(subject),
        })
    }

    /// Raw credential, sent as a bearer token and at channel handshake.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Value for an `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.credential)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject", &self.subject)
            .field("credential", &"<redacted>")
            .finish()
    }
}
