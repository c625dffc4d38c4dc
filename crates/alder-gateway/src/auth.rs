use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};
use thiserror::Error;

use alder_types::UserId;
use alder_types::api::Claims;

use crate::store::IdentityStore;

/// Why a connection was refused at the gate. All of these close the socket
/// with a policy-violation status before any frame is processed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token in connection query parameters")]
    MissingToken,

    #[error("token rejected")]
    InvalidToken,

    #[error("token subject {0:?} does not resolve to a user")]
    UnknownSubject(String),

    #[error("identity lookup failed")]
    Store(#[source] anyhow::Error),
}

/// Decodes and validates a bearer token, returning its subject (a username).
pub fn verify_token(token: &str, secret: &str) -> Option<String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.sub)
}

/// The authentication gate. Runs exactly once per connection, before the
/// frame loop: token → subject → identity. The token travels as a query
/// parameter because browser WebSocket clients cannot set headers on the
/// upgrade request.
pub async fn authenticate(
    token: Option<&str>,
    secret: &str,
    identities: &Arc<dyn IdentityStore>,
) -> Result<UserId, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    let subject = verify_token(token, secret).ok_or(AuthError::InvalidToken)?;

    let store = identities.clone();
    let username = subject.clone();
    let resolved = tokio::task::spawn_blocking(move || store.resolve_username(&username))
        .await
        .map_err(|e| AuthError::Store(anyhow::anyhow!(e)))?
        .map_err(AuthError::Store)?;

    resolved.ok_or(AuthError::UnknownSubject(subject))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "gateway-test-secret";

    fn token_for(sub: &str, exp: usize) -> String {
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> usize {
        (chrono::Utc::now() + chrono::Duration::days(1)).timestamp() as usize
    }

    struct OneUser;

    impl IdentityStore for OneUser {
        fn resolve_username(&self, username: &str) -> anyhow::Result<Option<UserId>> {
            Ok((username == "alice").then_some(1))
        }

        fn public_keys(
            &self,
            _user_id: UserId,
        ) -> anyhow::Result<Option<alder_types::api::PublicKeys>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn valid_token_resolves_to_identity() {
        let identities: Arc<dyn IdentityStore> = Arc::new(OneUser);
        let token = token_for("alice", far_future());

        let user_id = authenticate(Some(token.as_str()), SECRET, &identities)
            .await
            .unwrap();
        assert_eq!(user_id, 1);
    }

    #[tokio::test]
    async fn missing_token_is_refused() {
        let identities: Arc<dyn IdentityStore> = Arc::new(OneUser);
        let err = authenticate(None, SECRET, &identities).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }

    #[tokio::test]
    async fn garbage_and_wrong_secret_tokens_are_refused() {
        let identities: Arc<dyn IdentityStore> = Arc::new(OneUser);

        let err = authenticate(Some("not-a-jwt"), SECRET, &identities)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        let forged = encode(
            &Header::default(),
            &Claims {
                sub: "alice".into(),
                exp: far_future(),
            },
            &EncodingKey::from_secret(b"some-other-secret"),
        )
        .unwrap();
        let err = authenticate(Some(forged.as_str()), SECRET, &identities)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn expired_token_is_refused() {
        let identities: Arc<dyn IdentityStore> = Arc::new(OneUser);
        let expired = token_for("alice", 1_000_000);

        let err = authenticate(Some(expired.as_str()), SECRET, &identities)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn unresolvable_subject_is_refused() {
        let identities: Arc<dyn IdentityStore> = Arc::new(OneUser);
        let token = token_for("mallory", far_future());

        let err = authenticate(Some(token.as_str()), SECRET, &identities)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownSubject(_)));
    }
}
