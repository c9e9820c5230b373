use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;

use dispatch_common::DispatchError;

use crate::store::StoreClient;

/// Hash a new plaintext password into a PHC-encoded Argon2id string ready
/// to hand to [`StoreClient::set_password_hash`].
pub fn hash_password(plaintext: &str) -> Result<String, DispatchError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DispatchError::Internal(format!("hashing password: {e}")))
}

/// Verify a connecting node's shared password against the store.
///
/// If no password has ever been set, authentication is refused rather than
/// silently permitted — the safer of the two behaviors the original
/// bootstrap logic could take, and the one this server adopts.
pub async fn verify_password(store: &StoreClient, candidate: &str) -> Result<bool, DispatchError> {
    let Some(phc) = store.latest_password_hash().await? else {
        tracing::warn!("authentication attempted before any password was configured");
        return Ok(false);
    };

    let parsed = PasswordHash::new(&phc)
        .map_err(|e| DispatchError::Internal(format!("parsing stored password hash: {e}")))?;

    Ok(Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok())
}
