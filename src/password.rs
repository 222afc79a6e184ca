use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::SaltString,
};
use rand::{Rng, distr::Alphanumeric};
use std::sync::LazyLock;
use subtle::ConstantTimeEq;

use crate::error::AppError;

/// Length of the one-time password generated for new accounts.
pub const GENERATED_PASSWORD_LEN: usize = 12;

fn hash_blocking(password: &str) -> Result<String, AppError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("salt encoding failed: {e}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

fn verify_blocking(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("unparseable password hash in credential store: {}", e);
            false
        }
    }
}

// Verified against when the account does not exist, so an unknown email costs
// the same Argon2 work as a wrong password.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_blocking(&generate_password()).ok());

/// hash_password
///
/// Hashes a plaintext password with Argon2id and a fresh random salt,
/// returning the PHC string stored in the credential store. Runs on the
/// blocking pool.
pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || hash_blocking(&password))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
}

/// verify_password
///
/// Checks `password` against the stored hash of an account, or against a
/// throwaway hash when there is no account (always false). Returns false for
/// a stored hash that cannot be parsed.
pub async fn verify_password(password: &str, stored_hash: Option<&str>) -> bool {
    let password = password.to_owned();
    let stored_hash = stored_hash.map(str::to_owned);
    let outcome = tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_blocking(&password, &hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                verify_blocking(&password, dummy);
            }
            false
        }
    })
    .await;

    outcome.unwrap_or_else(|e| {
        tracing::error!("password verification task failed: {}", e);
        false
    })
}

/// constant_time_eq
///
/// String equality whose running time does not depend on where the inputs
/// differ. Used for the configured admin password.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    (a.len().ct_eq(&b.len()) & a_padded.ct_eq(&b_padded)).into()
}

/// generate_password
///
/// Random alphanumeric one-time password, guaranteed to contain a letter and a
/// digit so it satisfies the self-service password policy.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    loop {
        let candidate: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(GENERATED_PASSWORD_LEN)
            .map(char::from)
            .collect();
        if crate::validation::is_valid_password(&candidate) {
            return candidate;
        }
    }
}
