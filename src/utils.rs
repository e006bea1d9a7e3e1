use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand_core::OsRng;

use crate::errors::AppError;

const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|err| AppError::internal(format!("invalid password hash: {err}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Percentage of `current` against `target`, rounded to two decimals.
///
/// Returns `None` when the target is zero or negative, so callers can tell
/// "no meaningful percentage" apart from 0% execution.
pub fn execution_percentage(current: f64, target: f64) -> Option<f64> {
    if target > 0.0 {
        Some(round2(current / target * 100.0))
    } else {
        None
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(execution_percentage(1.0, 3.0), Some(33.33));
        assert_eq!(execution_percentage(2.0, 3.0), Some(66.67));
        assert_eq!(execution_percentage(50.0, 200.0), Some(25.0));
    }

    #[test]
    fn percentage_can_exceed_one_hundred() {
        assert_eq!(execution_percentage(150.0, 100.0), Some(150.0));
    }

    #[test]
    fn zero_or_negative_target_yields_none() {
        assert_eq!(execution_percentage(10.0, 0.0), None);
        assert_eq!(execution_percentage(10.0, -5.0), None);
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery").expect("hash");
        assert!(verify_password("correct horse battery", &hash).expect("verify"));
        assert!(!verify_password("wrong password", &hash).expect("verify"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(hash_password("short").is_err());
    }
}
