//! E-mail verification codes for registration

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Wrong guesses allowed per address before its codes are thrown away
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Wrong verification code")]
    Wrong,
    #[error("Verification code expired")]
    Expired,
    #[error("Too many wrong codes, request a new one")]
    TooManyAttempts,
}

#[derive(Debug, Clone)]
struct PendingCode {
    email: String,
    code: String,
    issued_at: DateTime<Utc>,
}

#[derive(Default)]
struct Ledger {
    codes: Vec<PendingCode>,
    /// Wrong guesses per address since its last success or lockout
    misses: HashMap<String, u32>,
}

/// Outstanding verification codes; several may be live per address
pub struct VerificationCodes {
    ledger: RwLock<Ledger>,
    lifetime: Duration,
}

impl VerificationCodes {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
            lifetime,
        }
    }

    /// Issue a 6-digit code for `email`, pruning expired ones first
    pub async fn issue(&self, email: &str) -> String {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let now = Utc::now();

        let mut ledger = self.ledger.write().await;
        let codes = &mut ledger.codes;
        let before = codes.len();
        codes.retain(|c| now < c.issued_at + self.lifetime);
        if codes.len() < before {
            debug!("Pruned {} expired verification codes", before - codes.len());
        }
        codes.push(PendingCode {
            email: email.to_ascii_lowercase(),
            code: code.clone(),
            issued_at: now,
        });

        // Mail delivery is out of scope; the log stands in for it
        info!("Verification code for {}: {}", email, code);
        code
    }

    /// Check and consume a code. After [`MAX_FAILED_ATTEMPTS`] wrong
    /// guesses every code issued to the address is invalidated.
    pub async fn redeem(&self, email: &str, code: &str) -> Result<(), VerificationError> {
        let email = email.to_ascii_lowercase();
        let code = code.trim();

        let mut ledger = self.ledger.write().await;
        let Some(index) = ledger
            .codes
            .iter()
            .position(|c| c.email == email && c.code == code)
        else {
            let misses = ledger.misses.entry(email.clone()).or_insert(0);
            *misses += 1;
            if *misses < MAX_FAILED_ATTEMPTS {
                return Err(VerificationError::Wrong);
            }
            ledger.misses.remove(&email);
            ledger.codes.retain(|c| c.email != email);
            warn!("Too many wrong verification codes for {}", email);
            return Err(VerificationError::TooManyAttempts);
        };

        let pending = ledger.codes.remove(index);
        if Utc::now() >= pending.issued_at + self.lifetime {
            return Err(VerificationError::Expired);
        }
        ledger.misses.remove(&email);
        Ok(())
    }
}

/// Loose shape check for an e-mail address: `local@domain.tld`
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };

    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());

    local_ok && host_ok && tld_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_redeem_once() {
        let codes = VerificationCodes::new(Duration::minutes(10));
        let code = codes.issue("alice@example.com").await;

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(codes.redeem("Alice@Example.com", &code).await, Ok(()));
        assert_eq!(
            codes.redeem("alice@example.com", &code).await,
            Err(VerificationError::Wrong)
        );
    }

    #[tokio::test]
    async fn test_code_bound_to_address() {
        let codes = VerificationCodes::new(Duration::minutes(10));
        let code = codes.issue("alice@example.com").await;

        assert_eq!(
            codes.redeem("bob@example.com", &code).await,
            Err(VerificationError::Wrong)
        );
    }

    #[tokio::test]
    async fn test_expired_code() {
        let codes = VerificationCodes::new(Duration::zero());
        let code = codes.issue("alice@example.com").await;

        assert_eq!(
            codes.redeem("alice@example.com", &code).await,
            Err(VerificationError::Expired)
        );
    }

    #[tokio::test]
    async fn test_guessing_invalidates_codes() {
        let codes = VerificationCodes::new(Duration::minutes(10));
        let code = codes.issue("alice@example.com").await;
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 1..MAX_FAILED_ATTEMPTS {
            assert_eq!(
                codes.redeem("alice@example.com", wrong).await,
                Err(VerificationError::Wrong)
            );
        }
        assert_eq!(
            codes.redeem("alice@example.com", wrong).await,
            Err(VerificationError::TooManyAttempts)
        );
        // The real code went with the lockout
        assert_eq!(
            codes.redeem("alice@example.com", &code).await,
            Err(VerificationError::Wrong)
        );

        let fresh = codes.issue("alice@example.com").await;
        assert_eq!(codes.redeem("alice@example.com", &fresh).await, Ok(()));
    }

    #[tokio::test]
    async fn test_misses_are_per_address() {
        let codes = VerificationCodes::new(Duration::minutes(10));
        let code = codes.issue("bob@example.com").await;

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let _ = codes.redeem("mallory@example.com", "123456").await;
        }
        assert_eq!(codes.redeem("bob@example.com", &code).await, Ok(()));
    }

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+tag@mail.example.org"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("al ice@example.com"));
        assert!(!is_valid_email("alice@example.c"));
    }
}
