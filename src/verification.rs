//! VerificationCodeService (C4): in-memory, single-use numeric codes keyed
//! by email. Grounded directly on
//! `examples/original_source/src/service/VerificationCodeService.cpp` —
//! same code length, same expiry, same redeem-deletes-entry semantics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

const CODE_LENGTH: usize = 6;
const CODE_EXPIRY: Duration = Duration::from_secs(10 * 60);

struct CodeEntry {
    code: String,
    expires_at: Instant,
}

pub struct VerificationCodeService {
    codes: Mutex<HashMap<String, CodeEntry>>,
}

impl Default for VerificationCodeService {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationCodeService {
    pub fn new() -> Self {
        Self {
            codes: Mutex::new(HashMap::new()),
        }
    }

    /// Generates a fresh code for `email`, overwriting any previous entry.
    pub async fn generate(&self, email: &str) -> String {
        let code = generate_digits(CODE_LENGTH);
        let mut codes = self.codes.lock().await;
        codes.insert(
            email.to_owned(),
            CodeEntry {
                code: code.clone(),
                expires_at: Instant::now() + CODE_EXPIRY,
            },
        );
        code
    }

    /// Returns true iff an unexpired entry exists for `email` matching
    /// `code`. A successful or expired lookup deletes the entry.
    pub async fn verify(&self, email: &str, code: &str) -> bool {
        let mut codes = self.codes.lock().await;
        let Some(entry) = codes.get(email) else {
            return false;
        };
        if Instant::now() > entry.expires_at {
            codes.remove(email);
            return false;
        }
        let matched = entry.code == code;
        if matched {
            codes.remove(email);
        }
        matched
    }

    /// Best-effort sweep; correctness does not depend on this running.
    pub async fn cleanup_expired(&self) {
        let mut codes = self.codes.lock().await;
        let now = Instant::now();
        codes.retain(|_, entry| entry.expires_at > now);
    }
}

fn generate_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from_digit(rng.gen_range(0..10), 10).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generated_code_is_six_digits() {
        let svc = VerificationCodeService::new();
        let code = svc.generate("a@x.com").await;
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn verify_is_single_use() {
        let svc = VerificationCodeService::new();
        let code = svc.generate("a@x.com").await;
        assert!(svc.verify("a@x.com", &code).await);
        assert!(!svc.verify("a@x.com", &code).await);
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_without_consuming_entry() {
        let svc = VerificationCodeService::new();
        let code = svc.generate("a@x.com").await;
        assert!(!svc.verify("a@x.com", "000000").await);
        assert!(svc.verify("a@x.com", &code).await);
    }

    #[tokio::test]
    async fn regenerating_overwrites_the_previous_code() {
        let svc = VerificationCodeService::new();
        let first = svc.generate("a@x.com").await;
        let second = svc.generate("a@x.com").await;
        if first == second {
            return;
        }
        assert!(!svc.verify("a@x.com", &first).await);
        assert!(svc.verify("a@x.com", &second).await);
    }
}
