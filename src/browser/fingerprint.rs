use anyhow::Result;
use rand::{thread_rng, Rng};

use crate::cli::config::BrowserFingerprint;

/// Picks a browser fingerprint per fetch attempt.
///
/// A retry under a different egress point also presents a different
/// fingerprint, so an address switch is not undone by an identical browser
/// identity.
pub struct FingerprintManager {
    fingerprints: Vec<BrowserFingerprint>,
}

impl FingerprintManager {
    pub fn new(fingerprints: Vec<BrowserFingerprint>) -> Self {
        Self { fingerprints }
    }

    /// Select a random fingerprint from the pool
    pub fn random_fingerprint(&self) -> Result<BrowserFingerprint> {
        if self.fingerprints.is_empty() {
            anyhow::bail!("No fingerprints configured");
        }

        let mut rng = thread_rng();
        Ok(self.fingerprints[rng.gen_range(0..self.fingerprints.len())].clone())
    }

    /// Select a fingerprint other than `previous` when the pool allows it
    pub fn rotate_from(&self, previous: &str) -> Result<BrowserFingerprint> {
        let others: Vec<&BrowserFingerprint> = self
            .fingerprints
            .iter()
            .filter(|f| f.name != previous)
            .collect();

        if others.is_empty() {
            return self.random_fingerprint();
        }

        let mut rng = thread_rng();
        Ok(others[rng.gen_range(0..others.len())].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::Viewport;

    fn fingerprint(name: &str) -> BrowserFingerprint {
        BrowserFingerprint {
            name: name.to_string(),
            user_agent: format!("{} UA", name),
            accept_language: "en-US,en;q=0.9".to_string(),
            viewport: Viewport { width: 1920, height: 1080 },
        }
    }

    #[test]
    fn test_empty_pool_is_an_error() {
        let manager = FingerprintManager::new(vec![]);
        assert!(manager.random_fingerprint().is_err());
    }

    #[test]
    fn test_rotate_avoids_previous() {
        let manager = FingerprintManager::new(vec![fingerprint("a"), fingerprint("b")]);
        for _ in 0..10 {
            assert_eq!(manager.rotate_from("a").unwrap().name, "b");
        }
    }

    #[test]
    fn test_rotate_with_single_entry_reuses_it() {
        let manager = FingerprintManager::new(vec![fingerprint("only")]);
        assert_eq!(manager.rotate_from("only").unwrap().name, "only");
    }
}
