use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const NO_TOKEN: u64 = 0;

/// Marker identifying how recent an install invocation is.
///
/// Tokens minted by the same [`StalenessArbiter`] are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Tracks which install invocation was started most recently.
///
/// Clones share the same register, so every handle to one arbiter agrees on
/// which token is latest. Independent arbiters never interfere.
///
/// The register also carries the commit lock, so every installer sharing an
/// arbiter serializes its check-and-replace on the same mutex.
#[derive(Debug, Clone, Default)]
pub struct StalenessArbiter {
    register: Arc<Register>,
}

#[derive(Debug, Default)]
struct Register {
    latest: AtomicU64,
    commit: Mutex<()>,
}

impl StalenessArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new token and record it as the latest one.
    ///
    /// The token is produced by the same atomic update that publishes it, so
    /// two concurrent callers can never leave an older token in the register.
    pub fn begin_invocation(&self) -> RequestToken {
        RequestToken(self.register.latest.fetch_add(1, Ordering::AcqRel) + 1)
    }

    #[must_use]
    pub fn is_still_latest(&self, token: RequestToken) -> bool {
        self.register.latest.load(Ordering::Acquire) == token.0
    }

    #[must_use]
    pub fn latest(&self) -> Option<RequestToken> {
        match self.register.latest.load(Ordering::Acquire) {
            NO_TOKEN => None,
            value => Some(RequestToken(value)),
        }
    }

    /// Held across the staleness check and the replacing rename.
    pub(crate) fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.register
            .commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::StalenessArbiter;

    #[test]
    fn fresh_arbiter_has_no_latest_token() {
        let arbiter = StalenessArbiter::new();
        assert_eq!(arbiter.latest(), None);
    }

    #[test]
    fn newer_invocation_supersedes_older_one() {
        let arbiter = StalenessArbiter::new();

        let first = arbiter.begin_invocation();
        assert!(arbiter.is_still_latest(first));

        let second = arbiter.begin_invocation();
        assert!(second > first);
        assert!(!arbiter.is_still_latest(first));
        assert!(arbiter.is_still_latest(second));
        assert_eq!(arbiter.latest(), Some(second));
    }

    #[test]
    fn clones_share_the_register() {
        let arbiter = StalenessArbiter::new();
        let handle = arbiter.clone();

        let first = arbiter.begin_invocation();
        let second = handle.begin_invocation();

        assert!(!arbiter.is_still_latest(first));
        assert!(arbiter.is_still_latest(second));
    }

    #[test]
    fn independent_arbiters_do_not_interfere() {
        let left = StalenessArbiter::new();
        let right = StalenessArbiter::new();

        let token = left.begin_invocation();
        let _ = right.begin_invocation();
        let _ = right.begin_invocation();

        assert!(left.is_still_latest(token));
    }

    #[test]
    fn concurrent_invocations_mint_unique_tokens() {
        let arbiter = StalenessArbiter::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let arbiter = arbiter.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| arbiter.begin_invocation())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for token in handle.join().expect("minting thread should not panic") {
                assert!(seen.insert(token), "token {token} was minted twice");
            }
        }

        let max = seen.iter().max().copied().expect("tokens should be minted");
        assert_eq!(seen.len(), 8000);
        assert_eq!(arbiter.latest(), Some(max));
    }

    #[test]
    fn token_displays_as_hex() {
        let arbiter = StalenessArbiter::new();
        let mut token = arbiter.begin_invocation();
        for _ in 0..254 {
            token = arbiter.begin_invocation();
        }
        assert_eq!(token.get(), 255);
        assert_eq!(token.to_string(), "ff");
    }
}
