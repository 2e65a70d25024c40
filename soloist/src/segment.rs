//! Ownership claim over a named shared-memory segment
//!
//! The segment's content is irrelevant; only who holds the exclusive lock on
//! it matters. The name is created with `O_CREAT|O_EXCL` and the owner keeps a
//! non-blocking exclusive `flock` on the open descriptor. The kernel drops that
//! lock when the descriptor closes, so a crashed owner never leaves a stale
//! claim behind.
//!
//! A live process never unlinks the name. Unlinking would let a later creator
//! lock a fresh object while someone still holds the old one.

use std::fs::File;

use fs2::FileExt;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;
use tracing::{debug, info};

use crate::error::CoordinationError;
use crate::key::CoordinationKey;

/// Result of a claim attempt
#[derive(Debug)]
pub enum ClaimOutcome {
    /// This process now holds the segment
    Owned(OwnershipToken),
    /// Another live process holds the segment
    AlreadyOwned,
    /// The segment could not be created or opened at all
    Failed(CoordinationError),
}

impl ClaimOutcome {
    pub fn is_owned(&self) -> bool {
        matches!(self, ClaimOutcome::Owned(_))
    }
}

/// Binding to the named segment; dropping it releases ownership
#[derive(Debug)]
pub struct OwnershipToken {
    name: String,
    _segment: File,
}

impl OwnershipToken {
    /// Segment name this token holds
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give up ownership now instead of at drop
    pub fn release(self) {
        info!(name = %self.name, "Released ownership token");
    }
}

impl Drop for OwnershipToken {
    fn drop(&mut self) {
        // Closing the descriptor drops the flock
        debug!(name = %self.name, "OwnershipToken::drop: lock released");
    }
}

/// Attempt to become the owner of `key`
///
/// Never blocks. The only tie-breakers are the kernel's `O_EXCL` create and the
/// non-blocking exclusive lock.
pub fn try_claim_ownership(key: &CoordinationKey) -> ClaimOutcome {
    let name = key.segment_name();
    debug!(%name, "try_claim_ownership: probing segment");

    match attach(&name) {
        Ok(segment) => {
            debug!(%name, "try_claim_ownership: segment exists");
            lock(name, segment)
        }
        Err(Errno::ENOENT) => {
            debug!(%name, "try_claim_ownership: segment missing, creating");
            match create(&name) {
                Ok(segment) => {
                    if let Err(e) = segment.set_len(1) {
                        return ClaimOutcome::Failed(CoordinationError::SegmentCreateFailed { name, source: e });
                    }
                    lock(name, segment)
                }
                Err(Errno::EEXIST) => {
                    debug!(%name, "try_claim_ownership: lost create race, re-probing");
                    match attach(&name) {
                        Ok(segment) => lock(name, segment),
                        Err(e) => failed(name, e),
                    }
                }
                Err(e) => failed(name, e),
            }
        }
        Err(e) => failed(name, e),
    }
}

/// Check whether the segment for `key` currently exists
///
/// Existence alone doesn't prove a live owner; a crashed owner leaves the name
/// behind without its lock.
pub fn segment_exists(key: &CoordinationKey) -> bool {
    attach(&key.segment_name()).is_ok()
}

fn attach(name: &str) -> nix::Result<File> {
    shm_open(name, OFlag::O_RDWR, Mode::empty()).map(File::from)
}

fn create(name: &str) -> nix::Result<File> {
    shm_open(
        name,
        OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )
    .map(File::from)
}

fn lock(name: String, segment: File) -> ClaimOutcome {
    match segment.try_lock_exclusive() {
        Ok(()) => {
            info!(%name, "Claimed ownership of segment");
            ClaimOutcome::Owned(OwnershipToken { name, _segment: segment })
        }
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            debug!(%name, "lock: segment held by another process");
            ClaimOutcome::AlreadyOwned
        }
        Err(e) => ClaimOutcome::Failed(CoordinationError::SegmentCreateFailed { name, source: e }),
    }
}

fn failed(name: String, errno: Errno) -> ClaimOutcome {
    ClaimOutcome::Failed(CoordinationError::SegmentCreateFailed {
        name,
        source: std::io::Error::from(errno),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use uuid::Uuid;

    /// Unique key whose segment name is unlinked when the guard drops
    pub(crate) struct TestKey(pub CoordinationKey);

    impl TestKey {
        pub(crate) fn new() -> Self {
            let key = CoordinationKey::new(format!("soloist-test-{}", Uuid::now_v7().simple())).unwrap();
            Self(key)
        }
    }

    impl Drop for TestKey {
        fn drop(&mut self) {
            let _ = nix::sys::mman::shm_unlink(self.0.segment_name().as_str());
        }
    }

    #[test]
    fn test_first_claim_owns() {
        let key = TestKey::new();
        assert!(!segment_exists(&key.0));

        let outcome = try_claim_ownership(&key.0);
        assert!(outcome.is_owned());
        assert!(segment_exists(&key.0));
    }

    #[test]
    fn test_second_claim_sees_owner() {
        let key = TestKey::new();
        let first = try_claim_ownership(&key.0);
        assert!(first.is_owned());

        let second = try_claim_ownership(&key.0);
        assert!(matches!(second, ClaimOutcome::AlreadyOwned));
    }

    #[test]
    fn test_release_allows_reclaim() {
        let key = TestKey::new();
        let ClaimOutcome::Owned(token) = try_claim_ownership(&key.0) else {
            panic!("expected ownership");
        };
        assert_eq!(token.name(), key.0.segment_name());
        token.release();

        // The name stays behind but nobody holds the lock any more
        assert!(segment_exists(&key.0));
        assert!(try_claim_ownership(&key.0).is_owned());
    }

    #[test]
    fn test_dropped_token_releases() {
        let key = TestKey::new();
        {
            let outcome = try_claim_ownership(&key.0);
            assert!(outcome.is_owned());
        }
        assert!(try_claim_ownership(&key.0).is_owned());
    }

    #[test]
    fn test_racing_claims_have_one_winner() {
        let key = TestKey::new();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let key = key.0.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    try_claim_ownership(&key)
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let owned = outcomes.iter().filter(|o| o.is_owned()).count();
        let already = outcomes
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::AlreadyOwned))
            .count();
        assert_eq!(owned, 1);
        assert_eq!(already, 7);
    }
}
