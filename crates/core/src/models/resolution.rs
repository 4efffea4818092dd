use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::errors::{DispatcherError, DispatcherResult};

/// The three ways a received message can be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Removed from the queue permanently.
    Acknowledged,
    /// Returned to the queue for redelivery.
    Released,
    /// Routed to the dead-letter path.
    Rejected,
}

impl Resolution {
    fn code(self) -> u8 {
        match self {
            Resolution::Acknowledged => 1,
            Resolution::Released => 2,
            Resolution::Rejected => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Resolution::Acknowledged),
            2 => Some(Resolution::Released),
            3 => Some(Resolution::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::Acknowledged => "acknowledged",
            Resolution::Released => "released",
            Resolution::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Lock-free first-wins latch shared by every `QueueMessage` implementation.
///
/// The claim happens before the transport call, so two racing resolutions
/// can never both reach the broker.
#[derive(Debug, Default)]
pub struct ResolutionGuard {
    state: AtomicU8,
}

impl ResolutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, message_id: &str, resolution: Resolution) -> DispatcherResult<()> {
        match self
            .state
            .compare_exchange(0, resolution.code(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(existing) => Err(DispatcherError::AlreadyResolved {
                id: message_id.to_string(),
                resolution: Resolution::from_code(existing)
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }

    pub fn current(&self) -> Option<Resolution> {
        Resolution::from_code(self.state.load(Ordering::Acquire))
    }

    pub fn is_resolved(&self) -> bool {
        self.current().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_claim_wins() {
        let guard = ResolutionGuard::new();
        assert_eq!(guard.current(), None);

        guard.claim("m-1", Resolution::Acknowledged).unwrap();
        assert_eq!(guard.current(), Some(Resolution::Acknowledged));

        let err = guard.claim("m-1", Resolution::Released).unwrap_err();
        assert!(matches!(
            err,
            DispatcherError::AlreadyResolved { ref resolution, .. } if resolution == "acknowledged"
        ));
        assert_eq!(guard.current(), Some(Resolution::Acknowledged));
    }

    #[test]
    fn test_concurrent_claims_resolve_once() {
        let guard = Arc::new(ResolutionGuard::new());
        let handles: Vec<_> = [Resolution::Acknowledged, Resolution::Released, Resolution::Rejected]
            .into_iter()
            .cycle()
            .take(30)
            .map(|r| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.claim("m-2", r).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert!(guard.is_resolved());
    }
}
