//! Single-flight operation slots
//!
//! A slot guards one direction of a socket. Reserving it hands out a guard
//! tagged with the slot's current generation; dropping the guard completes
//! the operation, bumps the generation and frees the slot again.

use crate::error::SlotError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Direction of a socket operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receive (and connect, which completes on the receive side)
    Receive,
    /// Send
    Send,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Receive => write!(f, "receive"),
            Direction::Send => write!(f, "send"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct OpSlot {
    direction: Direction,
    reserved: AtomicBool,
    generation: AtomicU64,
}

impl OpSlot {
    pub(crate) const fn new(direction: Direction) -> Self {
        OpSlot {
            direction,
            reserved: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Claim the slot for one operation.
    ///
    /// Fails immediately if another operation of the same direction is
    /// still outstanding.
    pub(crate) fn reserve(&self) -> Result<SlotGuard<'_>, SlotError> {
        self.reserved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SlotError::OperationInProgress {
                direction: self.direction,
            })?;

        Ok(SlotGuard {
            slot: self,
            generation: self.generation.load(Ordering::Acquire),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_reserved(&self) -> bool {
        self.reserved.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Proof of an outstanding operation on a slot
#[derive(Debug)]
pub(crate) struct SlotGuard<'a> {
    slot: &'a OpSlot,
    generation: u64,
}

impl SlotGuard<'_> {
    /// Generation the operation was started under
    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let previous = self.slot.generation.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(
            previous, self.generation,
            "{} slot completed by a stale operation",
            self.slot.direction
        );
        self.slot.reserved.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_release() {
        let slot = OpSlot::new(Direction::Receive);
        assert!(!slot.is_reserved());

        let guard = slot.reserve().unwrap();
        assert!(slot.is_reserved());
        assert_eq!(guard.generation(), 0);

        drop(guard);
        assert!(!slot.is_reserved());
        assert_eq!(slot.generation(), 1);
    }

    #[test]
    fn test_second_reserve_fails() {
        let slot = OpSlot::new(Direction::Send);
        let _guard = slot.reserve().unwrap();

        let err = slot.reserve().unwrap_err();
        assert_eq!(
            err,
            SlotError::OperationInProgress {
                direction: Direction::Send
            }
        );
    }

    #[test]
    fn test_failed_reserve_keeps_generation() {
        let slot = OpSlot::new(Direction::Receive);
        let guard = slot.reserve().unwrap();
        assert!(slot.reserve().is_err());
        drop(guard);

        // Only the successful operation completed
        assert_eq!(slot.generation(), 1);
        let guard = slot.reserve().unwrap();
        assert_eq!(guard.generation(), 1);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Receive.to_string(), "receive");
        assert_eq!(Direction::Send.to_string(), "send");
    }
}
