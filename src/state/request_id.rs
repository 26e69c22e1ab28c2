use std::sync::atomic::{AtomicU64, Ordering};

/// Issued identity for one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestIds {
    pub seq: u64,
    pub uuid: uuid::Uuid,
}

/// Cheap per-process request id source: a random 128-bit seed XORed with a
/// monotonically increasing sequence number.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next(&self) -> RequestIds {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        RequestIds {
            seq,
            uuid: uuid::Uuid::from_u128(self.seed ^ u128::from(seq)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_and_distinct() {
        let ids = RequestIdGenerator::new();
        let first = ids.next();
        let second = ids.next();
        assert_eq!(second.seq, first.seq + 1);
        assert_ne!(first.uuid, second.uuid);
    }
}
