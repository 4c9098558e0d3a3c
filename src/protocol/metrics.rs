use super::Direction;
use crate::error::Result;
use prometheus::{IntCounter, Registry};

/// Byte counters for one side of the protocol
#[derive(Debug, Clone)]
pub struct DirectionCounters {
    pub sent: IntCounter,
    pub received: IntCounter,
}

impl DirectionCounters {
    fn new(registry: &Registry, side: &str) -> Result<Self> {
        let sent = IntCounter::new(
            format!("bitswap_{}_sent_bytes", side),
            format!("Total sent bytes in bitswap {}", side),
        )?;
        let received = IntCounter::new(
            format!("bitswap_{}_received_bytes", side),
            format!("Total received bytes in bitswap {}", side),
        )?;

        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(received.clone()))?;

        Ok(Self { sent, received })
    }
}

/// Frame byte counters, split by which side opened the stream
#[derive(Debug, Clone)]
pub struct BitswapMetrics {
    pub initiator: DirectionCounters,
    pub responder: DirectionCounters,
}

impl BitswapMetrics {
    /// Create the counters and register them with `registry`.
    /// Fails if they are already registered there.
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            initiator: DirectionCounters::new(registry, "initiator")?,
            responder: DirectionCounters::new(registry, "responder")?,
        })
    }

    pub fn direction(&self, direction: Direction) -> &DirectionCounters {
        match direction {
            Direction::Initiator => &self.initiator,
            Direction::Responder => &self.responder,
        }
    }
}
