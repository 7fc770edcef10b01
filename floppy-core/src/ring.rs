//! Flux sample rings shared with the DMA engine
//!
//! Each ring is a power-of-two array of 16-bit timer values (reload values
//! on the read side, capture values on the write side). One end of each
//! ring lives in the DMA controller: its position is not stored here but
//! derived from the channel's remaining-transfer count. The CPU-owned
//! indexes and scratch state live in these structs.

/// Ring capacity in samples. Must stay a power of two.
pub const RING_LEN: usize = 1024;

/// Index mask for modular arithmetic on ring positions.
pub const RING_MASK: u16 = (RING_LEN - 1) as u16;

/// Ring position of a DMA channel given its remaining-transfer count.
pub const fn dma_pos(residue: u16) -> u16 {
    RING_LEN as u16 - residue
}

/// Read-side ring: the CPU produces flux samples, the DMA engine consumes
/// them into the pulse timer's reload register.
pub struct ReadRing {
    pub buf: [u16; RING_LEN],
    /// Last observed DMA consumer position.
    pub cons: u16,
    /// CPU producer position.
    pub prod: u16,
}

impl ReadRing {
    pub const fn new() -> Self {
        Self {
            buf: [0; RING_LEN],
            cons: 0,
            prod: 0,
        }
    }

    /// Reinitialise to empty.
    pub fn reset(&mut self) {
        self.cons = 0;
        self.prod = 0;
    }

    /// Did the DMA consumer sweep past the producer since `self.cons` was
    /// last recorded? `dmacons` is the consumer position just read from
    /// the controller. Detection only; the stream degrades but the indexes
    /// stay usable.
    pub fn underrun(&self, dmacons: u16) -> bool {
        let (cons, prod) = (self.cons, self.prod);
        let swept = if dmacons < cons {
            prod >= cons || prod < dmacons
        } else {
            prod >= cons && prod < dmacons
        };
        swept && dmacons != cons
    }

    /// Largest contiguous stretch fillable from `prod`, bounded by the
    /// array end and by one-less-than the consumer position.
    pub fn contiguous_free(&self, dmacons: u16) -> u16 {
        let nr_to_wrap = RING_LEN as u16 - self.prod;
        let nr_to_cons = dmacons.wrapping_sub(self.prod).wrapping_sub(1) & RING_MASK;
        nr_to_wrap.min(nr_to_cons)
    }
}

impl Default for ReadRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-side ring: the DMA engine produces capture samples on each
/// write-data edge, the CPU consumes them into the MFM bit stream.
pub struct WriteRing {
    pub buf: [u16; RING_LEN],
    /// CPU consumer position.
    pub cons: u16,
    /// Raw value of the previously consumed capture sample, for computing
    /// inter-edge deltas across ISR invocations.
    pub prev_sample: u16,
}

impl WriteRing {
    pub const fn new() -> Self {
        Self {
            buf: [0; RING_LEN],
            cons: 0,
            prev_sample: 0,
        }
    }

    pub fn reset(&mut self) {
        self.cons = 0;
        self.prev_sample = 0;
    }
}

impl Default for WriteRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dma_pos() {
        assert_eq!(dma_pos(RING_LEN as u16), 0);
        assert_eq!(dma_pos(1), RING_LEN as u16 - 1);
    }

    #[test]
    fn test_contiguous_free_respects_wrap_and_consumer() {
        let mut ring = ReadRing::new();

        // Empty ring, consumer at 0: can fill to one short of a lap, but
        // only up to the array end in one stretch.
        ring.prod = 0;
        assert_eq!(ring.contiguous_free(0), RING_LEN as u16 - 1);

        ring.prod = 1000;
        assert_eq!(ring.contiguous_free(0), 23); // bounded by consumer-1 at wrap

        ring.prod = 10;
        assert_eq!(ring.contiguous_free(20), 9);

        // Full ring: nothing to do.
        ring.prod = 19;
        assert_eq!(ring.contiguous_free(20), 0);
    }

    #[test]
    fn test_underrun_detection() {
        let mut ring = ReadRing::new();

        // Producer ahead of consumer, DMA still behind producer: fine.
        ring.cons = 10;
        ring.prod = 100;
        assert!(!ring.underrun(50));

        // DMA swept past the producer.
        assert!(ring.underrun(200));

        // DMA wrapped; producer (not yet wrapped) is now stale.
        ring.cons = 900;
        ring.prod = 1000;
        assert!(ring.underrun(5));

        // No movement at all is not an underrun.
        ring.cons = 10;
        ring.prod = 10;
        assert!(!ring.underrun(10));
    }
}
