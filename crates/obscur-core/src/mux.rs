//! Payload multiplexer: interleaves item byte streams under a layout
//! scheme.
//!
//! The multiplexer is a cooperative scheduler over N item streams sharing
//! one deterministic CSPRNG. Each turn it decides which item transfers
//! next and how many bytes (the stride), and whether padding is emitted.
//! Both the decisions and the padding *content* are drawn from the shared
//! CSPRNG, so the whole sequence is a pure function of `(seed, item
//! lengths, scheme parameters)`. The reader rebuilds the identical
//! sequence from the deserialized payload configuration to demultiplex.
//!
//! Schemes:
//! - `Simple` — items in manifest order, each drained in one stride.
//! - `Frameshift` — manifest order, with a pad of CSPRNG-chosen length in
//!   `[pad_min, pad_max]` after every item (the last pad trails the
//!   payload). `pad_min == pad_max` gives fixed framing; `(0, 0)` reduces
//!   to `Simple` byte-for-byte.
//! - `Fabric` — each turn picks a uniformly random open item and a stripe
//!   length in `[stripe_min, stripe_max]`, truncated to what the item has
//!   left. Exhausted items leave the open set and the distribution
//!   renormalizes over the rest.

use obscur_crypto::random::StreamCsprng;

use crate::manifest::PayloadLayout;

/// One multiplexer decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxStep {
    /// Transfer `len` bytes of item `index`'s stream
    Item {
        /// Index into the manifest's item list
        index: usize,
        /// Stride in bytes
        len: usize,
    },
    /// Emit (writer) or skip (reader) these padding bytes
    Padding(Vec<u8>),
}

enum SequentialPhase {
    /// Next step transfers the item at this position
    Transfer(usize),
    /// Next step pads after the item at this position
    Pad(usize),
    Done,
}

enum LayoutState {
    Sequential {
        /// Pad range; `None` for Simple
        pad: Option<(u32, u32)>,
        phase: SequentialPhase,
    },
    Fabric {
        stripe_min: u32,
        stripe_max: u32,
        /// Open item indices, in manifest order
        open: Vec<usize>,
    },
}

/// The layout engine. Writer and reader drive the same code over the same
/// CSPRNG seed and item lengths.
pub struct Multiplexer {
    remaining: Vec<u64>,
    state: LayoutState,
    csprng: StreamCsprng,
}

impl Multiplexer {
    /// Build a multiplexer over `lengths` (per-item ciphertext lengths, in
    /// manifest order) with a freshly seeded or reconstructed CSPRNG.
    ///
    /// Zero-length items are treated as closed from the start.
    #[must_use]
    pub fn new(layout: PayloadLayout, lengths: &[u64], csprng: StreamCsprng) -> Self {
        let remaining = lengths.to_vec();
        let state = match layout {
            PayloadLayout::Simple => LayoutState::Sequential {
                pad: None,
                phase: SequentialPhase::Transfer(0),
            },
            PayloadLayout::Frameshift { pad_min, pad_max } => LayoutState::Sequential {
                pad: Some((pad_min, pad_max)),
                phase: SequentialPhase::Transfer(0),
            },
            PayloadLayout::Fabric {
                stripe_min,
                stripe_max,
            } => LayoutState::Fabric {
                stripe_min,
                stripe_max,
                open: (0..lengths.len()).filter(|&i| lengths[i] > 0).collect(),
            },
        };
        Self {
            remaining,
            state,
            csprng,
        }
    }

    /// Next decision, or `None` once every item is drained and the final
    /// pad (if any) has been emitted.
    pub fn next_step(&mut self) -> Option<MuxStep> {
        match &mut self.state {
            LayoutState::Sequential { pad, phase } => loop {
                match *phase {
                    SequentialPhase::Transfer(index) => {
                        if index >= self.remaining.len() {
                            *phase = SequentialPhase::Done;
                            continue;
                        }
                        let len = self.remaining[index];
                        self.remaining[index] = 0;
                        *phase = SequentialPhase::Pad(index);
                        if len == 0 {
                            continue;
                        }
                        return Some(MuxStep::Item {
                            index,
                            len: len as usize,
                        });
                    }
                    SequentialPhase::Pad(index) => {
                        *phase = SequentialPhase::Transfer(index + 1);
                        if let Some((pad_min, pad_max)) = *pad {
                            let len = self.csprng.range_inclusive(pad_min, pad_max);
                            if len > 0 {
                                let mut bytes = vec![0u8; len as usize];
                                self.csprng.next_bytes(&mut bytes);
                                return Some(MuxStep::Padding(bytes));
                            }
                        }
                        continue;
                    }
                    SequentialPhase::Done => return None,
                }
            },
            LayoutState::Fabric {
                stripe_min,
                stripe_max,
                open,
            } => {
                if open.is_empty() {
                    return None;
                }
                let slot = self.csprng.next_u32_below(open.len() as u32) as usize;
                let index = open[slot];
                let stripe = u64::from(self.csprng.range_inclusive(*stripe_min, *stripe_max));
                let len = stripe.min(self.remaining[index]);
                self.remaining[index] -= len;
                if self.remaining[index] == 0 {
                    open.remove(slot);
                }
                Some(MuxStep::Item {
                    index,
                    len: len as usize,
                })
            }
        }
    }

    /// Drain the full decision sequence.
    pub fn steps(mut self) -> Vec<MuxStep> {
        let mut steps = Vec::new();
        while let Some(step) = self.next_step() {
            steps.push(step);
        }
        steps
    }
}
