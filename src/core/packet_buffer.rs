//! Fragment reassembly ring.
//!
//! Fragments are accepted into a fixed ring of `PACKET_BUFFER_SIZE` slots keyed by
//! `sequence % PACKET_BUFFER_SIZE`, then drained as whole packets once every fragment has
//! arrived. Accepting and draining are separate steps because fragments of several packets
//! arrive interleaved and out of order.
//!
//! Memory is bounded no matter which sequence numbers a peer sends: a valid slot always
//! holds a sequence within `PACKET_BUFFER_SIZE` of `current_sequence`, and advancing the
//! current sequence clears every slot it passes over.

use crate::config::{
    MAX_FRAGMENTS_PER_PACKET, MAX_FRAGMENT_SIZE, PACKET_BUFFER_SIZE, SEQUENCE_WINDOW,
};
use crate::error::FragmentRejection;
use crate::utils::sequence::{sequence_difference, sequence_greater_than};
use tracing::trace;

/// A packet whose fragments have all arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledPacket {
    pub sequence: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct PacketSlot {
    valid: bool,
    sequence: u16,
    num_fragments: usize,
    received: usize,
    fragments: Vec<Option<Vec<u8>>>,
}

impl PacketSlot {
    fn clear(&mut self) {
        self.valid = false;
        self.num_fragments = 0;
        self.received = 0;
        self.fragments = Vec::new();
    }

    fn claim(&mut self, sequence: u16, num_fragments: usize) {
        self.valid = true;
        self.sequence = sequence;
        self.num_fragments = num_fragments;
        self.received = 0;
        self.fragments = vec![None; num_fragments];
    }

    fn is_complete(&self) -> bool {
        self.valid && self.received == self.num_fragments
    }
}

/// Reassembly state for one sending peer.
#[derive(Debug)]
pub struct PacketBuffer {
    slots: Vec<PacketSlot>,
    current_sequence: u16,
    has_sequence: bool,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self {
            slots: (0..PACKET_BUFFER_SIZE).map(|_| PacketSlot::default()).collect(),
            current_sequence: 0,
            has_sequence: false,
        }
    }

    /// Highest sequence accepted so far, if any.
    pub fn current_sequence(&self) -> Option<u16> {
        self.has_sequence.then_some(self.current_sequence)
    }

    /// Number of slots holding an in-progress or completed packet.
    pub fn num_buffered(&self) -> usize {
        self.slots.iter().filter(|slot| slot.valid).count()
    }

    /// Fragments received so far for `sequence`, if it is buffered.
    pub fn received_fragments(&self, sequence: u16) -> Option<usize> {
        let slot = &self.slots[usize::from(sequence) % PACKET_BUFFER_SIZE];
        (slot.valid && slot.sequence == sequence).then_some(slot.received)
    }

    /// Drop everything, including the current sequence.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.current_sequence = 0;
        self.has_sequence = false;
    }

    /// Validate a fragment and store a copy of it.
    ///
    /// A rejected fragment leaves the buffer untouched.
    pub fn process_fragment(
        &mut self,
        sequence: u16,
        fragment_id: usize,
        num_fragments: usize,
        data: &[u8],
    ) -> Result<(), FragmentRejection> {
        let size = data.len();
        if size == 0 || size > MAX_FRAGMENT_SIZE {
            return Err(FragmentRejection::InvalidSize(size));
        }
        if num_fragments == 0 || num_fragments > MAX_FRAGMENTS_PER_PACKET {
            return Err(FragmentRejection::InvalidFragmentCount(num_fragments));
        }
        if fragment_id >= num_fragments {
            return Err(FragmentRejection::InvalidFragmentId {
                fragment_id,
                num_fragments,
            });
        }
        if fragment_id != num_fragments - 1 && size != MAX_FRAGMENT_SIZE {
            return Err(FragmentRejection::ShortFragment { fragment_id, size });
        }

        let difference = if self.has_sequence {
            sequence_difference(sequence, self.current_sequence)
        } else {
            // nothing to compare against yet
            1
        };
        if difference.abs() > SEQUENCE_WINDOW {
            return Err(FragmentRejection::OutOfWindow {
                sequence,
                current: self.current_sequence,
            });
        }

        let index = usize::from(sequence) % PACKET_BUFFER_SIZE;
        let advances =
            !self.has_sequence || sequence_greater_than(sequence, self.current_sequence);
        let slot = &self.slots[index];
        if slot.valid && slot.sequence != sequence && !advances {
            return Err(FragmentRejection::SlotCollision {
                sequence,
                occupant: slot.sequence,
            });
        }
        if difference <= -(PACKET_BUFFER_SIZE as i32) {
            return Err(FragmentRejection::Stale {
                sequence,
                current: self.current_sequence,
            });
        }
        if slot.valid && slot.sequence == sequence {
            if slot.num_fragments != num_fragments {
                return Err(FragmentRejection::FragmentCountMismatch {
                    expected: slot.num_fragments,
                    actual: num_fragments,
                });
            }
            if slot.fragments[fragment_id].is_some() {
                return Err(FragmentRejection::Duplicate {
                    sequence,
                    fragment_id,
                });
            }
        }

        if advances {
            self.advance(sequence, difference);
        }

        let slot = &mut self.slots[index];
        if !slot.valid {
            slot.claim(sequence, num_fragments);
        }
        slot.fragments[fragment_id] = Some(data.to_vec());
        slot.received += 1;

        trace!(
            sequence,
            fragment_id,
            num_fragments,
            received = slot.received,
            "fragment accepted"
        );
        Ok(())
    }

    // Clear every slot between the old and new current sequence.
    fn advance(&mut self, sequence: u16, difference: i32) {
        let steps = if self.has_sequence {
            (difference as usize).min(PACKET_BUFFER_SIZE)
        } else {
            1
        };
        for step in 0..steps {
            let passed = sequence.wrapping_sub(step as u16);
            self.slots[usize::from(passed) % PACKET_BUFFER_SIZE].clear();
        }
        self.current_sequence = sequence;
        self.has_sequence = true;
    }

    /// Remove and return every complete packet, oldest sequence first.
    pub fn drain_completed(&mut self) -> Vec<ReassembledPacket> {
        let mut completed = Vec::new();
        if !self.has_sequence {
            return completed;
        }

        let oldest = self
            .current_sequence
            .wrapping_sub(PACKET_BUFFER_SIZE as u16 - 1);
        for offset in 0..PACKET_BUFFER_SIZE {
            let sequence = oldest.wrapping_add(offset as u16);
            let slot = &mut self.slots[usize::from(sequence) % PACKET_BUFFER_SIZE];
            if !slot.is_complete() || slot.sequence != sequence {
                continue;
            }

            let size = slot.fragments.iter().flatten().map(Vec::len).sum();
            let mut payload = Vec::with_capacity(size);
            for fragment in slot.fragments.iter().flatten() {
                payload.extend_from_slice(fragment);
            }
            slot.clear();

            completed.push(ReassembledPacket { sequence, payload });
        }
        completed
    }
}
