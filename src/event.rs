//! Per-channel event queues and the tagged transmission event.
//!
//! Uplink and downlink originators are distinguished by a tagged `Event`
//! enum rather than a string-id convention. Queues are min-heaps keyed on
//! start time, one per channel; the main loop picks the smallest head across
//! all channels (ties by channel id then insertion order) via a linear scan
//! across channel heads rather than a secondary heap, since the channel
//! count is always small (at most 8 in this crate's region tables) and a
//! heap-of-heads would need eager invalidation on every push for no real
//! asymptotic win at this scale.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::node::{GatewayId, NodeId};
use crate::region::Band;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Uplink { node: NodeId, seq: u32 },
    Downlink { gw: GatewayId, downlink_id: u64, dest: NodeId, window: u8, band: Band, new_power_idx: Option<usize> },
}

impl Event {
    pub fn is_downlink(&self) -> bool {
        matches!(self, Event::Downlink { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduled {
    pub sta: f64,
    pub end: f64,
    pub channel: usize,
    pub sf: u8,
    pub event: Event,
    insertion_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry(Scheduled);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.sta == other.0.sta && self.0.channel == other.0.channel && self.0.insertion_seq == other.0.insertion_seq
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// Reversed so that `BinaryHeap` (a max-heap) pops the smallest `sta`
    /// first, with ties broken by channel id then insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .sta
            .total_cmp(&self.0.sta)
            .then_with(|| other.0.channel.cmp(&self.0.channel))
            .then_with(|| other.0.insertion_seq.cmp(&self.0.insertion_seq))
    }
}

/// Per-channel time-sorted queues of pending transmissions.
pub struct EventQueue {
    per_channel: Vec<BinaryHeap<HeapEntry>>,
    next_insertion_seq: u64,
}

impl EventQueue {
    pub fn new(num_channels: usize) -> Self {
        Self { per_channel: (0..num_channels).map(|_| BinaryHeap::new()).collect(), next_insertion_seq: 0 }
    }

    pub fn push(&mut self, sta: f64, end: f64, channel: usize, sf: u8, event: Event) {
        let seq = self.next_insertion_seq;
        self.next_insertion_seq += 1;
        self.per_channel[channel].push(HeapEntry(Scheduled { sta, end, channel, sf, event, insertion_seq: seq }));
    }

    /// Pops the event with the smallest `sta` across all channels, ties
    /// broken by channel id then insertion order.
    pub fn pop_earliest(&mut self) -> Option<Scheduled> {
        let mut best_channel: Option<usize> = None;
        for (ch, heap) in self.per_channel.iter().enumerate() {
            if let Some(head) = heap.peek() {
                match best_channel {
                    None => best_channel = Some(ch),
                    Some(b) => {
                        let current_best = self.per_channel[b].peek().unwrap();
                        if head.cmp(current_best) == Ordering::Greater {
                            best_channel = Some(ch);
                        }
                    }
                }
            }
        }
        best_channel.and_then(|ch| self.per_channel[ch].pop()).map(|e| e.0)
    }

    /// Candidates on `channel` whose interval `[sta', end']` could overlap
    /// `[sel_sta, sel_end]`, i.e. `sta' <= sel_end && end' >= sel_sta`.
    /// Includes transmissions already enqueued with a later start time,
    /// since every node always carries exactly one pending future uplink in
    /// the queue, so a forward-looking overlap candidate is already visible
    /// here.
    pub fn overlapping_candidates(&self, channel: usize, sel_sta: f64, sel_end: f64) -> Vec<Scheduled> {
        self.per_channel[channel]
            .iter()
            .map(|e| e.0)
            .filter(|s| s.sta <= sel_end && s.end >= sel_sta)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.per_channel.iter().all(|h| h.is_empty())
    }
}
