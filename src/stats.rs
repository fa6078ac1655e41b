//! src/stats.rs
//!
//! Row-level dissemination-time emission (spec.md §6 "per iteration, rows
//! of dissemination times"). Grounded on
//! `examples/original_source/mixnet/sim/stats.py`'s `DisseminationTime`:
//! kept is the accounting for when a message has reached every node in the
//! network (`broadcast_status`) and the two distinct timing series (mix
//! propagation, broadcast dissemination); dropped is everything
//! `pandas`/`matplotlib` do with the numbers once collected, since
//! statistics aggregation and plotting are out of scope (spec.md §1).

use std::collections::HashMap;
use std::io::Write;

use crate::domain::MessageId;

/// Appends one float (seconds) per line to a sink. No header, no escaping
/// — a single column of numbers needs neither (spec.md §6).
pub struct DisseminationWriter<W: Write> {
    sink: W,
}

impl<W: Write> DisseminationWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn record(&mut self, elapsed_sec: f64) -> std::io::Result<()> {
        writeln!(self.sink, "{elapsed_sec}")
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }
}

/// Tracks, per message, how many distinct nodes have received it via
/// broadcast, and emits a broadcast-dissemination-time row only once every
/// node in the network has (mirrors `DisseminationTime.add_broadcasted_msg`'s
/// `broadcast_status` counter reaching `num_nodes`).
pub struct DisseminationTracker<W: Write> {
    num_nodes: usize,
    broadcast_status: HashMap<MessageId, usize>,
    mix_propagation: DisseminationWriter<W>,
    broadcast_dissemination: DisseminationWriter<W>,
}

impl<W: Write> DisseminationTracker<W> {
    pub fn new(num_nodes: usize, mix_propagation: W, broadcast_dissemination: W) -> Self {
        Self {
            num_nodes,
            broadcast_status: HashMap::new(),
            mix_propagation: DisseminationWriter::new(mix_propagation),
            broadcast_dissemination: DisseminationWriter::new(broadcast_dissemination),
        }
    }

    /// Called once per message when it is fully recovered by its last mix
    /// hop, before being handed to the broadcast overlay.
    pub fn add_mix_propagation_time(&mut self, elapsed_sec: f64) {
        if let Err(err) = self.mix_propagation.record(elapsed_sec) {
            tracing::warn!(?err, "failed to write mix propagation time");
        }
    }

    /// Called once per node that observes a given broadcast message for the
    /// first time. Only once the count reaches `num_nodes` is a
    /// broadcast-dissemination-time row emitted.
    pub fn add_broadcasted_msg(&mut self, id: MessageId, elapsed_sec: f64) {
        let count = self.broadcast_status.entry(id).or_insert(0);
        *count += 1;
        if *count == self.num_nodes {
            if let Err(err) = self.broadcast_dissemination.record(elapsed_sec) {
                tracing::warn!(?err, "failed to write broadcast dissemination time");
            }
            self.broadcast_status.remove(&id);
        }
    }

    pub fn mix_propagation_sink(&self) -> &W {
        self.mix_propagation.sink()
    }

    pub fn broadcast_dissemination_sink(&self) -> &W {
        self.broadcast_dissemination.sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dissemination_writer_emits_one_float_per_line() {
        let mut buf = Vec::new();
        {
            let mut writer = DisseminationWriter::new(&mut buf);
            writer.record(1.5).unwrap();
            writer.record(2.25).unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "1.5\n2.25\n");
    }

    #[test]
    fn broadcast_row_is_emitted_only_once_every_node_has_seen_it() {
        let mut mix_buf = Vec::new();
        let mut bcast_buf = Vec::new();
        let id = MessageId::of(b"hello");
        {
            let mut tracker = DisseminationTracker::new(3, &mut mix_buf, &mut bcast_buf);
            tracker.add_broadcasted_msg(id, 0.1);
            tracker.add_broadcasted_msg(id, 0.2);
            tracker.add_broadcasted_msg(id, 0.3);
        }
        assert_eq!(String::from_utf8(bcast_buf).unwrap(), "0.3\n");
    }
}
