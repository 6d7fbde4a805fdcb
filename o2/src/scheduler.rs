//! The dual timing-wheel scheduler (component C8, §4.8).
//!
//! Two independent [`Wheel`] instances are owned by the process: one over
//! local time (`ltsched`), one over global time (`gtsched`). Both are the
//! same data structure; only the clock source driving `sweep`'s `now`
//! differs, which is the caller's responsibility (§4.8, §4.9).

use o2_proto::Message;

const BINS: usize = 128;

/// A 128-bin timing wheel. Each bin holds every pending message whose
/// timestamp hashes to it, kept sorted by non-decreasing timestamp (§4.8;
/// the source's singly linked list becomes a small sorted `Vec` here —
/// insertion sort on a handful of elements beats a tree for this size,
/// while still satisfying "sorted by non-decreasing timestamp").
pub struct Wheel {
    bins: Vec<Vec<Message<'static>>>,
    granularity: f64,
    last_time: f64,
    initialized: bool,
}

impl Wheel {
    pub fn new(granularity: f64) -> Self {
        Self {
            bins: (0..BINS).map(|_| Vec::new()).collect(),
            granularity,
            last_time: 0.0,
            initialized: false,
        }
    }

    fn bin_of_abs(&self, abs_bin: i64) -> usize {
        abs_bin.rem_euclid(BINS as i64) as usize
    }

    fn abs_bin(&self, t: f64) -> i64 {
        (t / self.granularity).floor() as i64
    }

    /// Inserts `msg` into the bin its timestamp hashes to, maintaining
    /// non-decreasing timestamp order within the bin (§4.8 step-0/"hashes
    /// to bin").
    pub fn schedule(&mut self, msg: Message<'static>) {
        let bin = self.bin_of_abs(self.abs_bin(msg.timestamp));
        let v = &mut self.bins[bin];
        let pos = v.partition_point(|m| m.timestamp <= msg.timestamp);
        v.insert(pos, msg);
    }

    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(Vec::is_empty)
    }

    pub fn pending_len(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }

    /// Advances the wheel to `now`, appending every message whose timestamp
    /// is now due to `out`, in non-decreasing timestamp order (§4.8 steps
    /// 1-4).
    ///
    /// On the very first call the wheel simply anchors its clock to `now`
    /// without visiting any bin — there is nothing to catch up on before a
    /// wheel has ever run. Each subsequent call visits every bin between the
    /// previous `now` and this one, clamped to one full sweep of the table
    /// (128 bins) so a single tick's work stays bounded even after a long
    /// stall.
    pub fn sweep(&mut self, now: f64, out: &mut Vec<Message<'static>>) {
        if !self.initialized {
            self.last_time = now;
            self.initialized = true;
            return;
        }

        let target_abs = self.abs_bin(now);
        let last_abs = self.abs_bin(self.last_time);
        let span = (target_abs - last_abs).max(0) as usize;
        let visits = span.min(BINS);
        let start_abs = target_abs - visits as i64 + 1;

        for i in 0..visits {
            let abs = start_abs + i as i64;
            let bin = self.bin_of_abs(abs);
            let v = &mut self.bins[bin];
            let due = v.partition_point(|m| m.timestamp <= now);
            out.extend(v.drain(..due));
        }

        self.last_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use o2_proto::Message;

    fn msg(ts: f64) -> Message<'static> {
        Message {
            timestamp: ts,
            address: "/t/x".into(),
            typetag: ",".into(),
            args: vec![],
        }
    }

    #[test]
    fn dispatch_ordering_within_one_sweep() {
        let mut w = Wheel::new(1.0 / 128.0);
        w.sweep(0.0, &mut Vec::new()); // anchor
        w.schedule(msg(0.30));
        w.schedule(msg(0.10));
        w.schedule(msg(0.20));

        let mut out = Vec::new();
        w.sweep(0.35, &mut out);
        let timestamps: Vec<f64> = out.iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![0.10, 0.20, 0.30]);
    }

    #[test]
    fn bin_wrap_delivers_all_300_in_order() {
        let mut w = Wheel::new(1.0 / 128.0);
        w.sweep(0.0, &mut Vec::new());

        let mut timestamps: Vec<f64> = (0..300).map(|i| 0.001 + (i as f64) * (10.0 / 300.0)).collect();
        // schedule out of order
        let mut shuffled = timestamps.clone();
        shuffled.sort_by(|a, b| (a * 97.0).rem_euclid(1.0).partial_cmp(&(b * 97.0).rem_euclid(1.0)).unwrap());
        for t in &shuffled {
            w.schedule(msg(*t));
        }

        let mut out = Vec::new();
        let mut now = 0.0;
        while now <= 11.0 {
            now += 1.0 / 128.0;
            w.sweep(now, &mut out);
        }

        assert_eq!(out.len(), 300);
        timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let got: Vec<f64> = out.iter().map(|m| m.timestamp).collect();
        assert_eq!(got, timestamps);
        assert!(w.is_empty());
    }

    #[test]
    fn message_due_exactly_at_now_is_delivered() {
        let mut w = Wheel::new(1.0 / 128.0);
        w.sweep(0.0, &mut Vec::new());
        w.schedule(msg(1.0));
        let mut out = Vec::new();
        w.sweep(1.0, &mut out);
        assert_eq!(out.len(), 1);
    }
}
