//! Mergeable approximate quantiles, used by the streaming median.
//!
//! A Greenwald-Khanna summary: sorted entries, each standing for `width`
//! observations with a rank uncertainty of `slack`. Neighbouring entries
//! are folded together while the result still fits in `2εn` ranks, so a
//! rank query is answered within `ε·n`. Observations are collected in
//! batches of about `1/(2ε)` values, sorted, and merged in one sweep.
//!
//! The smallest and largest observations are kept exactly.

#[derive(Clone, Debug)]
struct Entry {
    value: f64,
    width: usize,
    slack: usize,
}

#[derive(Clone, Debug)]
pub struct QuantileSketch {
    epsilon: f64,
    entries: Vec<Entry>,
    /// Observations already folded into `entries`.
    summarized: usize,
    pending: Vec<f64>,
    batch: usize,
    lo: f64,
    hi: f64,
}

impl QuantileSketch {
    /// A sketch answering rank queries within `epsilon * count()`.
    pub fn new(epsilon: f64) -> Self {
        let batch = ((1.0 / (2.0 * epsilon)).ceil() as usize).max(1);
        QuantileSketch {
            epsilon,
            entries: Vec::new(),
            summarized: 0,
            pending: Vec::with_capacity(batch),
            batch,
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
        }
    }

    /// Record one observation. NaN is skipped.
    pub fn insert(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.lo = self.lo.min(value);
        self.hi = self.hi.max(value);
        self.pending.push(value);
        if self.pending.len() >= self.batch {
            self.fold_pending();
        }
    }

    pub fn count(&self) -> usize {
        self.summarized + self.pending.len()
    }

    fn capacity(&self) -> usize {
        (2.0 * self.epsilon * self.summarized as f64).floor() as usize
    }

    fn fold_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut batch = std::mem::take(&mut self.pending);
        batch.sort_by(f64::total_cmp);

        let mut out = Vec::with_capacity(self.entries.len() + batch.len());
        let mut old = std::mem::take(&mut self.entries).into_iter().peekable();
        for value in batch {
            while let Some(entry) = old.next_if(|e| e.value <= value) {
                out.push(entry);
            }
            self.summarized += 1;
            // A new minimum or maximum has an exact rank.
            let slack = if out.is_empty() || old.peek().is_none() {
                0
            } else {
                self.capacity().saturating_sub(1)
            };
            out.push(Entry {
                value,
                width: 1,
                slack,
            });
        }
        out.extend(old);
        self.entries = out;
        self.coalesce();
    }

    /// Fold entries into their right neighbour while the band allows.
    /// The first and last entries are never folded away.
    fn coalesce(&mut self) {
        if self.entries.len() < 3 {
            return;
        }
        let limit = self.capacity();
        let entries = std::mem::take(&mut self.entries);
        let mut kept: Vec<Entry> = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate().rev() {
            let fold = i > 0
                && kept.len() > 1
                && kept
                    .last()
                    .is_some_and(|right| entry.width + right.width + right.slack <= limit);
            if !fold {
                kept.push(entry);
            } else if let Some(right) = kept.last_mut() {
                right.width += entry.width;
            }
        }
        kept.reverse();
        self.entries = kept;
    }

    /// Approximate `q`-quantile for `q` in `[0, 1]`; `None` when empty.
    pub fn query(&self, q: f64) -> Option<f64> {
        if self.count() == 0 {
            return None;
        }
        if q <= 0.0 {
            return Some(self.lo);
        }
        if q >= 1.0 {
            return Some(self.hi);
        }
        if !self.pending.is_empty() {
            let mut folded = self.clone();
            folded.fold_pending();
            return folded.query(q);
        }

        let target = ((q * self.summarized as f64).ceil() as usize).clamp(1, self.summarized);
        let mut rank = 0usize;
        self.entries
            .iter()
            .map(|e| {
                rank += e.width;
                (rank.abs_diff(target), e.value)
            })
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, value)| value)
    }

    /// Absorb another partial. Both sketches should share one epsilon.
    pub fn merge(&mut self, other: &QuantileSketch) {
        self.lo = self.lo.min(other.lo);
        self.hi = self.hi.max(other.hi);
        self.pending.extend_from_slice(&other.pending);
        self.fold_pending();
        if other.entries.is_empty() {
            return;
        }
        self.entries.extend(other.entries.iter().cloned());
        self.entries.sort_by(|a, b| a.value.total_cmp(&b.value));
        self.summarized += other.summarized;
        self.coalesce();
    }

    /// Fold any buffered observations into the summary.
    pub fn finish(&mut self) {
        self.fold_pending();
    }
}
