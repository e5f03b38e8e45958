//! Event-merge building blocks shared by the protocol decoders
//!
//! A decoder merges several independently sampled digital waveforms into a
//! single ordered stream of events:
//!
//!   1. Keep one [`EdgeCursor`] per input.
//!   2. Ask every cursor for its next value change after "now".
//!   3. [`next_event`] picks the soonest; ties go to the channel listed first.
//!   4. Advance every cursor to the new "now" so all sampled values agree.
//!   5. Feed (event, values, time) to the protocol state machine.
//!   6. Stop once no channel changes any more.
//!
//! All times are absolute femtoseconds (`offset * timescale + trigger_phase`),
//! so inputs captured at different rates merge correctly.

use tracing::trace;

use crate::runtime::waveform::{DigitalWaveform, ProtocolWaveform};

use super::types::{Symbol, SymbolKind};

/// Forward-only read position in one digital waveform
#[derive(Debug, Clone)]
pub struct EdgeCursor<'a> {
    wave: &'a DigitalWaveform,
    index: usize,
    /// Index of the first later sample whose value differs, if any
    next_change: Option<usize>,
}

impl<'a> EdgeCursor<'a> {
    pub fn new(wave: &'a DigitalWaveform) -> Self {
        let mut cursor = Self {
            wave,
            index: 0,
            next_change: None,
        };
        cursor.next_change = cursor.scan_change();
        cursor
    }

    fn scan_change(&self) -> Option<usize> {
        let current = *self.wave.samples.get(self.index)?;
        (self.index + 1..self.wave.len()).find(|&j| self.wave.samples[j] != current)
    }

    /// Value at the cursor; an empty waveform reads as low
    pub fn value(&self) -> bool {
        self.wave.samples.get(self.index).copied().unwrap_or(false)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Time of the next value change strictly after the cursor position
    pub fn next_change(&self) -> Option<i64> {
        self.next_change.map(|j| self.wave.time_of(j))
    }

    /// Time of the next change, or `now` when the channel is exhausted.
    pub fn next_change_or(&self, now: i64) -> i64 {
        self.next_change().unwrap_or(now)
    }

    /// Move to the last sample starting at or before `t`.
    ///
    /// Never moves backward: a `t` earlier than the current sample is a no-op.
    pub fn advance_to(&mut self, t: i64) {
        let len = self.wave.len();
        let start = self.index;
        while self.index + 1 < len && self.wave.time_of(self.index + 1) <= t {
            self.index += 1;
        }
        if self.index != start && self.next_change.is_some_and(|j| j <= self.index) {
            self.next_change = self.scan_change();
        }
    }
}

/// A group of data lines read together as one little-endian word
#[derive(Debug, Clone)]
pub struct BusCursor<'a> {
    lines: Vec<EdgeCursor<'a>>,
}

impl<'a> BusCursor<'a> {
    /// `lines[0]` is bit 0
    pub fn new(lines: &[&'a DigitalWaveform]) -> Self {
        Self {
            lines: lines.iter().map(|&w| EdgeCursor::new(w)).collect(),
        }
    }

    pub fn advance_to(&mut self, t: i64) {
        for line in &mut self.lines {
            line.advance_to(t);
        }
    }

    pub fn value(&self) -> u64 {
        self.lines
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, line)| acc | (u64::from(line.value()) << bit))
    }
}

/// Pick the channel that changes next.
///
/// `channels` must be listed in priority order; on equal timestamps the
/// earlier entry wins. Returns `(channel index, time)` or `None` when no
/// channel changes after `now`.
pub fn next_event(channels: &[&EdgeCursor<'_>], now: i64) -> Option<(usize, i64)> {
    let mut best: Option<(usize, i64)> = None;
    for (i, cursor) in channels.iter().enumerate() {
        let Some(t) = cursor.next_change() else {
            continue;
        };
        if t <= now {
            continue;
        }
        if best.map_or(true, |(_, bt)| t < bt) {
            best = Some((i, t));
        }
    }
    best
}

/// Appends decoded symbols to a protocol waveform, keeping its timeline
/// monotonic
pub struct SymbolWriter {
    name: String,
    out: ProtocolWaveform,
}

impl SymbolWriter {
    /// Output in absolute femtoseconds, anchored like `reference`
    pub fn new(name: impl Into<String>, reference: &DigitalWaveform) -> Self {
        let mut out = ProtocolWaveform::new(1);
        out.start_timestamp = reference.start_timestamp;
        out.start_femtoseconds = reference.start_femtoseconds;
        Self {
            name: name.into(),
            out,
        }
    }

    /// Emit `kind` spanning `[start, end)`. A start earlier than the previous
    /// symbol's start is moved forward; a negative span becomes zero.
    pub fn emit(&mut self, start: i64, end: i64, kind: SymbolKind, data: u64) {
        let floor = self.out.offsets.last().copied().unwrap_or(i64::MIN);
        let start = start.max(floor);
        let duration = (end - start).max(0);
        let symbol = Symbol::new(kind, data);
        trace!("[{}] {} @ {} +{}", self.name, symbol, start, duration);
        self.out.append_sample(start, duration, symbol);
    }

    /// Shorten the previous symbol so it ends no later than `t`
    pub fn clip_last_to(&mut self, t: i64) {
        if let (Some(&offset), Some(duration)) = (self.out.offsets.last(), self.out.durations.last_mut()) {
            if offset + *duration > t {
                *duration = (t - offset).max(0);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(self) -> ProtocolWaveform {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(points: &[(i64, bool)]) -> DigitalWaveform {
        let mut w = DigitalWaveform::new(1);
        for (n, &(t, v)) in points.iter().enumerate() {
            let end = points.get(n + 1).map(|p| p.0).unwrap_or(t + 1);
            w.append_sample(t, end - t, v);
        }
        w
    }

    #[test]
    fn test_next_change_skips_repeated_values() {
        let w = wave(&[(0, false), (10, false), (20, true), (30, true), (40, false)]);
        let mut c = EdgeCursor::new(&w);
        assert_eq!(c.next_change(), Some(20));
        c.advance_to(25);
        assert!(c.value());
        assert_eq!(c.next_change(), Some(40));
        c.advance_to(40);
        assert_eq!(c.next_change(), None);
        assert_eq!(c.next_change_or(40), 40);
    }

    #[test]
    fn test_advance_never_moves_backward() {
        let w = wave(&[(0, false), (10, true), (20, false)]);
        let mut c = EdgeCursor::new(&w);
        c.advance_to(15);
        assert_eq!(c.index(), 1);
        c.advance_to(5);
        assert_eq!(c.index(), 1);
        assert!(c.value());
    }

    #[test]
    fn test_cursor_uses_timescale() {
        // 100 fs per sample
        let w = DigitalWaveform::from_dense(100, vec![false, false, true]);
        let c = EdgeCursor::new(&w);
        assert_eq!(c.next_change(), Some(200));
    }

    #[test]
    fn test_next_event_tie_goes_to_first_channel() {
        let a = wave(&[(0, true), (50, false)]);
        let b = wave(&[(0, false), (50, true)]);
        let ca = EdgeCursor::new(&a);
        let cb = EdgeCursor::new(&b);
        assert_eq!(next_event(&[&ca, &cb], 0), Some((0, 50)));
        assert_eq!(next_event(&[&cb, &ca], 0), Some((0, 50)));

        let c = wave(&[(0, false), (40, true)]);
        let cc = EdgeCursor::new(&c);
        assert_eq!(next_event(&[&ca, &cb, &cc], 0), Some((2, 40)));
    }

    #[test]
    fn test_next_event_none_when_exhausted() {
        let a = wave(&[(0, true)]);
        let ca = EdgeCursor::new(&a);
        assert_eq!(next_event(&[&ca], 0), None);
    }

    #[test]
    fn test_bus_value_is_little_endian() {
        let b0 = wave(&[(0, true)]);
        let b1 = wave(&[(0, false)]);
        let b2 = wave(&[(0, true)]);
        let bus = BusCursor::new(&[&b0, &b1, &b2]);
        assert_eq!(bus.value(), 0b101);
    }

    #[test]
    fn test_writer_keeps_timeline_monotonic() {
        let reference = wave(&[(0, false)]);
        let mut w = SymbolWriter::new("test", &reference);
        w.emit(100, 200, SymbolKind::Data, 1);
        w.clip_last_to(150);
        w.emit(90, 80, SymbolKind::Deselect, 0);
        let out = w.finish();
        assert_eq!(out.offsets, vec![100, 100]);
        assert_eq!(out.durations, vec![50, 0]);
        assert!(out.is_consistent());
    }
}
