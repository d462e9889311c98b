//! # Per-object trace ring.
//!
//! Fixed-capacity circular buffer of typed [`TraceEntry`] values, filtered by
//! [`TraceFlags`]. Used for post-mortem and live diagnosis of a single object.
//!
//! ```text
//! capacity = 4, after 6 appends:
//!
//!   buf:  [ #4 | #5 | #2 | #3 ]
//!                     ▲
//!                    head (oldest)
//!
//! log_trace(n = 3) ─► #3, #4, #5   (oldest first)
//! ```
//!
//! ## Rules
//! - Appends happen under the trace lock; an entry is either fully in the ring or absent.
//! - Once full, the oldest entry is overwritten.
//! - `set_trace_buffer` reallocates and resets head/tail.
//! - Formatting goes through a [`TraceSink`] so the same decode serves the live
//!   logger and offline capture.

use std::fmt;

use bitflags::bitflags;

use crate::error::LifecycleError;

use super::class::ClassConst;
use super::cond::{CondId, LifecycleStatus, ObjectId};
use super::instance::LifecycleObject;
use super::state::LifecycleState;

bitflags! {
    /// Trace entry kinds recorded by an instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TraceFlags: u32 {
        /// Crank begin/end.
        const CRANKING = 0x1;
        /// State changes (normal, forced, condition-driven).
        const STATE_CHANGE = 0x2;
        /// Condition set/clear/preset/run.
        const CONDITIONS = 0x4;
        /// Reschedule decisions.
        const RESCHEDULE = 0x8;
    }
}

impl TraceFlags {
    /// Every entry kind.
    pub const ALL: TraceFlags = TraceFlags::all();
    /// Nothing.
    pub const NONE: TraceFlags = TraceFlags::empty();
}

/// One trace event. Carries only the fields relevant to its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEntry {
    /// Crank started.
    CrankBegin {
        /// State at crank start.
        state: LifecycleState,
        /// Milliseconds since the previous crank ended (`0` for the first crank).
        since_last_ms: u64,
    },
    /// Crank finished; `status` is `None` when the crank failed.
    CrankEnd {
        /// State at crank end.
        state: LifecycleState,
        /// Returned status.
        status: Option<LifecycleStatus>,
    },
    /// Condition cleared administratively.
    CondClear {
        /// Condition.
        cond: CondId,
    },
    /// Condition set by the preset pass.
    CondPreset {
        /// Condition.
        cond: CondId,
    },
    /// Condition set explicitly.
    CondSet {
        /// Condition.
        cond: CondId,
    },
    /// Handler about to run.
    CondRunBefore {
        /// Condition.
        cond: CondId,
    },
    /// Handler returned.
    CondRunAfter {
        /// Condition.
        cond: CondId,
        /// Handler result.
        status: LifecycleStatus,
    },
    /// Pending state completed.
    StateChange {
        /// Persistent state left.
        old: LifecycleState,
        /// Persistent state entered.
        new: LifecycleState,
    },
    /// State forced through `set_state`.
    ForcedStateChange {
        /// State before.
        old: LifecycleState,
        /// State after.
        new: LifecycleState,
    },
    /// A completed condition requested a transition.
    CondStateChange {
        /// Condition that completed.
        cond: CondId,
        /// State it completed in.
        from: LifecycleState,
        /// Requested persistent target.
        to: LifecycleState,
    },
    /// Next crank requested.
    Reschedule {
        /// Interval in milliseconds.
        msec: u32,
    },
}

impl TraceEntry {
    /// Flag gating this entry.
    pub fn flags(&self) -> TraceFlags {
        match self {
            TraceEntry::CrankBegin { .. } | TraceEntry::CrankEnd { .. } => TraceFlags::CRANKING,
            TraceEntry::StateChange { .. }
            | TraceEntry::ForcedStateChange { .. }
            | TraceEntry::CondStateChange { .. } => TraceFlags::STATE_CHANGE,
            TraceEntry::Reschedule { .. } => TraceFlags::RESCHEDULE,
            _ => TraceFlags::CONDITIONS,
        }
    }

    /// Stable upper-case kind name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TraceEntry::CrankBegin { .. } => "CRANK_BEGIN",
            TraceEntry::CrankEnd { .. } => "CRANK_END",
            TraceEntry::CondClear { .. } => "COND_CLEAR",
            TraceEntry::CondPreset { .. } => "COND_PRESET",
            TraceEntry::CondSet { .. } => "COND_SET",
            TraceEntry::CondRunBefore { .. } => "COND_RUN_BEFORE",
            TraceEntry::CondRunAfter { .. } => "COND_RUN_AFTER",
            TraceEntry::StateChange { .. } => "STATE_CHANGE",
            TraceEntry::ForcedStateChange { .. } => "FORCED_STATE_CHANGE",
            TraceEntry::CondStateChange { .. } => "COND_STATE_CHANGE",
            TraceEntry::Reschedule { .. } => "RESCHEDULE",
        }
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind_name();
        match self {
            TraceEntry::CrankBegin {
                state,
                since_last_ms,
            } => write!(f, "{kind} state={state} since_last={since_last_ms}ms"),
            TraceEntry::CrankEnd { state, status } => match status {
                Some(status) => write!(f, "{kind} state={state} status={status}"),
                None => write!(f, "{kind} state={state} status=ERROR"),
            },
            TraceEntry::CondClear { cond }
            | TraceEntry::CondPreset { cond }
            | TraceEntry::CondSet { cond }
            | TraceEntry::CondRunBefore { cond } => write!(f, "{kind} cond={cond}"),
            TraceEntry::CondRunAfter { cond, status } => {
                write!(f, "{kind} cond={cond} status={status}")
            }
            TraceEntry::StateChange { old, new } | TraceEntry::ForcedStateChange { old, new } => {
                write!(f, "{kind} {old} -> {new}")
            }
            TraceEntry::CondStateChange { cond, from, to } => {
                write!(f, "{kind} cond={cond} {from} -> {to}")
            }
            TraceEntry::Reschedule { msec } => write!(f, "{kind} {msec}ms"),
        }
    }
}

/// Trace entry with its per-object sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    /// Monotonic per-object sequence (counts filtered-in appends only).
    pub seq: u64,
    /// The entry.
    pub entry: TraceEntry,
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>6}] {}", self.seq, self.entry)
    }
}

#[derive(Debug)]
pub(crate) struct TraceRing {
    buf: Vec<TraceRecord>,
    capacity: usize,
    head: usize,
    next_seq: u64,
    flags: TraceFlags,
}

impl TraceRing {
    pub(crate) fn new(capacity: usize, flags: TraceFlags) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            next_seq: 0,
            flags,
        }
    }

    pub(crate) fn reset(&mut self, capacity: usize) {
        self.buf = Vec::with_capacity(capacity);
        self.capacity = capacity;
        self.head = 0;
    }

    pub(crate) fn set_flags(&mut self, flags: TraceFlags) {
        self.flags = flags;
    }

    pub(crate) fn flags(&self) -> TraceFlags {
        self.flags
    }

    pub(crate) fn push(&mut self, entry: TraceEntry) {
        if self.capacity == 0 || !self.flags.intersects(entry.flags()) {
            return;
        }
        let record = TraceRecord {
            seq: self.next_seq,
            entry,
        };
        self.next_seq += 1;

        if self.buf.len() < self.capacity {
            self.buf.push(record);
        } else {
            self.buf[self.head] = record;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    /// The most recent `n` records, oldest first.
    pub(crate) fn recent(&self, n: usize) -> Vec<TraceRecord> {
        let len = self.buf.len();
        let take = n.min(len);
        let start = if len < self.capacity { 0 } else { self.head };

        let chronological = self.buf[start..].iter().chain(self.buf[..start].iter());
        chronological.skip(len - take).copied().collect()
    }
}

/// Destination for formatted trace lines.
pub trait TraceSink {
    /// Receives one decoded line for `object`.
    fn write_line(&mut self, object: ObjectId, line: &str);
}

/// Collects lines; used for offline capture and tests.
impl TraceSink for Vec<String> {
    fn write_line(&mut self, _object: ObjectId, line: &str) {
        self.push(line.to_string());
    }
}

/// Forwards lines to `tracing` at INFO under the `lifecrank::trace` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn write_line(&mut self, object: ObjectId, line: &str) {
        tracing::info!(target: "lifecrank::trace", object = %object, "{line}");
    }
}

impl<O: LifecycleObject> ClassConst<O> {
    /// Replaces the object's trace ring with an empty one of `capacity` entries.
    pub fn set_trace_buffer(&self, object: &O, capacity: usize) -> Result<(), LifecycleError> {
        let inst = self.enter(object)?;
        inst.trace.lock().reset(capacity);
        Ok(())
    }

    /// Selects which entry kinds the object records.
    pub fn set_trace_flags(&self, object: &O, flags: TraceFlags) -> Result<(), LifecycleError> {
        let inst = self.enter(object)?;
        inst.trace.lock().set_flags(flags);
        Ok(())
    }

    /// Snapshot of the most recent `count` entries, oldest first.
    pub fn trace_entries(&self, object: &O, count: usize) -> Result<Vec<TraceRecord>, LifecycleError> {
        let inst = self.enter(object)?;
        let records = inst.trace.lock().recent(count);
        Ok(records)
    }

    /// Formats the most recent `count` entries through `sink`, oldest first.
    ///
    /// Returns the number of lines written. The trace lock is released before the
    /// sink runs.
    pub fn log_trace(
        &self,
        object: &O,
        count: usize,
        sink: &mut dyn TraceSink,
    ) -> Result<usize, LifecycleError> {
        let records = self.trace_entries(object, count)?;
        let id = object.object_id();
        for record in &records {
            sink.write_line(id, &record.to_string());
        }
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::fixture::{self, Tracked};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn reschedule(msec: u32) -> TraceEntry {
        TraceEntry::Reschedule { msec }
    }

    #[test]
    fn test_ring_keeps_newest_in_order() {
        let mut ring = TraceRing::new(4, TraceFlags::ALL);
        for i in 0..10 {
            ring.push(reschedule(i));
        }
        let got: Vec<_> = ring.recent(100).iter().map(|r| r.entry).collect();
        assert_eq!(got, vec![reschedule(6), reschedule(7), reschedule(8), reschedule(9)]);

        let seqs: Vec<_> = ring.recent(2).iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![8, 9]);
    }

    #[test]
    fn test_ring_partial_fill() {
        let mut ring = TraceRing::new(8, TraceFlags::ALL);
        ring.push(reschedule(1));
        ring.push(reschedule(2));
        let got: Vec<_> = ring.recent(8).iter().map(|r| r.entry).collect();
        assert_eq!(got, vec![reschedule(1), reschedule(2)]);
    }

    #[test]
    fn test_flags_filter() {
        let mut ring = TraceRing::new(8, TraceFlags::STATE_CHANGE);
        ring.push(reschedule(1));
        ring.push(TraceEntry::StateChange {
            old: LifecycleState::Ready,
            new: LifecycleState::Fail,
        });
        let got = ring.recent(8);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].entry.kind_name(), "STATE_CHANGE");
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let mut ring = TraceRing::new(0, TraceFlags::ALL);
        ring.push(reschedule(1));
        assert!(ring.recent(4).is_empty());
    }

    #[test]
    fn test_set_trace_buffer_resets_and_log_trace_decodes() {
        let fx = fixture::build();
        let obj = Tracked::new(1, &fx.leaf);

        fx.leaf.set_cond(&obj, fixture::A).unwrap();
        fx.leaf.set_cond(&obj, fixture::A).unwrap();
        assert_eq!(fx.leaf.trace_entries(&obj, 16).unwrap().len(), 2);

        fx.leaf.set_trace_buffer(&obj, 3).unwrap();
        assert!(fx.leaf.trace_entries(&obj, 16).unwrap().is_empty());

        for _ in 0..5 {
            fx.leaf.set_cond(&obj, fixture::A).unwrap();
        }
        let mut lines: Vec<String> = Vec::new();
        let written = fx.leaf.log_trace(&obj, 10, &mut lines).unwrap();
        assert_eq!(written, 3);
        assert!(lines.iter().all(|l| l.contains("COND_SET")), "{lines:?}");
    }

    /// Shared buffer handed to the fmt layer as its writer.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracing_sink_forwards_every_line() {
        let fx = fixture::build();
        let obj = Tracked::new(4, &fx.leaf);
        fx.leaf.set_cond(&obj, fixture::B).unwrap();
        fx.leaf.set_state(&obj, LifecycleState::Ready).unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("lifecrank::trace=info"))
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let written = tracing::subscriber::with_default(subscriber, || {
            fx.leaf.log_trace(&obj, 8, &mut TracingSink)
        })
        .unwrap();
        assert_eq!(written, 3);

        let out = String::from_utf8(captured.0.lock().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3, "{out}");
        assert!(lines.iter().all(|l| l.contains("lifecrank::trace") && l.contains("object=4")));
        assert!(lines[0].contains("COND_SET"), "{out}");
        assert!(lines[1].contains("COND_PRESET"), "{out}");
        assert!(lines[2].contains("FORCED_STATE_CHANGE"), "{out}");
    }

    #[test]
    fn test_trace_flags_applied_per_object() {
        let fx = fixture::build();
        let obj = Tracked::new(1, &fx.leaf);

        fx.leaf.set_trace_flags(&obj, TraceFlags::CRANKING).unwrap();
        fx.leaf.set_cond(&obj, fixture::A).unwrap();
        assert!(fx.leaf.trace_entries(&obj, 16).unwrap().is_empty());
    }

    #[test]
    fn test_display_decodes_fields() {
        let line = TraceEntry::CondStateChange {
            cond: CondId::new(crate::lifecycle::ClassId(1), 2),
            from: LifecycleState::Ready,
            to: LifecycleState::Fail,
        }
        .to_string();
        assert_eq!(line, "COND_STATE_CHANGE cond=0x00010002 READY -> FAIL");

        let end = TraceEntry::CrankEnd {
            state: LifecycleState::Activate,
            status: None,
        };
        assert_eq!(end.to_string(), "CRANK_END state=ACTIVATE status=ERROR");
    }
}
