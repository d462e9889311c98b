//! # Process-wide lifecycle debug tracing, selected per class.
//!
//! Per-object [`TraceFlags`](super::TraceFlags) decide what lands in an
//! object's ring. This switch is global: turning it on for a class makes every
//! object whose hierarchy contains that class narrate its lifecycle through
//! `tracing` under the `lifecrank::debug` target.
//!
//! ```text
//! set_debug_trace_class(LUN, true)
//!        │
//!        ▼
//! crank / set_state on an object of LUN or any subclass
//!        └─► info!(target: "lifecrank::debug", object, class, ...)
//! ```
//!
//! ## Rules
//! - Lines are emitted at INFO so a running process needs no filter change.
//! - Enabling a class covers its subclasses; enabling a subclass does not
//!   cover its ancestors' other subclasses.
//! - The switch never changes engine behavior or trace rings.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use super::cond::ClassId;

static CLASSES: RwLock<BTreeSet<ClassId>> = RwLock::new(BTreeSet::new());

/// Turns debug tracing on or off for `class` and its subclasses.
pub fn set_debug_trace_class(class: ClassId, enabled: bool) {
    let mut classes = CLASSES.write();
    if enabled {
        classes.insert(class);
    } else {
        classes.remove(&class);
    }
}

/// Classes currently traced, in ascending id order.
pub fn debug_trace_classes() -> Vec<ClassId> {
    CLASSES.read().iter().copied().collect()
}

/// Turns debug tracing off for every class.
pub fn clear_debug_trace() {
    CLASSES.write().clear();
}

/// True when any class of `hierarchy` is traced.
pub fn debug_trace_enabled(hierarchy: &[ClassId]) -> bool {
    let classes = CLASSES.read();
    !classes.is_empty() && hierarchy.iter().any(|c| classes.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use crate::lifecycle::fixture::{self, Tracked};
    use std::sync::Arc;

    // Ids outside the fixture's range; the class set is shared by parallel tests.
    const LUN: ClassId = ClassId(0x700);
    const RAID: ClassId = ClassId(0x701);

    #[test]
    fn test_enable_covers_subclasses_only() {
        set_debug_trace_class(LUN, true);
        assert!(debug_trace_enabled(&[ClassId(0x7ff), LUN]));
        assert!(debug_trace_enabled(&[LUN]));
        assert!(!debug_trace_enabled(&[RAID, ClassId(0x7fe)]));
        assert!(debug_trace_classes().contains(&LUN));

        set_debug_trace_class(LUN, false);
        assert!(!debug_trace_enabled(&[ClassId(0x7ff), LUN]));
        assert!(!debug_trace_classes().contains(&LUN));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured_text(captured: &Captured) -> String {
        String::from_utf8(captured.0.lock().clone()).unwrap()
    }

    #[test]
    fn test_traced_class_narrates_crank() {
        let fx = fixture::build();
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("lifecrank::debug=info"))
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let quiet = Tracked::new(1, &fx.leaf);
            fx.leaf.set_state(&quiet, LifecycleState::Ready).unwrap();
            fx.leaf.crank_object(&quiet, &mut Vec::new()).unwrap();
            assert_eq!(captured_text(&captured), "");

            // the base class covers objects of the leaf subclass
            set_debug_trace_class(fixture::BASE, true);
            let loud = Tracked::new(2, &fx.leaf);
            fx.leaf.set_state(&loud, LifecycleState::Ready).unwrap();
            fx.leaf.set_cond(&loud, fixture::A).unwrap();
            fx.leaf.crank_object(&loud, &mut Vec::new()).unwrap();
            fx.leaf.crank_object(&loud, &mut Vec::new()).unwrap();
            set_debug_trace_class(fixture::BASE, false);
        });

        let out = captured_text(&captured);
        assert!(out.lines().all(|l| l.contains("object=2")), "{out}");
        assert!(out.contains("state forced"), "{out}");
        assert!(out.contains("condition ran"), "{out}");
        assert!(out.contains("condition requested transition"), "{out}");
        assert!(out.contains("state changed"), "{out}");
    }
}
