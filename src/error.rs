//! Error types used by the lifecycle engine and the monitor scheduler.
//!
//! This module defines two main error enums:
//!
//! - [`LifecycleError`]: errors raised by engine entry points (crank, condition
//!   signaling, state access, class verification).
//! - [`SchedulerError`]: errors raised by the monitor scheduler itself.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging/metrics.
//! Scheduling outcomes (`Pending`, `Reschedule`) are **not** errors; they travel as
//! [`LifecycleStatus`](crate::LifecycleStatus) values.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::{ClassId, CondId, LifecycleState, ObjectId};

/// # Errors produced by the lifecycle engine.
///
/// Three families:
/// - **Corruption**: a record failed its canary check. Fatal to the call; the
///   caller should fence the object rather than retry.
/// - **Lookup**: a condition or class was not found where the caller said it would be.
///   These are programming errors and are never defaulted.
/// - **Contract**: the call itself was illegal for the object's current situation
///   (already cranking, destroyed, illegal transition, ...).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// A structure carried the wrong magic number for its type.
    #[error("{what} corrupted: expected canary {expected:#010x}, found {found:#010x}")]
    Corrupted {
        /// Kind of record that failed the check.
        what: &'static str,
        /// Canary value for that record type.
        expected: u32,
        /// Value actually found.
        found: u32,
    },

    /// Condition id not defined anywhere in the searched part of the hierarchy.
    #[error("condition {cond} not found starting at class {class}")]
    CondNotFound {
        /// Class the lookup started from.
        class: ClassId,
        /// Condition searched for.
        cond: CondId,
    },

    /// The class constant passed is not part of the object's hierarchy.
    #[error("class {class} is not in the hierarchy of object {object}")]
    ClassNotInHierarchy {
        /// Class passed by the caller.
        class: ClassId,
        /// Object operated on.
        object: ObjectId,
    },

    /// Crank must be driven with the object's leaf class.
    #[error("object {object} has leaf class {leaf}, cranked with {class}")]
    ClassMismatch {
        /// Class passed by the caller.
        class: ClassId,
        /// Object's actual leaf class.
        leaf: ClassId,
        /// Object operated on.
        object: ObjectId,
    },

    /// A crank is already in flight for this object.
    #[error("object {object} is already in crank")]
    AlreadyCranking {
        /// Object operated on.
        object: ObjectId,
    },

    /// The object has completed its destroy rotary and is retired.
    #[error("object {object} is destroyed")]
    Destroyed {
        /// Object operated on.
        object: ObjectId,
    },

    /// Requested state is not reachable from the current one.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },

    /// `set_cond` on a condition marked never-set.
    #[error("condition {cond} can not be set explicitly")]
    NoSetCondition {
        /// Condition passed by the caller.
        cond: CondId,
    },

    /// Timer operation on a simple condition.
    #[error("condition {cond} is not a timer condition")]
    NotTimerCondition {
        /// Condition passed by the caller.
        cond: CondId,
    },

    /// `clear_current_cond` called outside of a running condition handler.
    #[error("object {object} is not running a condition")]
    NotInCondition {
        /// Object operated on.
        object: ObjectId,
    },

    /// Rotary entry resolves to no handler and does not allow a null function.
    #[error("condition {cond} has no handler")]
    NullCondFunc {
        /// Condition that resolved to no handler.
        cond: CondId,
    },

    /// Class constant rejected at build time.
    #[error("class {class} rejected: {reason}")]
    Build {
        /// Class being built.
        class: ClassId,
        /// What was wrong.
        reason: String,
    },
}

impl LifecycleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use lifecrank::{LifecycleError, ObjectId};
    ///
    /// let err = LifecycleError::AlreadyCranking { object: ObjectId(7) };
    /// assert_eq!(err.as_label(), "lifecycle_already_cranking");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::Corrupted { .. } => "lifecycle_corrupted",
            LifecycleError::CondNotFound { .. } => "lifecycle_cond_not_found",
            LifecycleError::ClassNotInHierarchy { .. } => "lifecycle_class_not_in_hierarchy",
            LifecycleError::ClassMismatch { .. } => "lifecycle_class_mismatch",
            LifecycleError::AlreadyCranking { .. } => "lifecycle_already_cranking",
            LifecycleError::Destroyed { .. } => "lifecycle_destroyed",
            LifecycleError::IllegalTransition { .. } => "lifecycle_illegal_transition",
            LifecycleError::NoSetCondition { .. } => "lifecycle_no_set_condition",
            LifecycleError::NotTimerCondition { .. } => "lifecycle_not_timer_condition",
            LifecycleError::NotInCondition { .. } => "lifecycle_not_in_condition",
            LifecycleError::NullCondFunc { .. } => "lifecycle_null_cond_func",
            LifecycleError::Build { .. } => "lifecycle_build",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }

    /// Errors that make further cranking of the object pointless.
    ///
    /// Corruption, lookup and missing-handler errors come from broken class
    /// constants or memory and will repeat on every crank; the scheduler fences
    /// the object instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LifecycleError::Corrupted { .. }
                | LifecycleError::CondNotFound { .. }
                | LifecycleError::ClassMismatch { .. }
                | LifecycleError::ClassNotInHierarchy { .. }
                | LifecycleError::NullCondFunc { .. }
                | LifecycleError::Destroyed { .. }
        )
    }
}

/// # Errors produced by the monitor scheduler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Shutdown grace period was exceeded; some monitors were still cranking.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Objects whose monitors did not stop in time.
        stuck: Vec<ObjectId>,
    },
}

impl SchedulerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use lifecrank::SchedulerError;
    /// use std::time::Duration;
    ///
    /// let err = SchedulerError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "scheduler_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedulerError::GraceExceeded { .. } => "scheduler_grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            SchedulerError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck objects={stuck:?}")
            }
        }
    }
}

/// Extracts the message carried by a panic payload.
pub(crate) fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
