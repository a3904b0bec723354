#![forbid(unsafe_code)]

//! Runtime: event loop, zones, and reactive primitives.
//!
//! # Role in rigging
//! `rigging-runtime` is the host scheduler that fixtures and harnesses
//! coordinate through. It decides when work runs, counts what is still
//! pending, and tells interested parties when a zone has settled.
//!
//! # Key Components
//!
//! - [`EventLoop`] - Microtask queue and timers on a real or virtual clock
//! - [`Zone`] - Task accounting, has-task hooks, proxy interception point,
//!   and `on_stable` notifications
//! - [`WaitUntil`] - Future suspending until a zone or condition settles
//! - [`reactive`] - [`Observable`], [`Computed`], [`EventStream`],
//!   [`LatestStream`], and [`BatchScope`]
//!
//! # How it fits in the system
//! The testbed forks a proxy zone and an application zone per fixture and
//! waits on them before every harness operation. The popover-edit dispatcher
//! schedules its debounce timers outside the application zone and enters it
//! only to publish row state through batched observables.

pub mod error;
pub mod event_loop;
pub mod reactive;
pub mod wait;
pub mod zone;

pub use error::{Result, RuntimeError};
pub use event_loop::{
    DEFAULT_MAX_FLUSH_TURNS, EventLoop, EventLoopConfig, MAX_FLUSH_TURNS_ENV, TimeMode, TimerId,
};
pub use reactive::{BatchScope, Computed, EventStream, LatestStream, Observable, Subscription};
pub use wait::WaitUntil;
pub use zone::{HasTaskHook, HasTaskState, PendingWork, TaskCounts, TaskKind, Zone, ZoneSpec};
