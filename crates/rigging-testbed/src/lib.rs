#![forbid(unsafe_code)]

//! Testbed: fixtures and the harness environment that drives them.
//!
//! # Role in rigging
//! `rigging-testbed` renders components into a [`Document`] under a zone
//! chain it owns, and exposes them to harnesses through
//! [`TestbedHarnessEnvironment`]. Every harness read or mutation waits for
//! the fixture to settle first.
//!
//! # Primary responsibilities
//! - **TestBed / ComponentFixture**: component lifecycle, change detection,
//!   and `when_stable`.
//! - **TaskStateInterceptor**: stable/unstable stream of work scheduled
//!   outside the application zone.
//! - **FixtureRegistry**: live fixtures settled together by batches.
//! - **UnitTestElement**: synthetic pointer, keyboard and form input.
//!
//! [`Document`]: rigging_core::Document

pub mod environment;
pub mod fake_events;
pub mod fixture;
pub mod registry;
pub mod task_state;
pub mod unit_test_element;

pub use environment::{EnvironmentOptions, QueryFn, TestbedHarnessEnvironment};
pub use fixture::{Component, ComponentContext, ComponentFixture, TestBed};
pub use registry::FixtureRegistry;
pub use task_state::{TaskState, TaskStateInterceptor, TaskStateStream};
pub use unit_test_element::{StabilizeFn, UnitTestElement};
