#![forbid(unsafe_code)]

//! Harness: rendering-independent component test harnesses.
//!
//! # Role in rigging
//! `rigging-harness` defines what a test sees. Tests never touch nodes
//! directly; they load typed [`ComponentHarness`] instances through a
//! [`HarnessLoader`] and drive them through the [`TestElement`] surface.
//! Environments (the testbed, or any other backend) plug in below via
//! [`EnvironmentBackend`].
//!
//! # Primary responsibilities
//! - **TestElement**: the asynchronous element capability interface.
//! - **ComponentHarness / HarnessPredicate**: typed handles and the
//!   constraints used to select them.
//! - **HarnessEnvironment**: locator factories, child loaders, and mixed
//!   element/harness queries with per-element deduplication.
//! - **StabilizationContext**: batches that suspend automatic
//!   stabilization (`manual_stabilization`, `parallel`).

pub mod environment;
pub mod error;
pub mod harness;
pub mod stabilization;
pub mod test_element;

pub use environment::{
    EnvironmentBackend, HarnessEnvironment, HarnessLoader, Located, LocatorFactory, LocatorQuery,
    ScopedElement,
};
pub use error::{HarnessError, Result};
pub use harness::{BaseHarnessFilters, ComponentHarness, HarnessPredicate, TextPattern};
pub use stabilization::{StabilizationContext, StabilizationHandler};
pub use test_element::{ClickPosition, KeyInput, TestElement, TestElementRef, TextOptions};
