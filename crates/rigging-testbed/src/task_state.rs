#![forbid(unsafe_code)]

//! Task-state interception on the proxy zone.
//!
//! # Design
//!
//! [`TaskStateInterceptor::setup`] chains a has-task hook onto the nearest
//! proxy zone and publishes `{ stable }` snapshots through an
//! [`Observable`]. The stream is attached to the zone as an extension, so a
//! second setup on the same zone returns the stream created by the first.
//!
//! Only changes of the proxy zone's **own** counters are published. Work
//! scheduled in child zones (the application zone of a fixture) is tracked
//! by those zones and their `when_stable` futures instead; this stream
//! reports work running outside them.

use std::rc::Rc;

use rigging_runtime::{
    HasTaskHook, HasTaskState, Observable, Result, RuntimeError, WaitUntil, Zone,
};
use tracing::debug;

/// Snapshot of pending work in the intercepted zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    /// Whether the zone has neither macro nor micro tasks pending.
    pub stable: bool,
}

/// Shared stream of [`TaskState`] values for one zone.
pub type TaskStateStream = Observable<TaskState>;

/// Marker extension: present once a zone has been intercepted.
struct Installed {
    stream: TaskStateStream,
}

/// Installs task-state observation on a proxy zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateInterceptor;

impl TaskStateInterceptor {
    /// Attach to `zone` (or the current zone) and return its task-state
    /// stream.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ZoneUnavailable`] when no zone is given or current,
    /// [`RuntimeError::ProxyZoneMissing`] when the zone chain has no proxy.
    pub fn setup(zone: Option<&Zone>) -> Result<TaskStateStream> {
        let zone = match zone {
            Some(zone) => zone.clone(),
            None => Zone::current().ok_or(RuntimeError::ZoneUnavailable)?,
        };
        let proxy = zone
            .nearest_proxy()
            .ok_or_else(|| RuntimeError::ProxyZoneMissing {
                zone: zone.name().to_string(),
            })?;

        if let Some(installed) = proxy.extension::<Installed>() {
            return Ok(installed.stream.clone());
        }

        let initial = TaskState {
            stable: proxy.task_counts().is_idle(),
        };
        let stream = Observable::new(initial);
        let previous = proxy.has_task_hook();
        let publisher = stream.clone();
        let hook: HasTaskHook = Rc::new(move |current: &Zone, state: &HasTaskState| {
            if let Some(previous) = &previous {
                previous(current, state);
            }
            if current.ptr_eq(&state.target) {
                publisher.set(TaskState {
                    stable: !state.macro_task && !state.micro_task,
                });
            }
        });
        proxy.replace_has_task_hook(Some(hook))?;
        proxy.set_extension(Rc::new(Installed {
            stream: stream.clone(),
        }));
        debug!(zone = %proxy.name(), stable = initial.stable, "task state interceptor installed");
        Ok(stream)
    }

    /// Future resolving once the stream reports a stable zone.
    pub fn when_stable(
        zone: &Zone,
        stream: &TaskStateStream,
    ) -> WaitUntil<impl FnMut() -> bool + Unpin + use<>> {
        let stream = stream.clone();
        zone.event_loop().wait_until(move || stream.get().stable)
    }
}
