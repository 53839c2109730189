use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use lrt_engine::{Engine, EventHandle, EventType, ResourceKind};

use crate::environment::{Environment, ResourceId};
use crate::error::{Checked, Error, Result};

/// How long [`Event::wait`] blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Infinite,
    Millis(u64),
}

impl Timeout {
    /// Engine encoding: -1 waits forever.
    pub fn as_raw(&self) -> i64 {
        match self {
            Timeout::Infinite => -1,
            Timeout::Millis(ms) => i64::try_from(*ms).unwrap_or(i64::MAX),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::Millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Completion signal for asynchronous execution.
pub struct Event<'env> {
    engine: Arc<dyn Engine>,
    handle: Option<EventHandle>,
    id: ResourceId,
    _env: PhantomData<&'env Environment>,
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl<'env> Event<'env> {
    pub fn new(env: &'env Environment, event_type: EventType) -> Result<Self> {
        let env_handle = env.handle()?;
        let engine = env.engine().clone();
        let handle = engine
            .create_event(env_handle, event_type)
            .checked(engine.as_ref())?;
        let event = Self::from_handle(engine, handle);
        tracing::debug!(id = %event.id, ?event_type, "event created");
        Ok(event)
    }

    /// Take ownership of an engine event handle.
    pub(crate) fn from_handle(engine: Arc<dyn Engine>, handle: EventHandle) -> Self {
        Event {
            engine,
            handle: Some(handle),
            id: ResourceId::next(),
            _env: PhantomData,
        }
    }

    /// Give the handle up without destroying it.
    pub(crate) fn into_handle(mut self) -> Result<EventHandle> {
        self.handle.take().ok_or(Error::Destroyed {
            resource: ResourceKind::Event,
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Result<EventHandle> {
        self.handle.ok_or(Error::Destroyed {
            resource: ResourceKind::Event,
        })
    }

    fn view(&self) -> Result<EventRef<'_>> {
        Ok(EventRef::new(self.engine.as_ref(), self.handle()?))
    }

    pub fn signal(&self) -> Result<()> {
        self.view()?.signal()
    }

    pub fn is_signaled(&self) -> Result<bool> {
        self.view()?.is_signaled()
    }

    pub fn wait(&self, timeout: Timeout) -> Result<()> {
        self.view()?.wait(timeout)
    }

    /// Release the event. Further calls are no-ops.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.destroy_event(handle);
            tracing::debug!(id = %self.id, "event destroyed");
        }
    }
}

impl Drop for Event<'_> {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(id = %self.id, "event dropped without destroy");
            self.destroy();
        }
    }
}

/// Borrowed view of an event owned by someone else, such as a tensor buffer.
#[derive(Clone, Copy)]
pub struct EventRef<'a> {
    engine: &'a dyn Engine,
    handle: EventHandle,
}

impl fmt::Debug for EventRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRef").field("handle", &self.handle).finish()
    }
}

impl<'a> EventRef<'a> {
    pub(crate) fn new(engine: &'a dyn Engine, handle: EventHandle) -> Self {
        EventRef { engine, handle }
    }

    pub fn signal(&self) -> Result<()> {
        self.engine.signal_event(self.handle).checked(self.engine)
    }

    pub fn is_signaled(&self) -> Result<bool> {
        self.engine.is_event_signaled(self.handle).checked(self.engine)
    }

    pub fn wait(&self, timeout: Timeout) -> Result<()> {
        self.engine
            .wait_event(self.handle, timeout.as_raw())
            .checked(self.engine)
    }
}
