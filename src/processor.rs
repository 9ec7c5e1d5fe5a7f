use std::{any::Any, fmt};

use crate::id::EventTypeId;

// An event in flight, tagged with the identifier it was emitted under.
//
// The event itself is only reachable through `Payload::downcast`, which
// checks the concrete type, so a processor can never observe an event as the
// wrong type.
#[derive(Clone, Copy)]
pub struct Payload<'a> {
    event_type: EventTypeId,
    event: &'a dyn Any,
}

impl<'a> Payload<'a> {
    pub (crate) fn new(event_type: EventTypeId, event: &'a dyn Any) -> Self {
        Self { event_type, event }
    }

    pub fn event_type(&self) -> EventTypeId {
        self.event_type
    }

    pub fn is<E: 'static>(&self) -> bool {
        self.event.is::<E>()
    }

    pub fn downcast<E: 'static>(&self) -> Option<&'a E> {
        self.event.downcast_ref::<E>()
    }
}

impl fmt::Debug for Payload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

// A unit of work run against every event delivered to a subscription.
//
// Implement this to apply policy (filtering, rate limiting, forwarding)
// around event handling. One processor may back several subscriptions.
pub trait Processable: Send + Sync {
    fn process(&self, payload: &Payload<'_>);
}

pub type Callback = dyn for<'a, 'b> Fn(&'a Payload<'b>) + Send + Sync;

// Default processor: forwards every payload to a stored callback.
#[derive(Default)]
pub struct CallbackProcessor {
    callback: Option<Box<Callback>>,
}

impl CallbackProcessor {

    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Payload<'_>) + Send + Sync + 'static
    {
        Self { callback: Some(Box::new(callback)) }
    }

    // A processor without a callback. Processing is a no-op.
    pub fn empty() -> Self {
        Self { callback: None }
    }

    // Wraps a callback over a concrete event type. Payloads carrying any
    // other type are ignored.
    pub fn for_event<E, F>(callback: F) -> Self
    where
        E: 'static,
        F: Fn(&E) + Send + Sync + 'static
    {
        Self::new(move |payload: &Payload<'_>| {
            if let Some(event) = payload.downcast::<E>() {
                callback(event);
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.callback.is_none()
    }
}

impl Processable for CallbackProcessor {
    fn process(&self, payload: &Payload<'_>) {
        if let Some(callback) = &self.callback {
            callback(payload);
        }
    }
}

impl fmt::Debug for CallbackProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackProcessor")
            .field("empty", &self.is_empty())
            .finish()
    }
}
