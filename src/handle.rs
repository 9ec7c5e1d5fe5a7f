use std::{
    fmt,
    sync::{Arc, Weak}
};

use crate::{
    dispatcher::DispatcherState,
    error::UnsubscribeError,
    id::{EventTypeId, HandleId},
    processor::Processable,
};

struct Binding {
    event_type: EventTypeId,
    // The registry owns the processor; the handle never keeps it alive.
    processor: Weak<dyn Processable>,
    // Only used to unsubscribe; never keeps the dispatcher alive.
    dispatcher: Weak<DispatcherState>,
}

// One subscriber's registration with one event type on one dispatcher.
//
// A handle starts unregistered, becomes registered through a successful
// subscribe and goes back to unregistered when it is unsubscribed or when the
// dispatcher it was registered with is dropped. Teardown also releases the
// processor, since only the dispatcher holds it strongly. Dropping a
// registered handle removes it from its dispatcher.
pub struct SubscriptionHandle {
    id: HandleId,
    binding: Option<Binding>,
}

impl SubscriptionHandle {

    pub fn new() -> Self {
        Self {
            id: HandleId::next(),
            binding: None,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    fn live(&self) -> Option<&Binding> {
        self.binding
            .as_ref()
            .filter(|binding| binding.dispatcher.strong_count() > 0)
    }

    pub fn is_registered(&self) -> bool {
        self.live().is_some()
    }

    // EventTypeId::INVALID while unregistered.
    pub fn event_type(&self) -> EventTypeId {
        self.live().map_or(EventTypeId::INVALID, |binding| binding.event_type)
    }

    pub fn processor(&self) -> Option<Arc<dyn Processable>> {
        self.live().and_then(|binding| binding.processor.upgrade())
    }

    pub fn unsubscribe(&mut self) -> bool {
        self.try_unsubscribe().is_ok()
    }

    // Unsubscribes through the handle's own back-reference, without needing
    // the dispatcher at hand.
    pub fn try_unsubscribe(&mut self) -> Result<(), UnsubscribeError> {
        let dispatcher = self.binding
            .as_ref()
            .and_then(|binding| binding.dispatcher.upgrade());

        match dispatcher {
            Some(state) => state.unregister(self),
            None => {
                self.reset();
                Err(UnsubscribeError::NotRegistered)
            }
        }
    }

    pub (crate) fn bound_dispatcher(&self) -> Option<&Weak<DispatcherState>> {
        self.live().map(|binding| &binding.dispatcher)
    }

    pub (crate) fn bind(
        &mut self,
        event_type: EventTypeId,
        processor: Weak<dyn Processable>,
        dispatcher: Weak<DispatcherState>
    ) {
        self.binding = Some(Binding {
            event_type,
            processor,
            dispatcher,
        });
    }

    pub (crate) fn reset(&mut self) {
        self.binding = None;
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            if let Some(state) = binding.dispatcher.upgrade() {
                state.forget(binding.event_type, self.id);
            }
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("registered", &self.is_registered())
            .field("event_type", &self.event_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{CallbackProcessor, Dispatcher, DispatcherConfig, TypeRegistry};

    struct Pulse;

    fn dispatcher() -> Dispatcher {
        Dispatcher::with_identity(DispatcherConfig::default(), Arc::new(TypeRegistry::new()))
    }

    #[test]
    fn test_new_handle_is_unregistered() {
        let handle = SubscriptionHandle::new();
        assert!(!handle.is_registered());
        assert_eq!(handle.event_type(), EventTypeId::INVALID);
        assert!(handle.processor().is_none());
        assert_ne!(handle.id(), SubscriptionHandle::default().id());
    }

    #[test]
    fn test_registered_handle_state() {
        let dispatcher = dispatcher();
        let mut handle = SubscriptionHandle::new();
        assert!(dispatcher.subscribe(&mut handle, |_: &Pulse| {}));

        assert!(handle.is_registered());
        assert!(handle.event_type().is_valid());
        assert_eq!(handle.event_type(), dispatcher.identifier_for::<Pulse>());
        assert!(handle.processor().is_some());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let dispatcher = dispatcher();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let mut handle = SubscriptionHandle::new();
            let hits = Arc::clone(&hits);
            assert!(dispatcher.subscribe(&mut handle, move |_: &Pulse| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
            assert!(dispatcher.emit(&Pulse));
        }

        assert_eq!(dispatcher.subscriber_count::<Pulse>(), 0);
        assert!(!dispatcher.emit(&Pulse));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_unsubscribe() {
        let dispatcher = dispatcher();
        let mut handle = SubscriptionHandle::new();

        assert!(!handle.unsubscribe());
        assert!(dispatcher.subscribe(&mut handle, |_: &Pulse| {}));
        assert!(handle.unsubscribe());
        assert!(!handle.is_registered());
        assert!(!dispatcher.emit(&Pulse));
        assert_eq!(handle.try_unsubscribe(), Err(UnsubscribeError::NotRegistered));
    }

    #[test]
    fn test_dispatcher_teardown_releases_handle() {
        let mut handle = SubscriptionHandle::new();
        {
            let first = dispatcher();
            assert!(first.subscribe(&mut handle, |_: &Pulse| {}));
            assert!(handle.is_registered());
        }

        assert!(!handle.is_registered());
        assert_eq!(handle.event_type(), EventTypeId::INVALID);
        assert!(handle.processor().is_none());
        assert_eq!(handle.try_unsubscribe(), Err(UnsubscribeError::NotRegistered));

        let second = dispatcher();
        assert!(second.subscribe(&mut handle, |_: &Pulse| {}));
        assert!(second.emit(&Pulse));
    }

    #[test]
    fn test_dispatcher_teardown_releases_processor() {
        let processor: Arc<dyn Processable> = Arc::new(CallbackProcessor::empty());
        let mut handle = SubscriptionHandle::new();
        {
            let first = dispatcher();
            assert!(first.subscribe_processor::<Pulse>(&mut handle, Arc::clone(&processor)));
            assert_eq!(Arc::strong_count(&processor), 2);
            assert!(Arc::ptr_eq(&handle.processor().unwrap(), &processor));
        }

        assert_eq!(Arc::strong_count(&processor), 1);
        assert!(handle.processor().is_none());
    }

    #[test]
    fn test_unsubscribe_releases_processor() {
        let dispatcher = dispatcher();
        let processor: Arc<dyn Processable> = Arc::new(CallbackProcessor::empty());
        let mut handle = SubscriptionHandle::new();

        assert!(dispatcher.subscribe_processor::<Pulse>(&mut handle, Arc::clone(&processor)));
        assert!(handle.unsubscribe());
        assert_eq!(Arc::strong_count(&processor), 1);
    }

    #[test]
    fn test_handle_outlives_dispatcher_drop_order() {
        let dispatcher = dispatcher();
        let mut handle = SubscriptionHandle::new();
        assert!(dispatcher.subscribe(&mut handle, |_: &Pulse| {}));
        drop(dispatcher);
        drop(handle);
    }

    #[test]
    fn test_debug_output() {
        let handle = SubscriptionHandle::new();
        let rendered = format!("{:?}", handle);
        assert!(rendered.contains("registered: false"));
    }
}
