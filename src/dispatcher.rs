use std::{
    any::{Any, TypeId},
    fmt,
    ops::{Deref, DerefMut},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc
    }
};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;

use crate::{
    config::{DispatcherConfig, EmitMode, FaultPolicy},
    error::{EmitError, SubscribeError, UnsubscribeError},
    handle::SubscriptionHandle,
    id::{EventTypeId, HandleId},
    identity::{TypeIdentity, TypeRegistry},
    processor::{CallbackProcessor, Payload, Processable},
};

type SubscriberSet = FxHashMap<HandleId, Arc<dyn Processable>>;
type Registry = FxHashMap<EventTypeId, SubscriberSet>;

// Per-thread token used to recognise calls made from inside a handler that is
// running under the registry lock. Zero means "no token".
fn thread_token() -> u64 {
    static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TOKEN: u64 = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.try_with(|token| *token).unwrap_or(0)
}

// Registry lock guard. Processors removed through it are dropped only after
// the lock is released: a processor may own a handle whose drop takes the lock
// again. Fields drop in declaration order.
struct RegistryGuard<'a> {
    registry: MutexGuard<'a, Registry>,
    released: Vec<Arc<dyn Processable>>,
}

impl RegistryGuard<'_> {
    fn release(&mut self, event_type: EventTypeId, id: HandleId) -> bool {
        let Some(set) = self.registry.get_mut(&event_type) else { return false };
        let removed = set.remove(&id);
        if set.is_empty() {
            self.registry.remove(&event_type);
        }

        match removed {
            Some(processor) => {
                self.released.push(processor);
                true
            },
            None => false
        }
    }
}

impl Deref for RegistryGuard<'_> {
    type Target = Registry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

impl DerefMut for RegistryGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.registry
    }
}

// Outcome of an emit that reached at least one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    pub invoked: usize,
    pub failed: usize,
}

impl Delivery {
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }
}

// Marks the registry lock as held by the emitting thread while handlers run.
struct EmittingMarker<'a> {
    slot: &'a AtomicU64,
}

impl<'a> EmittingMarker<'a> {
    fn enter(slot: &'a AtomicU64) -> Self {
        slot.store(thread_token(), Ordering::Release);
        Self { slot }
    }
}

impl Drop for EmittingMarker<'_> {
    fn drop(&mut self) {
        self.slot.store(0, Ordering::Release);
    }
}

pub (crate) struct DispatcherState {
    config: DispatcherConfig,
    identity: Arc<dyn TypeIdentity>,
    registry: Mutex<Registry>,
    emitting: AtomicU64,
    // Handles dropped by a handler during a serialized emit. Purged the next
    // time the registry lock is taken.
    deferred: Mutex<Vec<(EventTypeId, HandleId)>>,
}

impl DispatcherState {

    fn is_reentrant(&self) -> bool {
        let token = thread_token();
        token != 0 && self.emitting.load(Ordering::Acquire) == token
    }

    fn lock(&self) -> RegistryGuard<'_> {
        let mut guard = RegistryGuard {
            registry: self.registry.lock(),
            released: Vec::new(),
        };
        let deferred = std::mem::take(&mut *self.deferred.lock());
        for (event_type, id) in deferred {
            guard.release(event_type, id);
        }
        guard
    }

    fn register(
        self: &Arc<Self>,
        handle: &mut SubscriptionHandle,
        event_type: EventTypeId,
        processor: Option<Arc<dyn Processable>>,
    ) -> Result<(), SubscribeError> {
        let processor = processor.ok_or(SubscribeError::MissingProcessor)?;
        if !event_type.is_valid() {
            return Err(SubscribeError::InvalidEventType);
        }
        if self.is_reentrant() {
            error!("evdispatch: Handle {} tried to subscribe from inside a handler", handle.id());
            return Err(SubscribeError::Reentrant);
        }

        let mut registry = self.lock();
        if handle.is_registered() {
            return Err(SubscribeError::AlreadyRegistered);
        }

        handle.bind(event_type, Arc::downgrade(&processor), Arc::downgrade(self));
        registry
            .entry(event_type)
            .or_default()
            .insert(handle.id(), processor);

        info!(
            "evdispatch: Subscribed handle {} to event type {}",
            handle.id(),
            event_type
        );

        Ok(())
    }

    pub (crate) fn unregister(
        &self,
        handle: &mut SubscriptionHandle
    ) -> Result<(), UnsubscribeError> {
        match handle.bound_dispatcher() {
            None => return Err(UnsubscribeError::NotRegistered),
            Some(bound) if !std::ptr::eq(bound.as_ptr(), self) => {
                warn!(
                    "evdispatch: Handle {} is registered with another dispatcher",
                    handle.id()
                );
                return Err(UnsubscribeError::ForeignHandle);
            },
            Some(_) => {}
        }
        if self.is_reentrant() {
            error!("evdispatch: Handle {} tried to unsubscribe from inside a handler", handle.id());
            return Err(UnsubscribeError::Reentrant);
        }

        let event_type = handle.event_type();
        let mut registry = self.lock();
        registry.release(event_type, handle.id());
        drop(registry);
        handle.reset();

        info!(
            "evdispatch: Unsubscribed handle {} from event type {}",
            handle.id(),
            event_type
        );

        Ok(())
    }

    // Called when a registered handle is dropped.
    pub (crate) fn forget(&self, event_type: EventTypeId, id: HandleId) {
        if self.is_reentrant() {
            self.deferred.lock().push((event_type, id));
            info!("evdispatch: Deferred removal of dropped handle {}", id);
            return;
        }

        if self.lock().release(event_type, id) {
            info!(
                "evdispatch: Dropped handle {} released event type {}",
                id,
                event_type
            );
        }
    }

    fn dispatch(
        &self,
        event_type: EventTypeId,
        event: &dyn Any
    ) -> Result<Delivery, EmitError> {
        if self.is_reentrant() {
            error!("evdispatch: Emit of event type {} from inside a handler", event_type);
            return Err(EmitError::Reentrant);
        }

        let registry = self.lock();
        let subscribers = match registry.get(&event_type) {
            Some(set) if !set.is_empty() => set,
            _ => return Err(EmitError::NoSubscribers),
        };
        let payload = Payload::new(event_type, event);

        match self.config.emit_mode {
            EmitMode::Serialized => {
                let _marker = EmittingMarker::enter(&self.emitting);
                Ok(self.deliver(subscribers.values(), &payload))
            },
            EmitMode::Snapshot => {
                let snapshot: Vec<Arc<dyn Processable>> = subscribers.values().cloned().collect();
                drop(registry);
                Ok(self.deliver(snapshot.iter(), &payload))
            }
        }
    }

    fn deliver<'p>(
        &self,
        processors: impl Iterator<Item = &'p Arc<dyn Processable>>,
        payload: &Payload<'_>
    ) -> Delivery {
        let mut delivery = Delivery::default();

        for processor in processors {
            delivery.invoked += 1;
            match self.config.fault_policy {
                FaultPolicy::Propagate => processor.process(payload),
                FaultPolicy::Isolate => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor.process(payload)));
                    if outcome.is_err() {
                        delivery.failed += 1;
                        error!(
                            "evdispatch: Handler for event type {} panicked",
                            payload.event_type()
                        );
                    }
                }
            }
        }

        delivery
    }
}

// Synchronous, type-indexed event dispatcher.
//
// Handlers are registered per event type through a `SubscriptionHandle`
// and run on the emitting thread. Clones share the same registry; the
// registry is torn down when the last clone is dropped.
//
// With `EmitMode::Serialized` (the default) handlers run while the
// dispatcher lock is held, so a handler must not subscribe, unsubscribe, emit
// or count subscribers on the dispatcher that is invoking it. Such calls are
// refused instead of deadlocking. Use `EmitMode::Snapshot` when handlers
// need to call back into the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<DispatcherState>,
}

impl Dispatcher {

    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self::with_identity(config, TypeRegistry::global())
    }

    pub fn with_identity(
        config: DispatcherConfig,
        identity: Arc<dyn TypeIdentity>
    ) -> Self {
        Self {
            state: Arc::new(DispatcherState {
                config,
                identity,
                registry: Mutex::new(FxHashMap::default()),
                emitting: AtomicU64::new(0),
                deferred: Mutex::new(Vec::new()),
            })
        }
    }

    pub fn config(&self) -> DispatcherConfig {
        self.state.config
    }

    pub fn identifier_for<E: ?Sized + 'static>(&self) -> EventTypeId {
        self.state.identity.identifier_of(TypeId::of::<E>())
    }

    pub fn subscribe<E, F>(&self, handle: &mut SubscriptionHandle, callback: F) -> bool
    where
        E: 'static,
        F: Fn(&E) + Send + Sync + 'static
    {
        self.try_subscribe(handle, callback).is_ok()
    }

    pub fn try_subscribe<E, F>(
        &self,
        handle: &mut SubscriptionHandle,
        callback: F
    ) -> Result<(), SubscribeError>
    where
        E: 'static,
        F: Fn(&E) + Send + Sync + 'static
    {
        let processor: Arc<dyn Processable> = Arc::new(CallbackProcessor::for_event::<E, F>(callback));
        self.try_subscribe_raw(handle, self.identifier_for::<E>(), Some(processor))
    }

    pub fn subscribe_processor<E: 'static>(
        &self,
        handle: &mut SubscriptionHandle,
        processor: Arc<dyn Processable>
    ) -> bool {
        self.try_subscribe_processor::<E>(handle, processor).is_ok()
    }

    pub fn try_subscribe_processor<E: 'static>(
        &self,
        handle: &mut SubscriptionHandle,
        processor: Arc<dyn Processable>
    ) -> Result<(), SubscribeError> {
        self.try_subscribe_raw(handle, self.identifier_for::<E>(), Some(processor))
    }

    // Untyped entry point. The processor receives payloads emitted under
    // `event_type` and must downcast them itself.
    pub fn subscribe_raw(
        &self,
        handle: &mut SubscriptionHandle,
        event_type: EventTypeId,
        processor: Option<Arc<dyn Processable>>
    ) -> bool {
        self.try_subscribe_raw(handle, event_type, processor).is_ok()
    }

    pub fn try_subscribe_raw(
        &self,
        handle: &mut SubscriptionHandle,
        event_type: EventTypeId,
        processor: Option<Arc<dyn Processable>>
    ) -> Result<(), SubscribeError> {
        self.state.register(handle, event_type, processor)
    }

    pub fn unsubscribe(&self, handle: &mut SubscriptionHandle) -> bool {
        self.try_unsubscribe(handle).is_ok()
    }

    pub fn try_unsubscribe(
        &self,
        handle: &mut SubscriptionHandle
    ) -> Result<(), UnsubscribeError> {
        self.state.unregister(handle)
    }

    pub fn emit<E: 'static>(&self, event: &E) -> bool {
        self.try_emit(event).is_ok()
    }

    pub fn try_emit<E: 'static>(&self, event: &E) -> Result<Delivery, EmitError> {
        self.state.dispatch(self.identifier_for::<E>(), event)
    }

    // Returns 0 when called from a handler during a serialized emit.
    pub fn subscriber_count<E: ?Sized + 'static>(&self) -> usize {
        if self.state.is_reentrant() {
            error!("evdispatch: Subscriber count requested from inside a handler");
            return 0;
        }
        let event_type = self.identifier_for::<E>();
        self.state.lock().get(&event_type).map_or(0, |set| set.len())
    }

    pub fn has_subscribers<E: ?Sized + 'static>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.state.config)
            .finish_non_exhaustive()
    }
}
