// How an emit holds the registry lock while handlers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitMode {
    // Handlers run with the registry lock held. Emits are serialized against
    // each other and against subscribe/unsubscribe. A handler must not call
    // back into the same dispatcher; such calls are refused.
    #[default]
    Serialized,

    // The subscriber set is copied under the lock and handlers run after it is
    // released. Handlers may call back into the dispatcher; changes they make
    // take effect from the next emit.
    Snapshot,
}

// What happens when a handler panics during an emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    // The panic unwinds out of the emit. Remaining handlers are skipped.
    #[default]
    Propagate,

    // The panic is caught and logged, delivery continues and the failure is
    // counted in the returned `Delivery`.
    Isolate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherConfig {
    pub emit_mode: EmitMode,
    pub fault_policy: FaultPolicy,
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_mode(mut self, emit_mode: EmitMode) -> Self {
        self.emit_mode = emit_mode;
        self
    }

    pub fn fault_policy(mut self, fault_policy: FaultPolicy) -> Self {
        self.fault_policy = fault_policy;
        self
    }
}
