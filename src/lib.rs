use thiserror::Error;

#[macro_use]
pub (crate) mod logging;

mod id;
mod identity;
mod processor;
mod handle;
mod dispatcher;
mod config;
mod error;

pub use id::{EventTypeId, HandleId};
pub use identity::{TypeIdentity, TypeRegistry};
pub use processor::{Callback, CallbackProcessor, Payload, Processable};
pub use handle::SubscriptionHandle;
pub use dispatcher::{Delivery, Dispatcher};
pub use config::{DispatcherConfig, EmitMode, FaultPolicy};
pub use error::{EmitError, SubscribeError, UnsubscribeError};


#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("Subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("Unsubscribe failed: {0}")]
    Unsubscribe(#[from] UnsubscribeError),

    #[error("Emit failed: {0}")]
    Emit(#[from] EmitError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug)]
    struct Greeting {
        name: String,
    }

    struct Farewell;

    fn greet_round(dispatcher: &Dispatcher, log: &Arc<Mutex<Vec<String>>>) -> Result<Delivery> {
        let sink = Arc::clone(log);
        let mut handle = SubscriptionHandle::new();
        dispatcher.try_subscribe(&mut handle, move |g: &Greeting| sink.lock().push(g.name.clone()))?;
        let delivery = dispatcher.try_emit(&Greeting { name: "Joe".to_string() })?;
        dispatcher.try_unsubscribe(&mut handle)?;
        Ok(delivery)
    }

    #[test]
    fn test_errors_convert_into_crate_error() {
        let dispatcher = Dispatcher::with_identity(DispatcherConfig::default(), Arc::new(TypeRegistry::new()));
        let log = Arc::new(Mutex::new(Vec::new()));

        assert_eq!(greet_round(&dispatcher, &log), Ok(Delivery { invoked: 1, failed: 0 }));
        assert_eq!(*log.lock(), vec!["Joe".to_string()]);

        let err: Error = dispatcher.try_emit(&Farewell).unwrap_err().into();
        assert_eq!(err, Error::Emit(EmitError::NoSubscribers));
        assert_eq!(err.to_string(), "Emit failed: No subscribers for this event type");
    }
}
