use std::{
    fmt,
    sync::{
        atomic::{
            AtomicU64,
            Ordering
        },
        Arc
    }
};

// Identifier assigned to a distinct event type. Zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTypeId(u64);

impl EventTypeId {
    pub const INVALID: EventTypeId = EventTypeId(0);

    pub fn new(val: u64) -> Self {
        Self(val)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub (crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub (crate) struct IdGenerator {
    inner: Arc<AtomicU64>
}

impl IdGenerator {
    pub fn new(min_value: u64) -> Self {
        Self {
            inner: Arc::new(AtomicU64::new(min_value.max(1))),
        }
    }

    pub fn get(&self) -> EventTypeId {
        EventTypeId::new(self.inner.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_event_type_id() {
        assert!(!EventTypeId::INVALID.is_valid());
        assert_eq!(EventTypeId::INVALID.as_u64(), 0);
        assert!(EventTypeId::new(7).is_valid());
    }

    #[test]
    fn test_generator_never_yields_zero() {
        let generator = IdGenerator::new(0);
        let first = generator.get();
        assert!(first.is_valid());
        assert_eq!(first, EventTypeId::new(1));
        assert_eq!(generator.get(), EventTypeId::new(2));
    }

    #[test]
    fn test_generator_clones_share_counter() {
        let generator = IdGenerator::new(1);
        let other = generator.clone();
        let a = generator.get();
        let b = other.get();
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let a = HandleId::next();
        let b = HandleId::next();
        assert_ne!(a, b);
        assert!(a.as_u64() > 0);
        assert_eq!(format!("{}", a), a.as_u64().to_string());
    }
}
