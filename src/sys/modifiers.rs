/// Live state of the cycle modifier key, polled by the cycle watchdog.
pub trait ModifierState: Send + Sync {
    fn is_held(&self) -> bool;
}

/// For callers without a key-event source: the modifier is never down.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverHeld;

impl ModifierState for NeverHeld {
    fn is_held(&self) -> bool { false }
}
