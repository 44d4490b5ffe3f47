//! Post-commit event observers.

use ripple_types::ChangeEvent;

/// Hook fired after an ingested event has committed (and its blast-radius
/// prediction, if any, has been attached).
///
/// Implementations must be cheap and non-blocking: the ingest path calls
/// them inline. Outbound fan-out belongs behind a channel owned by the
/// transport, not in the hook itself.
pub trait ChangeObserver: Send + Sync {
    fn on_event(&self, event: &ChangeEvent);
}

/// Blanket impl so plain closures can subscribe.
impl<F> ChangeObserver for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_event(&self, event: &ChangeEvent) {
        self(event)
    }
}
