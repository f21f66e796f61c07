mod accounts;
mod availability;
mod booking;
mod catalog;
mod error;
#[cfg(test)]
mod tests;

pub use booking::BookingStage;
pub use error::{EngineError, ErrorKind};

use std::sync::Arc;

use crate::credentials::Credentials;
use crate::store::Store;

/// Request-scoped logic over a shared [`Store`].
///
/// Holds no per-request state: the availability resolver and the booking
/// guard read and write only through the store, so any number of tasks can
/// share one engine.
pub struct Engine<S> {
    store: Arc<S>,
    credentials: Arc<Credentials>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

impl<S: Store> Engine<S> {
    pub fn new(store: Arc<S>, credentials: Arc<Credentials>) -> Self {
        Self { store, credentials }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
