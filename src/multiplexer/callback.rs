//! Consumer callbacks with identity.
//!
//! A `Callback` is identified by its handler allocation: clones of one
//! callback are the same consumer, two callbacks built from separate
//! closures are different consumers.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::message::Message;

type Handler = dyn Fn(&Message) + Send + Sync;

#[derive(Clone)]
pub struct Callback(Arc<Handler>);

impl Callback {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        Self(Arc::new(handler))
    }

    pub fn call(&self, message: &Message) {
        (self.0)(message)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Callback {}

impl Hash for Callback {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:#x})", self.addr())
    }
}
