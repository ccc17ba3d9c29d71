//! Routes window messages to the object that owns the window.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Native window handle value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

pub struct WindowRegistry<H: ?Sized> {
    handlers: HashMap<WindowId, Rc<RefCell<H>>>,
}

impl<H: ?Sized> Default for WindowRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<H: ?Sized> WindowRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handler previously registered for `id`, if any.
    pub fn insert(&mut self, id: WindowId, handler: Rc<RefCell<H>>) -> Option<Rc<RefCell<H>>> {
        log::trace!("registering window {id:?}");
        self.handlers.insert(id, handler)
    }

    /// The registry keeps its own reference, so the caller can release any borrow of the
    /// registry before running the handler.
    pub fn get(&self, id: WindowId) -> Option<Rc<RefCell<H>>> {
        self.handlers.get(&id).cloned()
    }

    pub fn remove(&mut self, id: WindowId) -> Option<Rc<RefCell<H>>> {
        log::trace!("unregistering window {id:?}");
        self.handlers.remove(&id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Runs `f` on the handler unless it is already borrowed further up the stack, which
/// happens when a handler triggers a message that is sent synchronously to its own window.
pub fn dispatch<H: ?Sized, R>(handler: &RefCell<H>, f: impl FnOnce(&mut H) -> R) -> Option<R> {
    match handler.try_borrow_mut() {
        Ok(mut handler) => Some(f(&mut handler)),
        Err(_) => None,
    }
}
