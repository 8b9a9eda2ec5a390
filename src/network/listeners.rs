use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use crate::network::error::SendError;
use crate::network::message::HttpMessage;
use crate::network::sender::HttpSender;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = Result<(), ListenerError>;

/// Observer of every hop a sender transmits.
///
/// Errors (and panics) raised by a callback are logged and otherwise ignored:
/// the other listeners still run and the send carries on.
pub trait HttpSenderListener: Send + Sync {
    /// Lower values run first; equal values run in registration order.
    fn listener_order(&self) -> i32;

    fn on_http_request_send(
        &self,
        msg: &mut HttpMessage,
        initiator: i32,
        sender: &HttpSender,
    ) -> ListenerResult;

    fn on_http_response_receive(
        &self,
        msg: &mut HttpMessage,
        initiator: i32,
        sender: &HttpSender,
    ) -> ListenerResult;

    fn listener_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

thread_local! {
    static IN_LISTENER: Cell<bool> = const { Cell::new(false) };
}

// marks the current thread as running listener callbacks until dropped
struct InListener;

impl InListener {
    fn enter() -> Option<Self> {
        IN_LISTENER.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(InListener)
            }
        })
    }
}

impl Drop for InListener {
    fn drop(&mut self) {
        IN_LISTENER.with(|flag| flag.set(false));
    }
}

#[derive(Clone)]
struct ListenerEntry {
    listener: Arc<dyn HttpSenderListener>,
    order: i32,
    sequence: u64,
}

#[derive(Default)]
struct RegistryState {
    entries: Arc<Vec<ListenerEntry>>,
    version: u64,
    next_sequence: u64,
}

/// Listeners of one sender, sorted by `(order, registration sequence)`.
///
/// Writers replace the entry list and bump a version; a notification round
/// iterates the list it started with and fails with
/// [`SendError::ConcurrentModification`] if the version moves under it.
#[derive(Default)]
pub struct ListenerRegistry {
    state: RwLock<RegistryState>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn HttpSenderListener>) {
        let order = listener.listener_order();
        let mut state = self.state.write();
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let mut entries = state.entries.as_ref().clone();
        entries.push(ListenerEntry {
            listener,
            order,
            sequence,
        });
        entries.sort_by_key(|e| (e.order, e.sequence));
        state.entries = Arc::new(entries);
        state.version += 1;
    }

    /// Removes the given listener instance. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn HttpSenderListener>) -> bool {
        let mut state = self.state.write();
        let Some(idx) = state
            .entries
            .iter()
            .position(|e| std::ptr::addr_eq(Arc::as_ptr(&e.listener), Arc::as_ptr(listener)))
        else {
            return false;
        };
        let mut entries = state.entries.as_ref().clone();
        entries.remove(idx);
        state.entries = Arc::new(entries);
        state.version += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify_request(
        &self,
        msg: &mut HttpMessage,
        initiator: i32,
        sender: &HttpSender,
    ) -> Result<(), SendError> {
        self.notify(msg, "request", |listener, msg| {
            listener.on_http_request_send(msg, initiator, sender)
        })
    }

    pub(crate) fn notify_response(
        &self,
        msg: &mut HttpMessage,
        initiator: i32,
        sender: &HttpSender,
    ) -> Result<(), SendError> {
        self.notify(msg, "response", |listener, msg| {
            listener.on_http_response_receive(msg, initiator, sender)
        })
    }

    // sends issued from inside a callback on this thread are not notified
    fn notify<F>(&self, msg: &mut HttpMessage, phase: &str, mut call: F) -> Result<(), SendError>
    where
        F: FnMut(&dyn HttpSenderListener, &mut HttpMessage) -> ListenerResult,
    {
        let Some(_in_listener) = InListener::enter() else {
            return Ok(());
        };

        let (entries, version) = {
            let state = self.state.read();
            (Arc::clone(&state.entries), state.version)
        };

        for entry in entries.iter() {
            let listener = entry.listener.as_ref();
            match panic::catch_unwind(AssertUnwindSafe(|| call(listener, &mut *msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    "Error while notifying listener {} ({phase}) cause: {e}",
                    listener.listener_name()
                ),
                Err(payload) => error!(
                    "Error while notifying listener {} ({phase}) cause: {}",
                    listener.listener_name(),
                    panic_message(payload.as_ref())
                ),
            }
            if self.state.read().version != version {
                return Err(SendError::ConcurrentModification);
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ordered(i32);

    impl HttpSenderListener for Ordered {
        fn listener_order(&self) -> i32 {
            self.0
        }

        fn on_http_request_send(&self, _: &mut HttpMessage, _: i32, _: &HttpSender) -> ListenerResult {
            Ok(())
        }

        fn on_http_response_receive(&self, _: &mut HttpMessage, _: i32, _: &HttpSender) -> ListenerResult {
            Ok(())
        }
    }

    fn orders(registry: &ListenerRegistry) -> Vec<(i32, u64)> {
        registry
            .state
            .read()
            .entries
            .iter()
            .map(|e| (e.order, e.sequence))
            .collect()
    }

    #[test]
    fn entries_sorted_by_order_then_registration() {
        let registry = ListenerRegistry::new();
        for order in [1, 2, -1, 2] {
            registry.add(Arc::new(Ordered(order)));
        }
        assert_eq!(orders(&registry), vec![(-1, 2), (1, 0), (2, 1), (2, 3)]);
    }

    #[test]
    fn remove_matches_instance_not_order() {
        let registry = ListenerRegistry::new();
        let first: Arc<dyn HttpSenderListener> = Arc::new(Ordered(0));
        let second: Arc<dyn HttpSenderListener> = Arc::new(Ordered(0));
        registry.add(Arc::clone(&first));
        registry.add(Arc::clone(&second));

        assert!(registry.remove(&second));
        assert_eq!(orders(&registry), vec![(0, 0)]);
        assert!(!registry.remove(&second));
        assert!(registry.remove(&first));
        assert!(registry.is_empty());
    }

    #[test]
    fn version_moves_only_on_structural_change() {
        let registry = ListenerRegistry::new();
        let listener: Arc<dyn HttpSenderListener> = Arc::new(Ordered(0));
        registry.add(Arc::clone(&listener));
        let version = registry.state.read().version;
        assert!(!registry.remove(&(Arc::new(Ordered(0)) as Arc<dyn HttpSenderListener>)));
        assert_eq!(registry.state.read().version, version);
        assert!(registry.remove(&listener));
        assert_eq!(registry.state.read().version, version + 1);
    }

    #[test]
    fn in_listener_guard_is_not_reentrant() {
        let outer = InListener::enter();
        assert!(outer.is_some());
        assert!(InListener::enter().is_none());
        drop(outer);
        assert!(InListener::enter().is_some());
    }
}
