//! Response correlation and push routing.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::RequestError;

/// One-shot callback for a request's response.
pub type ResponseCallback = Box<dyn FnOnce(Result<Value, RequestError>)>;

/// Durable callback for pushes on one route.
pub type PushCallback = Box<dyn FnMut(&Value)>;

/// Owns pending request callbacks (by id) and push subscriptions (by route).
///
/// Invocation is a direct synchronous call. Unknown ids and unmatched routes
/// are dropped silently; they are protocol noise, not application errors.
#[derive(Default)]
pub struct EventDispatcher {
    pending: HashMap<u32, ResponseCallback>,
    subscriptions: HashMap<String, Vec<PushCallback>>,
}

impl core::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("pending", &self.pending.len())
            .field("subscribed_routes", &self.subscriptions.len())
            .finish()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-shot callback.
    ///
    /// Returns `false` and drops `callback` when `id` is already pending.
    pub fn add_callback<F>(&mut self, id: u32, callback: F) -> bool
    where
        F: FnOnce(Result<Value, RequestError>) + 'static,
    {
        if self.pending.contains_key(&id) {
            log::warn!("request id {id} is already pending, callback dropped");
            return false;
        }
        self.pending.insert(id, Box::new(callback));
        true
    }

    /// Registers a durable callback for pushes on `route`.
    pub fn add_subscription<F>(&mut self, route: impl Into<String>, callback: F)
    where
        F: FnMut(&Value) + 'static,
    {
        self.subscriptions
            .entry(route.into())
            .or_default()
            .push(Box::new(callback));
    }

    /// Removes the pending callback for `id` and invokes it with `payload`.
    ///
    /// Returns `false` when nothing was pending under `id`.
    pub fn dispatch_response(&mut self, id: u32, payload: Value) -> bool {
        match self.pending.remove(&id) {
            Some(callback) => {
                callback(Ok(payload));
                true
            }
            None => {
                log::debug!("dropping response for unknown request id {id}");
                false
            }
        }
    }

    /// Invokes every subscription for `route` in registration order.
    ///
    /// Returns how many callbacks ran.
    pub fn dispatch_push(&mut self, route: &str, payload: &Value) -> usize {
        let Some(callbacks) = self.subscriptions.get_mut(route) else {
            log::debug!("dropping push on unsubscribed route {route}");
            return 0;
        };

        for callback in callbacks.iter_mut() {
            callback(payload);
        }
        callbacks.len()
    }

    /// Drops the pending callback for `id` without invoking it.
    pub fn cancel(&mut self, id: u32) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Removes every pending callback, invoking each with `error` in id order.
    ///
    /// Returns how many callbacks were failed.
    pub fn fail_all(&mut self, error: RequestError) -> usize {
        let mut pending: Vec<_> = self.pending.drain().collect();
        pending.sort_unstable_by_key(|(id, _)| *id);

        let failed = pending.len();
        for (_, callback) in pending {
            callback(Err(error.clone()));
        }
        failed
    }

    #[must_use]
    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn subscription_count(&self, route: &str) -> usize {
        self.subscriptions.get(route).map_or(0, Vec::len)
    }
}
