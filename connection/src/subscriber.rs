//! Subscriber registries.
//!
//! A registry holds handlers and fans a notification out to them in
//! subscription order. Registries are plain `&mut self` structs: the owner
//! holds the only reference (usually inside a lock or a single task), which is
//! what serializes subscription, notification and stop.
//!
//! Handlers receive `Ok(value)` for a regular notification and `Err(code)`
//! exactly once when they are dropped from the registry by [`stop`] (or, for
//! the keyed variant, by [`Desubscriber::unsubscribe`]).
//!
//! * [`Subscriber`] retains every handler until stop.
//! * [`Unsubscriber`] handlers return `false` to remove themselves.
//! * [`Desubscriber`] is keyed, supports targeted notification and removal.
//!
//! [`stop`]: Subscriber::stop

use crate::error::Error;

/// Handler retained until the registry stops.
pub type Handler<A> = Box<dyn FnMut(Result<A, Error>) + Send>;

/// Handler which returns whether it wants to stay subscribed.
pub type RetainingHandler<A> = Box<dyn FnMut(Result<A, Error>) -> bool + Send>;

/// Registry which retains handlers until stopped.
pub struct Subscriber<A> {
    handlers: Vec<Handler<A>>,
    stopped: bool,
}

impl<A: Clone> Subscriber<A> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            stopped: false,
        }
    }

    /// Add a handler, fails with [`Error::SubscriberStopped`] after stop.
    pub fn subscribe(&mut self, handler: Handler<A>) -> Result<(), Error> {
        if self.stopped {
            return Err(Error::SubscriberStopped);
        }

        self.handlers.push(handler);
        Ok(())
    }

    /// Notify every handler in subscription order. No-op once stopped.
    pub fn notify(&mut self, value: A) {
        if self.stopped {
            return;
        }

        for handler in self.handlers.iter_mut() {
            handler(Ok(value.clone()));
        }
    }

    /// Notify every handler once with `code`, then clear and refuse new subscriptions.
    ///
    /// A second stop does not re-invoke any handler.
    pub fn stop(&mut self, code: Error) {
        if self.stopped {
            return;
        }

        self.stopped = true;
        for mut handler in self.handlers.drain(..) {
            handler(Err(code));
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn size(&self) -> usize {
        self.handlers.len()
    }
}

impl<A: Clone> Default for Subscriber<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry whose handlers decide on every call whether they stay subscribed.
pub struct Unsubscriber<A> {
    handlers: Vec<RetainingHandler<A>>,
    stopped: bool,
}

impl<A: Clone> Unsubscriber<A> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            stopped: false,
        }
    }

    /// Add a handler, fails with [`Error::SubscriberStopped`] after stop.
    pub fn subscribe(&mut self, handler: RetainingHandler<A>) -> Result<(), Error> {
        if self.stopped {
            return Err(Error::SubscriberStopped);
        }

        self.handlers.push(handler);
        Ok(())
    }

    /// Notify every handler in order, dropping those that return `false`.
    pub fn notify(&mut self, value: A) {
        if self.stopped {
            return;
        }

        self.handlers
            .retain_mut(|handler| handler(Ok(value.clone())));
    }

    /// Notify every handler once with `code`, then clear and refuse new subscriptions.
    pub fn stop(&mut self, code: Error) {
        if self.stopped {
            return;
        }

        self.stopped = true;
        for mut handler in self.handlers.drain(..) {
            handler(Err(code));
        }
    }

    /// Move the handlers of `later` behind this registry's handlers.
    ///
    /// Used to merge subscriptions made while this registry was detached for
    /// notification back into it, preserving subscription order.
    pub fn absorb(&mut self, mut later: Unsubscriber<A>) {
        self.handlers.append(&mut later.handlers);
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn size(&self) -> usize {
        self.handlers.len()
    }
}

impl<A: Clone> Default for Unsubscriber<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyed registry supporting targeted notification and removal.
pub struct Desubscriber<K, A> {
    handlers: Vec<(K, RetainingHandler<A>)>,
    stopped: bool,
}

impl<K: Eq, A: Clone> Desubscriber<K, A> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            stopped: false,
        }
    }

    /// Add a handler under `key`.
    ///
    /// Fails with [`Error::SubscriberStopped`] after stop and with
    /// [`Error::SubscriberExists`] if `key` is live, leaving the existing
    /// subscription untouched.
    pub fn subscribe(&mut self, key: K, handler: RetainingHandler<A>) -> Result<(), Error> {
        if self.stopped {
            return Err(Error::SubscriberStopped);
        }

        if self.contains(&key) {
            return Err(Error::SubscriberExists);
        }

        self.handlers.push((key, handler));
        Ok(())
    }

    /// Notify every handler in order, dropping those that return `false`.
    pub fn notify(&mut self, value: A) {
        if self.stopped {
            return;
        }

        self.handlers
            .retain_mut(|(_, handler)| handler(Ok(value.clone())));
    }

    /// Notify only the handler under `key`, returns whether it was found.
    pub fn notify_one(&mut self, key: &K, value: A) -> bool {
        if self.stopped {
            return false;
        }

        let Some(index) = self.handlers.iter().position(|(k, _)| k == key) else {
            return false;
        };

        if !(self.handlers[index].1)(Ok(value)) {
            self.handlers.remove(index);
        }

        true
    }

    /// Remove the handler under `key`, notifying it with [`Error::Desubscribed`].
    pub fn unsubscribe(&mut self, key: &K) -> bool {
        let Some(index) = self.handlers.iter().position(|(k, _)| k == key) else {
            return false;
        };

        let (_, mut handler) = self.handlers.remove(index);
        handler(Err(Error::Desubscribed));
        true
    }

    /// Notify every handler once with `code`, then clear and refuse new subscriptions.
    pub fn stop(&mut self, code: Error) {
        if self.stopped {
            return;
        }

        self.stopped = true;
        for (_, mut handler) in self.handlers.drain(..) {
            handler(Err(code));
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.handlers.iter().any(|(k, _)| k == key)
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn size(&self) -> usize {
        self.handlers.len()
    }
}

impl<K: Eq, A: Clone> Default for Desubscriber<K, A> {
    fn default() -> Self {
        Self::new()
    }
}
