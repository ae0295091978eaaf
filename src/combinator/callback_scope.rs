//! Scoped subscription that can cancel the task that opened it.
//!
//! A [`CallbackScope`] subscribes to an [`EventSource`] for the duration of
//! a block. If the source reports an error, or the value callback returns
//! one, while the scope is open, the scope injects a cancellation into the
//! enclosing task. The cancellation carries the error as payload and a
//! token unique to that injection. On exit the scope turns a cancellation
//! carrying its own token back into the payload error and lets every other
//! outcome through unchanged, so nested scopes never swallow each other's
//! injections.
//!
//! Injection is deferred through the scheduler: the callback only queues a
//! step, and that step requests the cancellation if the scope is still open.

use crate::cx::{Cx, WeakCx};
use crate::error::{Error, Result};
use crate::event::{EventSource, SubscriptionSlot};
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelKind, CancelReason, CancelToken};
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

#[derive(Debug)]
struct ScopeState {
    open: Cell<bool>,
    injected: Cell<Option<CancelToken>>,
}

#[derive(Clone)]
struct Injector {
    cx: WeakCx,
    state: Weak<ScopeState>,
}

impl Injector {
    fn inject(&self, error: Error) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        if !state.open.get() {
            trace!(error = %error, "event after scope exit ignored");
            return;
        }
        if state.injected.get().is_some() {
            trace!(error = %error, "scope already injected, event ignored");
            return;
        }
        let Some(cx) = self.cx.upgrade() else {
            return;
        };
        let reason = CancelReason::new(CancelKind::Injected).with_payload(error);
        let token = reason.token();
        state.injected.set(Some(token));
        debug!(task_id = ?cx.task_id(), token = token.as_u64(), "scheduling injected cancellation");

        let target = self.cx.clone();
        let scope = self.state.clone();
        cx.call_soon(move || {
            let open = scope.upgrade().is_some_and(|s| s.open.get());
            if !open {
                trace!(token = token.as_u64(), "scope closed before injection was delivered");
                return;
            }
            if let Some(cx) = target.upgrade() {
                cx.cancel_with(reason);
            }
        });
    }
}

/// A subscription bound to a block of the enclosing task.
pub struct CallbackScope {
    cx: Cx,
    slot: SubscriptionSlot,
    state: Rc<ScopeState>,
}

impl fmt::Debug for CallbackScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackScope")
            .field("task", &self.cx.task_id())
            .field("open", &self.state.open.get())
            .field("injected", &self.state.injected.get())
            .finish()
    }
}

impl CallbackScope {
    /// Subscribes `on_value` to `source` on behalf of the task owning `cx`.
    ///
    /// An `Err` returned by `on_value`, or an error from the source, cancels
    /// the task. Only the first such error counts.
    pub fn enter<S, F>(cx: &Cx, source: &S, mut on_value: F) -> Self
    where
        S: EventSource + ?Sized,
        F: FnMut(S::Item) -> Result<()> + 'static,
    {
        let state = Rc::new(ScopeState {
            open: Cell::new(true),
            injected: Cell::new(None),
        });
        let injector = Injector {
            cx: cx.downgrade(),
            state: Rc::downgrade(&state),
        };
        let value_injector = injector.clone();
        let slot = SubscriptionSlot::new();
        slot.set(source.add_callback(
            Box::new(move |item| {
                if let Err(error) = on_value(item) {
                    value_injector.inject(error);
                }
            }),
            Box::new(move |error| injector.inject(error)),
        ));
        Self {
            cx: cx.clone(),
            slot,
            state,
        }
    }

    /// Returns the token of this scope's injection, once one happened.
    #[must_use]
    pub fn injected_token(&self) -> Option<CancelToken> {
        self.state.injected.get()
    }

    /// Closes the scope and maps the block's result.
    ///
    /// The subscription is cancelled. A cancellation carrying this scope's
    /// token becomes the payload error; a still-undelivered injection is
    /// dropped. Everything else passes through.
    ///
    /// # Errors
    ///
    /// The payload error of this scope's injection, or `result`'s own error.
    pub fn exit<T>(self, result: Result<T>) -> Result<T> {
        self.close();
        let Some(token) = self.state.injected.get() else {
            return result;
        };
        if self.cx.clear_cancel_if(token) {
            trace!(token = token.as_u64(), "undelivered injection dropped at scope exit");
        }
        match result {
            Err(err) if err.cancel_token() == Some(token) => {
                let payload = err.cancel_reason().and_then(|r| r.payload()).cloned();
                debug!(token = token.as_u64(), "scope caught its own injection");
                Err(payload.unwrap_or(err))
            }
            other => other,
        }
    }

    fn close(&self) {
        self.state.open.set(false);
        self.slot.cancel();
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs `body` inside a [`CallbackScope`] over `source`.
///
/// # Errors
///
/// See [`CallbackScope::exit`].
pub async fn with_callbacks<S, F, Fut, T>(cx: &Cx, source: &S, on_value: F, body: Fut) -> Result<T>
where
    S: EventSource + ?Sized,
    F: FnMut(S::Item) -> Result<()> + 'static,
    Fut: Future<Output = Result<T>>,
{
    let scope = CallbackScope::enter(cx, source, on_value);
    let result = body.await;
    scope.exit(result)
}
