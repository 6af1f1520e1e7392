//! Ordered, short-circuiting handler chain.
//!
//! Handlers receive the payload and a [`Next`] continuation. Calling
//! `next.run(payload)` passes control to the following handler (and finally
//! to the terminal function given to [`HandlerChain::dispatch`]); returning
//! without calling it stops the chain with the handler's own result.

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque handle to a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A step in a [`HandlerChain`].
pub trait Handler<P, R>: Send + Sync {
    fn handle<'a>(&'a self, payload: P, next: Next<'a, P, R>) -> BoxFuture<'a, R>;
}

/// Adapts a closure into a [`Handler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new<P, R>(f: F) -> Self
    where
        F: for<'a> Fn(P, Next<'a, P, R>) -> BoxFuture<'a, R> + Send + Sync,
    {
        Self(f)
    }
}

impl<P, R, F> Handler<P, R> for FnHandler<F>
where
    F: for<'a> Fn(P, Next<'a, P, R>) -> BoxFuture<'a, R> + Send + Sync,
{
    fn handle<'a>(&'a self, payload: P, next: Next<'a, P, R>) -> BoxFuture<'a, R> {
        (self.0)(payload, next)
    }
}

/// Payloads that carry an event name.
pub trait EventPayload {
    fn event(&self) -> Option<&str>;
}

/// Runs `inner` only for payloads whose event equals `event`; everything
/// else is passed straight on.
pub struct OnEvent<H> {
    event: String,
    inner: H,
}

impl<H> OnEvent<H> {
    pub fn new(event: &str, inner: H) -> Self {
        Self {
            event: event.to_string(),
            inner,
        }
    }
}

impl<P, R, H> Handler<P, R> for OnEvent<H>
where
    P: EventPayload + Send,
    R: Send,
    H: Handler<P, R>,
{
    fn handle<'a>(&'a self, payload: P, next: Next<'a, P, R>) -> BoxFuture<'a, R> {
        if payload.event() == Some(self.event.as_str()) {
            self.inner.handle(payload, next)
        } else {
            next.run(payload)
        }
    }
}

struct HandlerRecord<P, R> {
    id: HandlerId,
    name: Option<String>,
    handler: Box<dyn Handler<P, R>>,
}

/// Continuation handed to each handler.
pub struct Next<'a, P, R> {
    handlers: &'a [HandlerRecord<P, R>],
    terminal: &'a (dyn Fn(P) -> R + Send + Sync),
}

impl<'a, P: Send + 'a, R: Send + 'a> Next<'a, P, R> {
    /// Continue with the rest of the chain.
    pub fn run(self, payload: P) -> BoxFuture<'a, R> {
        match self.handlers.split_first() {
            Some((record, rest)) => record.handler.handle(
                payload,
                Next {
                    handlers: rest,
                    terminal: self.terminal,
                },
            ),
            None => Box::pin(std::future::ready((self.terminal)(payload))),
        }
    }
}

/// Ordered list of handlers. The first appended runs outermost.
///
/// Registration needs `&mut self`; configure the chain before sharing it and
/// dispatch through `&self`.
pub struct HandlerChain<P, R> {
    handlers: Vec<HandlerRecord<P, R>>,
    next_id: u64,
}

impl<P, R> Default for HandlerChain<P, R> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 0,
        }
    }
}

impl<P: Send + 'static, R: Send + 'static> HandlerChain<P, R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, name: Option<String>, handler: Box<dyn Handler<P, R>>) -> HandlerRecord<P, R> {
        self.next_id += 1;
        HandlerRecord {
            id: HandlerId(self.next_id),
            name,
            handler,
        }
    }

    /// Register a closure to run after every existing handler.
    pub fn append<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(P, Next<'a, P, R>) -> BoxFuture<'a, R> + Send + Sync + 'static,
    {
        self.append_handler(FnHandler::new(f))
    }

    /// Register a closure to run before every existing handler.
    pub fn prepend<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(P, Next<'a, P, R>) -> BoxFuture<'a, R> + Send + Sync + 'static,
    {
        self.prepend_handler(FnHandler::new(f))
    }

    pub fn append_handler(&mut self, handler: impl Handler<P, R> + 'static) -> HandlerId {
        let record = self.record(None, Box::new(handler));
        let id = record.id;
        self.handlers.push(record);
        id
    }

    pub fn prepend_handler(&mut self, handler: impl Handler<P, R> + 'static) -> HandlerId {
        let record = self.record(None, Box::new(handler));
        let id = record.id;
        self.handlers.insert(0, record);
        id
    }

    /// Register under `name`. A handler already registered with that name is
    /// replaced in place, keeping its position.
    pub fn append_named(&mut self, name: &str, handler: impl Handler<P, R> + 'static) -> HandlerId {
        let record = self.record(Some(name.to_string()), Box::new(handler));
        let id = record.id;

        match self
            .handlers
            .iter()
            .position(|existing| existing.name.as_deref() == Some(name))
        {
            Some(index) => self.handlers[index] = record,
            None => self.handlers.push(record),
        }
        id
    }

    /// Append `f` only when `condition` holds.
    pub fn when<F>(&mut self, condition: bool, f: F) -> Option<HandlerId>
    where
        F: for<'a> Fn(P, Next<'a, P, R>) -> BoxFuture<'a, R> + Send + Sync + 'static,
    {
        condition.then(|| self.append(f))
    }

    /// Unregister a handler. Returns whether it was present.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|record| record.id != id);
        self.handlers.len() != before
    }

    pub fn remove_named(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers
            .retain(|record| record.name.as_deref() != Some(name));
        self.handlers.len() != before
    }

    pub fn has(&self, id: HandlerId) -> bool {
        self.handlers.iter().any(|record| record.id == id)
    }

    pub fn has_named(&self, name: &str) -> bool {
        self.handlers
            .iter()
            .any(|record| record.name.as_deref() == Some(name))
    }

    /// Registered handlers in run order.
    pub fn ids(&self) -> Vec<HandlerId> {
        self.handlers.iter().map(|record| record.id).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run `payload` through the chain, ending in `terminal`.
    pub async fn dispatch<T>(&self, payload: P, terminal: T) -> R
    where
        T: Fn(P) -> R + Send + Sync,
    {
        Next {
            handlers: &self.handlers,
            terminal: &terminal,
        }
        .run(payload)
        .await
    }

    /// Run `payload` through the chain, ending in a clone of `default`.
    pub async fn dispatch_with_default(&self, payload: P, default: R) -> R
    where
        R: Clone + Sync,
    {
        self.dispatch(payload, move |_| default.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn handler<F>(f: F) -> F
    where
        F: for<'a> Fn(u32, Next<'a, u32, String>) -> BoxFuture<'a, String> + Send + Sync,
    {
        f
    }

    fn recorder(
        log: &Log,
        label: &'static str,
    ) -> impl for<'a> Fn(u32, Next<'a, u32, String>) -> BoxFuture<'a, String> + Send + Sync + 'static
    {
        let log = log.clone();
        handler(move |payload, next| {
            log.lock().unwrap().push(label.to_string());
            next.run(payload)
        })
    }

    #[tokio::test]
    async fn test_empty_chain_returns_terminal() {
        let chain: HandlerChain<u32, String> = HandlerChain::new();
        let result = chain.dispatch(7, |p| format!("terminal {}", p)).await;
        assert_eq!(result, "terminal 7");
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_append_and_prepend_order() {
        let log: Log = Arc::default();
        let mut chain = HandlerChain::new();

        chain.append(recorder(&log, "a"));
        chain.append(recorder(&log, "b"));
        chain.prepend(recorder(&log, "first"));

        let result = chain.dispatch_with_default(1, "done".to_string()).await;

        assert_eq!(result, "done");
        assert_eq!(*log.lock().unwrap(), vec!["first", "a", "b"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_later_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain: HandlerChain<u32, String> = HandlerChain::new();

        chain.append(|payload, _next| Box::pin(async move { format!("stopped at {}", payload) }));
        let counted = calls.clone();
        chain.append(move |payload, next| {
            counted.fetch_add(1, Ordering::SeqCst);
            next.run(payload)
        });

        let result = chain.dispatch(3, |_| "terminal".to_string()).await;

        assert_eq!(result, "stopped at 3");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_can_rewrite_payload_and_result() {
        let mut chain: HandlerChain<u32, String> = HandlerChain::new();
        chain.append(|payload, next| {
            Box::pin(async move {
                let inner = next.run(payload * 10).await;
                format!("<{}>", inner)
            })
        });

        let result = chain.dispatch(4, |p| p.to_string()).await;
        assert_eq!(result, "<40>");
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let log: Log = Arc::default();
        let mut chain = HandlerChain::new();

        let a = chain.append(recorder(&log, "a"));
        chain.append(recorder(&log, "b"));

        assert!(chain.has(a));
        assert!(chain.remove(a));
        assert!(!chain.remove(a));
        assert!(!chain.has(a));

        chain.dispatch_with_default(0, String::new()).await;
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_append_named_replaces_in_place() {
        let log: Log = Arc::default();
        let mut chain = HandlerChain::new();

        chain.append_named("ticket", FnHandler::new(recorder(&log, "old")));
        chain.append(recorder(&log, "other"));
        let replaced = chain.append_named("ticket", FnHandler::new(recorder(&log, "new")));

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.ids()[0], replaced);
        assert!(chain.has_named("ticket"));

        chain.dispatch_with_default(0, String::new()).await;
        assert_eq!(*log.lock().unwrap(), vec!["new", "other"]);

        assert!(chain.remove_named("ticket"));
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_when() {
        let log: Log = Arc::default();
        let mut chain = HandlerChain::new();

        assert!(chain.when(false, recorder(&log, "skipped")).is_none());
        assert!(chain.when(true, recorder(&log, "kept")).is_some());

        chain.dispatch_with_default(0, String::new()).await;
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    struct Named(&'static str);

    impl EventPayload for Named {
        fn event(&self) -> Option<&str> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn test_on_event_filters() {
        let mut chain: HandlerChain<Named, String> = HandlerChain::new();
        chain.append_handler(OnEvent::new(
            "authorized",
            FnHandler::new::<Named, String>(|payload, _next| {
                Box::pin(async move { format!("handled {}", payload.0) })
            }),
        ));

        let handled = chain
            .dispatch_with_default(Named("authorized"), "success".to_string())
            .await;
        let passed = chain
            .dispatch_with_default(Named("video.upload.failed"), "success".to_string())
            .await;

        assert_eq!(handled, "handled authorized");
        assert_eq!(passed, "success");
    }
}
