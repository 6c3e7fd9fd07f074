//! Cold, cancellable streams
//!
//! The evaluator threads substitutions through `LStream`, a cold stream with
//! cooperative cancellation and pull-model backpressure. Nothing runs until
//! `subscribe()`: a producer closure is spawned onto the runtime feeding a
//! bounded channel, and the consumer pulls events through a `Subscription`.
//!
//! Contracts kept by every operator:
//! - completion fires at most once; after completion or an error the
//!   subscription yields nothing further;
//! - once the cancel token fires, no observer call is delivered and the
//!   producer observes cancellation at its next emit or cancel-select point;
//! - `flat_map` serialises inner streams (each inner completes before the
//!   next begins): logic evaluation depends on this for determinism;
//! - `merge` forwards in arrival order, completes when all branches have
//!   completed, and on error cancels the surviving branches before
//!   forwarding the first error.

use crate::error::{EngineError, EngineResult};
use crate::subst::Substitution;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub(crate) const CHANNEL_CAPACITY: usize = 64;
const REPLAY_BOUND: usize = 1024;

/// Stream of substitutions: the type goals consume and produce.
pub type SubstStream = LStream<Substitution>;

/// One stream event. Completion is not an event; it is the end of the
/// subscription.
#[derive(Debug, Clone)]
pub enum Event<T> {
    Next(T),
    Error(EngineError),
}

/// Cooperative cancellation token shared between a subscription and its
/// producer. Cancelling is idempotent and sticky.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        CancelToken {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the token fires; pends forever if it never does.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow_and_update() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

/// Producer-side handle: push events toward the subscriber.
pub struct Emitter<T> {
    tx: mpsc::Sender<Event<T>>,
    cancel: CancelToken,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Emitter {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Send + 'static> Emitter<T> {
    /// Push one value. Returns `false` when the consumer cancelled or went
    /// away; producers must stop and release resources on `false`.
    pub async fn emit(&self, item: T) -> bool {
        self.send(Event::Next(item)).await
    }

    /// Push a terminal error. The producer must emit nothing afterwards.
    pub async fn error(&self, err: EngineError) -> bool {
        self.send(Event::Error(err)).await
    }

    async fn send(&self, event: Event<T>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            res = self.tx.send(event) => res.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Consumer-side handle returned by [`LStream::subscribe`].
pub struct Subscription<T> {
    rx: mpsc::Receiver<Event<T>>,
    cancel: CancelToken,
    done: bool,
}

impl<T> Subscription<T> {
    /// Pull the next event; `None` means the stream completed or was
    /// cancelled. Cancellation suppresses all further delivery.
    pub async fn next(&mut self) -> Option<Event<T>> {
        if self.done || self.cancel.is_cancelled() {
            self.done = true;
            return None;
        }
        match self.rx.recv().await {
            Some(Event::Error(e)) => {
                // terminal: nothing may follow an error
                self.done = true;
                self.cancel.cancel();
                Some(Event::Error(e))
            }
            Some(event) => {
                if self.cancel.is_cancelled() {
                    self.done = true;
                    None
                } else {
                    Some(event)
                }
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type Producer<T> = Box<dyn FnOnce(Emitter<T>) -> BoxFuture<'static, ()> + Send>;

/// A cold stream: a producer that runs once per subscription.
pub struct LStream<T> {
    producer: Producer<T>,
}

impl<T: Send + 'static> LStream<T> {
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(Emitter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        LStream {
            producer: Box::new(move |emitter| Box::pin(producer(emitter))),
        }
    }

    pub fn empty() -> Self {
        LStream::new(|_emitter| async {})
    }

    pub fn one(item: T) -> Self {
        LStream::new(move |emitter| async move {
            let _ = emitter.emit(item).await;
        })
    }

    pub fn of<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send,
    {
        LStream::new(move |emitter| async move {
            for item in items {
                if !emitter.emit(item).await {
                    return;
                }
            }
        })
    }

    pub fn fail(err: EngineError) -> Self {
        LStream::new(move |emitter| async move {
            let _ = emitter.error(err).await;
        })
    }

    /// Start the producer. The stream runs until completion, error, or
    /// cancellation of the returned subscription.
    pub fn subscribe(self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancelToken::new();
        let emitter = Emitter {
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn((self.producer)(emitter));
        Subscription {
            rx,
            cancel,
            done: false,
        }
    }

    pub fn map<U, F>(self, mut f: F) -> LStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        LStream::new(move |out: Emitter<U>| async move {
            let mut upstream = self.subscribe();
            loop {
                let event = tokio::select! {
                    _ = out.cancelled() => { upstream.cancel(); return; }
                    ev = upstream.next() => ev,
                };
                match event {
                    Some(Event::Next(item)) => {
                        if !out.emit(f(item)).await {
                            upstream.cancel();
                            return;
                        }
                    }
                    Some(Event::Error(e)) => {
                        let _ = out.error(e).await;
                        return;
                    }
                    None => return,
                }
            }
        })
    }

    pub fn filter<F>(self, mut predicate: F) -> LStream<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        LStream::new(move |out: Emitter<T>| async move {
            let mut upstream = self.subscribe();
            loop {
                let event = tokio::select! {
                    _ = out.cancelled() => { upstream.cancel(); return; }
                    ev = upstream.next() => ev,
                };
                match event {
                    Some(Event::Next(item)) => {
                        if predicate(&item) && !out.emit(item).await {
                            upstream.cancel();
                            return;
                        }
                    }
                    Some(Event::Error(e)) => {
                        let _ = out.error(e).await;
                        return;
                    }
                    None => return,
                }
            }
        })
    }

    /// Serialised flat-map: each inner stream runs to completion before the
    /// next outer value is taken.
    pub fn flat_map<U, F>(self, mut f: F) -> LStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> LStream<U> + Send + 'static,
    {
        LStream::new(move |out: Emitter<U>| async move {
            let mut outer = self.subscribe();
            loop {
                let event = tokio::select! {
                    _ = out.cancelled() => { outer.cancel(); return; }
                    ev = outer.next() => ev,
                };
                match event {
                    Some(Event::Next(item)) => {
                        let mut inner = f(item).subscribe();
                        loop {
                            let inner_event = tokio::select! {
                                _ = out.cancelled() => {
                                    inner.cancel();
                                    outer.cancel();
                                    return;
                                }
                                ev = inner.next() => ev,
                            };
                            match inner_event {
                                Some(Event::Next(value)) => {
                                    if !out.emit(value).await {
                                        inner.cancel();
                                        outer.cancel();
                                        return;
                                    }
                                }
                                Some(Event::Error(e)) => {
                                    inner.cancel();
                                    outer.cancel();
                                    let _ = out.error(e).await;
                                    return;
                                }
                                None => break,
                            }
                        }
                    }
                    Some(Event::Error(e)) => {
                        outer.cancel();
                        let _ = out.error(e).await;
                        return;
                    }
                    None => return,
                }
            }
        })
    }

    /// Merge several streams, forwarding in arrival order. The first error
    /// cancels the surviving branches and is forwarded once.
    pub fn merge(streams: Vec<LStream<T>>) -> LStream<T> {
        LStream::new(move |out: Emitter<T>| async move {
            let subscriptions: Vec<Subscription<T>> =
                streams.into_iter().map(|s| s.subscribe()).collect();
            let tokens: Vec<CancelToken> =
                subscriptions.iter().map(|s| s.token()).collect();
            let errored = Arc::new(AtomicBool::new(false));

            let tasks: Vec<_> = subscriptions
                .into_iter()
                .map(|mut sub| {
                    let out = out.clone();
                    let tokens = tokens.clone();
                    let errored = errored.clone();
                    tokio::spawn(async move {
                        loop {
                            let event = tokio::select! {
                                _ = out.cancelled() => { sub.cancel(); return; }
                                ev = sub.next() => ev,
                            };
                            match event {
                                Some(Event::Next(item)) => {
                                    if !out.emit(item).await {
                                        sub.cancel();
                                        return;
                                    }
                                }
                                Some(Event::Error(e)) => {
                                    if !errored.swap(true, Ordering::SeqCst) {
                                        for token in &tokens {
                                            token.cancel();
                                        }
                                        let _ = out.error(e).await;
                                    }
                                    return;
                                }
                                None => return,
                            }
                        }
                    })
                })
                .collect();
            let _ = futures::future::join_all(tasks).await;
        })
    }

    /// Forward at most `n` values, then cancel upstream and complete.
    pub fn take(self, n: usize) -> LStream<T> {
        LStream::new(move |out: Emitter<T>| async move {
            if n == 0 {
                return;
            }
            let mut upstream = self.subscribe();
            let mut remaining = n;
            loop {
                let event = tokio::select! {
                    _ = out.cancelled() => { upstream.cancel(); return; }
                    ev = upstream.next() => ev,
                };
                match event {
                    Some(Event::Next(item)) => {
                        if !out.emit(item).await {
                            upstream.cancel();
                            return;
                        }
                        remaining -= 1;
                        if remaining == 0 {
                            upstream.cancel();
                            return;
                        }
                    }
                    Some(Event::Error(e)) => {
                        let _ = out.error(e).await;
                        return;
                    }
                    None => return,
                }
            }
        })
    }

    /// Forward every event of `self` into an existing emitter. Used by
    /// operators that assemble pipelines inside their own producer.
    pub(crate) async fn pipe(self, out: &Emitter<T>) {
        let mut upstream = self.subscribe();
        loop {
            let event = tokio::select! {
                _ = out.cancelled() => { upstream.cancel(); return; }
                ev = upstream.next() => ev,
            };
            match event {
                Some(Event::Next(item)) => {
                    if !out.emit(item).await {
                        upstream.cancel();
                        return;
                    }
                }
                Some(Event::Error(e)) => {
                    let _ = out.error(e).await;
                    return;
                }
                None => return,
            }
        }
    }

    /// Collect every value; the first error aborts the collection.
    pub async fn to_vec(self) -> EngineResult<Vec<T>> {
        let mut subscription = self.subscribe();
        let mut out = Vec::new();
        while let Some(event) = subscription.next().await {
            match event {
                Event::Next(item) => out.push(item),
                Event::Error(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// First value, cancelling upstream once it arrives.
    pub async fn first(self) -> EngineResult<Option<T>> {
        let mut subscription = self.subscribe();
        match subscription.next().await {
            Some(Event::Next(item)) => {
                subscription.cancel();
                Ok(Some(item))
            }
            Some(Event::Error(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Drain the stream, returning the final value.
    pub async fn last(self) -> EngineResult<Option<T>> {
        let mut subscription = self.subscribe();
        let mut last = None;
        while let Some(event) = subscription.next().await {
            match event {
                Event::Next(item) => last = Some(item),
                Event::Error(e) => return Err(e),
            }
        }
        Ok(last)
    }
}

impl<T: Clone + Send + 'static> LStream<T> {
    /// Multicast this stream. Each call to [`SharedStream::stream`] yields a
    /// cold copy; the source is subscribed once, on the first consumer, and
    /// late subscribers catch up from a bounded replay ring.
    pub fn share(self) -> SharedStream<T> {
        let (register_tx, register_rx) = mpsc::unbounded_channel::<mpsc::Sender<Event<T>>>();
        let ring = Arc::new(Mutex::new(ReplayRing::default()));
        tokio::spawn(share_actor(self, register_rx, ring.clone()));
        SharedStream {
            register: register_tx,
            ring,
        }
    }
}

#[derive(Debug)]
struct ReplayRing<T> {
    events: VecDeque<Event<T>>,
}

impl<T> Default for ReplayRing<T> {
    fn default() -> Self {
        ReplayRing {
            events: VecDeque::new(),
        }
    }
}

impl<T: Clone> ReplayRing<T> {
    fn push(&mut self, event: Event<T>) {
        self.events.push_back(event);
        if self.events.len() > REPLAY_BOUND {
            self.events.pop_front();
        }
    }

    fn snapshot(&self) -> Vec<Event<T>> {
        self.events.iter().cloned().collect()
    }
}

async fn share_actor<T: Clone + Send + 'static>(
    source: LStream<T>,
    mut register_rx: mpsc::UnboundedReceiver<mpsc::Sender<Event<T>>>,
    ring: Arc<Mutex<ReplayRing<T>>>,
) {
    // cold: the source is not subscribed until someone asks
    let Some(first) = register_rx.recv().await else {
        return;
    };
    let mut subscribers = vec![first];
    let mut upstream = source.subscribe();
    let mut register_open = true;

    loop {
        tokio::select! {
            registration = register_rx.recv(), if register_open => {
                match registration {
                    Some(subscriber) => {
                        let replay = ring.lock().snapshot();
                        let mut alive = true;
                        for event in replay {
                            if subscriber.send(event).await.is_err() {
                                alive = false;
                                break;
                            }
                        }
                        if alive {
                            subscribers.push(subscriber);
                        }
                    }
                    None => register_open = false,
                }
            }
            event = upstream.next() => {
                match event {
                    Some(event) => {
                        ring.lock().push(event.clone());
                        let is_error = matches!(event, Event::Error(_));
                        let mut alive = Vec::with_capacity(subscribers.len());
                        for subscriber in subscribers.drain(..) {
                            if subscriber.send(event.clone()).await.is_ok() {
                                alive.push(subscriber);
                            }
                        }
                        subscribers = alive;
                        if is_error {
                            return;
                        }
                        if subscribers.is_empty() && !register_open {
                            upstream.cancel();
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

/// Handle to a multicast stream; clone freely.
pub struct SharedStream<T> {
    register: mpsc::UnboundedSender<mpsc::Sender<Event<T>>>,
    ring: Arc<Mutex<ReplayRing<T>>>,
}

impl<T> Clone for SharedStream<T> {
    fn clone(&self) -> Self {
        SharedStream {
            register: self.register.clone(),
            ring: self.ring.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> SharedStream<T> {
    /// A cold copy of the multicast stream.
    pub fn stream(&self) -> LStream<T> {
        let register = self.register.clone();
        let ring = self.ring.clone();
        LStream::new(move |out: Emitter<T>| async move {
            let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
            if register.send(tx).is_err() {
                // the actor already finished: replay whatever the ring holds
                let events = ring.lock().snapshot();
                for event in events {
                    match event {
                        Event::Next(item) => {
                            if !out.emit(item).await {
                                return;
                            }
                        }
                        Event::Error(e) => {
                            let _ = out.error(e).await;
                            return;
                        }
                    }
                }
                return;
            }
            loop {
                let event = tokio::select! {
                    // dropping rx unregisters this copy at the actor
                    _ = out.cancelled() => return,
                    ev = rx.recv() => ev,
                };
                match event {
                    Some(Event::Next(item)) => {
                        if !out.emit(item).await {
                            return;
                        }
                    }
                    Some(Event::Error(e)) => {
                        let _ = out.error(e).await;
                        return;
                    }
                    None => return,
                }
            }
        })
    }
}
