//! Push-based reactive cell graph
//!
//! The graph owns three kinds of nodes:
//! - Signals push invalidation notifications to their subscribers
//! - Derived values pull (lazily recompute) their values when read
//! - Effects run after the signals they read have changed
//!
//! Dependency tracking is automatic: while a derived value or an effect is
//! running, every signal read through [`ReactiveGraph::get`] is recorded as a
//! dependency and re-subscribed. Reads through
//! [`ReactiveGraph::get_untracked`] or inside an [`ReactiveGraph::untracked`]
//! scope never register dependencies - that is the scope used when an install
//! is driven from inside another reactive computation and must not create
//! feedback edges.
//!
//! # Example
//!
//! ```rust
//! use trellis_core::reactive::ReactiveGraph;
//!
//! let mut graph = ReactiveGraph::new();
//! let visible = graph.create_signal(false);
//! let label = graph.create_derived(move |g| {
//!     if g.get(visible).unwrap_or(false) { "shown" } else { "hidden" }
//! });
//!
//! assert_eq!(graph.get_derived(label), Some("hidden"));
//! graph.set(visible, true);
//! assert_eq!(graph.get_derived(label), Some("shown"));
//! ```

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

new_key_type! {
    /// Unique identifier for a signal
    pub struct SignalId;
    /// Unique identifier for a derived/computed value
    pub struct DerivedId;
    /// Unique identifier for an effect
    pub struct EffectId;
}

/// Subscriber types that can react to signal changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberId {
    Derived(DerivedId),
    Effect(EffectId),
}

/// A reactive signal handle (cheap to copy)
#[derive(Debug)]
pub struct Signal<T> {
    id: SignalId,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

impl<T> Signal<T> {
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Reconstruct a typed handle from a raw [`SignalId`].
    ///
    /// The caller must ensure the id refers to a signal holding a `T`;
    /// mismatched reads resolve to `None`.
    pub fn from_id(id: SignalId) -> Self {
        Signal {
            id,
            _marker: std::marker::PhantomData,
        }
    }
}

/// A derived/computed value handle
#[derive(Debug)]
pub struct Derived<T> {
    id: DerivedId,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Derived<T> {}

impl<T> Derived<T> {
    pub fn id(&self) -> DerivedId {
        self.id
    }
}

/// An effect handle
#[derive(Debug, Clone, Copy)]
pub struct Effect {
    id: EffectId,
}

impl Effect {
    pub fn id(&self) -> EffectId {
        self.id
    }
}

type ComputeFn = Arc<dyn Fn(&ReactiveGraph) -> Box<dyn Any + Send> + Send + Sync>;
type EffectFn = Arc<Mutex<dyn FnMut(&ReactiveGraph) + Send>>;

struct SignalNode {
    /// The signal value (type-erased)
    value: Box<dyn Any + Send>,
    /// Version counter for change detection
    version: u64,
    /// Subscribers to notify on change
    subscribers: SmallVec<[SubscriberId; 4]>,
}

struct DerivedNode {
    /// Cached value, present once computed
    value: Option<Box<dyn Any + Send>>,
    compute: ComputeFn,
    /// Signals read during the last evaluation
    dependencies: SmallVec<[SignalId; 4]>,
    /// Subscribers to notify when this derived is invalidated
    subscribers: SmallVec<[SubscriberId; 4]>,
    dirty: Cell<bool>,
}

struct EffectNode {
    run: EffectFn,
    dependencies: SmallVec<[SignalId; 4]>,
    dirty: Cell<bool>,
}

/// The reactive graph that manages all signals, derived values, and effects
pub struct ReactiveGraph {
    signals: SlotMap<SignalId, SignalNode>,
    derived: SlotMap<DerivedId, DerivedNode>,
    effects: SlotMap<EffectId, EffectNode>,
    /// Effects queued to run on the next flush
    pending_effects: RefCell<VecDeque<EffectId>>,
    /// > 0 while inside a batch
    batch_depth: Cell<u32>,
    /// > 0 while dependency tracking is suppressed
    suppress_depth: Cell<u32>,
    /// Dependency collector for the computation currently running, if any
    tracking: RefCell<Option<Vec<SignalId>>>,
}

impl ReactiveGraph {
    pub fn new() -> Self {
        Self {
            signals: SlotMap::with_key(),
            derived: SlotMap::with_key(),
            effects: SlotMap::with_key(),
            pending_effects: RefCell::new(VecDeque::new()),
            batch_depth: Cell::new(0),
            suppress_depth: Cell::new(0),
            tracking: RefCell::new(None),
        }
    }

    // =========================================================================
    // SIGNALS
    // =========================================================================

    /// Create a new signal with an initial value
    pub fn create_signal<T: Send + 'static>(&mut self, initial: T) -> Signal<T> {
        let id = self.signals.insert(SignalNode {
            value: Box::new(initial),
            version: 0,
            subscribers: SmallVec::new(),
        });
        Signal::from_id(id)
    }

    /// Get the current value of a signal
    ///
    /// When a tracking scope is active (a derived value or effect is
    /// running), the read is recorded as a dependency.
    pub fn get<T: Clone + 'static>(&self, signal: Signal<T>) -> Option<T> {
        if self.suppress_depth.get() == 0 {
            if let Some(ref mut deps) = *self.tracking.borrow_mut() {
                if !deps.contains(&signal.id) {
                    deps.push(signal.id);
                }
            }
        }

        self.signals
            .get(signal.id)
            .and_then(|node| node.value.downcast_ref::<T>().cloned())
    }

    /// Get the current value without recording a dependency
    pub fn get_untracked<T: Clone + 'static>(&self, signal: Signal<T>) -> Option<T> {
        self.signals
            .get(signal.id)
            .and_then(|node| node.value.downcast_ref::<T>().cloned())
    }

    /// Set the value of a signal, invalidating subscribers
    pub fn set<T: Send + 'static>(&mut self, signal: Signal<T>, value: T) {
        let Some(node) = self.signals.get_mut(signal.id) else {
            tracing::warn!(?signal.id, "set on a signal that no longer exists");
            return;
        };
        node.value = Box::new(value);
        node.version += 1;

        let subscribers: SmallVec<[SubscriberId; 4]> = node.subscribers.clone();
        for sub in subscribers {
            self.mark_dirty(sub);
        }

        if self.batch_depth.get() == 0 {
            self.flush_effects();
        }
    }

    /// Update a signal in place through a function
    pub fn update<T: Clone + Send + 'static>(&mut self, signal: Signal<T>, f: impl FnOnce(T) -> T) {
        if let Some(current) = self.get_untracked(signal) {
            self.set(signal, f(current));
        }
    }

    /// Version counter of a signal, for change detection
    pub fn signal_version(&self, id: SignalId) -> Option<u64> {
        self.signals.get(id).map(|n| n.version)
    }

    // =========================================================================
    // DERIVED VALUES
    // =========================================================================

    /// Create a derived (computed) value
    ///
    /// The compute closure re-runs lazily: a dependency change only marks the
    /// derived dirty, the next [`get_derived`](Self::get_derived) recomputes.
    pub fn create_derived<T, F>(&mut self, compute: F) -> Derived<T>
    where
        T: Clone + Send + 'static,
        F: Fn(&ReactiveGraph) -> T + Send + Sync + 'static,
    {
        let compute: ComputeFn = Arc::new(move |graph| Box::new(compute(graph)) as Box<dyn Any + Send>);
        let id = self.derived.insert(DerivedNode {
            value: None,
            compute,
            dependencies: SmallVec::new(),
            subscribers: SmallVec::new(),
            dirty: Cell::new(true),
        });
        Derived {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    /// Read a derived value, recomputing it if a dependency changed
    pub fn get_derived<T: Clone + 'static>(&mut self, derived: Derived<T>) -> Option<T> {
        {
            let node = self.derived.get(derived.id)?;
            if !node.dirty.get() {
                if let Some(ref cached) = node.value {
                    return cached.downcast_ref::<T>().cloned();
                }
            }
        }

        // Recompute with a fresh dependency collector. The previous collector
        // (if a computation is already running) is restored afterwards so
        // nested reads keep tracking for their own owner.
        let compute = self.derived.get(derived.id)?.compute.clone();
        let saved = self.tracking.replace(Some(Vec::new()));
        let value = compute(self);
        let deps = self.tracking.replace(saved).unwrap_or_default();

        self.resubscribe(SubscriberId::Derived(derived.id), &deps);

        let node = self.derived.get_mut(derived.id)?;
        node.dependencies = deps.into_iter().collect();
        node.dirty.set(false);
        let result = value.downcast_ref::<T>().cloned();
        node.value = Some(value);
        result
    }

    // =========================================================================
    // EFFECTS
    // =========================================================================

    /// Create an effect that re-runs when its dependencies change
    ///
    /// The effect runs once immediately (or at batch end) to collect its
    /// initial dependency set.
    pub fn create_effect<F>(&mut self, run: F) -> Effect
    where
        F: FnMut(&ReactiveGraph) + Send + 'static,
    {
        let id = self.effects.insert(EffectNode {
            run: Arc::new(Mutex::new(run)),
            dependencies: SmallVec::new(),
            dirty: Cell::new(true),
        });
        self.pending_effects.borrow_mut().push_back(id);

        if self.batch_depth.get() == 0 {
            self.flush_effects();
        }

        Effect { id }
    }

    /// Dispose an effect, removing it and its subscriptions from the graph
    pub fn dispose_effect(&mut self, effect: Effect) {
        if let Some(node) = self.effects.remove(effect.id) {
            for &dep_id in &node.dependencies {
                if let Some(sig) = self.signals.get_mut(dep_id) {
                    sig.subscribers
                        .retain(|s| *s != SubscriberId::Effect(effect.id));
                }
            }
        }
    }

    // =========================================================================
    // SCOPES
    // =========================================================================

    /// Run `f` with dependency tracking suspended
    ///
    /// Signal reads inside the scope behave like
    /// [`get_untracked`](Self::get_untracked) even when a derived value or
    /// effect triggered the call.
    pub fn untracked<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.suppress_start();
        let result = f(self);
        self.suppress_end();
        result
    }

    /// Begin suppressing dependency tracking
    ///
    /// Unlike [`untracked`](Self::untracked), the suppression survives until
    /// the matching [`suppress_end`](Self::suppress_end), so a caller can
    /// span work that acquires and releases the graph several times.
    pub fn suppress_start(&self) {
        self.suppress_depth.set(self.suppress_depth.get() + 1);
    }

    /// End a suppression scope opened with [`suppress_start`](Self::suppress_start)
    pub fn suppress_end(&self) {
        let depth = self.suppress_depth.get();
        if depth > 0 {
            self.suppress_depth.set(depth - 1);
        }
    }

    /// Start a batch - effects stay queued until the batch ends
    pub fn batch_start(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    /// End a batch and flush queued effects
    pub fn batch_end(&mut self) {
        let depth = self.batch_depth.get();
        if depth > 0 {
            self.batch_depth.set(depth - 1);
            if depth == 1 {
                self.flush_effects();
            }
        }
    }

    /// Run a function in a batch context
    pub fn batch<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        self.batch_start();
        let result = f(self);
        self.batch_end();
        result
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    fn mark_dirty(&mut self, sub: SubscriberId) {
        match sub {
            SubscriberId::Derived(id) => {
                if let Some(node) = self.derived.get(id) {
                    if !node.dirty.get() {
                        node.dirty.set(true);
                        let subscribers: SmallVec<[SubscriberId; 4]> = node.subscribers.clone();
                        for sub in subscribers {
                            self.mark_dirty(sub);
                        }
                    }
                }
            }
            SubscriberId::Effect(id) => {
                if let Some(node) = self.effects.get(id) {
                    if !node.dirty.get() {
                        node.dirty.set(true);
                        self.pending_effects.borrow_mut().push_back(id);
                    }
                }
            }
        }
    }

    /// Replace a subscriber's signal subscriptions with its latest read set
    fn resubscribe(&mut self, sub: SubscriberId, deps: &[SignalId]) {
        let old: SmallVec<[SignalId; 4]> = match sub {
            SubscriberId::Derived(id) => self
                .derived
                .get(id)
                .map(|n| n.dependencies.clone())
                .unwrap_or_default(),
            SubscriberId::Effect(id) => self
                .effects
                .get(id)
                .map(|n| n.dependencies.clone())
                .unwrap_or_default(),
        };

        for &dep_id in &old {
            if let Some(sig) = self.signals.get_mut(dep_id) {
                sig.subscribers.retain(|s| *s != sub);
            }
        }
        for &dep_id in deps {
            if let Some(sig) = self.signals.get_mut(dep_id) {
                if !sig.subscribers.contains(&sub) {
                    sig.subscribers.push(sub);
                }
            }
        }
    }

    fn flush_effects(&mut self) {
        // Effects queued while flushing are appended and run in the same pass.
        loop {
            let next = self.pending_effects.borrow_mut().pop_front();
            match next {
                Some(id) => self.run_effect(id),
                None => break,
            }
        }
    }

    fn run_effect(&mut self, effect_id: EffectId) {
        let Some(node) = self.effects.get(effect_id) else {
            return;
        };
        // Might have run already as a side effect of an earlier flush entry.
        if !node.dirty.get() {
            return;
        }
        node.dirty.set(false);
        let run = node.run.clone();

        let saved = self.tracking.replace(Some(Vec::new()));
        if let Ok(mut run) = run.lock() {
            run(self);
        }
        let deps = self.tracking.replace(saved).unwrap_or_default();

        self.resubscribe(SubscriberId::Effect(effect_id), &deps);
        if let Some(node) = self.effects.get_mut(effect_id) {
            node.dependencies = deps.into_iter().collect();
        }
    }
}

impl Default for ReactiveGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reactive graph for handle types that carry the graph around
pub type SharedGraph = Arc<Mutex<ReactiveGraph>>;

/// Create a new shared graph
pub fn shared_graph() -> SharedGraph {
    Arc::new(Mutex::new(ReactiveGraph::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_create_get_set() {
        let mut graph = ReactiveGraph::new();

        let count = graph.create_signal(0i32);
        assert_eq!(graph.get(count), Some(0));

        graph.set(count, 42);
        assert_eq!(graph.get(count), Some(42));
    }

    #[test]
    fn test_signal_update() {
        let mut graph = ReactiveGraph::new();

        let count = graph.create_signal(10i32);
        graph.update(count, |x| x + 5);
        assert_eq!(graph.get(count), Some(15));
    }

    #[test]
    fn test_derived_recomputes_on_change() {
        let mut graph = ReactiveGraph::new();

        let count = graph.create_signal(5i32);
        let doubled = graph.create_derived(move |g| g.get(count).unwrap_or(0) * 2);

        assert_eq!(graph.get_derived(doubled), Some(10));

        graph.set(count, 7);
        assert_eq!(graph.get_derived(doubled), Some(14));
    }

    #[test]
    fn test_derived_caches_between_changes() {
        let mut graph = ReactiveGraph::new();
        let computations = Arc::new(Mutex::new(0));

        let count = graph.create_signal(5i32);
        let computations_inner = computations.clone();
        let doubled = graph.create_derived(move |g| {
            *computations_inner.lock().unwrap() += 1;
            g.get(count).unwrap_or(0) * 2
        });

        assert_eq!(graph.get_derived(doubled), Some(10));
        assert_eq!(graph.get_derived(doubled), Some(10));
        assert_eq!(*computations.lock().unwrap(), 1);

        graph.set(count, 7);
        assert_eq!(graph.get_derived(doubled), Some(14));
        assert_eq!(*computations.lock().unwrap(), 2);
    }

    #[test]
    fn test_derived_retracks_conditional_reads() {
        let mut graph = ReactiveGraph::new();

        let flag = graph.create_signal(true);
        let a = graph.create_signal(1i32);
        let b = graph.create_signal(100i32);
        let picked = graph.create_derived(move |g| {
            if g.get(flag).unwrap_or(false) {
                g.get(a).unwrap_or(0)
            } else {
                g.get(b).unwrap_or(0)
            }
        });

        assert_eq!(graph.get_derived(picked), Some(1));

        // After switching branch, only `b` should drive invalidation.
        graph.set(flag, false);
        assert_eq!(graph.get_derived(picked), Some(100));

        graph.set(b, 200);
        assert_eq!(graph.get_derived(picked), Some(200));
    }

    #[test]
    fn test_effect_runs_on_change() {
        let mut graph = ReactiveGraph::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let count = graph.create_signal(0i32);
        let seen_inner = seen.clone();
        let _effect = graph.create_effect(move |g| {
            let val = g.get(count).unwrap_or(0);
            seen_inner.lock().unwrap().push(val);
        });

        assert_eq!(*seen.lock().unwrap(), vec![0]);

        graph.set(count, 1);
        graph.set(count, 2);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_untracked_scope_suppresses_dependencies() {
        let mut graph = ReactiveGraph::new();
        let runs = Arc::new(Mutex::new(0));

        let tracked = graph.create_signal(0i32);
        let ignored = graph.create_signal(0i32);
        let runs_inner = runs.clone();
        let _effect = graph.create_effect(move |g| {
            let _ = g.get(tracked);
            let _ = g.untracked(|g| g.get(ignored));
            *runs_inner.lock().unwrap() += 1;
        });

        assert_eq!(*runs.lock().unwrap(), 1);

        // No dependency edge, no rerun.
        graph.set(ignored, 9);
        assert_eq!(*runs.lock().unwrap(), 1);

        graph.set(tracked, 1);
        assert_eq!(*runs.lock().unwrap(), 2);
    }

    #[test]
    fn test_batching() {
        let mut graph = ReactiveGraph::new();
        let runs = Arc::new(Mutex::new(0));

        let a = graph.create_signal(1i32);
        let b = graph.create_signal(2i32);
        let runs_inner = runs.clone();
        let _effect = graph.create_effect(move |g| {
            let _ = g.get(a);
            let _ = g.get(b);
            *runs_inner.lock().unwrap() += 1;
        });

        *runs.lock().unwrap() = 0;
        graph.batch(|g| {
            g.set(a, 10);
            g.set(b, 20);
        });
        assert_eq!(*runs.lock().unwrap(), 1);
    }

    #[test]
    fn test_dispose_effect() {
        let mut graph = ReactiveGraph::new();
        let runs = Arc::new(Mutex::new(0));

        let count = graph.create_signal(0i32);
        let runs_inner = runs.clone();
        let effect = graph.create_effect(move |g| {
            let _ = g.get(count);
            *runs_inner.lock().unwrap() += 1;
        });

        assert_eq!(*runs.lock().unwrap(), 1);

        graph.dispose_effect(effect);
        graph.set(count, 2);
        assert_eq!(*runs.lock().unwrap(), 1);
    }
}
