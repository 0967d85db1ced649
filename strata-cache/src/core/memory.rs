use super::types::MemoryCacheConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback invoked after an external eviction signal is handled.
pub type EvictionHook = Arc<dyn Fn() + Send + Sync>;

struct Node<V> {
    key: String,
    value: Arc<V>,
    cost: u64,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Hash map + arena-backed doubly-linked list.
///
/// Nodes live in `nodes` and are addressed by stable indices; `free` recycles
/// vacated slots. `head` is the most recently used entry, `tail` the least.
/// Every map entry points at exactly one live node, and `total_count` /
/// `total_cost` always equal the sums over live nodes.
struct Lru<V> {
    map: HashMap<String, usize>,
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    total_count: u64,
    total_cost: u64,
}

impl<V> Lru<V> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            total_count: 0,
            total_cost: 0,
        }
    }

    fn node(&self, idx: usize) -> &Node<V> {
        self.nodes[idx].as_ref().unwrap()
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<V> {
        self.nodes[idx].as_mut().unwrap()
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn insert(&mut self, key: &str, value: Arc<V>, cost: u64) {
        let now = Instant::now();
        if let Some(&idx) = self.map.get(key) {
            self.total_cost = self.total_cost - self.node(idx).cost + cost;
            let node = self.node_mut(idx);
            node.value = value;
            node.cost = cost;
            node.last_access = now;
            self.detach(idx);
            self.push_front(idx);
        } else {
            let idx = self.alloc(Node {
                key: key.to_string(),
                value,
                cost,
                last_access: now,
                prev: None,
                next: None,
            });
            self.map.insert(key.to_string(), idx);
            self.push_front(idx);
            self.total_count += 1;
            self.total_cost += cost;
        }
    }

    fn get(&mut self, key: &str) -> Option<Arc<V>> {
        let idx = *self.map.get(key)?;
        self.node_mut(idx).last_access = Instant::now();
        self.detach(idx);
        self.push_front(idx);
        Some(self.node(idx).value.clone())
    }

    fn free_slot(&mut self, idx: usize) -> Node<V> {
        let node = self.nodes[idx].take().unwrap();
        self.free.push(idx);
        self.total_count -= 1;
        self.total_cost -= node.cost;
        node
    }

    fn remove(&mut self, key: &str) {
        if let Some(idx) = self.map.remove(key) {
            self.detach(idx);
            self.free_slot(idx);
        }
    }

    /// Evicts the least recently used entry. Returns false on an empty cache.
    fn evict_tail(&mut self) -> bool {
        let Some(idx) = self.tail else { return false };
        self.detach(idx);
        let node = self.free_slot(idx);
        self.map.remove(&node.key);
        true
    }

    fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.total_count = 0;
        self.total_cost = 0;
    }
}

#[derive(Default)]
struct Hooks {
    memory_pressure: Option<EvictionHook>,
    backgrounding: Option<EvictionHook>,
}

struct MemoryShared<V> {
    lru: Mutex<Lru<V>>,
    hooks: Mutex<Hooks>,
    config: MemoryCacheConfig,
}

/// Fast in-process LRU cache.
///
/// All public methods are thread safe behind a single mutex; reads take it
/// too because a hit mutates recency. Cloning the handle shares the same
/// underlying cache. No method can fail: an absent key reads as `None` and
/// removals of absent keys are no-ops.
pub struct MemoryCache<V> {
    shared: Arc<MemoryShared<V>>,
}

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> MemoryCache<V> {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                lru: Mutex::new(Lru::new()),
                hooks: Mutex::new(Hooks::default()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.shared.config
    }

    /// Inserts or updates an entry and marks it most recently used. O(1).
    pub fn set(&self, key: &str, value: Arc<V>, cost: u64) {
        self.shared.lru.lock().insert(key, value, cost);
    }

    /// Convenience wrapper taking an owned value with zero cost.
    pub fn set_value(&self, key: &str, value: V) {
        self.set(key, Arc::new(value), 0);
    }

    /// Returns the value for `key` and marks it most recently used. O(1).
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.shared.lru.lock().get(key)
    }

    /// Membership test without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.lru.lock().map.contains_key(key)
    }

    pub fn remove(&self, key: &str) {
        self.shared.lru.lock().remove(key);
    }

    pub fn remove_all(&self) {
        self.shared.lru.lock().clear();
    }

    pub fn total_count(&self) -> u64 {
        self.shared.lru.lock().total_count
    }

    pub fn total_cost(&self) -> u64 {
        self.shared.lru.lock().total_cost
    }

    /// Evicts from the LRU tail until at most `count` entries remain.
    pub fn trim_to_count(&self, count: u64) {
        let mut lru = self.shared.lru.lock();
        while lru.total_count > count {
            if !lru.evict_tail() {
                break;
            }
        }
    }

    /// Evicts from the LRU tail until the total cost is at most `cost`.
    pub fn trim_to_cost(&self, cost: u64) {
        let mut lru = self.shared.lru.lock();
        while lru.total_cost > cost {
            if !lru.evict_tail() {
                break;
            }
        }
    }

    /// Evicts entries last accessed more than `max_age` ago.
    ///
    /// The list is recency ordered, so the scan stops at the first tail node
    /// still within the limit.
    pub fn trim_to_age(&self, max_age: Duration) {
        let now = Instant::now();
        let mut lru = self.shared.lru.lock();
        while let Some(idx) = lru.tail {
            if now.duration_since(lru.node(idx).last_access) <= max_age {
                break;
            }
            lru.evict_tail();
        }
    }

    /// Registers a callback run after a memory-pressure signal is handled.
    pub fn set_memory_pressure_hook(&self, hook: EvictionHook) {
        self.shared.hooks.lock().memory_pressure = Some(hook);
    }

    /// Registers a callback run after a backgrounding signal is handled.
    pub fn set_backgrounding_hook(&self, hook: EvictionHook) {
        self.shared.hooks.lock().backgrounding = Some(hook);
    }

    /// Delivers a memory-pressure signal: clears the cache when configured,
    /// then invokes the registered callback outside the cache lock.
    pub fn handle_memory_pressure(&self) {
        if self.shared.config.clear_on_memory_pressure {
            debug!("memory pressure: clearing memory cache");
            self.remove_all();
        }
        let hook = self.shared.hooks.lock().memory_pressure.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Delivers a backgrounding signal, same contract as memory pressure.
    pub fn handle_backgrounding(&self) {
        if self.shared.config.clear_on_backgrounding {
            debug!("backgrounding: clearing memory cache");
            self.remove_all();
        }
        let hook = self.shared.hooks.lock().backgrounding.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn apply_limits(&self) {
        let config = &self.shared.config;
        if let Some(count) = config.count_limit {
            self.trim_to_count(count);
        }
        if let Some(cost) = config.cost_limit {
            self.trim_to_cost(cost);
        }
        if let Some(age) = config.age_limit {
            self.trim_to_age(age);
        }
    }
}

impl<V: Send + Sync + 'static> MemoryCache<V> {
    /// Starts the periodic auto-trim task applying the configured limits.
    ///
    /// The task holds only a weak reference and stops once every cache handle
    /// has been dropped; abort the returned handle to stop it earlier.
    pub fn spawn_auto_trim(&self) -> JoinHandle<()> {
        let interval = self.shared.config.auto_trim_interval;
        info!("starting memory cache auto-trim task (interval={:?})", interval);

        let weak: Weak<MemoryShared<V>> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                MemoryCache { shared }.apply_limits();
            }
        })
    }
}
