//! Root and path references, stored in an arena.
//!
//! A [`ReferenceGraph`] owns every root and path node. Nodes point at their
//! parent by [`RefId`] and memoize one child per property name, so asking for
//! the same path twice yields the same node. Each path node caches the inner
//! reference it last built, together with the parent value it was built for;
//! the inner reference is reused as long as the parent value is the same.
//!
//! Dependency tracking is pull-based. Installing a computed reference
//! subscribes it to the nodes of its dependency paths; [`ReferenceGraph::update`]
//! and [`ReferenceGraph::notify`] only flag subscribers dirty. Nothing is
//! recomputed until the next [`ReferenceGraph::value`].
//!
//! Nodes and inner references live in generational slots. A replaced inner
//! reference drops its subscriptions, and a root the graph created only to
//! resolve dependencies is released with its subtree once no installed
//! computed reference uses it. Repeatedly swapping fresh objects under a root
//! therefore keeps the graph at a steady size.

use std::collections::{HashMap, HashSet};
use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::error::{ReferenceError, Result};
use crate::meta::{MetaRegistry, ReferenceKind};
use crate::path::Path;
use crate::reference::{ComputedReference, ComputedState, PropertyReference, Reference};
use crate::value::{Object, ObjectId, Value};

use self::slots::{SlotKey, Slots};

mod slots;

/// Node in a [`ReferenceGraph`]. Ids of released nodes go stale and are
/// never handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId {
    index: u32,
    generation: u32,
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "ref#{}", self.index)
        } else {
            write!(f, "ref#{}.{}", self.index, self.generation)
        }
    }
}

/// Inner reference built by a path node. A changed id means the inner
/// reference was rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InnerId {
    index: u32,
    generation: u32,
}

macro_rules! slot_key {
    ($name:ident) => {
        impl SlotKey for $name {
            fn new(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(self) -> u32 {
                self.index
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }
    };
}

slot_key!(RefId);
slot_key!(InnerId);

enum NodeKind {
    Root { value: Value },
    Path { parent: RefId, property: String },
}

struct CachedInner {
    id: InnerId,
    parent: Value,
}

struct Node {
    kind: NodeKind,
    children: IndexMap<String, RefId>,
    inner: Option<CachedInner>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: IndexMap::new(),
            inner: None,
        }
    }
}

enum InnerReference {
    Property(PropertyReference),
    Computed(ComputedReference),
    Custom(Box<dyn Reference<Value>>),
}

impl InnerReference {
    fn value(&mut self) -> Value {
        match self {
            InnerReference::Property(reference) => reference.value(),
            InnerReference::Computed(reference) => reference.value(),
            InnerReference::Custom(reference) => reference.value(),
        }
    }

    fn is_dirty(&self) -> bool {
        match self {
            InnerReference::Property(reference) => reference.is_dirty(),
            InnerReference::Computed(reference) => reference.is_dirty(),
            InnerReference::Custom(reference) => reference.is_dirty(),
        }
    }
}

struct InnerEntry {
    owner: RefId,
    reference: InnerReference,
    /// Nodes this entry is subscribed to once installed.
    subscribed: Vec<RefId>,
    /// Implicit root kept alive by this entry.
    pinned: Option<RefId>,
}

impl InnerEntry {
    fn new(owner: RefId, reference: InnerReference) -> Self {
        Self {
            owner,
            reference,
            subscribed: Vec::new(),
            pinned: None,
        }
    }
}

/// Arena of root and path references.
#[derive(Default)]
pub struct ReferenceGraph {
    nodes: Slots<RefId, Node>,
    inners: Slots<InnerId, InnerEntry>,
    object_roots: HashMap<ObjectId, RefId>,
    /// Roots created to resolve dependencies, with their user counts.
    implicit_roots: HashMap<RefId, usize>,
    subscriptions: HashMap<RefId, Vec<InnerId>>,
    installing: HashSet<InnerId>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root holding `value`.
    ///
    /// The first root created for an object becomes that object's root:
    /// computed properties of the object resolve their dependencies from it.
    pub fn root(&mut self, value: Value) -> RefId {
        let id = self.push_node(NodeKind::Root {
            value: value.clone(),
        });
        if let Value::Object(object) = &value {
            self.object_roots.entry(object.id()).or_insert(id);
        }
        id
    }

    /// The root computed properties of `object` resolve dependencies from,
    /// created on first use.
    ///
    /// The returned root stays until [`release`](Self::release)d, even if
    /// the graph created it earlier on behalf of a computed reference.
    pub fn root_for(&mut self, object: &Object) -> RefId {
        let root = self.dependency_root(object);
        if self.implicit_roots.remove(&root).is_some() {
            trace!(%root, object = %object.id(), "implicit root pinned");
        }
        root
    }

    fn dependency_root(&mut self, object: &Object) -> RefId {
        if let Some(&root) = self.object_roots.get(&object.id()) {
            return root;
        }
        let root = self.root(Value::Object(object.clone()));
        self.implicit_roots.insert(root, 0);
        trace!(%root, object = %object.id(), "implicit root created");
        root
    }

    fn push_node(&mut self, kind: NodeKind) -> RefId {
        self.nodes.insert(Node::new(kind))
    }

    fn node(&self, id: RefId) -> &Node {
        match self.nodes.get(id) {
            Some(node) => node,
            None => panic!("unknown reference {id}"),
        }
    }

    fn node_mut(&mut self, id: RefId) -> &mut Node {
        match self.nodes.get_mut(id) {
            Some(node) => node,
            None => panic!("unknown reference {id}"),
        }
    }

    fn root_of(&self, mut id: RefId) -> RefId {
        while let NodeKind::Path { parent, .. } = self.node(id).kind {
            id = parent;
        }
        id
    }

    /// Child reference for `parent[property]`, memoized per property name.
    ///
    /// # Panics
    ///
    /// Panics if `parent` does not belong to this graph or was released.
    pub fn get(&mut self, parent: RefId, property: &str) -> RefId {
        if let Some(&child) = self.node(parent).children.get(property) {
            return child;
        }
        let child = self.push_node(NodeKind::Path {
            parent,
            property: property.to_string(),
        });
        self.node_mut(parent)
            .children
            .insert(property.to_string(), child);
        trace!(%parent, property, %child, "path reference created");
        child
    }

    /// Walk `parts` from `root` with [`get`](Self::get).
    pub fn reference_from_parts<S: AsRef<str>>(&mut self, root: RefId, parts: &[S]) -> RefId {
        parts
            .iter()
            .fold(root, |node, part| self.get(node, part.as_ref()))
    }

    /// Replace the value held by a root and flag everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::NotRoot`] for a path node.
    pub fn update(&mut self, root: RefId, value: Value) -> Result<()> {
        let previous = match &mut self.node_mut(root).kind {
            NodeKind::Root { value: held } => std::mem::replace(held, value.clone()),
            NodeKind::Path { .. } => return Err(ReferenceError::NotRoot(root)),
        };
        if let Value::Object(object) = &previous {
            if self.object_roots.get(&object.id()) == Some(&root) {
                self.object_roots.remove(&object.id());
            }
        }
        if let Value::Object(object) = &value {
            self.object_roots.entry(object.id()).or_insert(root);
        }
        debug!(%root, "root updated");
        self.notify(root);
        Ok(())
    }

    /// Flag every computed reference subscribed to `id` or a node below it.
    ///
    /// Computed references that are themselves read through a node with
    /// subscribers pass the notification on.
    pub fn notify(&mut self, id: RefId) {
        let mut visited = HashSet::new();
        let mut pending = vec![id];
        while let Some(node) = pending.pop() {
            if !visited.insert(node) {
                continue;
            }
            let Some(current) = self.nodes.get(node) else {
                continue;
            };
            pending.extend(current.children.values().copied());

            let Some(subscribers) = self.subscriptions.get_mut(&node) else {
                continue;
            };
            let inners = &mut self.inners;
            subscribers.retain(|inner| inners.contains(*inner));
            for inner in subscribers.iter() {
                if let Some(entry) = inners.get_mut(*inner) {
                    if let InnerReference::Computed(computed) = &mut entry.reference {
                        computed.notify();
                    }
                    pending.push(entry.owner);
                }
            }
        }
    }

    /// Current value of a root or path.
    ///
    /// A path whose parent value is `Undefined` or `Null` is `Undefined`;
    /// any inner reference it built earlier is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph or was released.
    pub fn value(&mut self, id: RefId, meta: &MetaRegistry) -> Value {
        let (parent, property) = match &self.node(id).kind {
            NodeKind::Root { value } => return value.clone(),
            NodeKind::Path { parent, property } => (*parent, property.clone()),
        };

        let parent_value = self.value(parent, meta);
        if !self.nodes.contains(id) {
            return Value::Undefined;
        }
        if parent_value.is_nullish() {
            let stale = self.node_mut(id).inner.take();
            if let Some(cached) = stale {
                self.release_inner(cached.id);
            }
            return Value::Undefined;
        }

        let reusable = self
            .node(id)
            .inner
            .as_ref()
            .filter(|cached| cached.parent.same(&parent_value) && self.inners.contains(cached.id))
            .map(|cached| cached.id);
        let inner = match reusable {
            Some(inner) => inner,
            None => self.rebuild_inner(id, parent_value, &property, meta),
        };
        self.evaluate(inner, meta)
    }

    fn rebuild_inner(
        &mut self,
        owner: RefId,
        parent: Value,
        property: &str,
        meta: &MetaRegistry,
    ) -> InnerId {
        let reference = match (meta.kind_for(&parent, property), parent.as_object()) {
            (ReferenceKind::Computed { dependencies }, Some(object)) => InnerReference::Computed(
                ComputedReference::new(object.clone(), property, dependencies),
            ),
            (ReferenceKind::Custom(factory), _) => {
                InnerReference::Custom(factory.create(&parent, property))
            }
            _ => InnerReference::Property(PropertyReference::new(parent.clone(), property)),
        };

        let previous = self.node_mut(owner).inner.take();
        if let Some(previous) = previous {
            self.release_inner(previous.id);
        }
        let id = self.inners.insert(InnerEntry::new(owner, reference));
        self.node_mut(owner).inner = Some(CachedInner { id, parent });
        trace!(%owner, property, inner = id.index, "inner reference built");
        id
    }

    fn evaluate(&mut self, inner: InnerId, meta: &MetaRegistry) -> Value {
        if let Some((object, dependencies)) = self.pending_install(inner) {
            self.install(inner, &object, &dependencies, meta);
        }
        match self.inners.get_mut(inner) {
            Some(entry) => entry.reference.value(),
            None => Value::Undefined,
        }
    }

    fn pending_install(&self, inner: InnerId) -> Option<(Object, Vec<Path>)> {
        if self.installing.contains(&inner) {
            return None;
        }
        match self.inners.get(inner).map(|entry| &entry.reference) {
            Some(InnerReference::Computed(computed))
                if computed.state() == ComputedState::Uninstalled =>
            {
                Some((computed.object().clone(), computed.dependencies().to_vec()))
            }
            _ => None,
        }
    }

    fn install(
        &mut self,
        inner: InnerId,
        object: &Object,
        dependencies: &[Path],
        meta: &MetaRegistry,
    ) {
        self.installing.insert(inner);
        let root = self.dependency_root(object);
        // A computed reference read through the root it resolves from would
        // otherwise keep that root alive forever.
        let owner_root = self.inners.get(inner).map(|entry| self.root_of(entry.owner));
        let pinned = match self.implicit_roots.get_mut(&root) {
            Some(users) if owner_root != Some(root) => {
                *users += 1;
                Some(root)
            }
            _ => None,
        };

        let mut subscribed = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if !self.nodes.contains(root) {
                break;
            }
            let node = self.reference_from_parts(root, dependency.segments());
            self.value(node, meta);
            let subscribers = self.subscriptions.entry(node).or_default();
            if !subscribers.contains(&inner) {
                subscribers.push(inner);
                subscribed.push(node);
            }
        }
        self.installing.remove(&inner);

        match self.inners.get_mut(inner) {
            Some(entry) => {
                if let InnerReference::Computed(computed) = &mut entry.reference {
                    computed.mark_installed();
                }
                entry.subscribed = subscribed;
                entry.pinned = pinned;
            }
            // Released while its dependencies were being read.
            None => {
                self.unsubscribe(inner, &subscribed);
                if let Some(root) = pinned {
                    self.unpin(root);
                }
            }
        }
    }

    fn release_inner(&mut self, inner: InnerId) {
        let Some(entry) = self.inners.remove(inner) else {
            return;
        };
        self.installing.remove(&inner);
        self.unsubscribe(inner, &entry.subscribed);
        if let Some(root) = entry.pinned {
            self.unpin(root);
        }
    }

    fn unsubscribe(&mut self, inner: InnerId, nodes: &[RefId]) {
        for node in nodes {
            if let Some(subscribers) = self.subscriptions.get_mut(node) {
                subscribers.retain(|subscriber| *subscriber != inner);
                if subscribers.is_empty() {
                    self.subscriptions.remove(node);
                }
            }
        }
    }

    fn unpin(&mut self, root: RefId) {
        let Some(users) = self.implicit_roots.get_mut(&root) else {
            return;
        };
        *users = users.saturating_sub(1);
        if *users == 0 {
            self.release_subtree(root);
        }
    }

    /// Release a root and every path below it.
    ///
    /// Ids of released nodes go stale. Computed references elsewhere that
    /// subscribed to a released node are dropped too and rebuilt on their
    /// next read, resolving from a fresh root.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::NotRoot`] for a path node.
    ///
    /// # Panics
    ///
    /// Panics if `root` does not belong to this graph or was already released.
    pub fn release(&mut self, root: RefId) -> Result<()> {
        if let NodeKind::Path { .. } = self.node(root).kind {
            return Err(ReferenceError::NotRoot(root));
        }
        self.release_subtree(root);
        Ok(())
    }

    fn release_subtree(&mut self, root: RefId) {
        self.implicit_roots.remove(&root);
        let mut pending = vec![root];
        let mut released = 0usize;
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.remove(id) else {
                continue;
            };
            released += 1;
            pending.extend(node.children.values().copied());
            if let NodeKind::Root {
                value: Value::Object(object),
            } = &node.kind
            {
                if self.object_roots.get(&object.id()) == Some(&id) {
                    self.object_roots.remove(&object.id());
                }
            }
            if let Some(subscribers) = self.subscriptions.remove(&id) {
                for subscriber in subscribers {
                    self.release_inner(subscriber);
                }
            }
            if let Some(cached) = node.inner {
                self.release_inner(cached.id);
            }
        }
        debug!(%root, released, "reference subtree released");
    }

    /// Whether the next [`value`](Self::value) of `id` may differ from the
    /// last. Roots are never dirty; paths never read are.
    pub fn is_dirty(&self, id: RefId) -> bool {
        let node = self.node(id);
        if let NodeKind::Root { .. } = node.kind {
            return false;
        }
        match &node.inner {
            Some(cached) => self
                .inners
                .get(cached.id)
                .map_or(true, |entry| entry.reference.is_dirty()),
            None => true,
        }
    }

    /// Id of the inner reference `id` last read through.
    pub fn inner_id(&self, id: RefId) -> Option<InnerId> {
        self.node(id).inner.as_ref().map(|cached| cached.id)
    }

    /// The computed reference behind `id`, if its property is computed and
    /// it has been read.
    pub fn computed(&self, id: RefId) -> Option<&ComputedReference> {
        let cached = self.node(id).inner.as_ref()?;
        match &self.inners.get(cached.id)?.reference {
            InnerReference::Computed(computed) => Some(computed),
            _ => None,
        }
    }

    /// Parent of a path node; `None` for roots.
    pub fn parent(&self, id: RefId) -> Option<RefId> {
        match self.node(id).kind {
            NodeKind::Root { .. } => None,
            NodeKind::Path { parent, .. } => Some(parent),
        }
    }

    /// Property a path node reads; `None` for roots.
    pub fn property(&self, id: RefId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Root { .. } => None,
            NodeKind::Path { property, .. } => Some(property),
        }
    }

    /// Children of `id` in creation order.
    pub fn children(&self, id: RefId) -> impl Iterator<Item = (&str, RefId)> + '_ {
        self.node(id)
            .children
            .iter()
            .map(|(property, &child)| (property.as_str(), child))
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 0
    }
}

impl fmt::Debug for ReferenceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceGraph")
            .field("nodes", &self.nodes.len())
            .field("node_slots", &self.nodes.capacity())
            .field("inners", &self.inners.len())
            .field("object_roots", &self.object_roots.len())
            .field("implicit_roots", &self.implicit_roots.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
