//! Facts and the type machinery that lets heterogeneous values share one
//! working memory.
//!
//! A fact is any plain value with structural equality: two facts with equal
//! content are indistinguishable to the engine, which is what makes duplicate
//! suppression (and therefore termination) work.
//!
//! The [`Fact`] trait is implemented automatically for any
//! `Debug + Eq + Hash + Send + Sync + 'static` type — you never implement it
//! by hand. Facts travel through the engine as [`FactRef`]s: cheaply clonable
//! shared handles that compare and hash by content, not by pointer.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! struct Customer { id: String, total_spend_cents: u64 }
//!
//! let fact = FactRef::new(Customer { id: "1".into(), total_spend_cents: 150 });
//! assert!(fact.is::<Customer>());
//! assert_eq!(fact.downcast_ref::<Customer>().unwrap().id, "1");
//! ```

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// Fact
// =============================================================================

/// A value that can live in working memory.
///
/// Auto-implemented for any `Debug + Eq + Hash + Send + Sync + 'static` type.
/// The `dyn_*` methods make structural equality and hashing available through
/// a trait object, so facts of different concrete types can share one set.
pub trait Fact: Any + Send + Sync + fmt::Debug {
    /// Upcast to `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality through the trait object.
    ///
    /// Facts of different concrete types are never equal.
    fn dyn_eq(&self, other: &dyn Fact) -> bool;

    /// Structural hash through the trait object.
    ///
    /// The concrete `TypeId` is mixed in so equal byte patterns of different
    /// types do not collide into the same fact.
    fn dyn_hash(&self, state: &mut dyn Hasher);

    /// Human-readable type name, for events and debugging.
    fn type_name(&self) -> &'static str;
}

impl<T> Fact for T
where
    T: Any + Send + Sync + fmt::Debug + Eq + Hash,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Fact) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

// =============================================================================
// FactRef
// =============================================================================

/// A shared, content-addressed handle to a fact.
///
/// Working memory, node memories and `fired_for` sets all hold `FactRef`s to
/// the same underlying allocation; cloning is an `Arc` bump. Equality and
/// hashing are structural, so a derived fact equal to an existing one is the
/// *same* fact as far as the engine is concerned.
#[derive(Clone)]
pub struct FactRef(Arc<dyn Fact>);

impl FactRef {
    /// Wrap a value as a shared fact.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug + Eq + Hash,
    {
        Self(Arc::new(value))
    }

    /// The concrete type id of the wrapped value.
    pub fn type_id(&self) -> TypeId {
        self.0.as_any().type_id()
    }

    /// Human-readable type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    /// Check whether the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.as_any().is::<T>()
    }

    /// Downcast to a concrete fact type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for FactRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for FactRef {}

impl Hash for FactRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for FactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// TypeMatch
// =============================================================================

/// How a rule (or query) selects facts by type.
///
/// `Exact` carries a concrete `TypeId` and is served from the working-memory
/// type index in O(1). `Instance` carries a runtime test and is served by a
/// linear scan — this is the path for rules keyed by a trait rather than a
/// concrete type, where no stable `TypeId` exists for "everything that
/// implements X".
#[derive(Clone)]
pub enum TypeMatch {
    /// Match facts of exactly this concrete type.
    Exact {
        /// The concrete type id.
        type_id: TypeId,
        /// The concrete type name, for events and debugging.
        type_name: &'static str,
    },
    /// Match facts passing a runtime instance test.
    Instance {
        /// A label for events and debugging.
        name: &'static str,
        /// The instance test. Must be pure: the same fact must always get
        /// the same answer within one evaluation.
        test: Arc<dyn Fn(&FactRef) -> bool + Send + Sync>,
    },
}

impl TypeMatch {
    /// Exact match on the concrete type `T`.
    pub fn of<T: Any>() -> Self {
        Self::Exact {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Runtime instance test with a display label.
    pub fn instance(
        name: &'static str,
        test: impl Fn(&FactRef) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Instance {
            name,
            test: Arc::new(test),
        }
    }

    /// Does this fact satisfy the type selector?
    pub fn matches(&self, fact: &FactRef) -> bool {
        match self {
            TypeMatch::Exact { type_id, .. } => fact.type_id() == *type_id,
            TypeMatch::Instance { test, .. } => test(fact),
        }
    }

    /// The concrete type id, when this is an exact match.
    pub fn exact_type_id(&self) -> Option<TypeId> {
        match self {
            TypeMatch::Exact { type_id, .. } => Some(*type_id),
            TypeMatch::Instance { .. } => None,
        }
    }

    /// Display label: the type name for exact matches, the given label for
    /// instance tests.
    pub fn display_name(&self) -> &'static str {
        match self {
            TypeMatch::Exact { type_name, .. } => type_name,
            TypeMatch::Instance { name, .. } => name,
        }
    }
}

impl fmt::Debug for TypeMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeMatch::Exact { type_name, .. } => {
                f.debug_tuple("Exact").field(type_name).finish()
            }
            TypeMatch::Instance { name, .. } => f.debug_tuple("Instance").field(name).finish(),
        }
    }
}

// =============================================================================
// FactSet
// =============================================================================

/// A deduplicated, insertion-ordered set of facts.
///
/// Iteration order is insertion order, which is what makes the engine's
/// ordering guarantees deterministic. Set equality ignores order.
#[derive(Clone, Default)]
pub struct FactSet {
    set: HashSet<FactRef>,
    order: Vec<FactRef>,
}

impl FactSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fact. Returns `true` if it was not already present.
    pub fn insert(&mut self, fact: FactRef) -> bool {
        if self.set.insert(fact.clone()) {
            self.order.push(fact);
            true
        } else {
            false
        }
    }

    /// Structural membership test.
    pub fn contains(&self, fact: &FactRef) -> bool {
        self.set.contains(fact)
    }

    /// Number of distinct facts.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no facts are present.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FactRef> {
        self.order.iter()
    }

    /// All facts of concrete type `T`, in insertion order.
    pub fn of_type<T: Any>(&self) -> Vec<&T> {
        self.order
            .iter()
            .filter_map(|fact| fact.downcast_ref::<T>())
            .collect()
    }

    /// The first fact of concrete type `T`, if any.
    pub fn first_of_type<T: Any>(&self) -> Option<&T> {
        self.order.iter().find_map(|fact| fact.downcast_ref::<T>())
    }
}

impl PartialEq for FactSet {
    fn eq(&self, other: &Self) -> bool {
        self.set == other.set
    }
}

impl Eq for FactSet {}

impl fmt::Debug for FactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.order.iter()).finish()
    }
}

impl FromIterator<FactRef> for FactSet {
    fn from_iter<I: IntoIterator<Item = FactRef>>(iter: I) -> Self {
        let mut set = Self::new();
        for fact in iter {
            set.insert(fact);
        }
        set
    }
}

impl<'a> IntoIterator for &'a FactSet {
    type Item = &'a FactRef;
    type IntoIter = std::slice::Iter<'a, FactRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}
