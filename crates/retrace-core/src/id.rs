//! # Identity values
//!
//! An [`Id`] is an opaque, cheaply cloneable value that can be compared,
//! ordered and hashed regardless of the concrete type it was built from. The
//! engine uses ids for two things:
//!
//! - naming blocks (`NamingScope::begin_named`), so storage follows a logical
//!   item instead of a position;
//! - detecting changes (`cached_region`, `get_keyed_data`), by comparing the
//!   current id with one captured on a previous pass.
//!
//! ```rust
//! use retrace_core::*;
//!
//! let a = make_id(7);
//! assert_eq!(a, make_id(7));
//! assert_ne!(a, make_id("7"));
//!
//! let pair = combine_ids(&a, &make_id("row"));
//! assert_eq!(pair, combine_ids(&make_id(7), &make_id("row")));
//! ```
//!
//! Values of different types never compare equal; their relative order is
//! decided by `TypeId` first and by the value second.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Object-safe view of a value usable as an identity.
pub trait IdValue: Any + fmt::Debug {
    fn dyn_eq(&self, other: &dyn IdValue) -> bool;
    fn dyn_cmp(&self, other: &dyn IdValue) -> Ordering;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> IdValue for T
where
    T: Any + fmt::Debug + Eq + Ord + Hash,
{
    fn dyn_eq(&self, other: &dyn IdValue) -> bool {
        let other: &dyn Any = other;
        other.downcast_ref::<T>().is_some_and(|o| o == self)
    }

    fn dyn_cmp(&self, other: &dyn IdValue) -> Ordering {
        let other: &dyn Any = other;
        match other.downcast_ref::<T>() {
            Some(o) => self.cmp(o),
            None => TypeId::of::<T>().cmp(&other.type_id()),
        }
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

#[derive(Clone)]
pub struct Id(Rc<dyn IdValue>);

impl Id {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + fmt::Debug + Eq + Ord + Hash,
    {
        Id(Rc::new(value))
    }

    /// Returns the wrapped value if it was built from a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        let value: &dyn Any = &*self.0;
        value.downcast_ref::<T>()
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0.dyn_eq(&*other.0)
    }
}

impl Eq for Id {}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.dyn_cmp(&*other.0)
    }
}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:?})", self.0)
    }
}

pub fn make_id<T>(value: T) -> Id
where
    T: Any + fmt::Debug + Eq + Ord + Hash,
{
    Id::new(value)
}

/// Id of the pair `(a, b)`.
pub fn combine_ids(a: &Id, b: &Id) -> Id {
    Id::new((a.clone(), b.clone()))
}

/// An id remembered from an earlier pass.
#[derive(Clone, Debug, Default)]
pub struct CapturedId(Option<Id>);

impl CapturedId {
    pub fn matches(&self, id: &Id) -> bool {
        self.0.as_ref() == Some(id)
    }

    pub fn capture(&mut self, id: &Id) {
        self.0 = Some(id.clone());
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn is_captured(&self) -> bool {
        self.0.is_some()
    }

    pub fn get(&self) -> Option<&Id> {
        self.0.as_ref()
    }
}
