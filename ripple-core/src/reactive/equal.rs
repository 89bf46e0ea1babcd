//! Default Equality
//!
//! A write is ignored when the new value is equal to the current one. The
//! default rule is strict value equality for primitives and "always
//! changed" for anything container-like: a `Vec` or a map may have been
//! rebuilt with the same contents on purpose, and comparing it deeply on
//! every write would cost more than the propagation it saves.
//!
//! Floats compare like `Object.is`: `NaN` equals `NaN`, `0.0` and `-0.0`
//! differ.
//!
//! Types without a [`StoreEq`] impl can still be stored by passing an
//! explicit equality function.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use crate::graph::EqualFn;

/// Equality used by signals to decide whether a write is a change.
pub trait StoreEq {
    fn store_eq(&self, other: &Self) -> bool;
}

macro_rules! value_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StoreEq for $ty {
                fn store_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

value_eq!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, (),
    String, &'static str,
);

macro_rules! float_eq {
    ($($ty:ty),*) => {
        $(
            impl StoreEq for $ty {
                fn store_eq(&self, other: &Self) -> bool {
                    (self.is_nan() && other.is_nan()) || self.to_bits() == other.to_bits()
                }
            }
        )*
    };
}

float_eq!(f32, f64);

impl<T: StoreEq> StoreEq for Option<T> {
    fn store_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.store_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! always_changed {
    ($($ty:ty => [$($param:ident),*]),* $(,)?) => {
        $(
            impl<$($param),*> StoreEq for $ty {
                fn store_eq(&self, _other: &Self) -> bool {
                    false
                }
            }
        )*
    };
}

always_changed!(
    Vec<T> => [T],
    VecDeque<T> => [T],
    HashMap<K, V> => [K, V],
    BTreeMap<K, V> => [K, V],
    HashSet<T> => [T],
    BTreeSet<T> => [T],
);

impl<T: ?Sized> StoreEq for Box<T> {
    fn store_eq(&self, _other: &Self) -> bool {
        false
    }
}

impl<T: ?Sized> StoreEq for Rc<T> {
    fn store_eq(&self, _other: &Self) -> bool {
        false
    }
}

impl<T: ?Sized> StoreEq for Arc<T> {
    fn store_eq(&self, _other: &Self) -> bool {
        false
    }
}

/// The default equality of `T` as a shareable function.
pub fn default_equal<T: StoreEq + 'static>() -> EqualFn<T> {
    Rc::new(|a: &T, b: &T| a.store_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_compare_by_value() {
        assert!(1i32.store_eq(&1));
        assert!(!1i32.store_eq(&2));
        assert!("a".to_string().store_eq(&"a".to_string()));
        assert!(Some(3u8).store_eq(&Some(3)));
        assert!(!Some(3u8).store_eq(&None));
    }

    #[test]
    fn floats_follow_object_is() {
        assert!(f64::NAN.store_eq(&f64::NAN));
        assert!(!0.0f64.store_eq(&-0.0));
        assert!(1.5f32.store_eq(&1.5));
    }

    #[test]
    fn containers_always_change() {
        let v = vec![1, 2];
        assert!(!v.store_eq(&v));
        let shared = Rc::new(5);
        assert!(!shared.store_eq(&shared));
    }

    #[test]
    fn default_equal_uses_store_eq() {
        let eq = default_equal::<f64>();
        assert!(eq(&f64::NAN, &f64::NAN));
        assert!(!eq(&1.0, &2.0));
    }
}
