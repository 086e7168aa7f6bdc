//! Type-erased values flowing through pipes and adapters.

use std::any::{Any, TypeId};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Runtime identity of a Rust type, with its name kept for error messages.
#[derive(Debug, Copy, Clone)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl core::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name)
    }
}

/// A shared, type-erased value.
///
/// Cloning is cheap (reference counted). The unit type `()` stands for an
/// absent value, see [`Value::null`].
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    key: TypeKey,
}

impl Value {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            key: TypeKey::of::<T>(),
        }
    }

    /// The absent value (missing parameter, empty body).
    pub fn null() -> Self {
        Self::new(())
    }

    pub fn is_null(&self) -> bool {
        self.is::<()>()
    }

    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    pub fn is<T: Any>(&self) -> bool {
        self.key.id == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Extract an owned `T`, cloning only when the value is still shared.
    pub fn into_inner<T: Any + Send + Sync + Clone>(self) -> Result<T, Value> {
        let key = self.key;
        match self.inner.downcast::<T>() {
            Ok(typed) => Ok(Arc::try_unwrap(typed).unwrap_or_else(|shared| (*shared).clone())),
            Err(inner) => Err(Value { inner, key }),
        }
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Value").field("type", &self.key.name).finish()
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::new(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::new(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::new(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::new(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_keys_compare_by_type() {
        assert_eq!(TypeKey::of::<String>(), TypeKey::of::<String>());
        assert_ne!(TypeKey::of::<String>(), TypeKey::of::<i64>());
        assert_eq!(TypeKey::of::<bool>().name(), "bool");
    }

    #[test]
    fn into_inner_returns_the_value_or_itself() {
        let v = Value::from("42");
        let v = v.into_inner::<i64>().unwrap_err();
        assert_eq!(v.into_inner::<String>().unwrap(), "42");
    }

    #[test]
    fn shared_values_are_cloned_out() {
        let v = Value::from(7i64);
        let copy = v.clone();
        assert_eq!(v.into_inner::<i64>().unwrap(), 7);
        assert_eq!(copy.downcast_ref::<i64>(), Some(&7));
    }

    #[test]
    fn null_is_unit() {
        assert!(Value::null().is_null());
        assert!(!Value::from(false).is_null());
    }
}
