use super::response::{FieldMeta, FieldRule};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::fmt;

pub(crate) type ErasedValue = Box<dyn Any + Send + Sync>;

type Erased = dyn Any + Send + Sync;

/// A value an intercepted method may return.
///
/// Every capability has a no-op default; types opt in to the ones the
/// built-in interceptors understand. For most data types an empty impl is
/// enough:
///
/// ```
/// use callweave::prelude::*;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// impl Returnable for User {}
/// ```
pub trait Returnable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Explicit success flag, consulted by the log interceptor
    fn succeeded(&self) -> Option<bool> {
        None
    }

    /// Called when the value was served from cache
    fn mark_from_cache(&mut self) {}

    /// Removes auxiliary metadata that should not appear in call records
    fn take_metadata(&mut self) -> Option<Value> {
        None
    }

    fn restore_metadata(&mut self, _metadata: Value) {}

    /// Per-property rules applied by the response interceptor
    fn field_rules() -> Vec<FieldRule> {
        Vec::new()
    }

    /// Serialized default instance of the shaped object.
    ///
    /// Removed and hidden fields take their value from here. Types deriving
    /// `Default` usually return [`defaults_of::<Self>()`](defaults_of).
    fn field_defaults() -> Option<Value> {
        None
    }

    /// Locates the data the field rules apply to within the serialized value.
    ///
    /// The located value is shaped as one object, or as a list of objects.
    /// Wrappers around nested data (paged results, for instance) point this
    /// at the nested list and forward `field_rules`/`field_defaults` of the
    /// item type.
    fn shape_root(value: &mut Value) -> Option<&mut Value> {
        Some(value)
    }

    /// Receives the display metadata of the visible fields
    fn attach_fields(&mut self, _fields: Vec<FieldMeta>) {}
}

/// Serialized `T::default()`, for [`Returnable::field_defaults`]
pub fn defaults_of<T: Default + Serialize>() -> Option<Value> {
    serde_json::to_value(T::default()).ok()
}

macro_rules! plain_returnable {
    ($($ty:ty),* $(,)?) => {
        $(impl Returnable for $ty {})*
    };
}

plain_returnable!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    Value,
);

impl<T: Returnable> Returnable for Option<T> {
    fn succeeded(&self) -> Option<bool> {
        self.as_ref().and_then(T::succeeded)
    }

    fn mark_from_cache(&mut self) {
        if let Some(inner) = self {
            inner.mark_from_cache();
        }
    }

    fn take_metadata(&mut self) -> Option<Value> {
        self.as_mut().and_then(T::take_metadata)
    }

    fn restore_metadata(&mut self, metadata: Value) {
        if let Some(inner) = self {
            inner.restore_metadata(metadata);
        }
    }

    fn field_rules() -> Vec<FieldRule> {
        T::field_rules()
    }

    fn field_defaults() -> Option<Value> {
        T::field_defaults()
    }

    fn shape_root(value: &mut Value) -> Option<&mut Value> {
        if value.is_null() {
            None
        } else {
            T::shape_root(value)
        }
    }

    fn attach_fields(&mut self, fields: Vec<FieldMeta>) {
        if let Some(inner) = self {
            inner.attach_fields(fields);
        }
    }
}

impl<T: Returnable> Returnable for Vec<T> {
    fn field_rules() -> Vec<FieldRule> {
        T::field_rules()
    }

    fn field_defaults() -> Option<Value> {
        T::field_defaults()
    }
}

/// Type-erased view of a method's return type.
///
/// Built from a [`Returnable`] type; lets interceptors encode, decode and
/// inspect the return value of a call without knowing its concrete type.
#[derive(Clone, Copy)]
pub struct ReturnType {
    name: &'static str,
    id: TypeId,
    encode: fn(&Erased) -> Option<serde_json::Result<Value>>,
    decode: fn(Value) -> serde_json::Result<ErasedValue>,
    succeeded: fn(&Erased) -> Option<bool>,
    mark_from_cache: fn(&mut Erased),
    take_metadata: fn(&mut Erased) -> Option<Value>,
    restore_metadata: fn(&mut Erased, Value),
    field_rules: fn() -> Vec<FieldRule>,
    field_defaults: fn() -> Option<Value>,
    shape_root: fn(&mut Value) -> Option<&mut Value>,
    attach_fields: fn(&mut Erased, Vec<FieldMeta>),
}

impl ReturnType {
    pub fn of<T: Returnable>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
            encode: encode::<T>,
            decode: decode::<T>,
            succeeded: |value| value.downcast_ref::<T>().and_then(T::succeeded),
            mark_from_cache: |value| {
                if let Some(value) = value.downcast_mut::<T>() {
                    value.mark_from_cache();
                }
            },
            take_metadata: |value| value.downcast_mut::<T>().and_then(T::take_metadata),
            restore_metadata: |value, metadata| {
                if let Some(value) = value.downcast_mut::<T>() {
                    value.restore_metadata(metadata);
                }
            },
            field_rules: T::field_rules,
            field_defaults: T::field_defaults,
            shape_root: T::shape_root,
            attach_fields: |value, fields| {
                if let Some(value) = value.downcast_mut::<T>() {
                    value.attach_fields(fields);
                }
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub fn field_rules(&self) -> Vec<FieldRule> {
        (self.field_rules)()
    }

    pub fn field_defaults(&self) -> Option<Value> {
        (self.field_defaults)()
    }

    pub fn shape_root<'v>(&self, value: &'v mut Value) -> Option<&'v mut Value> {
        (self.shape_root)(value)
    }

    pub(crate) fn matches(&self, value: &Erased) -> bool {
        value.type_id() == self.id
    }

    pub(crate) fn encode(&self, value: &Erased) -> Option<serde_json::Result<Value>> {
        (self.encode)(value)
    }

    pub(crate) fn decode(&self, value: Value) -> serde_json::Result<ErasedValue> {
        (self.decode)(value)
    }

    pub(crate) fn succeeded(&self, value: &Erased) -> Option<bool> {
        (self.succeeded)(value)
    }

    pub(crate) fn mark_from_cache(&self, value: &mut Erased) {
        (self.mark_from_cache)(value)
    }

    pub(crate) fn take_metadata(&self, value: &mut Erased) -> Option<Value> {
        (self.take_metadata)(value)
    }

    pub(crate) fn restore_metadata(&self, value: &mut Erased, metadata: Value) {
        (self.restore_metadata)(value, metadata)
    }

    pub(crate) fn attach_fields(&self, value: &mut Erased, fields: Vec<FieldMeta>) {
        (self.attach_fields)(value, fields)
    }
}

impl fmt::Debug for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReturnType").field(&self.name).finish()
    }
}

fn encode<T: Returnable>(value: &Erased) -> Option<serde_json::Result<Value>> {
    value.downcast_ref::<T>().map(serde_json::to_value)
}

fn decode<T: Returnable>(value: Value) -> serde_json::Result<ErasedValue> {
    serde_json::from_value::<T>(value).map(|decoded| Box::new(decoded) as ErasedValue)
}
