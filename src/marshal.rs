//! # Typed Marshaller Registry
//!
//! Enum and object fields are serialized through per-type marshallers
//! resolved once per type from a registry keyed by [`TypeId`], not looked
//! up per call, and not dispatched on runtime class names. A registered
//! type carries a stable name that is written with the `Enumerated` object
//! tag so readers can verify they are decoding the type they expect.
//!
//! ## Built-ins
//!
//! - [`StringMarshaller`]: UTF-8 text fields; registered as `"String"` in
//!   every fresh registry.
//! - [`TextMarshaller`]: any `Display + FromStr` type round-tripped through
//!   its text form, which covers enums with string representations and
//!   newtypes, and supports delimited parsing.

use std::any::{Any, TypeId};
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use eyre::{eyre, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::excerpt::Excerpt;

/// Serializer/deserializer pair for one field type.
pub trait Marshaller<T>: Send + Sync {
    fn write(&self, excerpt: &mut Excerpt, value: &T) -> Result<()>;

    fn read(&self, excerpt: &mut Excerpt) -> Result<T>;

    /// Reads a value from delimited text, consuming up to (and including)
    /// the first character `stop` accepts.
    fn parse(&self, excerpt: &mut Excerpt, stop: &mut dyn FnMut(char) -> bool) -> Result<T>;
}

struct Registered {
    name: String,
    // Holds an `Arc<dyn Marshaller<T>>` for the keyed `T`.
    marshaller: Box<dyn Any + Send + Sync>,
}

/// Type-keyed marshaller table shared by every cursor of a log.
pub struct MarshallerRegistry {
    map: RwLock<HashMap<TypeId, Registered>>,
}

impl Default for MarshallerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MarshallerRegistry {
    pub fn new() -> Self {
        let registry = Self {
            map: RwLock::new(HashMap::new()),
        };
        registry.register::<String>("String", StringMarshaller);
        registry
    }

    /// Registers `marshaller` for `T` under `name`, replacing any previous
    /// registration for the type.
    pub fn register<T: 'static>(
        &self,
        name: impl Into<String>,
        marshaller: impl Marshaller<T> + 'static,
    ) {
        let arc: Arc<dyn Marshaller<T>> = Arc::new(marshaller);
        self.map.write().insert(
            TypeId::of::<T>(),
            Registered {
                name: name.into(),
                marshaller: Box::new(arc),
            },
        );
    }

    pub fn lookup<T: 'static>(&self) -> Option<Arc<dyn Marshaller<T>>> {
        let map = self.map.read();
        let registered = map.get(&TypeId::of::<T>())?;
        registered
            .marshaller
            .downcast_ref::<Arc<dyn Marshaller<T>>>()
            .cloned()
    }

    /// The wire name `T` was registered under.
    pub fn registered_name<T: 'static>(&self) -> Option<String> {
        let map = self.map.read();
        Some(map.get(&TypeId::of::<T>())?.name.clone())
    }

    /// Resolves the marshaller for `T` or fails with the type's name.
    pub fn acquire<T: 'static>(&self) -> Result<Arc<dyn Marshaller<T>>> {
        self.lookup::<T>()
            .ok_or_else(|| eyre!("no marshaller registered for {}", std::any::type_name::<T>()))
    }
}

/// UTF-8 text marshaller for `String` fields.
pub struct StringMarshaller;

impl Marshaller<String> for StringMarshaller {
    fn write(&self, excerpt: &mut Excerpt, value: &String) -> Result<()> {
        excerpt.write_utf8(Some(value))
    }

    fn read(&self, excerpt: &mut Excerpt) -> Result<String> {
        excerpt
            .read_utf8()?
            .ok_or_else(|| eyre!("null string in marshalled field"))
    }

    fn parse(&self, excerpt: &mut Excerpt, stop: &mut dyn FnMut(char) -> bool) -> Result<String> {
        excerpt.parse_utf8(stop)
    }
}

/// Marshals any `Display + FromStr` type through its text form.
pub struct TextMarshaller<T> {
    _type: PhantomData<fn() -> T>,
}

impl<T> Default for TextMarshaller<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TextMarshaller<T> {
    pub fn new() -> Self {
        Self { _type: PhantomData }
    }
}

impl<T> Marshaller<T> for TextMarshaller<T>
where
    T: Display + FromStr + Send + Sync + 'static,
    T::Err: Display,
{
    fn write(&self, excerpt: &mut Excerpt, value: &T) -> Result<()> {
        excerpt.write_utf8(Some(&value.to_string()))
    }

    fn read(&self, excerpt: &mut Excerpt) -> Result<T> {
        let text = excerpt
            .read_utf8()?
            .ok_or_else(|| eyre!("null text in marshalled field"))?;
        text.parse::<T>()
            .map_err(|e| eyre!("cannot parse {:?} as {}: {}", text, std::any::type_name::<T>(), e))
    }

    fn parse(&self, excerpt: &mut Excerpt, stop: &mut dyn FnMut(char) -> bool) -> Result<T> {
        let text = excerpt.parse_utf8(stop)?;
        text.parse::<T>()
            .map_err(|e| eyre!("cannot parse {:?} as {}: {}", text, std::any::type_name::<T>(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_marshaller_is_preregistered() {
        let registry = MarshallerRegistry::new();
        assert!(registry.lookup::<String>().is_some());
        assert_eq!(registry.registered_name::<String>().as_deref(), Some("String"));
    }

    #[test]
    fn lookup_of_unregistered_type_is_none() {
        let registry = MarshallerRegistry::new();
        assert!(registry.lookup::<u32>().is_none());
        assert!(registry.acquire::<u32>().is_err());
    }

    #[test]
    fn registration_replaces_and_names() {
        let registry = MarshallerRegistry::new();
        registry.register::<u32>("U32", TextMarshaller::new());
        assert!(registry.lookup::<u32>().is_some());
        assert_eq!(registry.registered_name::<u32>().as_deref(), Some("U32"));
    }
}
