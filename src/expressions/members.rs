//! Member access registry: maps a runtime type, or a named member of a type,
//! to the resolver that reads it.
//!
//! Registration happens once through [`MemberAccessRegistryBuilder`] while the
//! engine starts. The built registry is immutable, so concurrent reads from
//! many workflow instances need no synchronization.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    future::Future,
    sync::{Arc, OnceLock},
};

use futures::future::{BoxFuture, ready};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::core::{Error, ObjectValue, Result, Value};

type ErasedResolver =
    Arc<dyn Fn(Arc<dyn Any + Send + Sync>, &str) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

static GLOBAL_REGISTRY: OnceLock<Arc<MemberAccessRegistry>> = OnceLock::new();

/// Result of a member lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberLookup {
    Found(Value),
    /// No resolver knows this member for the instance's type.
    Unknown,
}

impl MemberLookup {
    pub fn into_value(self) -> Option<Value> {
        match self {
            MemberLookup::Found(value) => Some(value),
            MemberLookup::Unknown => None,
        }
    }
}

/// Initialization-time write phase of the registry.
#[derive(Default)]
pub struct MemberAccessRegistryBuilder {
    members: HashMap<(TypeId, String), ErasedResolver>,
    types: HashMap<TypeId, ErasedResolver>,
    type_names: HashMap<TypeId, &'static str>,
}

impl MemberAccessRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver for one named member of `T`.
    pub fn register_member<T, F>(&mut self, member: &str, resolver: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let erased: ErasedResolver = Arc::new(
            move |instance: Arc<dyn Any + Send + Sync>, _member: &str| -> BoxFuture<'static, Option<Value>> {
                let value = instance.downcast_ref::<T>().map(&resolver);
                Box::pin(ready(value))
            },
        );
        self.insert_member::<T>(member, erased)
    }

    /// Registers a type-wide resolver for `T`. Returning `None` reports the
    /// member as unknown.
    pub fn register_type<T, F>(&mut self, resolver: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &str) -> Option<Value> + Send + Sync + 'static,
    {
        let erased: ErasedResolver = Arc::new(
            move |instance: Arc<dyn Any + Send + Sync>, member: &str| -> BoxFuture<'static, Option<Value>> {
                let value = instance
                    .downcast_ref::<T>()
                    .and_then(|typed| resolver(typed, member));
                Box::pin(ready(value))
            },
        );
        self.insert_type::<T>(erased)
    }

    /// Like [`register_member`](Self::register_member) for resolvers that await I/O.
    pub fn register_member_async<T, F, Fut>(&mut self, member: &str, resolver: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let erased: ErasedResolver = Arc::new(
            move |instance: Arc<dyn Any + Send + Sync>, _member: &str| -> BoxFuture<'static, Option<Value>> {
                match instance.downcast::<T>() {
                    Ok(typed) => {
                        let pending = resolver(typed);
                        Box::pin(async move { Some(pending.await) })
                    }
                    Err(_) => Box::pin(ready(None)),
                }
            },
        );
        self.insert_member::<T>(member, erased)
    }

    /// Like [`register_type`](Self::register_type) for resolvers that await I/O.
    pub fn register_type_async<T, F, Fut>(&mut self, resolver: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        let erased: ErasedResolver = Arc::new(
            move |instance: Arc<dyn Any + Send + Sync>, member: &str| -> BoxFuture<'static, Option<Value>> {
                match instance.downcast::<T>() {
                    Ok(typed) => Box::pin(resolver(typed, member.to_string())),
                    Err(_) => Box::pin(ready(None)),
                }
            },
        );
        self.insert_type::<T>(erased)
    }

    /// Exposes every serialized field of a record type as a member.
    pub fn register_record<T>(&mut self) -> &mut Self
    where
        T: Any + Serialize + Send + Sync,
    {
        self.register_type::<T, _>(|instance, member| match serde_json::to_value(instance) {
            Ok(Json::Object(mut fields)) => fields.remove(member).map(Value::from),
            _ => None,
        })
    }

    /// Registers every record-shaped type the catalog supplies. Scalars and
    /// generic types are skipped.
    pub fn register_catalog(&mut self, catalog: &dyn VariableTypeCatalog) -> &mut Self {
        for descriptor in catalog.descriptors() {
            if descriptor.shape == TypeShape::Record {
                (descriptor.register)(self);
            } else {
                debug!(type_name = descriptor.type_name, shape = ?descriptor.shape, "Skipping non-record variable type");
            }
        }
        self
    }

    pub fn build(self) -> MemberAccessRegistry {
        MemberAccessRegistry {
            members: self.members,
            types: self.types,
            type_names: self.type_names,
        }
    }

    fn insert_member<T: Any>(&mut self, member: &str, resolver: ErasedResolver) -> &mut Self {
        let key = (TypeId::of::<T>(), member.to_string());
        if self.members.insert(key, resolver).is_some() {
            debug!(type_name = std::any::type_name::<T>(), member, "Replaced member resolver");
        }
        self.type_names
            .insert(TypeId::of::<T>(), std::any::type_name::<T>());
        self
    }

    fn insert_type<T: Any>(&mut self, resolver: ErasedResolver) -> &mut Self {
        if self.types.insert(TypeId::of::<T>(), resolver).is_some() {
            debug!(type_name = std::any::type_name::<T>(), "Replaced type-wide resolver");
        }
        self.type_names
            .insert(TypeId::of::<T>(), std::any::type_name::<T>());
        self
    }
}

/// Immutable registry consulted during resolution and rendering.
pub struct MemberAccessRegistry {
    members: HashMap<(TypeId, String), ErasedResolver>,
    types: HashMap<TypeId, ErasedResolver>,
    type_names: HashMap<TypeId, &'static str>,
}

impl MemberAccessRegistry {
    pub fn builder() -> MemberAccessRegistryBuilder {
        MemberAccessRegistryBuilder::new()
    }

    /// Installs the process-wide registry. Only the first call succeeds.
    pub fn install(self) -> Result<Arc<Self>> {
        let registry = Arc::new(self);
        GLOBAL_REGISTRY
            .set(registry.clone())
            .map_err(|_| Error::InvalidState("Member access registry is already installed".into()))?;
        Ok(registry)
    }

    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_REGISTRY.get().cloned()
    }

    pub fn is_registered(&self, type_id: TypeId) -> bool {
        self.type_names.contains_key(&type_id)
    }

    /// Resolves `member` on `instance`.
    ///
    /// A member-specific resolver for the concrete type wins over a type-wide
    /// one. Dynamic JSON objects expose their keys and arrays their indexes;
    /// members of `Nil` are `Nil`.
    pub async fn resolve(&self, instance: &Value, member: &str) -> MemberLookup {
        match instance {
            Value::Nil => MemberLookup::Found(Value::Nil),
            Value::Json(json) => resolve_json_member(json, member),
            Value::Object(object) => self.resolve_object(object, member).await,
        }
    }

    async fn resolve_object(&self, object: &ObjectValue, member: &str) -> MemberLookup {
        let type_id = object.type_identity();
        let resolver = self
            .members
            .get(&(type_id, member.to_string()))
            .or_else(|| self.types.get(&type_id));
        let Some(resolver) = resolver else {
            debug!(type_name = object.type_name(), member, "No member resolver registered");
            return MemberLookup::Unknown;
        };
        match resolver(object.erased(), member).await {
            Some(value) => MemberLookup::Found(value),
            None => MemberLookup::Unknown,
        }
    }
}

fn resolve_json_member(json: &Json, member: &str) -> MemberLookup {
    match json {
        Json::Object(fields) => MemberLookup::Found(fields.get(member).cloned().into()),
        Json::Array(items) => match member {
            "size" | "length" => MemberLookup::Found(Value::from(items.len() as i64)),
            "first" => MemberLookup::Found(items.first().cloned().into()),
            "last" => MemberLookup::Found(items.last().cloned().into()),
            index => match index.parse::<usize>() {
                Ok(index) => MemberLookup::Found(items.get(index).cloned().into()),
                Err(_) => MemberLookup::Unknown,
            },
        },
        Json::String(text) if member == "size" || member == "length" => {
            MemberLookup::Found(Value::from(text.chars().count() as i64))
        }
        _ => MemberLookup::Unknown,
    }
}

/// How a variable type is shaped, which decides whether it is auto-registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    /// A concrete, non-generic record type whose fields are its members.
    Record,
    Scalar,
    Generic,
}

/// A type that workflow variables may hold.
#[derive(Debug, Clone, Copy)]
pub struct VariableDescriptor {
    pub type_name: &'static str,
    pub shape: TypeShape,
    register: fn(&mut MemberAccessRegistryBuilder),
}

impl VariableDescriptor {
    pub fn record<T>() -> Self
    where
        T: Any + Serialize + Send + Sync,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            shape: TypeShape::Record,
            register: register_record::<T>,
        }
    }

    pub fn scalar<T: Any>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            shape: TypeShape::Scalar,
            register: register_nothing,
        }
    }

    pub fn generic<T: Any>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            shape: TypeShape::Generic,
            register: register_nothing,
        }
    }
}

fn register_record<T>(builder: &mut MemberAccessRegistryBuilder)
where
    T: Any + Serialize + Send + Sync,
{
    builder.register_record::<T>();
}

fn register_nothing(_: &mut MemberAccessRegistryBuilder) {}

/// Supplies the types workflow variables may hold.
pub trait VariableTypeCatalog: Send + Sync {
    fn descriptors(&self) -> Vec<VariableDescriptor>;
}

/// A fixed list of variable types.
#[derive(Debug, Clone, Default)]
pub struct StaticVariableTypeCatalog {
    descriptors: Vec<VariableDescriptor>,
}

impl StaticVariableTypeCatalog {
    pub fn new(descriptors: Vec<VariableDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn with(mut self, descriptor: VariableDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }
}

impl VariableTypeCatalog for StaticVariableTypeCatalog {
    fn descriptors(&self) -> Vec<VariableDescriptor> {
        self.descriptors.clone()
    }
}
