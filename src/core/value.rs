//! Runtime values flowing through variables, inputs and template rendering.

use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

/// A value held by a variable or an input entry.
///
/// `Nil` is the neutral value produced for anything that cannot be resolved.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Json(Json),
    Object(ObjectValue),
}

impl Value {
    /// Wraps an arbitrary typed value. Its members are only reachable through
    /// resolvers registered for `T` in the member access registry.
    pub fn object<T>(value: T) -> Self
    where
        T: Any + Serialize + Send + Sync,
    {
        Value::Object(ObjectValue::new(value))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Json::as_str)
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Projects the value to JSON for rendering and snapshots.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Nil => Json::Null,
            Value::Json(json) => json.clone(),
            Value::Object(object) => object.to_json(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Json(json) => f.debug_tuple("Json").field(json).finish(),
            Value::Object(object) => f.debug_tuple("Object").field(object).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                a.type_identity() == b.type_identity() && a.to_json() == b.to_json()
            }
            _ => false,
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        if json.is_null() {
            Value::Nil
        } else {
            Value::Json(json)
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Json(Json::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Json(Json::String(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Json(Json::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Json(Json::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Json(Json::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Json(Json::Bool(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Nil)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(Value::from)
    }
}

/// A typed value erased behind `Any`, carrying enough metadata to be
/// projected to JSON and matched against member resolvers.
#[derive(Clone)]
pub struct ObjectValue {
    inner: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
    project: fn(&(dyn Any + Send + Sync)) -> Json,
}

impl ObjectValue {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Serialize + Send + Sync,
    {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T>(value: Arc<T>) -> Self
    where
        T: Any + Serialize + Send + Sync,
    {
        Self {
            inner: value,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            project: project_json::<T>,
        }
    }

    pub fn type_identity(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub(crate) fn erased(&self) -> Arc<dyn Any + Send + Sync> {
        self.inner.clone()
    }

    pub fn to_json(&self) -> Json {
        (self.project)(self.inner.as_ref())
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectValue")
            .field("type", &self.type_name)
            .finish()
    }
}

fn project_json<T: Any + Serialize>(value: &(dyn Any + Send + Sync)) -> Json {
    value
        .downcast_ref::<T>()
        .and_then(|typed| serde_json::to_value(typed).ok())
        .unwrap_or(Json::Null)
}
