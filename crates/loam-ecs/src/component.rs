//! Component type registration, schema kinds, and runtime values.
//!
//! Component data is schema-driven: a component type declares an ordered list
//! of fields, each drawn from a registered *kind*. A kind is a descriptor with
//! three function slots -- `default`, `clone`, and `copy` -- so clients can
//! register their own value semantics at world-construction time alongside
//! the built-in primitives.
//!
//! Registration produces a dense [`ComponentTypeId`] that is the key for all
//! query matching and instance lookups; identity never derives from the
//! registered name, which keeps canonicalization total over any registrable
//! set.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::pool::ComponentPool;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A shared, type-erased payload for [`Value::Opaque`] fields.
///
/// Opaque values copy by handle: cloning a component shares the same
/// underlying allocation.
pub type OpaqueHandle = Arc<dyn Any + Send + Sync>;

/// The runtime representation of one component field.
#[derive(Clone)]
pub enum Value {
    /// A double-precision number.
    Number(f64),
    /// A boolean flag.
    Bool(bool),
    /// An owned string.
    Text(String),
    /// A shared handle to arbitrary data, copied by reference.
    Opaque(Option<OpaqueHandle>),
    /// A homogeneous-or-not list of values.
    Array(Vec<Value>),
    /// An arbitrary JSON document.
    Json(serde_json::Value),
}

impl Value {
    /// The number payload, if this is a `Number`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string payload, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The array payload, if this is an `Array`.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The JSON payload, if this is a `Json`.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    /// The opaque handle, if this is an `Opaque` with a payload.
    pub fn as_opaque(&self) -> Option<&OpaqueHandle> {
        match self {
            Value::Opaque(h) => h.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Opaque(Some(_)) => write!(f, "Opaque(..)"),
            Value::Opaque(None) => write!(f, "Opaque(None)"),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Json(v) => write!(f, "Json({v})"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Opaque(None), Value::Opaque(None)) => true,
            (Value::Opaque(Some(a)), Value::Opaque(Some(b))) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

// ---------------------------------------------------------------------------
// KindId / KindRegistry
// ---------------------------------------------------------------------------

/// Opaque identifier for a registered field kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KindId(pub(crate) u32);

impl KindId {
    /// Built-in `f64` kind, defaulting to `0.0`.
    pub const NUMBER: KindId = KindId(0);
    /// Built-in boolean kind, defaulting to `false`.
    pub const BOOL: KindId = KindId(1);
    /// Built-in string kind, defaulting to the empty string.
    pub const TEXT: KindId = KindId(2);
    /// Built-in shared-handle kind; copies by reference, defaults to `None`.
    pub const OPAQUE: KindId = KindId(3);
    /// Built-in list kind, defaulting to the empty list.
    pub const ARRAY: KindId = KindId(4);
    /// Built-in JSON kind, defaulting to `null`.
    pub const JSON: KindId = KindId(5);
}

impl fmt::Debug for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KindId({})", self.0)
    }
}

/// Function slot producing a kind's default value.
pub type DefaultFn = Box<dyn Fn() -> Value + Send + Sync>;
/// Function slot cloning a value under a kind's semantics.
pub type CloneFn = Box<dyn Fn(&Value) -> Value + Send + Sync>;
/// Function slot copying a source value over a destination.
pub type CopyFn = Box<dyn Fn(&Value, &mut Value) + Send + Sync>;

/// A field kind: a stable identifier plus three function slots governing how
/// values of the kind are defaulted, cloned, and copied.
struct KindDef {
    name: String,
    default: DefaultFn,
    clone: CloneFn,
    copy: CopyFn,
}

/// Registry of field kinds, pre-seeded with the built-in primitives.
pub struct KindRegistry {
    kinds: Vec<KindDef>,
    by_name: HashMap<String, KindId>,
}

impl KindRegistry {
    /// A registry containing exactly the built-in kinds, in the order of the
    /// `KindId` constants.
    pub(crate) fn with_builtins() -> Self {
        let mut reg = Self {
            kinds: Vec::new(),
            by_name: HashMap::new(),
        };
        reg.register(
            "number",
            Box::new(|| Value::Number(0.0)),
            Box::new(Value::clone),
            Box::new(|src, dst| *dst = src.clone()),
        );
        reg.register(
            "bool",
            Box::new(|| Value::Bool(false)),
            Box::new(Value::clone),
            Box::new(|src, dst| *dst = src.clone()),
        );
        reg.register(
            "text",
            Box::new(|| Value::Text(String::new())),
            Box::new(Value::clone),
            Box::new(|src, dst| *dst = src.clone()),
        );
        reg.register(
            "opaque",
            Box::new(|| Value::Opaque(None)),
            // Shared handles clone by reference.
            Box::new(Value::clone),
            Box::new(|src, dst| *dst = src.clone()),
        );
        reg.register(
            "array",
            Box::new(|| Value::Array(Vec::new())),
            Box::new(Value::clone),
            Box::new(|src, dst| *dst = src.clone()),
        );
        reg.register(
            "json",
            Box::new(|| Value::Json(serde_json::Value::Null)),
            Box::new(Value::clone),
            Box::new(|src, dst| *dst = src.clone()),
        );
        reg
    }

    /// Register a new kind under `name`.
    ///
    /// If the name is already taken, the existing [`KindId`] is returned and
    /// the new descriptor is discarded.
    pub fn register(
        &mut self,
        name: &str,
        default: DefaultFn,
        clone: CloneFn,
        copy: CopyFn,
    ) -> KindId {
        if let Some(&existing) = self.by_name.get(name) {
            tracing::warn!(kind = %name, "kind already registered, keeping existing descriptor");
            return existing;
        }
        let id = KindId(self.kinds.len() as u32);
        self.kinds.push(KindDef {
            name: name.to_owned(),
            default,
            clone,
            copy,
        });
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Look up a kind by its registered name.
    pub fn lookup(&self, name: &str) -> Option<KindId> {
        self.by_name.get(name).copied()
    }

    /// The registered name of a kind.
    pub fn name(&self, id: KindId) -> &str {
        &self.kinds[id.0 as usize].name
    }

    /// Produce the kind's default value.
    pub fn default_value(&self, id: KindId) -> Value {
        (self.kinds[id.0 as usize].default)()
    }

    /// Clone a value under the kind's semantics.
    pub fn clone_value(&self, id: KindId, value: &Value) -> Value {
        (self.kinds[id.0 as usize].clone)(value)
    }

    /// Copy `src` over `dst` under the kind's semantics.
    pub fn copy_value(&self, id: KindId, src: &Value, dst: &mut Value) {
        (self.kinds[id.0 as usize].copy)(src, dst)
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.kinds.iter().map(|k| &k.name).collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// One field in a component schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name, unique within the schema.
    pub name: String,
    /// The field's kind.
    pub kind: KindId,
    /// Per-field default; falls back to the kind's default when `None`.
    pub default: Option<Value>,
}

/// An ordered set of field specifications. A component type with an empty
/// schema is a *tag*: presence is the datum.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field of the given kind using the kind's default.
    pub fn field(mut self, name: &str, kind: KindId) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_owned(),
            kind,
            default: None,
        });
        self
    }

    /// Append a field with an explicit default value.
    pub fn field_with_default(mut self, name: &str, kind: KindId, default: Value) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_owned(),
            kind,
            default: Some(default),
        });
        self
    }

    /// Append a number field with the given default.
    pub fn number(self, name: &str, default: f64) -> Self {
        self.field_with_default(name, KindId::NUMBER, Value::Number(default))
    }

    /// Append a boolean field with the given default.
    pub fn boolean(self, name: &str, default: bool) -> Self {
        self.field_with_default(name, KindId::BOOL, Value::Bool(default))
    }

    /// Append a string field with the given default.
    pub fn text(self, name: &str, default: &str) -> Self {
        self.field_with_default(name, KindId::TEXT, Value::from(default))
    }

    /// Append a list field defaulting to the empty list.
    pub fn array(self, name: &str) -> Self {
        self.field(name, KindId::ARRAY)
    }

    /// Append a JSON field defaulting to `null`.
    pub fn json(self, name: &str) -> Self {
        self.field(name, KindId::JSON)
    }

    /// Append a shared-handle field defaulting to `None`.
    pub fn opaque(self, name: &str) -> Self {
        self.field(name, KindId::OPAQUE)
    }

    /// The ordered field specifications.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Position of a field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields (tag component).
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ComponentTypeId / ComponentType / ComponentInfo
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

/// Pooling policy for a component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
    /// Recycle instances through a per-type pool.
    #[default]
    Default,
    /// Construct and drop instances directly.
    Disabled,
}

/// Registration descriptor for a component type.
///
/// ```
/// use loam_ecs::component::{ComponentType, Schema};
///
/// let position = ComponentType::new("position")
///     .schema(Schema::new().number("x", 0.0).number("y", 0.0));
/// let frozen = ComponentType::tag("frozen");
/// ```
#[derive(Debug, Clone)]
pub struct ComponentType {
    name: String,
    schema: Schema,
    system_state: bool,
    pooling: Pooling,
}

impl ComponentType {
    /// A pooled component type with an empty schema.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            schema: Schema::new(),
            system_state: false,
            pooling: Pooling::Default,
        }
    }

    /// A tag component type: zero fields, presence is the signal.
    pub fn tag(name: &str) -> Self {
        Self::new(name)
    }

    /// Attach the schema.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Mark the type as system-state: its presence blocks final disposal of
    /// the owning entity.
    pub fn system_state(mut self) -> Self {
        self.system_state = true;
        self
    }

    /// Disable pooling; instances are constructed fresh and dropped.
    pub fn without_pool(mut self) -> Self {
        self.pooling = Pooling::Disabled;
        self
    }
}

/// Immutable metadata for a registered component type, shared by every
/// instance of the type.
#[derive(Debug)]
pub struct ComponentInfo {
    /// Dense id assigned at registration.
    pub id: ComponentTypeId,
    /// Registered name.
    pub name: String,
    /// The field schema.
    pub schema: Schema,
    /// Whether presence blocks final entity disposal.
    pub system_state: bool,
    /// Whether instances recycle through a pool.
    pub pooled: bool,
}

impl ComponentInfo {
    /// Whether this is a tag type (empty schema).
    pub fn is_tag(&self) -> bool {
        self.schema.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ComponentValue
// ---------------------------------------------------------------------------

/// A component instance: field values parallel to the owning type's schema.
///
/// The `info` back-reference identifies the owning type, which is also how an
/// instance finds its way back to the right pool on disposal.
#[derive(Debug, Clone)]
pub struct ComponentValue {
    info: Arc<ComponentInfo>,
    fields: Vec<Value>,
}

impl ComponentValue {
    /// Construct an instance populated from schema defaults.
    pub(crate) fn from_defaults(info: Arc<ComponentInfo>, kinds: &KindRegistry) -> Self {
        let fields = info
            .schema
            .fields()
            .iter()
            .map(|f| match &f.default {
                Some(v) => kinds.clone_value(f.kind, v),
                None => kinds.default_value(f.kind),
            })
            .collect();
        Self { info, fields }
    }

    /// The owning type's id.
    pub fn type_id(&self) -> ComponentTypeId {
        self.info.id
    }

    /// The owning type's registered name.
    pub fn type_name(&self) -> &str {
        &self.info.name
    }

    /// The owning type's metadata.
    pub fn info(&self) -> &Arc<ComponentInfo> {
        &self.info
    }

    /// A field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let i = self.info.schema.index_of(name)?;
        self.fields.get(i)
    }

    /// A mutable field value by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let i = self.info.schema.index_of(name)?;
        self.fields.get_mut(i)
    }

    /// Replace a field value by name. Returns `false` if the field does not
    /// exist in the schema.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.get_mut(name) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// A number field by name.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_number()
    }

    /// A boolean field by name.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    /// A string field by name.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_text()
    }

    /// Overlay the supplied properties: every schema field present in `props`
    /// is copied onto the instance under its kind's `copy` semantics.
    /// Properties that name no schema field are ignored.
    pub(crate) fn apply_props(&mut self, props: &Props, kinds: &KindRegistry) {
        for (name, value) in props.entries() {
            if let Some(i) = self.info.schema.index_of(name) {
                let kind = self.info.schema.fields()[i].kind;
                kinds.copy_value(kind, value, &mut self.fields[i]);
            }
        }
    }

    /// Deep-clone the instance under per-kind `clone` semantics.
    pub(crate) fn clone_with(&self, kinds: &KindRegistry) -> Self {
        let fields = self
            .info
            .schema
            .fields()
            .iter()
            .zip(&self.fields)
            .map(|(spec, v)| kinds.clone_value(spec.kind, v))
            .collect();
        Self {
            info: Arc::clone(&self.info),
            fields,
        }
    }

    /// Copy every field of `src` over this instance under per-kind `copy`
    /// semantics. Both instances must be of the same type.
    pub(crate) fn copy_from(&mut self, src: &ComponentValue, kinds: &KindRegistry) {
        debug_assert_eq!(self.info.id, src.info.id);
        for ((spec, dst), sv) in self
            .info
            .schema
            .fields()
            .iter()
            .zip(&mut self.fields)
            .zip(&src.fields)
        {
            kinds.copy_value(spec.kind, sv, dst);
        }
    }
}

// ---------------------------------------------------------------------------
// Props
// ---------------------------------------------------------------------------

/// Constructor properties overlaid onto schema defaults by
/// [`World::add_component`](crate::world::World::add_component).
///
/// ```
/// use loam_ecs::component::Props;
///
/// let props = Props::new().set("x", 4.0).set("label", "spawn");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Props {
    entries: Vec<(String, Value)>,
}

impl Props {
    /// No properties; schema defaults apply unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property, consuming and returning the builder.
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entries.push((name.to_owned(), value.into()));
        self
    }

    /// The property entries in insertion order.
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Whether no properties were supplied.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping component names to ids, metadata, pools, and live counts.
#[derive(Debug)]
pub struct ComponentRegistry {
    infos: Vec<Arc<ComponentInfo>>,
    by_name: HashMap<String, ComponentTypeId>,
    pools: Vec<Option<ComponentPool>>,
    live: Vec<usize>,
}

impl ComponentRegistry {
    pub(crate) fn new() -> Self {
        Self {
            infos: Vec::new(),
            by_name: HashMap::new(),
            pools: Vec::new(),
            live: Vec::new(),
        }
    }

    /// Register a component type.
    ///
    /// Re-registering a name is a non-fatal misuse: a warning is logged and
    /// the existing id is returned unchanged.
    pub(crate) fn register(&mut self, ty: ComponentType, kinds: &KindRegistry) -> ComponentTypeId {
        if let Some(&existing) = self.by_name.get(&ty.name) {
            tracing::warn!(
                component = %ty.name,
                "component type already registered, keeping existing registration"
            );
            return existing;
        }
        let id = ComponentTypeId(self.infos.len() as u32);
        let info = Arc::new(ComponentInfo {
            id,
            name: ty.name.clone(),
            schema: ty.schema,
            system_state: ty.system_state,
            pooled: ty.pooling == Pooling::Default,
        });
        let pool = info.pooled.then(|| {
            ComponentPool::new(ComponentValue::from_defaults(Arc::clone(&info), kinds))
        });
        self.by_name.insert(ty.name, id);
        self.infos.push(info);
        self.pools.push(pool);
        self.live.push(0);
        id
    }

    /// Metadata for a registered type.
    pub fn info(&self, id: ComponentTypeId) -> Option<&Arc<ComponentInfo>> {
        self.infos.get(id.0 as usize)
    }

    /// Look up a type by its registered name.
    pub fn lookup(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// All registered type metadata, in registration order.
    pub fn infos(&self) -> &[Arc<ComponentInfo>] {
        &self.infos
    }

    /// The pool for a type, if pooling is enabled.
    pub(crate) fn pool_mut(&mut self, id: ComponentTypeId) -> Option<&mut ComponentPool> {
        self.pools.get_mut(id.0 as usize)?.as_mut()
    }

    /// Read-only pool access for statistics.
    pub(crate) fn pool(&self, id: ComponentTypeId) -> Option<&ComponentPool> {
        self.pools.get(id.0 as usize)?.as_ref()
    }

    /// Number of instances of a type currently attached to entities.
    pub fn live_count(&self, id: ComponentTypeId) -> usize {
        self.live.get(id.0 as usize).copied().unwrap_or(0)
    }

    pub(crate) fn live_inc(&mut self, id: ComponentTypeId) {
        if let Some(n) = self.live.get_mut(id.0 as usize) {
            *n += 1;
        }
    }

    pub(crate) fn live_dec(&mut self, id: ComponentTypeId) {
        if let Some(n) = self.live.get_mut(id.0 as usize) {
            *n = n.saturating_sub(1);
        }
    }

    /// Number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether no component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
