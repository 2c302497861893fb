// types.rs — Canonical port type contract
//
// `TypeDesc` is the resolved form of a declared type string. This module owns
// the promotion/broadcast rules used on edges, bus eligibility, and the
// combine-mode table consulted by writer resolution.
//
// Preconditions: none.
// Postconditions: every accepted type string yields a fully populated TypeDesc.
// Failure modes: unparseable strings, unknown worlds/domains/annotations → `TypeError`.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patch::{CombineMode, Value};
use crate::type_parser;

// ── World / domain / category ───────────────────────────────────────────────

/// Evaluation timing class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum World {
    /// Continuous, evaluated once per frame.
    Signal,
    /// Lazy, evaluated per element of a domain.
    Field,
    /// Discrete occurrences.
    Event,
    /// Compile-time constant.
    Scalar,
    /// Non-runtime configuration.
    Config,
}

impl World {
    fn parse(name: &str) -> Option<World> {
        match name.to_ascii_lowercase().as_str() {
            "signal" => Some(World::Signal),
            "field" => Some(World::Field),
            "event" => Some(World::Event),
            "scalar" => Some(World::Scalar),
            "config" => Some(World::Config),
            _ => None,
        }
    }
}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            World::Signal => "Signal",
            World::Field => "Field",
            World::Event => "Event",
            World::Scalar => "Scalar",
            World::Config => "Config",
        };
        write!(f, "{}", s)
    }
}

/// Semantic value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Domain {
    Float,
    Int,
    Boolean,
    Vec2,
    Vec3,
    Color,
    Phase,
    Time,
    Trigger,
    #[serde(rename = "string")]
    Text,
    ElementDomain,
    RenderTree,
    RenderNode,
    SceneTargets,
    Camera,
}

impl Domain {
    /// Resolve a domain name, normalizing legacy aliases.
    pub fn parse(name: &str) -> Option<Domain> {
        let d = match name {
            "float" | "number" => Domain::Float,
            "int" => Domain::Int,
            "boolean" | "bool" => Domain::Boolean,
            "vec2" | "point" => Domain::Vec2,
            "vec3" => Domain::Vec3,
            "color" => Domain::Color,
            "phase" | "unit" => Domain::Phase,
            "time" => Domain::Time,
            "trigger" => Domain::Trigger,
            "string" | "text" => Domain::Text,
            "elementDomain" | "domain" => Domain::ElementDomain,
            "renderTree" => Domain::RenderTree,
            "renderNode" => Domain::RenderNode,
            "sceneTargets" => Domain::SceneTargets,
            "camera" => Domain::Camera,
            _ => return None,
        };
        Some(d)
    }

    /// Domains where every combine mode is meaningful.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Domain::Float | Domain::Int | Domain::Vec2 | Domain::Vec3 | Domain::Phase | Domain::Time
        )
    }

    /// Domains that may travel on a field-world bus.
    pub fn is_scalar_shaped(self) -> bool {
        matches!(
            self,
            Domain::Float | Domain::Int | Domain::Boolean | Domain::Color
        )
    }

    /// Component count, for slot-size accounting.
    pub fn lanes(self) -> Option<u8> {
        match self {
            Domain::Float
            | Domain::Int
            | Domain::Boolean
            | Domain::Phase
            | Domain::Time
            | Domain::Trigger => Some(1),
            Domain::Vec2 | Domain::SceneTargets => Some(2),
            Domain::Vec3 => Some(3),
            Domain::Color => Some(4),
            Domain::Text
            | Domain::ElementDomain
            | Domain::RenderTree
            | Domain::RenderNode
            | Domain::Camera => None,
        }
    }

    /// The value a bus or default takes when nothing else is configured.
    pub fn zero_value(self) -> Option<Value> {
        match self {
            Domain::Float | Domain::Phase | Domain::Time => Some(Value::Float(0.0)),
            Domain::Int => Some(Value::Int(0)),
            Domain::Boolean | Domain::Trigger => Some(Value::Bool(false)),
            Domain::Vec2 | Domain::SceneTargets => Some(Value::Vector(vec![0.0, 0.0])),
            Domain::Vec3 => Some(Value::Vector(vec![0.0, 0.0, 0.0])),
            Domain::Color => Some(Value::Vector(vec![0.0, 0.0, 0.0, 0.0])),
            Domain::Text => Some(Value::Text(String::new())),
            Domain::ElementDomain | Domain::RenderTree | Domain::RenderNode | Domain::Camera => {
                None
            }
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Domain::Float => "float",
            Domain::Int => "int",
            Domain::Boolean => "boolean",
            Domain::Vec2 => "vec2",
            Domain::Vec3 => "vec3",
            Domain::Color => "color",
            Domain::Phase => "phase",
            Domain::Time => "time",
            Domain::Trigger => "trigger",
            Domain::Text => "string",
            Domain::ElementDomain => "elementDomain",
            Domain::RenderTree => "renderTree",
            Domain::RenderNode => "renderNode",
            Domain::SceneTargets => "sceneTargets",
            Domain::Camera => "camera",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Core,
    Internal,
}

// ── TypeDesc ────────────────────────────────────────────────────────────────

/// The canonical type contract of a port or bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDesc {
    pub world: World,
    pub domain: Domain,
    pub category: Category,
    pub bus_eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lanes: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A type string that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TypeError {
    pub message: String,
}

/// How an IR value of a port is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrKind {
    Const,
    Signal,
    Field,
    Event,
    /// Opaque handle (element domain, camera).
    Handle,
    /// No IR representation (render trees, config).
    None,
}

impl TypeDesc {
    pub fn new(world: World, domain: Domain) -> Self {
        TypeDesc {
            world,
            domain,
            category: Category::Core,
            bus_eligible: bus_eligible(world, domain),
            lanes: domain.lanes(),
            semantics: None,
            unit: None,
        }
    }

    pub fn signal(domain: Domain) -> Self {
        Self::new(World::Signal, domain)
    }

    pub fn field(domain: Domain) -> Self {
        Self::new(World::Field, domain)
    }

    pub fn event(domain: Domain) -> Self {
        Self::new(World::Event, domain)
    }

    pub fn scalar(domain: Domain) -> Self {
        Self::new(World::Scalar, domain)
    }

    /// Parse a declared type string such as `Signal<float> @unit(ms)`.
    pub fn parse(text: &str) -> Result<TypeDesc, TypeError> {
        let raw = type_parser::parse(text).map_err(|errs| TypeError {
            message: format!("malformed type '{}': {}", text, errs.join("; ")),
        })?;
        let world = World::parse(&raw.world).ok_or_else(|| TypeError {
            message: format!("unknown world '{}' in type '{}'", raw.world, text),
        })?;
        let domain = Domain::parse(&raw.domain).ok_or_else(|| TypeError {
            message: format!("unknown domain '{}' in type '{}'", raw.domain, text),
        })?;
        let mut desc = TypeDesc::new(world, domain);
        if raw.internal {
            desc.category = Category::Internal;
        }
        for (key, value) in raw.annotations {
            match key.as_str() {
                "unit" => desc.unit = Some(value),
                "semantics" => desc.semantics = Some(value),
                _ => {
                    return Err(TypeError {
                        message: format!("unknown annotation '@{}' in type '{}'", key, text),
                    })
                }
            }
        }
        Ok(desc)
    }

    /// Same world and domain, ignoring category and annotations.
    pub fn same_shape(&self, other: &TypeDesc) -> bool {
        self.world == other.world && self.domain == other.domain
    }

    pub fn with_world(&self, world: World) -> TypeDesc {
        let mut t = TypeDesc::new(world, self.domain);
        t.category = self.category;
        t.semantics = self.semantics.clone();
        t.unit = self.unit.clone();
        t
    }

    pub fn with_domain(&self, domain: Domain) -> TypeDesc {
        let mut t = TypeDesc::new(self.world, domain);
        t.category = self.category;
        t.unit = self.unit.clone();
        t
    }

    pub fn ir_kind(&self) -> IrKind {
        match self.domain {
            Domain::RenderTree | Domain::RenderNode => return IrKind::None,
            Domain::ElementDomain | Domain::Camera => return IrKind::Handle,
            _ => {}
        }
        match self.world {
            World::Config => IrKind::None,
            World::Scalar => IrKind::Const,
            World::Signal => IrKind::Signal,
            World::Field => IrKind::Field,
            World::Event => IrKind::Event,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category == Category::Internal {
            write!(f, "internal ")?;
        }
        write!(f, "{}<{}>", self.world, self.domain)?;
        if let Some(unit) = &self.unit {
            write!(f, " @unit({})", unit)?;
        }
        if let Some(sem) = &self.semantics {
            write!(f, " @semantics({})", sem)?;
        }
        Ok(())
    }
}

// ── Bus eligibility ─────────────────────────────────────────────────────────

/// Signals and events always broadcast; fields only for scalar-shaped
/// domains; compile-time and config worlds never.
pub fn bus_eligible(world: World, domain: Domain) -> bool {
    match world {
        World::Signal | World::Event => true,
        World::Field => domain.is_scalar_shaped(),
        World::Scalar | World::Config => false,
    }
}

/// Required type of a reserved bus name, if `name` is reserved.
pub fn reserved_bus_type(name: &str) -> Option<TypeDesc> {
    match name {
        "phaseA" => Some(TypeDesc::signal(Domain::Phase)),
        "pulse" => Some(TypeDesc::event(Domain::Trigger)),
        _ => None,
    }
}

// ── Edge compatibility ──────────────────────────────────────────────────────

/// Conversion the compiler inserts on a compatible edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Conversion {
    /// Same world; value passes through unchanged.
    Identity,
    /// Compile-time constant promoted to a continuous signal.
    Promote,
    /// Signal (or constant) broadcast to every element of a field.
    Broadcast,
}

fn domains_compatible(from: Domain, to: Domain) -> bool {
    from == to
        || matches!(
            (from, to),
            (Domain::RenderTree, Domain::RenderNode)
                | (Domain::RenderNode, Domain::RenderTree)
                | (Domain::SceneTargets, Domain::Vec2)
        )
}

/// Decide whether a value of type `from` may feed a port of type `to`.
pub fn conversion(from: &TypeDesc, to: &TypeDesc) -> Option<Conversion> {
    if !domains_compatible(from.domain, to.domain) {
        return None;
    }
    match (from.world, to.world) {
        (a, b) if a == b => Some(Conversion::Identity),
        (World::Scalar, World::Signal) => Some(Conversion::Promote),
        (World::Signal, World::Field) | (World::Scalar, World::Field) => {
            Some(Conversion::Broadcast)
        }
        _ => None,
    }
}

// ── Combine modes ───────────────────────────────────────────────────────────

/// Whether `mode` may reduce writers of type `ty`.
///
/// `error` is always accepted here; it is enforced against writer count.
pub fn combine_mode_allowed(ty: &TypeDesc, mode: CombineMode) -> bool {
    if mode == CombineMode::Error {
        return true;
    }
    match ty.world {
        World::Scalar | World::Config => return mode == CombineMode::Last,
        World::Event => return matches!(mode, CombineMode::Last | CombineMode::Sum),
        World::Signal | World::Field => {}
    }
    if ty.domain.is_numeric() {
        true
    } else if ty.domain == Domain::Color {
        matches!(mode, CombineMode::Last | CombineMode::Layer)
    } else {
        mode == CombineMode::Last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TypeDesc {
        TypeDesc::parse(s).unwrap_or_else(|e| panic!("{}: {}", s, e))
    }

    #[test]
    fn parse_normalizes_point_alias() {
        let ty = t("Signal<point>");
        assert_eq!(ty.domain, Domain::Vec2);
        assert_eq!(ty.lanes, Some(2));
    }

    #[test]
    fn parse_is_case_insensitive_on_world() {
        assert_eq!(t("field<float>").world, World::Field);
        assert_eq!(t("FIELD<float>").world, World::Field);
    }

    #[test]
    fn parse_annotations_and_category() {
        let ty = t("internal Signal<time> @unit(ms) @semantics(model)");
        assert_eq!(ty.category, Category::Internal);
        assert_eq!(ty.unit.as_deref(), Some("ms"));
        assert_eq!(ty.semantics.as_deref(), Some("model"));
        assert_eq!(
            ty.to_string(),
            "internal Signal<time> @unit(ms) @semantics(model)"
        );
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert!(TypeDesc::parse("Stream<float>").is_err());
        assert!(TypeDesc::parse("Signal<quaternion>").is_err());
        assert!(TypeDesc::parse("Signal<float> @color(red)").is_err());
    }

    #[test]
    fn bus_eligibility_rules() {
        assert!(t("Signal<vec3>").bus_eligible);
        assert!(t("Event<trigger>").bus_eligible);
        assert!(t("Field<float>").bus_eligible);
        assert!(t("Field<color>").bus_eligible);
        assert!(!t("Field<vec2>").bus_eligible);
        assert!(!t("Scalar<float>").bus_eligible);
        assert!(!t("Config<string>").bus_eligible);
    }

    #[test]
    fn conversion_rules() {
        use Conversion::*;
        assert_eq!(conversion(&t("Signal<float>"), &t("Signal<float>")), Some(Identity));
        assert_eq!(conversion(&t("Scalar<float>"), &t("Signal<float>")), Some(Promote));
        assert_eq!(conversion(&t("Signal<color>"), &t("Field<color>")), Some(Broadcast));
        assert_eq!(conversion(&t("Scalar<vec2>"), &t("Field<vec2>")), Some(Broadcast));
        assert_eq!(conversion(&t("Signal<vec2>"), &t("Signal<float>")), None);
        assert_eq!(conversion(&t("Field<float>"), &t("Signal<float>")), None);
        assert_eq!(conversion(&t("Signal<float>"), &t("Scalar<float>")), None);
        assert_eq!(conversion(&t("Event<trigger>"), &t("Signal<trigger>")), None);
    }

    #[test]
    fn special_domain_equivalences() {
        assert_eq!(
            conversion(&t("Signal<renderTree>"), &t("Signal<renderNode>")),
            Some(Conversion::Identity)
        );
        assert_eq!(
            conversion(&t("Signal<renderNode>"), &t("Signal<renderTree>")),
            Some(Conversion::Identity)
        );
        assert_eq!(
            conversion(&t("Field<sceneTargets>"), &t("Field<vec2>")),
            Some(Conversion::Identity)
        );
        assert_eq!(conversion(&t("Field<vec2>"), &t("Field<sceneTargets>")), None);
    }

    #[test]
    fn combine_mode_table() {
        use CombineMode::*;
        let num = t("Signal<float>");
        for m in [Sum, Average, Max, Min, Last, Layer, Error] {
            assert!(combine_mode_allowed(&num, m), "{m} on float");
        }
        let color = t("Field<color>");
        assert!(combine_mode_allowed(&color, Layer));
        assert!(combine_mode_allowed(&color, Last));
        assert!(!combine_mode_allowed(&color, Sum));
        let boolean = t("Signal<boolean>");
        assert!(combine_mode_allowed(&boolean, Last));
        assert!(!combine_mode_allowed(&boolean, Max));
        let scalar = t("Scalar<float>");
        assert!(combine_mode_allowed(&scalar, Last));
        assert!(!combine_mode_allowed(&scalar, Sum));
        let event = t("Event<trigger>");
        assert!(combine_mode_allowed(&event, Sum));
        assert!(!combine_mode_allowed(&event, Average));
    }

    #[test]
    fn ir_kind_by_world_and_domain() {
        assert_eq!(t("Signal<float>").ir_kind(), IrKind::Signal);
        assert_eq!(t("Scalar<int>").ir_kind(), IrKind::Const);
        assert_eq!(t("Config<string>").ir_kind(), IrKind::None);
        assert_eq!(t("Signal<renderTree>").ir_kind(), IrKind::None);
        assert_eq!(t("Scalar<elementDomain>").ir_kind(), IrKind::Handle);
    }

    #[test]
    fn reserved_buses() {
        assert_eq!(reserved_bus_type("phaseA"), Some(TypeDesc::signal(Domain::Phase)));
        assert_eq!(reserved_bus_type("pulse"), Some(TypeDesc::event(Domain::Trigger)));
        assert_eq!(reserved_bus_type("energy"), None);
    }
}
