// registry.rs — Block-type and transform registries
//
// Declarations of every block type (ports, defaults, combine policies,
// state-boundary and time-root flags) and every adapter/lens, each paired
// with an optional lowering or IR compiler. Registries are plain values
// injected into each compilation; there is no process-wide table.
//
// Declarations come from the built-in library (`blocks.rs`, `transforms.rs`)
// and/or JSON manifests whose `lowering` / `compiler` fields name a built-in
// implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lower::BlockLowering;
use crate::patch::{CombinePolicy, Value};
use crate::transforms::TransformCompiler;
use crate::types::{Domain, TypeDesc, World};

/// Origin recorded for entries installed by `Registries::builtin`.
pub const BUILTIN_ORIGIN: &str = "<builtin>";

// ── Block declarations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeRootKind {
    Finite,
    Cyclic,
    Infinite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub type_str: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine: Option<CombinePolicy>,
    /// Optional inputs may be left without any writer.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub type_str: String,
}

/// Static description of a block type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub state_boundary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_root: Option<TimeRootKind>,
    /// Name of the built-in lowering kind, if the block has IR.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lowering: Option<String>,
}

impl BlockDecl {
    pub fn new(type_name: impl Into<String>) -> Self {
        BlockDecl {
            type_name: type_name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            state_boundary: false,
            time_root: None,
            lowering: None,
        }
    }

    pub fn input(mut self, id: &str, type_str: &str, default: Option<Value>) -> Self {
        self.inputs.push(InputDecl {
            id: id.to_string(),
            type_str: type_str.to_string(),
            default,
            combine: None,
            optional: false,
        });
        self
    }

    /// Input with no default that may stay unconnected.
    pub fn optional_input(mut self, id: &str, type_str: &str) -> Self {
        self.inputs.push(InputDecl {
            id: id.to_string(),
            type_str: type_str.to_string(),
            default: None,
            combine: None,
            optional: true,
        });
        self
    }

    /// Set the combine policy of the most recently added input.
    pub fn combine(mut self, policy: CombinePolicy) -> Self {
        if let Some(last) = self.inputs.last_mut() {
            last.combine = Some(policy);
        }
        self
    }

    pub fn output(mut self, id: &str, type_str: &str) -> Self {
        self.outputs.push(OutputDecl {
            id: id.to_string(),
            type_str: type_str.to_string(),
        });
        self
    }

    pub fn state_boundary(mut self) -> Self {
        self.state_boundary = true;
        self
    }

    pub fn time_root(mut self, kind: TimeRootKind) -> Self {
        self.time_root = Some(kind);
        self
    }

    pub fn lowering(mut self, kind: &str) -> Self {
        self.lowering = Some(kind.to_string());
        self
    }

    pub fn input_index(&self, port: &str) -> Option<usize> {
        self.inputs.iter().position(|i| i.id == port)
    }

    pub fn output_index(&self, port: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.id == port)
    }

    pub fn input_decl(&self, port: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|i| i.id == port)
    }
}

/// A registered block type: declaration plus optional IR lowering.
#[derive(Clone)]
pub struct BlockEntry {
    pub decl: BlockDecl,
    pub lowering: Option<Arc<dyn BlockLowering>>,
}

impl fmt::Debug for BlockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockEntry")
            .field("decl", &self.decl)
            .field("lowering", &self.lowering.is_some())
            .finish()
    }
}

// ── Transform declarations ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformKind {
    Adapter,
    Lens,
}

/// How an adapter changes the type flowing through it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeEffect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<World>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
}

impl TypeEffect {
    pub fn apply(&self, ty: &TypeDesc) -> TypeDesc {
        let mut out = ty.clone();
        if let Some(world) = self.world {
            out = out.with_world(world);
        }
        if let Some(domain) = self.domain {
            out = out.with_domain(domain);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformDecl {
    pub id: String,
    pub kind: TransformKind,
    #[serde(default)]
    pub effect: TypeEffect,
    /// Name of the built-in IR compiler; absent means not IR-compilable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,
}

#[derive(Clone)]
pub struct TransformEntry {
    pub decl: TransformDecl,
    pub compiler: Option<Arc<dyn TransformCompiler>>,
}

impl fmt::Debug for TransformEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEntry")
            .field("decl", &self.decl)
            .field("compiler", &self.compiler.is_some())
            .finish()
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// Errors that can occur while populating a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: invalid manifest: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate block type '{name}': first defined in {first}, redefined in {second}")]
    DuplicateBlock {
        name: String,
        first: String,
        second: String,
    },
    #[error("duplicate transform '{id}': first defined in {first}, redefined in {second}")]
    DuplicateTransform {
        id: String,
        first: String,
        second: String,
    },
    #[error("{origin}: block type '{block}' names unknown lowering '{lowering}'")]
    UnknownLowering {
        block: String,
        lowering: String,
        origin: String,
    },
    #[error("{origin}: transform '{transform}' names unknown compiler '{compiler}'")]
    UnknownCompiler {
        transform: String,
        compiler: String,
        origin: String,
    },
}

// ── Block registry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    entries: BTreeMap<String, (BlockEntry, String)>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block type; a name may only be registered once.
    pub fn register(
        &mut self,
        decl: BlockDecl,
        lowering: Option<Arc<dyn BlockLowering>>,
        origin: &str,
    ) -> Result<(), RegistryError> {
        if let Some((_, first)) = self.entries.get(&decl.type_name) {
            return Err(RegistryError::DuplicateBlock {
                name: decl.type_name.clone(),
                first: first.clone(),
                second: origin.to_string(),
            });
        }
        self.entries.insert(
            decl.type_name.clone(),
            (BlockEntry { decl, lowering }, origin.to_string()),
        );
        Ok(())
    }

    /// Register a declaration whose `lowering` names a built-in kind.
    pub fn register_decl(&mut self, decl: BlockDecl, origin: &str) -> Result<(), RegistryError> {
        let lowering = match &decl.lowering {
            None => None,
            Some(kind) => Some(crate::blocks::lowering_for(kind).ok_or_else(|| {
                RegistryError::UnknownLowering {
                    block: decl.type_name.clone(),
                    lowering: kind.clone(),
                    origin: origin.to_string(),
                }
            })?),
        };
        self.register(decl, lowering, origin)
    }

    /// Insert a built-in entry, replacing any previous one.
    pub(crate) fn insert_builtin(&mut self, decl: BlockDecl, lowering: Option<Arc<dyn BlockLowering>>) {
        self.entries.insert(
            decl.type_name.clone(),
            (BlockEntry { decl, lowering }, BUILTIN_ORIGIN.to_string()),
        );
    }

    pub fn get(&self, name: &str) -> Option<&BlockEntry> {
        self.entries.get(name).map(|(entry, _)| entry)
    }

    pub fn decl(&self, name: &str) -> Option<&BlockDecl> {
        self.get(name).map(|e| &e.decl)
    }

    pub fn decls(&self) -> impl Iterator<Item = &BlockDecl> {
        self.entries.values().map(|(entry, _)| &entry.decl)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Transform registry ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    adapters: BTreeMap<String, (TransformEntry, String)>,
    lenses: BTreeMap<String, (TransformEntry, String)>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        decl: TransformDecl,
        compiler: Option<Arc<dyn TransformCompiler>>,
        origin: &str,
    ) -> Result<(), RegistryError> {
        let table = match decl.kind {
            TransformKind::Adapter => &mut self.adapters,
            TransformKind::Lens => &mut self.lenses,
        };
        if let Some((_, first)) = table.get(&decl.id) {
            return Err(RegistryError::DuplicateTransform {
                id: decl.id.clone(),
                first: first.clone(),
                second: origin.to_string(),
            });
        }
        table.insert(
            decl.id.clone(),
            (TransformEntry { decl, compiler }, origin.to_string()),
        );
        Ok(())
    }

    /// Register a declaration whose `compiler` names a built-in compiler.
    pub fn register_decl(
        &mut self,
        decl: TransformDecl,
        origin: &str,
    ) -> Result<(), RegistryError> {
        let compiler = match &decl.compiler {
            None => None,
            Some(name) => Some(crate::transforms::compiler_for(name).ok_or_else(|| {
                RegistryError::UnknownCompiler {
                    transform: decl.id.clone(),
                    compiler: name.clone(),
                    origin: origin.to_string(),
                }
            })?),
        };
        self.register(decl, compiler, origin)
    }

    pub(crate) fn insert_builtin(
        &mut self,
        decl: TransformDecl,
        compiler: Option<Arc<dyn TransformCompiler>>,
    ) {
        let table = match decl.kind {
            TransformKind::Adapter => &mut self.adapters,
            TransformKind::Lens => &mut self.lenses,
        };
        table.insert(
            decl.id.clone(),
            (TransformEntry { decl, compiler }, BUILTIN_ORIGIN.to_string()),
        );
    }

    pub fn adapter(&self, id: &str) -> Option<&TransformEntry> {
        self.adapters.get(id).map(|(e, _)| e)
    }

    pub fn lens(&self, id: &str) -> Option<&TransformEntry> {
        self.lenses.get(id).map(|(e, _)| e)
    }

    pub fn decls(&self) -> impl Iterator<Item = &TransformDecl> {
        self.adapters
            .values()
            .chain(self.lenses.values())
            .map(|(e, _)| &e.decl)
    }

    pub fn len(&self) -> usize {
        self.adapters.len() + self.lenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty() && self.lenses.is_empty()
    }
}

// ── Registries ──────────────────────────────────────────────────────────────

/// On-disk manifest format.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub blocks: Vec<BlockDecl>,
    #[serde(default)]
    pub transforms: Vec<TransformDecl>,
}

/// Everything a compilation needs to know about block types and transforms.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub blocks: BlockRegistry,
    pub transforms: TransformRegistry,
}

impl Registries {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in block library and transforms.
    pub fn builtin() -> Self {
        let mut regs = Self::default();
        crate::blocks::install(&mut regs.blocks);
        crate::transforms::install(&mut regs.transforms);
        regs
    }

    /// Load a JSON manifest file. Returns the number of entries added.
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_manifest_str(&text, &path.display().to_string())
    }

    pub fn load_manifest_str(&mut self, text: &str, origin: &str) -> Result<usize, RegistryError> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|e| RegistryError::Json {
                origin: origin.to_string(),
                source: e,
            })?;
        let count = manifest.blocks.len() + manifest.transforms.len();
        for decl in manifest.blocks {
            self.blocks.register_decl(decl, origin)?;
        }
        for decl in manifest.transforms {
            self.transforms.register_decl(decl, origin)?;
        }
        Ok(count)
    }

    /// Compact JSON of every declaration in name order, for fingerprinting.
    pub fn canonical_json(&self) -> String {
        let manifest = Manifest {
            blocks: self.blocks.decls().cloned().collect(),
            transforms: self.transforms.decls().cloned().collect(),
        };
        serde_json::to_string(&manifest).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "blocks": [
            { "type": "Gain",
              "inputs": [ { "id": "in", "type": "Signal<float>", "default": 0.0 },
                          { "id": "k", "type": "Signal<float>", "default": 1.0 } ],
              "outputs": [ { "id": "out", "type": "Signal<float>" } ],
              "lowering": "mul" },
            { "type": "Label",
              "inputs": [ { "id": "text", "type": "Config<string>", "optional": true } ] }
        ],
        "transforms": [
            { "id": "toField", "kind": "adapter", "effect": { "world": "field" }, "compiler": "broadcast" },
            { "id": "legacyWarp", "kind": "lens" }
        ]
    }"#;

    #[test]
    fn load_manifest_from_str() {
        let mut regs = Registries::empty();
        let n = regs.load_manifest_str(MANIFEST, "test.json").unwrap();
        assert_eq!(n, 4);
        let gain = regs.blocks.get("Gain").unwrap();
        assert!(gain.lowering.is_some());
        assert_eq!(gain.decl.input_index("k"), Some(1));
        let label = regs.blocks.get("Label").unwrap();
        assert!(label.lowering.is_none());
        assert!(label.decl.inputs[0].optional);
        assert!(regs.transforms.adapter("toField").unwrap().compiler.is_some());
        assert!(regs.transforms.lens("legacyWarp").unwrap().compiler.is_none());
        assert!(regs.transforms.adapter("legacyWarp").is_none());
    }

    #[test]
    fn duplicate_block_is_rejected() {
        let mut regs = Registries::empty();
        regs.load_manifest_str(MANIFEST, "a.json").unwrap();
        let err = regs.load_manifest_str(MANIFEST, "b.json").unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate block type 'Gain': first defined in a.json, redefined in b.json"
        );
    }

    #[test]
    fn unknown_lowering_is_rejected() {
        let mut regs = Registries::empty();
        let err = regs
            .load_manifest_str(
                r#"{ "blocks": [ { "type": "X", "lowering": "teleport" } ] }"#,
                "x.json",
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownLowering { .. }));
    }

    #[test]
    fn malformed_manifest_is_json_error() {
        let mut regs = Registries::empty();
        let err = regs.load_manifest_str("{ blocks: ", "bad.json").unwrap_err();
        assert!(err.to_string().starts_with("bad.json: invalid manifest"));
    }

    #[test]
    fn type_effect_applies_world_and_domain() {
        let effect = TypeEffect {
            world: Some(World::Signal),
            domain: Some(Domain::Float),
        };
        let out = effect.apply(&TypeDesc::scalar(Domain::Phase));
        assert_eq!(out, TypeDesc::signal(Domain::Float));
    }

    #[test]
    fn canonical_json_is_order_independent() {
        let mut a = Registries::empty();
        a.blocks
            .register_decl(BlockDecl::new("B").output("out", "Signal<float>"), "x")
            .unwrap();
        a.blocks
            .register_decl(BlockDecl::new("A").output("out", "Signal<float>"), "x")
            .unwrap();
        let mut b = Registries::empty();
        b.blocks
            .register_decl(BlockDecl::new("A").output("out", "Signal<float>"), "y")
            .unwrap();
        b.blocks
            .register_decl(BlockDecl::new("B").output("out", "Signal<float>"), "y")
            .unwrap();
        assert_eq!(a.canonical_json(), b.canonical_json());
    }
}
