// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used across all compiler stages. Patches have no
// source text, so a diagnostic is anchored to a `Locator` naming the
// offending block, port, edge, or bus instead of a byte span.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0103`, `W0500`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All diagnostic codes, grouped by originating stage.
pub mod codes {
    use super::DiagCode;

    // ── Type graph (E01xx) ──
    /// PortTypeUnknown: a port or bus type string failed to parse.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// BusIneligibleType: a bus type cannot be broadcast.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// ReservedBusTypeViolation: a reserved bus name carries the wrong type.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// NoConversionPath: an edge connects incompatible types.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// UnknownBlockType: a block names a type absent from the registry.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// UnknownTransform: an edge names an adapter or lens absent from the registry.
    pub const E0105: DiagCode = DiagCode("E0105");

    // ── Time topology (E02xx) ──
    /// MissingTimeRoot
    pub const E0200: DiagCode = DiagCode("E0200");
    /// MultipleTimeRoots
    pub const E0201: DiagCode = DiagCode("E0201");
    /// InvalidTimeRootConfig
    pub const E0202: DiagCode = DiagCode("E0202");

    // ── Dependency graph (E03xx) ──
    /// DanglingConnection: an edge names a missing block or port.
    pub const E0300: DiagCode = DiagCode("E0300");
    /// DanglingBindingEndpoint: an edge names a missing bus, or binds bus to bus.
    pub const E0301: DiagCode = DiagCode("E0301");

    // ── Cycle validation (E04xx) ──
    /// IllegalCycle: a strongly connected component has no state boundary.
    pub const E0400: DiagCode = DiagCode("E0400");

    // ── Lowering and linking (E05xx / W05xx) ──
    /// MissingInput
    pub const E0500: DiagCode = DiagCode("E0500");
    /// MissingOutputRegistration
    pub const E0501: DiagCode = DiagCode("E0501");
    /// UnsupportedAdapterInIRMode
    pub const E0502: DiagCode = DiagCode("E0502");
    /// UnsupportedLensInIRMode
    pub const E0503: DiagCode = DiagCode("E0503");
    /// BusLoweringFailed
    pub const E0504: DiagCode = DiagCode("E0504");
    /// PureBlockViolation
    pub const E0505: DiagCode = DiagCode("E0505");
    /// InvalidCombineMode
    pub const E0506: DiagCode = DiagCode("E0506");
    /// MultipleWriters: combine mode `error` with more than one writer.
    pub const E0507: DiagCode = DiagCode("E0507");
    /// BlockLoweringFailed
    pub const E0508: DiagCode = DiagCode("E0508");
    /// BusWithoutPublishers
    pub const W0500: DiagCode = DiagCode("W0500");

    // ── Internal verification (E06xx) ──
    /// IR verification obligations failed after build.
    pub const E0600: DiagCode = DiagCode("E0600");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Locator ──────────────────────────────────────────────────────────────

/// The patch entity a diagnostic is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Locator {
    Patch,
    Block { block: String },
    Port { block: String, port: String },
    Edge { edge: String },
    Bus { bus: String },
}

impl Locator {
    pub fn block(block: impl Into<String>) -> Self {
        Locator::Block {
            block: block.into(),
        }
    }

    pub fn port(block: impl Into<String>, port: impl Into<String>) -> Self {
        Locator::Port {
            block: block.into(),
            port: port.into(),
        }
    }

    pub fn edge(edge: impl Into<String>) -> Self {
        Locator::Edge { edge: edge.into() }
    }

    pub fn bus(bus: impl Into<String>) -> Self {
        Locator::Bus { bus: bus.into() }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Patch => write!(f, "patch"),
            Locator::Block { block } => write!(f, "block '{}'", block),
            Locator::Port { block, port } => write!(f, "port '{}.{}'", block, port),
            Locator::Edge { edge } => write!(f, "edge '{}'", edge),
            Locator::Bus { bus } => write!(f, "bus '{}'", bus),
        }
    }
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated failure.
#[derive(Debug, Clone, Serialize)]
pub struct CauseRecord {
    pub message: String,
    pub locator: Option<Locator>,
}

/// A secondary entity providing context for a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedLocator {
    pub locator: Locator,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any stage.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub locator: Locator,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLocator>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related entities, or causes.
    pub fn new(level: DiagLevel, locator: Locator, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            locator,
            message: message.into(),
            hint: None,
            related: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    /// Shorthand for an error-level diagnostic carrying `code`.
    pub fn error(code: DiagCode, locator: Locator, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, locator, message).with_code(code)
    }

    /// Shorthand for a warning-level diagnostic carrying `code`.
    pub fn warning(code: DiagCode, locator: Locator, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, locator, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related entity.
    pub fn with_related(mut self, locator: Locator, label: impl Into<String>) -> Self {
        self.related.push(RelatedLocator {
            locator,
            label: label.into(),
        });
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, locator: Option<Locator>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            locator,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        write!(f, "\n  --> {}", self.locator)?;
        for related in &self.related {
            write!(f, "\n  note: {} ({})", related.label, related.locator)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in `diags` is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, Locator::Patch, "something failed");
        assert_eq!(format!("{d}"), "error: something failed\n  --> patch");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::warning(codes::W0500, Locator::bus("phaseA"), "no publishers");
        assert_eq!(
            format!("{d}"),
            "warning[W0500]: no publishers\n  --> bus 'phaseA'"
        );
    }

    #[test]
    fn display_port_locator_with_hint() {
        let d = Diagnostic::error(codes::E0500, Locator::port("osc", "freq"), "input has no writer")
            .with_hint("connect a wire or declare a default");
        assert_eq!(
            format!("{d}"),
            "error[E0500]: input has no writer\n  --> port 'osc.freq'\n  hint: connect a wire or declare a default"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(codes::E0103, Locator::edge("e1"), "type mismatch")
            .with_hint("insert an adapter")
            .with_related(Locator::port("a", "out"), "source port here")
            .with_cause("vec2 cannot narrow to float", None);

        assert_eq!(d.code, Some(codes::E0103));
        assert_eq!(d.hint.as_deref(), Some("insert an adapter"));
        assert_eq!(d.related.len(), 1);
        assert_eq!(d.cause_chain.len(), 1);
        assert!(d.is_error());
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let w = Diagnostic::warning(codes::W0500, Locator::bus("b"), "w");
        assert!(!has_errors(&[w.clone()]));
        let e = Diagnostic::error(codes::E0400, Locator::Patch, "e");
        assert!(has_errors(&[w, e]));
    }
}
