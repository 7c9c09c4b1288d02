use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use parse_display::Display;
use thiserror::Error;

mod analyze;
mod expr;
mod scan;
mod syntax;

pub use analyze::Analysis;
pub use expr::{BinaryOp, Expr, Literal, UnaryOp};
pub use syntax::Node;


/// Dirty name standing for the component itself: helpers, identity values and anything a
/// template can only reach through the component.
pub const COMPONENT: &str = "component";

/// Calls handled by the renderer rather than by component helpers.
pub const BUILTINS: &[&str] = &["raw", "child"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {message}")]
pub struct TemplateError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl TemplateError {
    pub(crate) fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let before = &source[..offset.min(source.len())];
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        Self {
            line: before.matches('\n').count() + 1,
            column: before[line_start..].chars().count() + 1,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "snake_case")]
pub enum PartKind {
    /// A single output tag.
    Expression,
    /// A control construct or a `let`.
    Block,
}

#[derive(Debug, Clone)]
pub enum Part {
    Static(String),
    Dynamic(DynamicPart),
}

#[derive(Debug, Clone)]
pub struct DynamicPart {
    pub source: String,
    pub kind: PartKind,
    pub dependencies: BTreeSet<String>,
    pub defined_locals: BTreeSet<String>,
    pub node: Node,
}

impl Part {
    pub fn is_static(&self) -> bool {
        matches!(self, Part::Static(_))
    }
}

/// A template decomposed into static and dynamic parts, each dynamic part with its
/// dependencies.
#[derive(Debug)]
pub struct CompiledTemplate {
    class: String,
    variant: String,
    source: String,
    parts: Vec<Part>,
}

impl CompiledTemplate {
    pub fn compile(
        class: impl Into<String>,
        variant: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        let source = source.into();
        let segments = scan::scan(&source)?;
        let nodes = syntax::parse(&source, segments)?;
        let mut parts = Vec::new();
        for spanned in nodes {
            let kind = match &spanned.node {
                Node::Text(text) => {
                    if let Some(Part::Static(last)) = parts.last_mut() {
                        last.push_str(text);
                    } else {
                        parts.push(Part::Static(text.clone()));
                    }
                    continue;
                }
                Node::Output { .. } => PartKind::Expression,
                Node::If { .. } | Node::For { .. } | Node::Let { .. } => PartKind::Block,
            };
            let Analysis {
                dependencies,
                defined_locals,
            } = analyze::analyze(&spanned.node);
            parts.push(Part::Dynamic(DynamicPart {
                source: source[spanned.start..spanned.end].to_string(),
                kind,
                dependencies,
                defined_locals,
                node: spanned.node,
            }));
        }
        Ok(Self {
            class: class.into(),
            variant: variant.into(),
            source,
            parts,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }
    pub fn variant(&self) -> &str {
        &self.variant
    }
    pub fn source(&self) -> &str {
        &self.source
    }
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Union of the dependencies of every dynamic part.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Dynamic(d) => Some(d.dependencies.iter().cloned()),
                Part::Static(_) => None,
            })
            .flatten()
            .collect()
    }
}

/// Process-wide memo of compiled templates keyed by (class, variant).
#[derive(Default)]
pub struct TemplateCache {
    entries: Mutex<HashMap<(String, String), Arc<CompiledTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static TemplateCache {
        static GLOBAL: OnceLock<TemplateCache> = OnceLock::new();
        GLOBAL.get_or_init(TemplateCache::new)
    }

    /// Returns the compiled template for (`class`, `variant`), compiling it on first use.
    ///
    /// A different `source` for a key already cached replaces the entry.
    pub fn get_or_compile(
        &self,
        class: &str,
        variant: &str,
        source: &str,
    ) -> Result<Arc<CompiledTemplate>, TemplateError> {
        let key = (class.to_string(), variant.to_string());
        if let Some(t) = self.lock().get(&key) {
            if t.source() == source {
                return Ok(t.clone());
            }
            tracing::warn!(class, variant, "template redefined with different source");
        }
        let compiled = Arc::new(CompiledTemplate::compile(class, variant, source)?);
        tracing::debug!(class, variant, parts = compiled.parts().len(), "template compiled");
        self.lock().insert(key, compiled.clone());
        Ok(compiled)
    }

    pub fn get(&self, class: &str, variant: &str) -> Option<Arc<CompiledTemplate>> {
        self.lock()
            .get(&(class.to_string(), variant.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Arc<CompiledTemplate>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
