use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::{
    container::Changeset,
    template::{CompiledTemplate, Part, PartKind},
    Config, Error, Result, Value,
};

mod eval;

pub use eval::escape_html;

#[cfg(test)]
mod tests;

/// Names that changed since the last render of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dirty {
    /// Everything is considered changed.
    All,
    Names(Changeset),
}

impl Dirty {
    pub fn names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Dirty::Names(names.into_iter().collect())
    }
    pub fn is_empty(&self) -> bool {
        match self {
            Dirty::All => false,
            Dirty::Names(names) => names.is_empty(),
        }
    }
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Dirty::All => true,
            Dirty::Names(names) => names.contains(name),
        }
    }
}
impl From<Changeset> for Dirty {
    fn from(value: Changeset) -> Self {
        Dirty::Names(value)
    }
}

/// The environment a template reads from.
pub trait Scope {
    /// Resolves a name that is not a template local. `Ok(None)` means undefined.
    fn lookup(&mut self, name: &str) -> Result<Option<Value>>;

    /// Calls a helper. `Ok(None)` means there is no helper named `name`.
    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>>;

    /// Renders a child component inline.
    fn render_child(&mut self, class: &str, id: &str) -> Result<ChildRender> {
        let _ = id;
        Err(Error::UnknownChildClass {
            class: String::new(),
            child: class.to_string(),
        })
    }
}

impl Scope for IndexMap<String, Value> {
    fn lookup(&mut self, name: &str) -> Result<Option<Value>> {
        Ok(self.get(name).cloned())
    }
    fn call(&mut self, _name: &str, _args: Vec<Value>) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Output of rendering a child component inline.
#[derive(Debug, Clone, Default)]
pub struct ChildRender {
    pub html: String,
    /// The child and every descendant it rendered inline.
    pub rendered: Vec<String>,
}

/// What the client last received from one component instance.
#[derive(Debug, Clone, Default)]
pub struct RenderSession {
    variant: Option<String>,
    static_sent: bool,
    fragments: Vec<Option<String>>,
    children: Vec<Vec<String>>,
}

impl RenderSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }
    pub fn static_sent(&self) -> bool {
        self.static_sent
    }

    /// The last dense fragment array with every later render merged into it.
    pub fn fragments(&self) -> &[Option<String>] {
        &self.fragments
    }

    /// The full markup as the client currently has it.
    pub fn html(&self) -> String {
        self.fragments.iter().flatten().map(String::as_str).collect()
    }

    pub fn needs_dense(&self, variant: &str) -> bool {
        !self.static_sent || self.variant.as_deref() != Some(variant)
    }

    /// Ids of every direct child reported by the fragments the client currently has.
    pub fn live_children(&self) -> BTreeSet<String> {
        self.children.iter().flatten().cloned().collect()
    }

    /// Forces the next render to be dense.
    pub fn invalidate(&mut self) {
        self.static_sent = false;
    }

    fn commit(&mut self, variant: &str, rendered: &Rendered, slot_children: Vec<Option<Vec<String>>>) {
        let len = rendered.slots.len();
        if rendered.dense {
            self.variant = Some(variant.to_string());
            self.static_sent = true;
            self.fragments = rendered.slots.clone();
            self.children = slot_children.into_iter().map(Option::unwrap_or_default).collect();
            return;
        }
        self.fragments.resize(len, None);
        self.children.resize(len, Vec::new());
        for (i, slot) in rendered.slots.iter().enumerate() {
            if slot.is_some() {
                self.fragments[i] = slot.clone();
            }
        }
        for (i, children) in slot_children.into_iter().enumerate() {
            if let Some(children) = children {
                self.children[i] = children;
            }
        }
    }
}

/// Result of one render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// One entry per part; `None` for parts the client already has.
    pub slots: Vec<Option<String>>,
    pub dense: bool,
    /// Components rendered inline during this pass, with their descendants.
    pub rendered_children: Vec<String>,
}

impl Rendered {
    /// Returns `true` if no slot was emitted.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Executes `template` against `scope`, re-running only the parts affected by `dirty`.
///
/// The render is dense when `dirty` is [`Dirty::All`] or `session` has not yet sent the statics
/// of this variant.
pub fn render(
    template: &CompiledTemplate,
    dirty: &Dirty,
    session: &mut RenderSession,
    scope: &mut dyn Scope,
    config: &Config,
) -> Result<Rendered> {
    let dense = matches!(dirty, Dirty::All) || session.needs_dense(template.variant());
    let mut eval = eval::Evaluator::new(scope, config);
    let mut dirty_locals = BTreeSet::<String>::new();
    let mut slots = Vec::with_capacity(template.parts().len());
    let mut slot_children = Vec::with_capacity(template.parts().len());
    let mut rendered_children = Vec::new();

    for (index, part) in template.parts().iter().enumerate() {
        let part = match part {
            Part::Static(text) => {
                slots.push(dense.then(|| text.clone()));
                slot_children.push(None);
                continue;
            }
            Part::Dynamic(part) => part,
        };
        let affected = dense
            || part
                .dependencies
                .iter()
                .any(|name| dirty.contains(name) || dirty_locals.contains(name));
        if !affected && part.kind == PartKind::Expression {
            slots.push(None);
            slot_children.push(None);
            continue;
        }
        eval.set_render_children(affected);
        let html = eval.render(&part.node).map_err(|e| Error::Render {
            part: index,
            fragment: part.source.clone(),
            error: Box::new(e),
        })?;
        let children = eval.take_children();
        if affected {
            tracing::trace!(class = template.class(), part = index, "fragment rendered");
            dirty_locals.extend(part.defined_locals.iter().cloned());
            rendered_children.extend(children.rendered);
            slots.push(Some(html));
            slot_children.push(Some(children.direct));
        } else {
            slots.push(None);
            slot_children.push(None);
        }
    }

    let rendered = Rendered {
        slots,
        dense,
        rendered_children,
    };
    session.commit(template.variant(), &rendered, slot_children);
    Ok(rendered)
}
