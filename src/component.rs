use std::{collections::HashMap, fmt, sync::Arc};

use derive_ex::derive_ex;
use indexmap::IndexMap;

use crate::{
    container::{Container, Owner, VarDefault},
    message::{Params, REACTIVE_ACTION},
    template::{CompiledTemplate, TemplateCache, BUILTINS, COMPONENT},
    Error, Result, Value,
};

/// Name of the variant used when none is given.
pub const DEFAULT_VARIANT: &str = "default";

type PlainFn = dyn Fn(&mut ActionContext) -> anyhow::Result<()> + Send + Sync;
type ParamsFn = dyn Fn(&mut ActionContext, &Params) -> anyhow::Result<()> + Send + Sync;
type HelperFn = dyn Fn(&mut HelperContext, &[Value]) -> anyhow::Result<Value> + Send + Sync;

/// An allow-listed action handler with its declared arity.
#[derive(Clone)]
pub enum Action {
    Plain(Arc<PlainFn>),
    WithParams(Arc<ParamsFn>),
}

impl Action {
    pub fn takes_params(&self) -> bool {
        matches!(self, Action::WithParams(_))
    }

    pub(crate) fn invoke(&self, cx: &mut ActionContext, params: Option<&Params>) -> anyhow::Result<()> {
        match self {
            Action::Plain(f) => f(cx),
            Action::WithParams(f) => f(cx, params.unwrap_or(&Params::default())),
        }
    }
}
impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Plain(_) => write!(f, "Action::Plain(..)"),
            Action::WithParams(_) => write!(f, "Action::WithParams(..)"),
        }
    }
}

/// Definition of a component class: its state declarations, handlers, helpers and templates.
///
/// Definitions are immutable once built and may be shared between sessions on any thread.
#[derive_ex(Clone)]
pub struct ComponentDef(Arc<DefData>);

struct DefData {
    class: String,
    reactive: IndexMap<String, VarDefault>,
    shared: IndexMap<String, VarDefault>,
    actions: HashMap<String, Action>,
    helpers: HashMap<String, Arc<HelperFn>>,
    templates: IndexMap<String, Arc<CompiledTemplate>>,
    children: IndexMap<String, ComponentDef>,
}

impl ComponentDef {
    pub fn builder(class: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder {
            class: class.into(),
            reactive: IndexMap::new(),
            shared: IndexMap::new(),
            actions: HashMap::new(),
            helpers: HashMap::new(),
            templates: IndexMap::new(),
            children: IndexMap::new(),
        }
    }

    pub fn class(&self) -> &str {
        &self.0.class
    }
    pub fn is_reactive(&self, name: &str) -> bool {
        self.0.reactive.contains_key(name)
    }
    pub fn is_shared(&self, name: &str) -> bool {
        self.0.shared.contains_key(name)
    }
    pub fn reactive_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.reactive.keys().map(String::as_str)
    }
    pub fn shared_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.shared.keys().map(String::as_str)
    }
    pub fn helper_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.helpers.keys().map(String::as_str)
    }
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.0.actions.get(name)
    }
    pub fn has_helper(&self, name: &str) -> bool {
        self.0.helpers.contains_key(name)
    }

    /// The template a new instance starts with.
    pub fn default_variant(&self) -> &str {
        if self.0.templates.contains_key(DEFAULT_VARIANT) {
            DEFAULT_VARIANT
        } else {
            self.0
                .templates
                .keys()
                .next()
                .map_or(DEFAULT_VARIANT, String::as_str)
        }
    }
    pub fn template(&self, variant: &str) -> Result<&Arc<CompiledTemplate>> {
        self.0
            .templates
            .get(variant)
            .ok_or_else(|| Error::UnknownTemplate {
                class: self.class().to_string(),
                variant: variant.to_string(),
            })
    }
    pub fn child(&self, class: &str) -> Result<&ComponentDef> {
        self.0
            .children
            .get(class)
            .ok_or_else(|| Error::UnknownChildClass {
                class: self.class().to_string(),
                child: class.to_string(),
            })
    }

    pub(crate) fn call_helper(
        &self,
        name: &str,
        cx: &mut HelperContext,
        args: &[Value],
    ) -> Option<Result<Value>> {
        let helper = self.0.helpers.get(name)?;
        Some(helper(cx, args).map_err(|error| Error::Helper {
            name: name.to_string(),
            error,
        }))
    }

    fn var_default(&self, name: &str) -> Option<(&VarDefault, bool)> {
        if let Some(d) = self.0.reactive.get(name) {
            Some((d, false))
        } else {
            self.0.shared.get(name).map(|d| (d, true))
        }
    }
}
impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("class", &self.0.class)
            .field("reactive", &self.0.reactive)
            .field("shared", &self.0.shared)
            .field("templates", &self.0.templates.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

pub struct ComponentBuilder {
    class: String,
    reactive: IndexMap<String, VarDefault>,
    shared: IndexMap<String, VarDefault>,
    actions: HashMap<String, Action>,
    helpers: HashMap<String, Arc<HelperFn>>,
    templates: IndexMap<String, String>,
    children: IndexMap<String, ComponentDef>,
}

impl ComponentBuilder {
    /// Declares a per-instance reactive variable.
    pub fn reactive(mut self, name: impl Into<String>, default: VarDefault) -> Self {
        self.reactive.insert(name.into(), default);
        self
    }

    /// Declares a session-wide variable this component reads and re-renders on.
    pub fn shared(mut self, name: impl Into<String>, default: VarDefault) -> Self {
        self.shared.insert(name.into(), default);
        self
    }

    pub fn action(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut ActionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Action::Plain(Arc::new(f)));
        self
    }
    pub fn action_with_params(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut ActionContext, &Params) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.actions
            .insert(name.into(), Action::WithParams(Arc::new(f)));
        self
    }

    /// Registers a function callable from templates.
    ///
    /// A helper called without arguments may also be read as a plain variable.
    pub fn helper(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut HelperContext, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.helpers.insert(name.into(), Arc::new(f));
        self
    }

    pub fn template(mut self, variant: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(variant.into(), source.into());
        self
    }

    /// Allows templates to render instances of `def` with `child(class, id)`.
    pub fn child(mut self, def: &ComponentDef) -> Self {
        self.children.insert(def.class().to_string(), def.clone());
        self
    }

    /// Validates declarations and compiles every template variant.
    pub fn build(self) -> Result<ComponentDef> {
        let reserved = |name: &str| Error::ReservedName {
            class: self.class.clone(),
            name: name.to_string(),
        };
        let names = self
            .reactive
            .keys()
            .chain(self.shared.keys())
            .chain(self.helpers.keys());
        for name in names {
            if name == COMPONENT || BUILTINS.contains(&name.as_str()) {
                return Err(reserved(name));
            }
        }
        if let Some(name) = self.reactive.keys().find(|n| self.shared.contains_key(*n)) {
            return Err(reserved(name));
        }
        if self.actions.contains_key(REACTIVE_ACTION) {
            return Err(reserved(REACTIVE_ACTION));
        }
        for (name, default) in self.reactive.iter().chain(&self.shared) {
            if let VarDefault::Literal(raw) = default {
                if raw.is_array() || raw.is_object() {
                    return Err(Error::InvalidDefaultFactory { name: name.clone() });
                }
            }
        }
        let cache = TemplateCache::global();
        let mut templates = IndexMap::new();
        for (variant, source) in &self.templates {
            let compiled = cache.get_or_compile(&self.class, variant, source)?;
            templates.insert(variant.clone(), compiled);
        }
        tracing::debug!(
            class = %self.class,
            actions = self.actions.len(),
            templates = templates.len(),
            "component defined"
        );
        Ok(ComponentDef(Arc::new(DefData {
            class: self.class,
            reactive: self.reactive,
            shared: self.shared,
            actions: self.actions,
            helpers: self.helpers,
            templates,
            children: self.children,
        })))
    }
}

/// Borrowed state of one component instance.
pub(crate) struct Vars<'a> {
    pub id: &'a str,
    pub def: &'a ComponentDef,
    pub state: &'a mut Container,
    pub shared: &'a mut Container,
    pub identity: &'a IndexMap<String, Value>,
}

impl Vars<'_> {
    fn unknown(&self, name: &str) -> Error {
        Error::UnknownReactiveVariable {
            class: self.def.class().to_string(),
            name: name.to_string(),
        }
    }

    /// Reads a declared reactive or shared variable; `None` if `name` is neither.
    pub fn try_get(&mut self, name: &str) -> Option<Result<Value>> {
        let def = self.def;
        let (default, shared) = def.var_default(name)?;
        let owner = Owner {
            id: self.id,
            class: def.class(),
        };
        Some(if shared {
            self.shared.get(name, default, owner)
        } else {
            self.state.get(name, default, owner)
        })
    }
    pub fn get(&mut self, name: &str) -> Result<Value> {
        self.try_get(name).unwrap_or_else(|| Err(self.unknown(name)))
    }
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if self.def.is_reactive(name) {
            self.state.set(name, value);
        } else if self.def.is_shared(name) {
            self.shared.set(name, value);
        } else {
            return Err(self.unknown(name));
        }
        tracing::trace!(component = %self.id, name, "variable assigned");
        Ok(())
    }
    pub fn mark_dirty(&mut self, name: &str) -> Result<()> {
        if self.def.is_shared(name) {
            self.shared.mark_dirty([name]);
        } else if self.def.is_reactive(name) || name == COMPONENT {
            self.state.mark_dirty([name]);
        } else {
            return Err(self.unknown(name));
        }
        Ok(())
    }
}

/// What an action handler can see and change.
pub struct ActionContext<'a> {
    vars: Vars<'a>,
    variant: &'a mut String,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(vars: Vars<'a>, variant: &'a mut String) -> Self {
        Self { vars, variant }
    }

    pub fn id(&self) -> &str {
        self.vars.id
    }
    pub fn class(&self) -> &str {
        self.vars.def.class()
    }
    pub fn def(&self) -> &'a ComponentDef {
        self.vars.def
    }

    /// Reads a declared variable, computing its default on first access.
    pub fn get(&mut self, name: &str) -> Result<Value> {
        self.vars.get(name)
    }

    /// Assigns a declared variable and marks it dirty.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.vars.set(name, value.into())
    }

    /// Marks variables dirty without assigning them.
    pub fn mark_dirty<'n>(&mut self, names: impl IntoIterator<Item = &'n str>) -> Result<()> {
        for name in names {
            self.vars.mark_dirty(name)?;
        }
        Ok(())
    }

    /// Re-renders every fragment that reads helpers or component-level values.
    pub fn touch(&mut self) {
        self.vars.state.mark_dirty([COMPONENT]);
    }

    pub fn template_variant(&self) -> &str {
        self.variant.as_str()
    }

    /// Switches the template this instance renders. The next render is dense.
    pub fn set_template_variant(&mut self, variant: &str) -> Result<()> {
        self.vars.def.template(variant)?;
        if *self.variant != variant {
            *self.variant = variant.to_string();
            self.touch();
        }
        Ok(())
    }

    pub fn identity(&self, name: &str) -> Option<Value> {
        self.vars.identity.get(name).cloned()
    }
}

/// What a template helper can see.
pub struct HelperContext<'a> {
    vars: Vars<'a>,
}

impl<'a> HelperContext<'a> {
    pub(crate) fn new(vars: Vars<'a>) -> Self {
        Self { vars }
    }

    pub fn id(&self) -> &str {
        self.vars.id
    }
    pub fn class(&self) -> &str {
        self.vars.def.class()
    }
    pub fn get(&mut self, name: &str) -> Result<Value> {
        self.vars.get(name)
    }
    pub fn identity(&self, name: &str) -> Option<Value> {
        self.vars.identity.get(name).cloned()
    }
}
