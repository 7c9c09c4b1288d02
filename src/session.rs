use std::{
    cell::{RefCell, RefMut},
    collections::BTreeSet,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    component::{ActionContext, ComponentDef, HelperContext, Vars},
    config::Config,
    container::{Changeset, Container},
    dispatch::{Dispatcher, Work},
    message::{Envelope, Inbound, Outbound, Outbox, Status, SubMessage},
    render::{render, ChildRender, Dirty, RenderSession, Rendered, Scope},
    template::COMPONENT,
    Error, Result, Value,
};

/// One mounted component.
pub(crate) struct Instance {
    pub id: String,
    pub def: ComponentDef,
    pub state: Container,
    pub render: RenderSession,
    pub variant: String,
}

impl Instance {
    fn new(id: &str, def: &ComponentDef) -> Self {
        Self {
            id: id.to_string(),
            def: def.clone(),
            state: Container::new(),
            render: RenderSession::new(),
            variant: def.default_variant().to_string(),
        }
    }

    /// Names this instance must re-render for, given the shared changeset.
    pub fn dirty(&self, shared: &Changeset) -> Changeset {
        let mut dirty = self.state.changeset();
        for name in self.def.shared_names() {
            if shared.contains(name) {
                dirty.insert(name);
            }
        }
        if !dirty.is_empty() {
            dirty.insert(COMPONENT);
            for name in self.def.helper_names() {
                dirty.insert(name);
            }
        }
        dirty
    }

    pub fn action_context<'a>(
        &'a mut self,
        shared: &'a mut Container,
        identity: &'a IndexMap<String, Value>,
    ) -> ActionContext<'a> {
        let Instance {
            id,
            def,
            state,
            variant,
            ..
        } = self;
        ActionContext::new(
            Vars {
                id,
                def,
                state,
                shared,
                identity,
            },
            variant,
        )
    }
}

/// Everything one connection owns.
pub(crate) struct World {
    pub instances: RefCell<IndexMap<String, Rc<RefCell<Instance>>>>,
    pub shared: RefCell<Container>,
    pub identity: IndexMap<String, Value>,
    pub config: Config,
    pub events: RefCell<Vec<Envelope>>,
}

impl World {
    pub fn instance(&self, id: &str) -> Result<Rc<RefCell<Instance>>> {
        self.instances
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownComponent { id: id.to_string() })
    }
    pub fn borrow_instance<'a>(&self, instance: &'a Rc<RefCell<Instance>>, id: &str) -> Result<RefMut<'a, Instance>> {
        instance
            .try_borrow_mut()
            .map_err(|_| Error::RecursiveRender { id: id.to_string() })
    }
    pub fn ids(&self) -> Vec<String> {
        self.instances.borrow().keys().cloned().collect()
    }
    pub fn emit(&self, component: &str, payload: Outbound) {
        self.events
            .borrow_mut()
            .push(Envelope::new(component, payload));
    }

    fn insert(&self, id: &str, def: &ComponentDef) -> Result<()> {
        let mut instances = self.instances.borrow_mut();
        if instances.contains_key(id) {
            return Err(Error::DuplicateComponent { id: id.to_string() });
        }
        instances.insert(id.to_string(), Rc::new(RefCell::new(Instance::new(id, def))));
        drop(instances);
        tracing::debug!(component = %id, class = def.class(), "component subscribed");
        self.emit(id, Outbound::Status { status: Status::Subscribed });
        Ok(())
    }

    /// Removes an instance and every descendant it reported, cleaning up their containers.
    pub fn destroy(&self, id: &str) {
        let Some(instance) = self.instances.borrow_mut().shift_remove(id) else {
            return;
        };
        let children = match instance.try_borrow_mut() {
            Ok(mut instance) => {
                instance.state.cleanup();
                instance.render.live_children()
            }
            Err(_) => BTreeSet::new(),
        };
        tracing::debug!(component = %id, "component destroyed");
        self.emit(id, Outbound::Status { status: Status::Destroyed });
        for child in children {
            self.destroy(&child);
        }
    }

    /// Renders one instance, then destroys the children it no longer reports.
    pub fn render_instance(&self, instance: &mut Instance, dirty: &Dirty) -> Result<Rendered> {
        let before = instance.render.live_children();
        let Instance {
            id,
            def,
            state,
            render: session,
            variant,
        } = instance;
        let template = def.template(variant)?.clone();
        let mut scope = InstanceScope {
            world: self,
            id,
            def,
            state,
        };
        let rendered = render(
            &template,
            dirty,
            session,
            &mut scope,
            &self.config,
        )?;
        tracing::debug!(
            component = %id,
            variant = %variant,
            dense = rendered.dense,
            slots = rendered.slots.iter().filter(|s| s.is_some()).count(),
            "component rendered"
        );
        let after = session.live_children();
        for gone in before.difference(&after) {
            self.destroy(gone);
        }
        Ok(rendered)
    }

    pub fn reset_changesets(&self) {
        self.shared.borrow().reset_changeset();
        for instance in self.instances.borrow().values() {
            if let Ok(instance) = instance.try_borrow() {
                instance.state.reset_changeset();
            }
        }
    }
}

/// The environment a component's template is rendered against.
///
/// Lookup order: reactive variables, shared variables, identity values, then helpers called
/// without arguments.
struct InstanceScope<'a> {
    world: &'a World,
    id: &'a str,
    def: &'a ComponentDef,
    state: &'a mut Container,
}

impl InstanceScope<'_> {
    fn helper(&mut self, name: &str, args: &[Value]) -> Option<Result<Value>> {
        let mut shared = self.world.shared.borrow_mut();
        let mut cx = HelperContext::new(Vars {
            id: self.id,
            def: self.def,
            state: self.state,
            shared: &mut shared,
            identity: &self.world.identity,
        });
        self.def.call_helper(name, &mut cx, args)
    }
}

impl Scope for InstanceScope<'_> {
    fn lookup(&mut self, name: &str) -> Result<Option<Value>> {
        let found = {
            let mut shared = self.world.shared.borrow_mut();
            let mut vars = Vars {
                id: self.id,
                def: self.def,
                state: self.state,
                shared: &mut shared,
                identity: &self.world.identity,
            };
            vars.try_get(name)
        };
        if let Some(value) = found {
            return value.map(Some);
        }
        if let Some(value) = self.world.identity.get(name) {
            return Ok(Some(value.clone()));
        }
        self.helper(name, &[]).transpose()
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>> {
        self.helper(name, &args).transpose()
    }

    fn render_child(&mut self, class: &str, id: &str) -> Result<ChildRender> {
        let def = self.def.child(class)?;
        let existing = self.world.instances.borrow().get(id).cloned();
        let instance = match existing {
            Some(instance) => instance,
            None => {
                self.world.insert(id, def)?;
                self.world.instance(id)?
            }
        };
        let mut child = self.world.borrow_instance(&instance, id)?;
        if child.def.class() != def.class() {
            return Err(Error::DuplicateComponent { id: id.to_string() });
        }
        let rendered = self.world.render_instance(&mut child, &Dirty::All)?;
        let mut ids = vec![id.to_string()];
        ids.extend(rendered.rendered_children);
        Ok(ChildRender {
            html: child.render.html(),
            rendered: ids,
        })
    }
}

/// State of one client connection: mounted components, the shared scope and the outbound queue.
///
/// Every entry point takes `&mut self`, so a session processes one message at a time. Sessions
/// are not `Send`; run each on its own thread and share [`ComponentDef`]s between them.
pub struct Session {
    world: World,
    outbox: Box<dyn Outbox>,
    closed: bool,
}

impl Session {
    pub fn new(outbox: impl Outbox + 'static) -> Self {
        Self::with_config(Config::default(), outbox)
    }

    pub fn with_config(config: Config, outbox: impl Outbox + 'static) -> Self {
        Self {
            world: World {
                instances: RefCell::new(IndexMap::new()),
                shared: RefCell::new(Container::new()),
                identity: IndexMap::new(),
                config,
                events: RefCell::new(Vec::new()),
            },
            outbox: Box::new(outbox),
            closed: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.world.config
    }

    /// Sets a value every template and handler of this session can read, such as the current
    /// user.
    pub fn set_identity(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.world.identity.insert(name.into(), value.into());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn flush(&mut self) {
        let events = std::mem::take(&mut *self.world.events.borrow_mut());
        for envelope in events {
            self.outbox.send(envelope);
        }
    }

    fn run(&mut self, work: Work) -> Result<()> {
        self.ensure_open()?;
        let result = Dispatcher::new(&self.world).run(work);
        self.flush();
        result
    }

    /// Adds a component and sends its first, dense render.
    pub fn mount(&mut self, id: &str, def: &ComponentDef) -> Result<()> {
        self.ensure_open()?;
        let inserted = self.world.insert(id, def);
        if let Err(e) = inserted {
            self.flush();
            return Err(e);
        }
        self.run(Work::Mount(id.to_string()))
    }

    /// Removes a component and its descendants.
    pub fn unmount(&mut self, id: &str) -> Result<()> {
        self.ensure_open()?;
        self.world.instance(id)?;
        self.world.destroy(id);
        self.flush();
        Ok(())
    }

    /// Runs one message cycle.
    ///
    /// On failure the offending component receives a diagnostic, the remaining components still
    /// render, and the first error is returned.
    pub fn handle_message(&mut self, inbound: Inbound) -> Result<()> {
        self.run(Work::Messages(inbound.messages))
    }

    pub fn handle_json(&mut self, json: &str) -> Result<()> {
        self.ensure_open()?;
        let inbound = Inbound::from_json(json)?;
        self.handle_message(inbound)
    }

    pub fn handle(&mut self, messages: impl IntoIterator<Item = SubMessage>) -> Result<()> {
        self.run(Work::Messages(messages.into_iter().collect()))
    }

    /// Changes state from outside a message and sends the resulting renders.
    pub fn external_update(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut ActionContext) -> anyhow::Result<()>,
    ) -> Result<()> {
        self.run(Work::External {
            component: id.to_string(),
            f: Box::new(f),
        })
    }

    /// Cleans up every container and closes the session.
    pub fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        for instance in self.world.instances.borrow().values() {
            if let Ok(mut instance) = instance.try_borrow_mut() {
                instance.state.cleanup();
            }
        }
        self.world.instances.borrow_mut().clear();
        self.world.shared.borrow_mut().cleanup();
        self.world.events.borrow_mut().clear();
        self.closed = true;
        tracing::debug!("session disconnected");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Ids of mounted components in render order.
    pub fn component_ids(&self) -> Vec<String> {
        self.world.ids()
    }
    pub fn contains(&self, id: &str) -> bool {
        self.world.instances.borrow().contains_key(id)
    }

    /// Current value of a component's variable, computing its default if needed.
    pub fn get(&self, id: &str, name: &str) -> Result<Value> {
        let instance = self.world.instance(id)?;
        let mut instance = self.world.borrow_instance(&instance, id)?;
        let mut shared = self.world.shared.borrow_mut();
        let mut cx = instance.action_context(&mut shared, &self.world.identity);
        cx.get(name)
    }

    /// The markup the client currently shows for a component.
    pub fn html(&self, id: &str) -> Result<String> {
        let instance = self.world.instance(id)?;
        let instance = instance.borrow();
        Ok(instance.render.html())
    }

    pub fn template_variant(&self, id: &str) -> Result<String> {
        let instance = self.world.instance(id)?;
        let instance = instance.borrow();
        Ok(instance.variant.clone())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
