use std::collections::HashSet;

use parse_display::Display;

use crate::{
    component::ActionContext,
    diagnostic::diagnostic_html,
    message::{Outbound, SubMessage},
    render::Dirty,
    session::World,
    Error, Result, Value,
};

/// States of one message cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "snake_case")]
pub enum CycleState {
    Idle,
    ResetChangesets,
    ExecuteSubMessages,
    ComputeAffected,
    RenderAffected,
}

type ExternalFn<'a> = Box<dyn FnOnce(&mut ActionContext) -> anyhow::Result<()> + 'a>;

/// What starts a cycle.
pub(crate) enum Work<'a> {
    Messages(Vec<SubMessage>),
    External { component: String, f: ExternalFn<'a> },
    /// Renders a freshly mounted component densely.
    Mount(String),
}

/// Drives one cycle: `ResetChangesets → ExecuteSubMessages → ComputeAffected → RenderAffected
/// → ResetChangesets`.
pub(crate) struct Dispatcher<'w> {
    world: &'w World,
    state: CycleState,
    failure: Option<Error>,
    failed: HashSet<String>,
    affected: Vec<(String, Dirty)>,
}

impl<'w> Dispatcher<'w> {
    pub fn new(world: &'w World) -> Self {
        Self {
            world,
            state: CycleState::Idle,
            failure: None,
            failed: HashSet::new(),
            affected: Vec::new(),
        }
    }

    pub fn run(mut self, work: Work) -> Result<()> {
        let mut work = Some(work);
        let mut mounted = None;
        self.state = CycleState::ResetChangesets;
        loop {
            tracing::trace!(state = %self.state, "cycle");
            self.state = match self.state {
                CycleState::Idle => break,
                CycleState::ResetChangesets if work.is_none() => {
                    self.world.reset_changesets();
                    CycleState::Idle
                }
                CycleState::ResetChangesets => {
                    self.world.reset_changesets();
                    CycleState::ExecuteSubMessages
                }
                CycleState::ExecuteSubMessages => {
                    match work.take() {
                        Some(Work::Messages(messages)) => self.execute_all(messages),
                        Some(Work::External { component, f }) => self.execute_external(&component, f),
                        Some(Work::Mount(id)) => mounted = Some(id),
                        None => {}
                    }
                    CycleState::ComputeAffected
                }
                CycleState::ComputeAffected => {
                    self.compute_affected(mounted.take());
                    CycleState::RenderAffected
                }
                CycleState::RenderAffected => {
                    self.render_affected();
                    CycleState::ResetChangesets
                }
            };
        }
        match self.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, component: &str, error: Error) {
        tracing::warn!(component = %component, kind = %error.kind(), "{error}");
        let mut class = String::new();
        if let Ok(instance) = self.world.instance(component) {
            if let Ok(mut instance) = instance.try_borrow_mut() {
                // The diagnostic replaces the client's markup of this component.
                instance.render.invalidate();
                class = instance.def.class().to_string();
            }
        }
        let html = diagnostic_html(&class, &error, &self.world.config.diagnostics);
        self.world.emit(component, Outbound::Error { error: html });
        self.failed.insert(component.to_string());
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    fn execute_all(&mut self, messages: Vec<SubMessage>) {
        for message in messages {
            if self.failure.is_some() {
                tracing::debug!(component = %message.component(), "sub-message dropped after failure");
                continue;
            }
            if let Err(e) = self.execute(&message) {
                self.fail(message.component(), e);
            }
        }
    }

    fn execute(&mut self, message: &SubMessage) -> Result<()> {
        let id = message.component();
        let instance = self.world.instance(id)?;
        let mut instance = self.world.borrow_instance(&instance, id)?;
        let mut shared = self.world.shared.borrow_mut();
        let mut cx = instance.action_context(&mut shared, &self.world.identity);
        match message {
            SubMessage::Action { action, params, .. } => {
                let handler = cx
                    .def()
                    .action(action)
                    .cloned()
                    .ok_or_else(|| Error::UnknownAction {
                        class: cx.class().to_string(),
                        action: action.clone(),
                    })?;
                tracing::debug!(component = %id, action = %action, "action");
                handler
                    .invoke(&mut cx, params.as_ref())
                    .map_err(|error| Error::Action {
                        class: cx.class().to_string(),
                        action: action.clone(),
                        error,
                    })
            }
            SubMessage::Reactive { name, value, .. } => {
                let def = cx.def();
                if !def.is_reactive(name) && !def.is_shared(name) {
                    return Err(Error::UnknownReactiveVariable {
                        class: def.class().to_string(),
                        name: name.clone(),
                    });
                }
                tracing::debug!(component = %id, name = %name, "reactive assignment");
                cx.set(name, Value::from_json(value.clone()))
            }
        }
    }

    fn execute_external(&mut self, component: &str, f: ExternalFn) {
        if let Err(e) = self.external(component, f) {
            self.fail(component, e);
        }
    }

    fn external(&self, component: &str, f: ExternalFn) -> Result<()> {
        let instance = self.world.instance(component)?;
        let mut instance = self.world.borrow_instance(&instance, component)?;
        let mut shared = self.world.shared.borrow_mut();
        let mut cx = instance.action_context(&mut shared, &self.world.identity);
        tracing::debug!(component = %component, "external update");
        f(&mut cx).map_err(|error| Error::Action {
            class: cx.class().to_string(),
            action: "external_update".to_string(),
            error,
        })
    }

    fn compute_affected(&mut self, mounted: Option<String>) {
        let shared = self.world.shared.borrow().changeset();
        let instances = self.world.instances.borrow();
        for (id, instance) in instances.iter() {
            if mounted.as_deref() == Some(id.as_str()) {
                self.affected.push((id.clone(), Dirty::All));
                continue;
            }
            if self.failed.contains(id) {
                continue;
            }
            let Ok(instance) = instance.try_borrow() else {
                continue;
            };
            let dirty = instance.dirty(&shared);
            if !dirty.is_empty() {
                tracing::trace!(component = %id, dirty = ?dirty, "affected");
                self.affected.push((id.clone(), Dirty::Names(dirty)));
            }
        }
    }

    fn render_affected(&mut self) {
        let mut rendered = HashSet::new();
        for (id, dirty) in std::mem::take(&mut self.affected) {
            if rendered.contains(&id) {
                tracing::trace!(component = %id, "already rendered inline");
                continue;
            }
            let Ok(instance) = self.world.instance(&id) else {
                continue;
            };
            let result = self
                .world
                .borrow_instance(&instance, &id)
                .and_then(|mut instance| self.world.render_instance(&mut instance, &dirty));
            match result {
                Ok(r) => {
                    rendered.extend(r.rendered_children.iter().cloned());
                    if !r.is_empty() {
                        self.world.emit(&id, Outbound::Render { render: r.slots });
                    }
                }
                Err(e) => self.fail(&id, e),
            }
        }
    }
}
