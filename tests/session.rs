use serde_json::json;
use sigview::*;

fn render_of(envelope: &Envelope) -> Vec<Option<&str>> {
    match &envelope.payload {
        Outbound::Render { render } => render.iter().map(|s| s.as_deref()).collect(),
        payload => panic!("expected a render for `{}`, got {payload:?}", envelope.component),
    }
}

fn status_of(envelope: &Envelope) -> (&str, Status) {
    match &envelope.payload {
        Outbound::Status { status } => (envelope.component.as_str(), *status),
        payload => panic!("expected a status, got {payload:?}"),
    }
}

fn tag_list() -> ComponentDef {
    ComponentDef::builder("TagList")
        .reactive(
            "tags",
            VarDefault::factory(|| Value::list(["ruby", "rails"])),
        )
        .reactive("title", VarDefault::literal("Tags"))
        .action_with_params("add", |cx, params| {
            let tag = params.get("name").unwrap_or_default().to_string();
            if let Some(tags) = cx.get("tags")?.as_list() {
                tags.push(tag);
            }
            Ok(())
        })
        .action("rename", |cx| {
            cx.set("title", "Renamed")?;
            Ok(())
        })
        .template(
            "default",
            "<h1><%= title %></h1><ul><% for t in tags %><li><%= t %></li><% end %></ul>",
        )
        .build()
        .unwrap()
}

fn counter() -> ComponentDef {
    ComponentDef::builder("Counter")
        .shared("count", VarDefault::literal(0))
        .action("inc", |cx| {
            let n = cx.get("count")?.as_int().unwrap_or(0);
            cx.set("count", n + 1)?;
            Ok(())
        })
        .template("default", "<%= count %>")
        .build()
        .unwrap()
}

fn mounted(defs: &[(&str, &ComponentDef)]) -> (Session, Mailbox) {
    let mailbox = Mailbox::new();
    let mut session = Session::new(mailbox.clone());
    for (id, def) in defs {
        session.mount(id, def).unwrap();
    }
    mailbox.take();
    (session, mailbox)
}

#[test]
fn mount_subscribes_and_renders_densely() {
    let mailbox = Mailbox::new();
    let mut session = Session::new(mailbox.clone());
    session.mount("c1", &tag_list()).unwrap();

    let sent = mailbox.take();
    assert_eq!(sent.len(), 2);
    assert_eq!(status_of(&sent[0]), ("c1", Status::Subscribed));
    assert_eq!(
        render_of(&sent[1]),
        [
            Some("<h1>"),
            Some("Tags"),
            Some("</h1><ul>"),
            Some("<li>ruby</li><li>rails</li>"),
            Some("</ul>"),
        ]
    );
    assert_eq!(
        session.html("c1").unwrap(),
        "<h1>Tags</h1><ul><li>ruby</li><li>rails</li></ul>"
    );
}

#[test]
fn duplicate_mount_is_rejected() {
    let def = tag_list();
    let (mut session, _) = mounted(&[("c1", &def)]);
    let e = session.mount("c1", &def).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::DuplicateComponent);
}

#[test]
fn in_place_push_rerenders_only_the_loop() {
    let (mut session, mailbox) = mounted(&[("c1", &tag_list())]);
    session
        .handle([SubMessage::action_with_params("c1", "add", "name=rspec")])
        .unwrap();

    let sent = mailbox.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].component, "c1");
    assert_eq!(
        render_of(&sent[0]),
        [
            None,
            None,
            None,
            Some("<li>ruby</li><li>rails</li><li>rspec</li>"),
            None
        ]
    );
    assert_eq!(session.get("c1", "tags").unwrap(), Value::list(["ruby", "rails", "rspec"]));
}

#[test]
fn unchanged_component_sends_nothing() {
    let def = ComponentDef::builder("Noop")
        .action("noop", |_| Ok(()))
        .template("default", "x")
        .build()
        .unwrap();
    let (mut session, mailbox) = mounted(&[("n", &def)]);
    session.handle([SubMessage::action("n", "noop")]).unwrap();
    assert!(mailbox.is_empty());
}

#[test]
fn failure_reports_to_offender_and_drops_later_messages() {
    let def = tag_list();
    let (mut session, mailbox) = mounted(&[("c1", &def), ("c2", &def)]);
    let e = session
        .handle([
            SubMessage::action("c2", "rename"),
            SubMessage::action("c1", "nope"),
            SubMessage::action_with_params("c2", "add", "name=late"),
        ])
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnknownAction);

    let sent = mailbox.take();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].component, "c1");
    let Outbound::Error { error } = &sent[0].payload else {
        panic!("expected a diagnostic, got {:?}", sent[0].payload);
    };
    assert!(error.contains("<strong>UnknownAction</strong>"));
    assert!(error.contains(r#"data-component-class="TagList""#));
    assert_eq!(sent[1].component, "c2");
    assert_eq!(render_of(&sent[1]), [None, Some("Renamed"), None, None, None]);
    assert_eq!(session.get("c2", "tags").unwrap().as_list().map(List::len), Some(2));
}

#[test]
fn failing_action_is_wrapped_with_its_cause() {
    let def = ComponentDef::builder("Broken")
        .action("explode", |_| Err(anyhow::anyhow!("boom")))
        .template("default", "ok")
        .build()
        .unwrap();
    let (mut session, mailbox) = mounted(&[("b", &def)]);
    let e = session.handle([SubMessage::action("b", "explode")]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ActionError);
    assert!(e.to_string().contains("boom"));
    assert!(matches!(&mailbox.take()[..], [Envelope { payload: Outbound::Error { .. }, .. }]));
}

#[test]
fn render_after_diagnostic_is_dense() {
    let def = tag_list();
    let (mut session, mailbox) = mounted(&[("c1", &def)]);
    session.handle([SubMessage::action("c1", "nope")]).unwrap_err();
    mailbox.take();

    session.handle([SubMessage::action("c1", "rename")]).unwrap();
    let sent = mailbox.take();
    assert_eq!(
        render_of(&sent[0]),
        [
            Some("<h1>"),
            Some("Renamed"),
            Some("</h1><ul>"),
            Some("<li>ruby</li><li>rails</li>"),
            Some("</ul>"),
        ]
    );
}

#[test]
fn oversized_client_value_fails_only_that_render() {
    let stars = ComponentDef::builder("Stars")
        .reactive("n", VarDefault::literal(1))
        .template("default", "<b><%= \"*\" * n %></b>")
        .build()
        .unwrap();
    let (mut session, mailbox) = mounted(&[("s", &stars), ("c1", &tag_list())]);

    let e = session
        .handle([
            SubMessage::reactive("c1", "title", "Big"),
            SubMessage::reactive("s", "n", i64::MAX),
        ])
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::EvalError);
    let sent = mailbox.take();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].component, "s");
    assert!(matches!(sent[0].payload, Outbound::Error { .. }));
    assert_eq!(sent[1].component, "c1");

    session.handle([SubMessage::reactive("s", "n", 2)]).unwrap();
    assert_eq!(
        render_of(&mailbox.take()[0]),
        [Some("<b>"), Some("**"), Some("</b>")]
    );
}

#[test]
fn shared_variable_rerenders_every_reader_once() {
    let def = counter();
    let (mut session, mailbox) = mounted(&[("a", &def), ("b", &def)]);
    session.handle([SubMessage::action("a", "inc")]).unwrap();

    let sent = mailbox.take();
    let renders: Vec<_> = sent
        .iter()
        .map(|e| (e.component.as_str(), render_of(e)))
        .collect();
    assert_eq!(renders, [("a", vec![Some("1")]), ("b", vec![Some("1")])]);
    assert_eq!(session.get("b", "count").unwrap(), Value::Int(1));
}

#[test]
fn variant_switch_sends_dense_render() {
    let def = ComponentDef::builder("Checkout")
        .reactive("total", VarDefault::literal(42))
        .action("pay", |cx| {
            cx.set_template_variant("success")?;
            Ok(())
        })
        .template("cart", "<p>Total: <%= total %></p>")
        .template("success", "<p>Paid <%= total %></p>")
        .build()
        .unwrap();
    let (mut session, mailbox) = mounted(&[("co", &def)]);
    assert_eq!(session.template_variant("co").unwrap(), "cart");

    session.handle([SubMessage::action("co", "pay")]).unwrap();
    let sent = mailbox.take();
    assert_eq!(
        render_of(&sent[0]),
        [Some("<p>Paid "), Some("42"), Some("</p>")]
    );
    assert_eq!(session.template_variant("co").unwrap(), "success");
}

#[test]
fn unknown_variant_is_an_action_error() {
    let def = ComponentDef::builder("V")
        .action("go", |cx| {
            cx.set_template_variant("missing")?;
            Ok(())
        })
        .template("default", "x")
        .build()
        .unwrap();
    let (mut session, _) = mounted(&[("v", &def)]);
    let e = session.handle([SubMessage::action("v", "go")]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ActionError);
    assert_eq!(session.template_variant("v").unwrap(), "default");
}

fn row() -> ComponentDef {
    ComponentDef::builder("Row")
        .reactive("label", VarDefault::literal("row"))
        .action_with_params("relabel", |cx, params| {
            cx.set("label", params.get("to").unwrap_or_default())?;
            Ok(())
        })
        .template("default", "<li><%= label %></li>")
        .build()
        .unwrap()
}

fn row_list(row: &ComponentDef) -> ComponentDef {
    ComponentDef::builder("RowList")
        .reactive("rows", VarDefault::factory(|| Value::list(["r1", "r2"])))
        .action("refresh", |cx| {
            cx.mark_dirty(["rows"])?;
            Ok(())
        })
        .action("drop_first", |cx| {
            if let Some(rows) = cx.get("rows")?.as_list() {
                rows.remove(0);
            }
            Ok(())
        })
        .child(row)
        .template(
            "default",
            "<ul><% for r in rows %><%= child(\"Row\", r) %><% end %></ul>",
        )
        .build()
        .unwrap()
}

#[test]
fn children_render_inline_and_on_their_own() {
    let row = row();
    let list = row_list(&row);
    let mailbox = Mailbox::new();
    let mut session = Session::new(mailbox.clone());
    session.mount("p", &list).unwrap();

    let sent = mailbox.take();
    let statuses: Vec<_> = sent[..3].iter().map(status_of).collect();
    assert_eq!(
        statuses,
        [
            ("p", Status::Subscribed),
            ("r1", Status::Subscribed),
            ("r2", Status::Subscribed)
        ]
    );
    assert_eq!(
        render_of(&sent[3]),
        [Some("<ul>"), Some("<li>row</li><li>row</li>"), Some("</ul>")]
    );
    assert_eq!(session.component_ids(), ["p", "r1", "r2"]);

    session
        .handle([SubMessage::action_with_params("r1", "relabel", "to=x")])
        .unwrap();
    let sent = mailbox.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].component, "r1");
    assert_eq!(render_of(&sent[0]), [None, Some("x"), None]);

    // A child rendered inline by its parent is not rendered again.
    session
        .handle([
            SubMessage::action_with_params("r1", "relabel", "to=y"),
            SubMessage::action("p", "refresh"),
        ])
        .unwrap();
    let sent = mailbox.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].component, "p");
    assert_eq!(
        render_of(&sent[0]),
        [None, Some("<li>y</li><li>row</li>"), None]
    );
}

#[test]
fn dropped_children_are_destroyed() {
    let row = row();
    let list = row_list(&row);
    let (mut session, mailbox) = mounted(&[("p", &list)]);

    session.handle([SubMessage::action("p", "drop_first")]).unwrap();
    let sent = mailbox.take();
    assert_eq!(status_of(&sent[0]), ("r1", Status::Destroyed));
    assert_eq!(render_of(&sent[1]), [None, Some("<li>row</li>"), None]);
    assert!(!session.contains("r1"));
    assert!(session.contains("r2"));

    session.unmount("p").unwrap();
    let statuses: Vec<_> = mailbox.take().iter().map(|e| status_of(e).0.to_string()).collect();
    assert_eq!(statuses, ["p", "r2"]);
    assert!(session.component_ids().is_empty());
}

#[test]
fn undeclared_child_class_fails_render() {
    let def = ComponentDef::builder("Orphan")
        .template("default", "<%= child(\"Row\", \"x\") %>")
        .build()
        .unwrap();
    let mut session = Session::new(Mailbox::new());
    let e = session.mount("o", &def).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnknownChildClass);
}

#[test]
fn external_update_renders_changes() {
    let (mut session, mailbox) = mounted(&[("c1", &tag_list())]);
    session
        .external_update("c1", |cx| {
            cx.set("title", "From outside")?;
            Ok(())
        })
        .unwrap();
    assert_eq!(
        render_of(&mailbox.take()[0]),
        [None, Some("From outside"), None, None, None]
    );

    let e = session.external_update("zz", |_| Ok(())).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnknownComponent);
}

#[test]
fn json_messages() {
    let (mut session, mailbox) = mounted(&[("c1", &tag_list())]);
    session
        .handle_json(
            r#"{"messages":[{"component":"c1","action":"_reactive","name":"title","value":"<JSON>"}]}"#,
        )
        .unwrap();
    assert_eq!(
        render_of(&mailbox.take()[0]),
        [None, Some("&lt;JSON&gt;"), None, None, None]
    );

    let e = session.handle_json("{").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidMessage);

    let e = session
        .handle_json(r#"{"messages":[{"component":"c1","action":"_reactive","name":"nope","value":1}]}"#)
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnknownReactiveVariable);
}

#[test]
fn reactive_assignment_wraps_composites() {
    let (mut session, mailbox) = mounted(&[("c1", &tag_list())]);
    session
        .handle([SubMessage::reactive("c1", "tags", json!(["go"]))])
        .unwrap();
    assert_eq!(render_of(&mailbox.take()[0])[3], Some("<li>go</li>"));

    // Pushing onto the value read back marks the variable dirty.
    session
        .external_update("c1", |cx| {
            if let Some(tags) = cx.get("tags")?.as_list() {
                tags.push("rust");
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(render_of(&mailbox.take()[0])[3], Some("<li>go</li><li>rust</li>"));
    assert_eq!(
        session.html("c1").unwrap(),
        "<h1>Tags</h1><ul><li>go</li><li>rust</li></ul>"
    );
}

#[test]
fn helpers_and_identity() {
    let def = ComponentDef::builder("Greeter")
        .reactive("name", VarDefault::literal("ann"))
        .helper("greeting", |cx, _| {
            let user = cx.identity("user").unwrap_or_default().to_text();
            Ok(Value::str(format!("hello {user}")))
        })
        .helper("shout", |_, args| {
            let text = args.first().map(Value::to_text).unwrap_or_default();
            Ok(Value::str(text.to_uppercase()))
        })
        .action_with_params("rename", |cx, params| {
            cx.set("name", params.get("to").unwrap_or_default())?;
            Ok(())
        })
        .template("default", "<%= greeting %>|<%= shout(name) %>|<%= user %>")
        .build()
        .unwrap();
    let mailbox = Mailbox::new();
    let mut session = Session::new(mailbox.clone());
    session.set_identity("user", "admin");
    session.mount("g", &def).unwrap();
    assert_eq!(session.html("g").unwrap(), "hello admin|ANN|admin");

    mailbox.take();
    session
        .handle([SubMessage::action_with_params("g", "rename", "to=bob")])
        .unwrap();
    assert_eq!(
        render_of(&mailbox.take()[0]),
        [Some("hello admin"), None, Some("BOB"), None, None]
    );
}

#[test]
fn strict_variables_follow_config() {
    let def = ComponentDef::builder("Loose")
        .template("default", "[<%= missing %>]")
        .build()
        .unwrap();

    let mailbox = Mailbox::new();
    let mut strict = Session::new(mailbox.clone());
    let e = strict.mount("x", &def).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UndefinedVariable);
    let sent = mailbox.take();
    assert!(matches!(sent[1].payload, Outbound::Error { .. }));

    let config = Config::from_toml_str("strict_variables = false").unwrap();
    let mut loose = Session::with_config(config, Mailbox::new());
    loose.mount("x", &def).unwrap();
    assert_eq!(loose.html("x").unwrap(), "[]");
}

#[test]
fn config_from_toml() {
    let config = Config::from_toml_str(
        r#"
        [diagnostics]
        include_frames = false
        class = "oops"
        "#,
    )
    .unwrap();
    assert!(config.strict_variables);
    assert!(!config.diagnostics.include_frames);
    assert_eq!(config.diagnostics.class, "oops");
    assert_eq!(config.diagnostics.max_frames, 16);

    let e = Config::from_toml_str("unknown = 1").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ConfigError);
}

#[test]
fn diagnostic_markup_is_escaped() {
    let error = Error::UnknownAction {
        class: "<C>".to_string(),
        action: "x".to_string(),
    };
    let html = diagnostic_html("<C>", &error, &DiagnosticsConfig::default());
    assert!(html.starts_with(r#"<div class="sigview-error" data-component-class="&lt;C&gt;">"#));
    assert!(!html.contains("<C>"));
}

#[test]
fn build_validates_declarations() {
    let e = ComponentDef::builder("A")
        .reactive("component", VarDefault::Absent)
        .build()
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ReservedName);

    let e = ComponentDef::builder("A")
        .helper("raw", |_, _| Ok(Value::Nil))
        .build()
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ReservedName);

    let e = ComponentDef::builder("A")
        .reactive("n", VarDefault::Absent)
        .shared("n", VarDefault::Absent)
        .build()
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ReservedName);

    let e = ComponentDef::builder("A")
        .action("_reactive", |_| Ok(()))
        .build()
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ReservedName);

    let e = ComponentDef::builder("A")
        .reactive("items", VarDefault::literal(json!([])))
        .build()
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidDefaultFactory);

    let e = ComponentDef::builder("A")
        .template("default", "<% if x %>")
        .build()
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::TemplateError);
}

#[test]
fn disconnect_closes_session() {
    let def = ComponentDef::builder("Holder")
        .reactive("tags", VarDefault::Absent)
        .action("hold", |cx| {
            cx.set("tags", Value::list(["a"]))?;
            Ok(())
        })
        .template("default", "<%= tags.len %>")
        .build()
        .unwrap();
    let (mut session, mailbox) = mounted(&[("h", &def)]);
    session.handle([SubMessage::action("h", "hold")]).unwrap();
    let tags = session.get("h", "tags").unwrap();
    assert_eq!(tags.observed_names(), ["tags"]);

    session.disconnect();
    assert!(session.is_closed());
    assert!(tags.observed_names().is_empty());
    mailbox.take();

    let e = session.handle([SubMessage::action("h", "hold")]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Closed);
    assert_eq!(session.mount("h2", &def).unwrap_err().kind(), ErrorKind::Closed);
    assert!(mailbox.is_empty());
}

#[test]
fn sessions_run_in_parallel_with_shared_definitions() {
    let def = tag_list();
    let html: Vec<String> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let def = def.clone();
                s.spawn(move || {
                    let mut session = Session::new(Mailbox::new());
                    session.mount("c", &def).unwrap();
                    session
                        .handle([SubMessage::action_with_params(
                            "c",
                            "add",
                            &format!("name=t{i}"),
                        )])
                        .unwrap();
                    session.html("c").unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for (i, html) in html.iter().enumerate() {
        assert!(html.ends_with(&format!("<li>t{i}</li></ul>")));
    }
}

#[test]
fn cycle_states_display() {
    assert_eq!(CycleState::ExecuteSubMessages.to_string(), "execute_sub_messages");
    assert_eq!(CycleState::Idle.to_string(), "idle");
}
