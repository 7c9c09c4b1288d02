use assert_call::{call, CallRecorder};
use indexmap::IndexMap;
use rstest::rstest;

use super::*;
use crate::{template::CompiledTemplate, Config, List};

fn compile(variant: &str, source: &str) -> CompiledTemplate {
    CompiledTemplate::compile("Test", variant, source).unwrap()
}

fn scope(entries: &[(&str, Value)]) -> IndexMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn config() -> Config {
    Config::default()
}

fn lenient() -> Config {
    Config {
        strict_variables: false,
        ..Config::default()
    }
}

fn slots(r: &Rendered) -> Vec<Option<&str>> {
    r.slots.iter().map(|s| s.as_deref()).collect()
}

/// Scope that records every variable read and helper call.
struct Recording(IndexMap<String, Value>);

impl Scope for Recording {
    fn lookup(&mut self, name: &str) -> Result<Option<Value>> {
        call!("read {name}");
        Ok(self.0.get(name).cloned())
    }
    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>> {
        call!("call {name}");
        Ok(match name {
            "twice" => args.first().and_then(Value::as_int).map(|n| Value::Int(n * 2)),
            _ => None,
        })
    }
    fn render_child(&mut self, class: &str, id: &str) -> Result<ChildRender> {
        call!("child {class} {id}");
        Ok(ChildRender {
            html: format!("<{class} id={id}/>"),
            rendered: vec![id.to_string()],
        })
    }
}

#[test]
fn first_render_is_dense() {
    let t = compile("default", "<p><%= name %></p>");
    let mut session = RenderSession::new();
    let mut s = scope(&[("name", Value::str("<b>"))]);
    let r = render(&t, &Dirty::names([]), &mut session, &mut s, &config()).unwrap();
    assert!(r.dense);
    assert_eq!(slots(&r), [Some("<p>"), Some("&lt;b&gt;"), Some("</p>")]);
    assert_eq!(session.html(), "<p>&lt;b&gt;</p>");
}

#[test]
fn only_dirty_expressions_execute() {
    let mut cr = CallRecorder::new();
    let t = compile("default", "<%= a %>|<%= b %>");
    let mut session = RenderSession::new();
    let mut s = Recording(scope(&[("a", Value::Int(1)), ("b", Value::Int(2))]));
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    cr.verify(["read a", "read b"]);

    s.0.insert("b".to_string(), Value::Int(3));
    let r = render(&t, &Dirty::names(["b"]), &mut session, &mut s, &config()).unwrap();
    cr.verify("read b");
    assert!(!r.dense);
    assert_eq!(slots(&r), [None, None, Some("3")]);
    assert_eq!(session.html(), "1|3");
}

#[test]
fn nothing_dirty_renders_nothing() {
    let mut cr = CallRecorder::new();
    let t = compile("default", "<%= a %>");
    let mut session = RenderSession::new();
    let mut s = Recording(scope(&[("a", Value::Int(1))]));
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    cr.verify("read a");

    let r = render(&t, &Dirty::names(["zzz"]), &mut session, &mut s, &config()).unwrap();
    cr.verify(());
    assert!(r.is_empty());
}

#[test]
fn blocks_rebind_locals_and_dirty_locals_propagate() {
    let mut cr = CallRecorder::new();
    let t = compile(
        "default",
        "<% let total = price * qty %><%= total %>/<%= label %>",
    );
    let mut session = RenderSession::new();
    let mut s = Recording(scope(&[
        ("price", Value::Int(3)),
        ("qty", Value::Int(2)),
        ("label", Value::str("x")),
    ]));
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    cr.verify(["read price", "read qty", "read label"]);

    // `label` alone: the block still runs to bind `total`, but only `label` is emitted.
    let r = render(&t, &Dirty::names(["label"]), &mut session, &mut s, &config()).unwrap();
    cr.verify(["read price", "read qty", "read label"]);
    assert_eq!(slots(&r), [None, None, None, Some("x")]);

    s.0.insert("qty".to_string(), Value::Int(5));
    let r = render(&t, &Dirty::names(["qty"]), &mut session, &mut s, &config()).unwrap();
    cr.verify(["read price", "read qty"]);
    assert_eq!(slots(&r), [Some(""), Some("15"), None, None]);
    assert_eq!(session.html(), "15/x");
}

#[test]
fn block_locals_visible_to_later_blocks() {
    let t = compile(
        "default",
        "<% let n = items.len %><% if n > 1 %>many<% else %>few<% end %>",
    );
    let items = List::new();
    let mut session = RenderSession::new();
    let mut s = scope(&[("items", Value::List(items.clone()))]);
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    assert_eq!(session.html(), "few");

    items.push(1);
    items.push(2);
    let r = render(&t, &Dirty::names(["items"]), &mut session, &mut s, &config()).unwrap();
    assert_eq!(slots(&r), [Some(""), Some("many")]);
}

#[test]
fn variant_switch_is_dense() {
    let cart = compile("cart", "<ul><%= n %></ul>");
    let success = compile("success", "<p>thanks</p>");
    let mut session = RenderSession::new();
    let mut s = scope(&[("n", Value::Int(1))]);
    render(&cart, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    assert_eq!(session.variant(), Some("cart"));

    let dirty = Dirty::names(["component"]);
    let r = render(&success, &dirty, &mut session, &mut s, &config()).unwrap();
    assert!(r.dense);
    assert_eq!(slots(&r), [Some("<p>thanks</p>")]);
    assert_eq!(session.variant(), Some("success"));
    assert_eq!(session.fragments().len(), 1);
}

#[test]
fn statics_only_on_dense() {
    let t = compile("default", "<b><%= n %></b>");
    let mut session = RenderSession::new();
    let mut s = scope(&[("n", Value::Int(1))]);
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    let r = render(&t, &Dirty::names(["n"]), &mut session, &mut s, &config()).unwrap();
    assert_eq!(slots(&r), [None, Some("1"), None]);

    session.invalidate();
    let r = render(&t, &Dirty::names([]), &mut session, &mut s, &config()).unwrap();
    assert!(r.dense);
}

#[test]
fn helpers_and_raw_output() {
    let mut cr = CallRecorder::new();
    let t = compile("default", "<%= twice(n) %><%= raw(html) %><%== html %>");
    let mut session = RenderSession::new();
    let mut s = Recording(scope(&[("n", Value::Int(4)), ("html", Value::str("<i>"))]));
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    cr.verify(["read n", "call twice", "read html", "read html"]);
    assert_eq!(session.html(), "8<i><i>");
}

#[test]
fn children_are_reported_per_slot() {
    let mut cr = CallRecorder::new();
    let t = compile(
        "default",
        "<% for id in ids %><%= child(\"Row\", id) %><% end %><%= title %>",
    );
    let ids = List::from_vec(vec![Value::str("r1"), Value::str("r2")]);
    let mut session = RenderSession::new();
    let mut s = Recording(scope(&[
        ("ids", Value::List(ids.clone())),
        ("title", Value::str("t")),
    ]));
    let r = render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    cr.verify(["read ids", "child Row r1", "child Row r2", "read title"]);
    assert_eq!(r.rendered_children, ["r1", "r2"]);
    assert_eq!(session.html(), "<Row id=r1/><Row id=r2/>t");

    // A render that skips the loop keeps its children alive.
    let r = render(&t, &Dirty::names(["title"]), &mut session, &mut s, &config()).unwrap();
    cr.verify(["read ids", "read title"]);
    assert!(r.rendered_children.is_empty());
    assert_eq!(session.live_children().len(), 2);

    ids.remove(0);
    render(&t, &Dirty::names(["ids"]), &mut session, &mut s, &config()).unwrap();
    cr.verify(["read ids", "child Row r2"]);
    assert_eq!(session.live_children().into_iter().collect::<Vec<_>>(), ["r2"]);
}

#[test]
fn undefined_variable_strictness() {
    let t = compile("default", "[<%= missing %>]");
    let mut s = scope(&[]);
    let e = render(&t, &Dirty::All, &mut RenderSession::new(), &mut s, &config()).unwrap_err();
    assert!(matches!(
        &e,
        Error::Render { part: 1, error, .. } if matches!(**error, Error::UndefinedVariable { .. })
    ));
    assert_eq!(e.kind().to_string(), "UndefinedVariable");

    let r = render(&t, &Dirty::All, &mut RenderSession::new(), &mut s, &lenient()).unwrap();
    assert_eq!(slots(&r), [Some("["), Some(""), Some("]")]);
}

#[test]
fn templates_cannot_mutate() {
    let t = compile("default", "<%= items.push(1) %>");
    let items = List::new();
    let mut s = scope(&[("items", Value::List(items.clone()))]);
    let e = render(&t, &Dirty::All, &mut RenderSession::new(), &mut s, &config()).unwrap_err();
    assert_eq!(e.kind().to_string(), "EvalError");
    assert!(items.is_empty());
}

#[test]
fn expression_evaluation() {
    let t = compile(
        "default",
        "<%= 7 / 2 %> <%= 1.5 * 2 %> <%= \"a\" + 1 %> <%= [3, 1, 2].sorted.join(\",\") %> \
         <%= m.k %> <%= m[\"k\"] %> <%= nil.x %> <%= !x || \"no\" %> <%= n > 2 ? \"big\" : \"small\" %> \
         <%= \"abc\".upcase %> <%= xs[-1] %> <%= m.len %>",
    );
    let mut s = scope(&[
        ("m", Value::map([("k", "v")])),
        ("x", Value::Bool(true)),
        ("n", Value::Int(3)),
        ("xs", Value::list([1, 2, 3])),
    ]);
    let mut session = RenderSession::new();
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    assert_eq!(session.html(), "3 3.0 a1 1,2,3 v v  no big ABC 3 1");
}

#[test]
fn escape() {
    assert_eq!(
        escape_html(r#"<a href="x">'&'</a>"#),
        "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;&#x2f;a&gt;"
    );
}

#[rstest]
#[case("<%= \"*\" * n %>", i64::MAX, "string too large")]
#[case("<%= \"*\" * n %>", 1 << 40, "string too large")]
#[case("<% for i in n %>.<% end %>", 1 << 50, "loop too large")]
#[case("<% for i in n %><% for j in n %>.<% end %><% end %>", 400, "loop too large")]
fn oversized_work_is_an_eval_error(#[case] source: &str, #[case] n: i64, #[case] message: &str) {
    let t = compile("default", source);
    let mut s = scope(&[("n", Value::Int(n))]);
    let e = render(&t, &Dirty::All, &mut RenderSession::new(), &mut s, &config()).unwrap_err();
    assert_eq!(e.kind().to_string(), "EvalError");
    assert!(e.to_string().contains(message), "{e}");
}

#[test]
fn limits_come_from_config() {
    let t = compile("default", "<% for i in n %><%= \"ab\" * 2 %><% end %>");
    let mut s = scope(&[("n", Value::Int(3))]);
    let small = Config {
        max_output_len: 10,
        ..Config::default()
    };
    let e = render(&t, &Dirty::All, &mut RenderSession::new(), &mut s, &small).unwrap_err();
    assert!(e.to_string().contains("output too large"), "{e}");

    let few = Config {
        max_iterations: 2,
        ..Config::default()
    };
    let e = render(&t, &Dirty::All, &mut RenderSession::new(), &mut s, &few).unwrap_err();
    assert!(e.to_string().contains("loop too large"), "{e}");

    let mut session = RenderSession::new();
    render(&t, &Dirty::All, &mut session, &mut s, &config()).unwrap();
    assert_eq!(session.html(), "abababababab");
}
