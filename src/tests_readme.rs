// #![include_doc("../README.md", start)]
//! # sigview
//!
//! `sigview` keeps component state on the server and re-renders only the template fragments whose inputs changed.
//!
//! > [!WARNING]
//! > Warning: This crate is still in the very early stages of development. APIs will change. Documentation is sparse.
//!
//! ## Features
//!
//! - Tracked values: in-place mutation of lists, maps and records marks the owning variable dirty
//! - ERB-style templates compiled into static and dynamic fragments with per-fragment dependencies
//! - Incremental rendering: only fragments that read a changed variable are re-executed and sent
//! - Shared variables, nested child components, template variants and action handlers
//! - One session per connection, with component definitions shared across threads
//!
//! ### Example
//!
//! ```rust
//! use sigview::{ComponentDef, Mailbox, Session, SubMessage, Value, VarDefault};
//!
//! let todo = ComponentDef::builder("TodoList")
//!     .reactive("items", VarDefault::factory(|| Value::list(["write docs"])))
//!     .action_with_params("add", |cx, params| {
//!         if let Some(items) = cx.get("items")?.as_list() {
//!             items.push(params.get("text").unwrap_or_default());
//!         }
//!         Ok(())
//!     })
//!     .template("default", "<ul><% for item in items %><li><%= item %></li><% end %></ul>")
//!     .build()?;
//!
//! let mailbox = Mailbox::new();
//! let mut session = Session::new(mailbox.clone());
//! session.mount("todo", &todo)?;
//! mailbox.take(); // subscription status and the first, dense render
//!
//! session.handle([SubMessage::action_with_params("todo", "add", "text=ship")])?;
//! let sent = mailbox.take();
//! assert_eq!(
//!     sent[0].to_json()?,
//!     r#"{"component":"todo","render":[null,"<li>write docs</li><li>ship</li>",null]}"#
//! );
//! # Ok::<(), sigview::Error>(())
//! ```
//!
//! `items.push(...)` does not reassign `items`, yet the session knows `items` changed and re-renders only the `for` fragment. `null` entries are fragments the client already has.
//!
//! ### Templates
//!
//! | Tag              | Meaning                                       |
//! | ---------------- | --------------------------------------------- |
//! | `<%= expr %>`    | Output, HTML-escaped                          |
//! | `<%== expr %>`   | Output, unescaped                             |
//! | `<% stmt %>`     | `if`/`elsif`/`else`, `for x in xs`, `let x = e`, `end` |
//! | `<%# comment %>` | Ignored                                       |
//! | `<%%`            | Literal `<%`                                  |
//! | `-%>`            | Removes the newline that follows the tag      |
//!
//! `raw(expr)` outputs unescaped text and `child("Class", id)` renders a declared child component inline.
//!
//! ### Configuration
//!
//! ```toml
//! strict_variables = true
//! max_output_len = 4194304
//! max_iterations = 100000
//!
//! [diagnostics]
//! include_frames = true
//! max_frames = 16
//! class = "sigview-error"
//! ```
//!
//! Load it with `Config::load` and pass it to `Session::with_config`.
//!
//! ## License
//!
//! This project is dual licensed under Apache-2.0/MIT. See the two LICENSE-\* files for details.
//!
//! ## Contribution
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted for inclusion in the work by you, as defined in the Apache-2.0 license, shall be dual licensed as above, without any additional terms or conditions.
// #![include_doc("../README.md", end)]
