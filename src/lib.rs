mod component;
mod config;
mod container;
mod diagnostic;
mod dispatch;
mod error;
mod message;
mod render;
mod session;
mod template;
mod tracked;
mod value;

#[cfg(doctest)]
mod tests_readme;

pub use component::*;
pub use config::*;
pub use container::*;
pub use diagnostic::*;
pub use dispatch::CycleState;
pub use error::*;
pub use message::*;
pub use render::*;
pub use session::Session;
pub use template::*;
pub use tracked::*;
pub use value::*;
