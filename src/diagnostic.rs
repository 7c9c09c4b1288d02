use std::fmt::Write;

use crate::{config::DiagnosticsConfig, render::escape_html, Error};

/// Builds the markup sent to a component in place of a render when it fails.
///
/// Every piece of text is escaped.
pub fn diagnostic_html(class: &str, error: &Error, config: &DiagnosticsConfig) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<div class="{}" data-component-class="{}"><strong>{}</strong> <span>{}</span>"#,
        escape_html(&config.class),
        escape_html(class),
        escape_html(&error.kind().to_string()),
        escape_html(&error.to_string()),
    );
    if config.include_frames {
        let frames: Vec<String> = error
            .frames()
            .into_iter()
            .skip(1)
            .take(config.max_frames)
            .collect();
        if !frames.is_empty() {
            html.push_str("<ol>");
            for frame in frames {
                let _ = write!(html, "<li>{}</li>", escape_html(&frame));
            }
            html.push_str("</ol>");
        }
    }
    html.push_str("</div>");
    html
}
