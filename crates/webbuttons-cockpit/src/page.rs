//! Server-side rendering of the button panel page.
//!
//! `index.html` is a minijinja template.  Templates with an `.html` name are
//! auto-escaped, so button names are inserted as plain text.

use minijinja::{Environment, context};
use webbuttons_types::{ButtonError, ButtonId};

const INDEX_TEMPLATE: &str = "index.html";

/// The compiled-in page template.
const INDEX_HTML: &str = include_str!("index.html");

/// Render the panel with one button per name, highlighting `active`.
///
/// # Errors
///
/// Returns [`ButtonError::Serialization`] if the template fails to render.
pub fn render_index(names: &[String], active: Option<ButtonId>) -> Result<String, ButtonError> {
    let mut env = Environment::new();
    env.add_template(INDEX_TEMPLATE, INDEX_HTML)
        .map_err(render_error)?;
    env.get_template(INDEX_TEMPLATE)
        .and_then(|tmpl| tmpl.render(context! { names => names, active => active }))
        .map_err(render_error)
}

fn render_error(e: minijinja::Error) -> ButtonError {
    ButtonError::Serialization(format!("page render error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn template_loops_over_names() {
        assert!(INDEX_HTML.contains("{% for name in names %}"));
        assert!(INDEX_HTML.contains("/api/activate"));
    }

    #[test]
    fn renders_one_button_per_name() {
        let html = render_index(&names(&["Left", "Right", "Stop"]), None).unwrap();
        assert_eq!(html.matches("<button type=\"button\"").count(), 3);
        assert!(html.contains("data-id=\"3\">Stop</button>"));
        assert!(!html.contains("{%"));
    }

    #[test]
    fn marks_active_button() {
        let html = render_index(&names(&["Left", "Right"]), Some(2)).unwrap();
        assert!(html.contains("data-id=\"2\" class=\"active\">Right"));
        assert!(html.contains("data-id=\"1\">Left"));
        assert!(html.contains("<span id=\"active\">2</span>"));
    }

    #[test]
    fn no_selection_reads_none() {
        let html = render_index(&names(&["Left"]), None).unwrap();
        assert!(html.contains("<span id=\"active\">none</span>"));
        assert!(!html.contains("class=\"active\""));
    }

    #[test]
    fn names_are_escaped() {
        let html = render_index(&names(&["<script>alert('x')</script>", "Fish & Chips"]), None).unwrap();
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;alert("));
        assert!(html.contains("Fish &amp; Chips"));
    }
}
