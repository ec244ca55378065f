//! Index page
//!
//! The configured `index_html` is rendered as a handlebars template, so a
//! custom page may refer to `{{version}}` and `{{name}}`.

use handlebars::Handlebars;
use serde_json::json;

pub fn render(template: &str) -> String {
    let data = json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    });

    match Handlebars::new().render_template(template, &data) {
        Ok(page) => page,
        Err(e) => {
            log::warn!("index_html is not a valid template, serving it verbatim: {}", e);
            template.to_string()
        }
    }
}
