//! The renderer: configuration value in, HTML document out.
//!
//! Rendering is a pure function. The value is embedded through `maud`, which
//! entity-escapes `&`, `<`, `>` and `"`, so no configuration value can inject
//! markup into the page.

use maud::{DOCTYPE, html};

/// Content type every rendered document is served with.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const PAGE_TITLE: &str = "Dynamic HTML";

/// An HTML page produced for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    body: String,
}

impl RenderedDocument {
    pub fn content_type(&self) -> &'static str {
        HTML_CONTENT_TYPE
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn into_string(self) -> String {
        self.body
    }
}

/// Renders `value` as a standalone HTML document.
///
/// # Examples
///
/// ```
/// let doc = dynhtml::render::render("<b>hi</b>");
/// assert!(doc.as_str().contains("&lt;b&gt;hi&lt;/b&gt;"));
/// ```
pub fn render(value: &str) -> RenderedDocument {
    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (PAGE_TITLE) }
            }
            body {
                h1 { (value) }
            }
        }
    };

    RenderedDocument {
        body: markup.into_string(),
    }
}
