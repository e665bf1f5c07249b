//! System prompt assembly.
//!
//! A prompt starts from a named template of the [`PromptLibrary`], rendered
//! with the request's [`PromptOptions`]. The request may then extend it with
//! a project file manifest and context buffer ([`with_context`]) and with a
//! summary of the earlier conversation ([`with_summary`]). Both extensions
//! only ever append to the prompt.

mod context;
mod templates;

pub(crate) use context::{with_context, with_summary, FileContext};
pub(crate) use templates::{PromptTemplate, DEFAULT_PROMPT_ID};

use templates::TEMPLATES;

/// HTML elements the model may use to format its replies.
const ALLOWED_HTML_ELEMENTS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "dd", "del", "details", "div", "dl", "dt", "em", "h1",
    "h2", "h3", "h4", "h5", "h6", "hr", "i", "ins", "kbd", "li", "ol", "p", "pre", "q", "rp", "rt",
    "ruby", "s", "samp", "source", "span", "strike", "strong", "sub", "summary", "sup", "table",
    "tbody", "td", "tfoot", "th", "thead", "tr", "ul", "var",
];

/// The request specific values substituted into a template.
#[derive(Debug, Clone)]
pub(crate) struct PromptOptions {
    /// The working directory the model should assume.
    pub cwd: String,
    pub allowed_html_elements: Vec<String>,
    /// Tag wrapping the file modifications the user made since the last reply.
    pub modification_tag: String,
}

impl Default for PromptOptions {
    fn default() -> Self {
        PromptOptions {
            cwd: "/home/project".to_string(),
            allowed_html_elements: ALLOWED_HTML_ELEMENTS.iter().map(|e| e.to_string()).collect(),
            modification_tag: "file_modifications".to_string(),
        }
    }
}

impl PromptOptions {
    pub(crate) fn with_cwd<S: Into<String>>(mut self, cwd: S) -> Self {
        self.cwd = cwd.into();
        self
    }

    fn allowed_html(&self) -> String {
        self.allowed_html_elements
            .iter()
            .map(|e| format!("<{}>", e))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub(crate) struct PromptLibrary;

impl PromptLibrary {
    pub(crate) fn templates() -> &'static [PromptTemplate] {
        TEMPLATES
    }

    pub(crate) fn get(id: &str) -> Option<&'static PromptTemplate> {
        TEMPLATES.iter().find(|t| t.id == id)
    }

    /// Render the template named `prompt_id`. Unknown or absent ids render the
    /// default template.
    pub(crate) fn build(prompt_id: Option<&str>, options: &PromptOptions) -> String {
        let template = match prompt_id.and_then(Self::get) {
            Some(template) => template,
            None => {
                if let Some(id) = prompt_id {
                    tracing::debug!(prompt_id = id, "unknown prompt, using the default");
                }

                Self::default_template()
            }
        };

        template
            .body
            .replace("{{cwd}}", &options.cwd)
            .replace("{{allowed_html}}", &options.allowed_html())
            .replace("{{modification_tag}}", &options.modification_tag)
    }

    fn default_template() -> &'static PromptTemplate {
        match Self::get(DEFAULT_PROMPT_ID) {
            Some(template) => template,
            None => &TEMPLATES[0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_template_renders() {
        let options = PromptOptions::default().with_cwd("/srv/app");

        for template in PromptLibrary::templates() {
            let prompt = PromptLibrary::build(Some(template.id), &options);

            assert!(!prompt.contains("{{"), "{} left a placeholder", template.id);
            assert!(prompt.contains("/srv/app"), "{} lacks the cwd", template.id);
        }
    }

    #[test]
    fn test_unknown_id_uses_default() {
        let options = PromptOptions::default();

        let default = PromptLibrary::build(None, &options);

        assert_eq!(PromptLibrary::build(Some("no-such-prompt"), &options), default);
        assert_eq!(PromptLibrary::build(Some(DEFAULT_PROMPT_ID), &options), default);
        assert_ne!(PromptLibrary::build(Some("concise"), &options), default);
    }

    #[test]
    fn test_formatting_constraints() {
        let options = PromptOptions {
            allowed_html_elements: vec!["b".to_string(), "code".to_string()],
            modification_tag: "edits".to_string(),
            ..Default::default()
        };

        let prompt = PromptLibrary::build(None, &options);

        assert!(prompt.contains("<b>, <code>"));
        assert!(prompt.contains("<edits>"));
    }
}
