//! Template rendering.
//!
//! The pipeline renders two templates per send: `<template>.html` (required)
//! and `<template>.txt` (optional). Renderers only need to resolve a template
//! name and fill it with the message context. The renderer family is picked
//! when the [`Mailer`](crate::Mailer) is built.

use std::path::Path;

use minijinja::{Environment, ErrorKind};
use tracing::debug;

/// Template parameters of a message.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Errors produced by a renderer.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The template does not exist.
    #[error("renderer: template `{template}` not found")]
    NotFound {
        /// Template name.
        template: String,
    },

    /// The template exists but failed to render.
    #[error("renderer: failed to render `{template}`: {source}")]
    Render {
        /// Template name.
        template: String,
        /// Engine error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RenderError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(template: impl Into<String>) -> Self {
        Self::NotFound {
            template: template.into(),
        }
    }

    /// Creates a render error from an engine failure.
    #[must_use]
    pub fn render(
        template: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Render {
            template: template.into(),
            source: source.into(),
        }
    }

    /// Returns true if the template was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Renders a named template with a context.
///
/// Implementations must be safe to share between concurrent sends.
pub trait Renderer: Send + Sync {
    /// Renders `template` with `context`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::NotFound`] if the template does not exist and
    /// [`RenderError::Render`] for any other failure.
    fn render(&self, template: &str, context: &Context) -> Result<String, RenderError>;
}

/// Jinja-family renderer backed by `minijinja`.
///
/// Templates whose name ends in `.html` are auto-escaped.
#[derive(Debug)]
pub struct JinjaRenderer {
    env: Environment<'static>,
}

impl JinjaRenderer {
    /// Creates a renderer loading templates from a directory on demand.
    #[must_use]
    pub fn from_dir(path: impl AsRef<Path>) -> Self {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(path.as_ref()));
        Self { env }
    }

    /// Creates a renderer from in-memory `(name, source)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a template does not parse.
    pub fn from_templates<I, N, S>(templates: I) -> Result<Self, RenderError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut env = Environment::new();
        for (name, source) in templates {
            let name: String = name.into();
            let source: String = source.into();
            env.add_template_owned(name.clone(), source)
                .map_err(|e| RenderError::render(name, e))?;
        }
        Ok(Self { env })
    }
}

impl Renderer for JinjaRenderer {
    fn render(&self, template: &str, context: &Context) -> Result<String, RenderError> {
        debug!(template, "Rendering template");
        let tmpl = self.env.get_template(template).map_err(|e| {
            if e.kind() == ErrorKind::TemplateNotFound {
                RenderError::not_found(template)
            } else {
                RenderError::render(template, e)
            }
        })?;
        tmpl.render(context)
            .map_err(|e| RenderError::render(template, e))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: serde_json::Value) -> Context {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_in_memory_template() {
        let renderer =
            JinjaRenderer::from_templates([("welcome.txt", "Hello {{ name }}!")]).unwrap();
        let out = renderer
            .render("welcome.txt", &context(json!({"name": "Morty"})))
            .unwrap();
        assert_eq!(out, "Hello Morty!");
    }

    #[test]
    fn test_html_templates_are_escaped() {
        let renderer = JinjaRenderer::from_templates([("page.html", "<p>{{ body }}</p>")]).unwrap();
        let out = renderer
            .render("page.html", &context(json!({"body": "Tom & <Jerry>"})))
            .unwrap();
        assert_eq!(out, "<p>Tom &amp; &lt;Jerry&gt;</p>");
    }

    #[test]
    fn test_missing_template_is_not_found() {
        let renderer = JinjaRenderer::from_templates([("a.html", "a")]).unwrap();
        let err = renderer.render("b.html", &Context::new()).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "renderer: template `b.html` not found");
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        let err = JinjaRenderer::from_templates([("bad.html", "{% if %}")]).unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_render_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("simple.html"), "<h1>{{ title }}</h1>").unwrap();
        let renderer = JinjaRenderer::from_dir(dir.path());

        let out = renderer
            .render("simple.html", &context(json!({"title": "Hi"})))
            .unwrap();
        assert_eq!(out, "<h1>Hi</h1>");
        assert!(renderer.render("simple.txt", &Context::new()).unwrap_err().is_not_found());
    }
}
