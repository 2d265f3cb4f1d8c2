//! Notification text rendering with minijinja.
//!
//! Jobs keep their subject and body templates as constants and render them
//! against their own serializable context. Webhook body templates are
//! rendered against the [`Notification`](crate::Notification) itself.

use minijinja::Environment;
use serde::Serialize;

use crate::traits::NotifyError;

/// One configured minijinja environment, shared by every render.
///
/// Besides the builtin filters it adds `round(n)`, which formats a number
/// with exactly `n` decimals (`92.038 | round(1)` is `"92.0"`), and an
/// `env("NAME")` function that reads the process environment.
#[derive(Debug)]
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("round", fixed_decimals);
        env.add_function("env", env_var);
        Self { env }
    }

    /// Render `source` with any serializable context.
    pub fn render<S: Serialize>(&self, source: &str, ctx: &S) -> Result<String, NotifyError> {
        self.env
            .render_str(source, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Parse `source` without rendering it. Filters and functions are
    /// resolved at render time, so a bare environment is enough here.
    pub fn validate(&self, source: &str) -> Result<(), NotifyError> {
        Environment::new()
            .template_from_str(source)
            .map(|_| ())
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn fixed_decimals(value: f64, decimals: Option<u32>) -> String {
    format!("{value:.*}", decimals.unwrap_or(0) as usize)
}

/// Unset variables render as empty text.
fn env_var(name: String) -> String {
    std::env::var(&name).unwrap_or_else(|_| {
        tracing::warn!(var = %name, "Template referenced unset env var");
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn budget_line() -> serde_json::Value {
        json!({
            "farm_id": "farm-7",
            "category": "Feed",
            "budgeted": 1200.0,
            "spent": 1104.4,
            "percent": 92.038,
            "tags": ["livestock", "q3"],
            "note": null,
        })
    }

    #[test]
    fn renders_fields_from_json_context() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("{{ category }} on {{ farm_id }}", &budget_line())
            .unwrap();
        assert_eq!(result, "Feed on farm-7");
    }

    #[test]
    fn round_formats_fixed_decimals() {
        let renderer = TemplateRenderer::new();
        let ctx = budget_line();
        assert_eq!(renderer.render("{{ percent | round(1) }}%", &ctx).unwrap(), "92.0%");
        assert_eq!(renderer.render("{{ spent | round }}", &ctx).unwrap(), "1104");
        assert_eq!(renderer.render("{{ spent | round(2) }}", &ctx).unwrap(), "1104.40");
    }

    #[test]
    fn builtin_case_filters_still_work() {
        let renderer = TemplateRenderer::new();
        let ctx = budget_line();
        assert_eq!(renderer.render("{{ category | upper }}", &ctx).unwrap(), "FEED");
        assert_eq!(renderer.render("{{ category | lower }}", &ctx).unwrap(), "feed");
    }

    #[test]
    fn env_function_reads_process_env() {
        std::env::set_var("FK_NOTIFY_TEST_VAR", "north-field");
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("Site: {{ env('FK_NOTIFY_TEST_VAR') }}", &budget_line())
            .unwrap();
        assert_eq!(result, "Site: north-field");
        std::env::remove_var("FK_NOTIFY_TEST_VAR");
    }

    #[test]
    fn unset_env_renders_empty() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("[{{ env('FK_DEFINITELY_NOT_SET_XYZ') }}]", &budget_line())
            .unwrap();
        assert_eq!(result, "[]");
    }

    #[test]
    fn render_null_field() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("Note: {{ note }}", &budget_line()).unwrap();
        assert_eq!(result, "Note: none");
    }

    #[test]
    fn render_loop_over_tags() {
        let renderer = TemplateRenderer::new();
        let template = "{% for t in tags %}{{ t }}{% if not loop.last %}, {% endif %}{% endfor %}";
        let result = renderer.render(template, &budget_line()).unwrap();
        assert_eq!(result, "livestock, q3");
    }

    #[test]
    fn render_struct_context() {
        #[derive(Serialize)]
        struct Digest {
            active_workers: usize,
            total_hours: f64,
        }
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render(
                "{{ active_workers }} workers, {{ total_hours | round(1) }}h",
                &Digest {
                    active_workers: 3,
                    total_hours: 17.26,
                },
            )
            .unwrap();
        assert_eq!(result, "3 workers, 17.3h");
    }

    #[test]
    fn unclosed_expression_is_template_error() {
        let renderer = TemplateRenderer::new();
        match renderer.render("{{ unclosed", &budget_line()) {
            Err(NotifyError::Template(msg)) => assert!(!msg.is_empty()),
            other => panic!("Expected Template error, got: {other:?}"),
        }
    }

    #[test]
    fn validate_parses_without_rendering() {
        let renderer = TemplateRenderer::new();
        assert!(renderer.validate("Hello {{ category }}").is_ok());
        assert!(renderer.validate("{{ unclosed").is_err());
    }
}
