//! Starter project templates.
//!
//! A template is a YAML document listing files to seed into a fresh workspace
//! mirror. The whole document is rendered through Tera first, so any file may
//! reference `{{ port }}` or `{{ project_name }}`.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tera::{Context, Tera};

/// Built-in React + Vite starter.
pub const BUILTIN_TEMPLATE: &str = include_str!("../templates/react-vite.yaml");

/// A hydrated starter project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectTemplate {
    pub name: String,
    pub files: Vec<TemplateFile>,
}

/// One file of a starter project, path relative to the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFile {
    pub path: String,
    pub content: String,
}

impl ProjectTemplate {
    /// Render the built-in starter for a sandbox bound to `port`.
    pub fn builtin(project_name: &str, port: u16) -> Result<Self> {
        hydrate_project_template(BUILTIN_TEMPLATE, &template_vars(project_name, port))
    }

    pub fn file(&self, path: &str) -> Option<&TemplateFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Standard variables passed to every starter template.
pub fn template_vars(project_name: &str, port: u16) -> HashMap<String, String> {
    HashMap::from([
        ("project_name".to_string(), project_name.to_string()),
        ("port".to_string(), port.to_string()),
    ])
}

/// Hydrates a YAML project template with the provided variables.
///
/// # Example
/// ```ignore
/// let yaml = r#"
/// name: "mini"
/// files:
///   - path: vite.config.ts
///     content: "export default { server: { port: {{ port }} } }"
/// "#;
/// let template = hydrate_project_template(yaml, &template_vars("demo", 41000))?;
/// assert!(template.files[0].content.contains("41000"));
/// ```
pub fn hydrate_project_template(
    yaml_content: &str,
    vars: &HashMap<String, String>,
) -> Result<ProjectTemplate> {
    let mut tera = Tera::default();
    let mut context = Context::new();
    for (key, value) in vars {
        context.insert(key, value);
    }

    let rendered_yaml = tera
        .render_str(yaml_content, &context)
        .map_err(|e| crate::error::Error::Template(e.to_string()))?;

    let template: ProjectTemplate = serde_yaml::from_str(&rendered_yaml)
        .map_err(|e| crate::error::Error::Template(e.to_string()))?;

    if template.files.is_empty() {
        return Err(crate::error::Error::Template(format!(
            "template '{}' has no files",
            template.name
        )));
    }

    Ok(template)
}
