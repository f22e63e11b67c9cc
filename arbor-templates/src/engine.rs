//! Tera rendering engine: starter files per [`ProjectType`].
//!
//! # Template naming
//!
//! A template named `<kind>/<path>.tera` renders to `<path>` in the new
//! project's tree, e.g. `react-tailwind/src/App.tsx.tera` → `src/App.tsx`.
//! User templates under `~/.arbor/templates/` follow the same layout; a user
//! template with the same name replaces the embedded one, any other name adds
//! a file to that kind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use arbor_core::registry::arbor_root;
use arbor_core::tree::{FsNode, Tree};
use arbor_core::types::{Project, ProjectType};

use crate::context::TemplateContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked in with include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("blank/README.md.tera", include_str!("templates/blank/README.md.tera")),
    ("html/index.html.tera", include_str!("templates/html/index.html.tera")),
    ("html/style.css.tera", include_str!("templates/html/style.css.tera")),
    ("html/script.js.tera", include_str!("templates/html/script.js.tera")),
    (
        "react-tailwind/index.html.tera",
        include_str!("templates/react-tailwind/index.html.tera"),
    ),
    (
        "react-tailwind/package.json.tera",
        include_str!("templates/react-tailwind/package.json.tera"),
    ),
    (
        "react-tailwind/vite.config.ts.tera",
        include_str!("templates/react-tailwind/vite.config.ts.tera"),
    ),
    (
        "react-tailwind/src/App.tsx.tera",
        include_str!("templates/react-tailwind/src/App.tsx.tera"),
    ),
    (
        "react-tailwind/src/main.tsx.tera",
        include_str!("templates/react-tailwind/src/main.tsx.tera"),
    ),
    (
        "react-tailwind/src/index.css.tera",
        include_str!("templates/react-tailwind/src/index.css.tera"),
    ),
    ("node/server.js.tera", include_str!("templates/node/server.js.tera")),
    ("node/package.json.tera", include_str!("templates/node/package.json.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

/// Slash-separated template name. Case is kept: it becomes a file path.
fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<(Tera, Vec<String>), RenderError> {
    let mut templates: BTreeMap<String, String> = BTreeMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let names: Vec<String> = templates.keys().cloned().collect();
    let mut tera = Tera::default();
    tera.add_raw_templates(templates)?;
    Ok((tera, names))
}

/// Output path of a template belonging to `kind`, or `None` if it belongs
/// to another kind.
fn output_path<'a>(template: &'a str, kind: ProjectType) -> Option<&'a str> {
    template
        .strip_prefix(kind.as_str())?
        .strip_prefix('/')?
        .strip_suffix(".tera")
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
pub struct TemplateEngine {
    tera: Tera,
    names: Vec<String>,
}

impl TemplateEngine {
    /// Load embedded templates plus any overrides found in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let (tera, names) = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera, names })
    }

    /// Names of the templates that make up `kind`, sorted.
    pub fn template_names(&self, kind: ProjectType) -> Vec<&str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(|name| output_path(name, kind).is_some())
            .collect()
    }

    /// Render every template of `kind` into a tree.
    pub fn render(&self, ctx: &TemplateContext, kind: ProjectType) -> Result<Tree, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let mut tree = Tree::new();
        for name in self.template_names(kind) {
            let Some(path) = output_path(name, kind) else {
                continue;
            };
            let content = self.tera.render(name, &tera_ctx)?;
            tree.put(FsNode::file(path, content))
                .map_err(|source| RenderError::Tree {
                    template: name.to_string(),
                    source,
                })?;
        }
        Ok(tree)
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders the starter tree of a new project. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(None)? })
    }

    /// Embedded templates plus overrides from `<home>/.arbor/templates/`.
    pub fn with_user_templates_at(home: &Path) -> Result<Self, RenderError> {
        let dir = arbor_root(home).join("templates");
        Ok(Renderer { engine: TemplateEngine::new(Some(&dir))? })
    }

    /// Starter tree for `project`, chosen by its type. Imported projects get
    /// an empty tree.
    pub fn render(&self, project: &Project) -> Result<Tree, RenderError> {
        let ctx = TemplateContext::from_project(project);
        self.render_with_context(&ctx, project.project_type)
    }

    pub fn render_with_context(
        &self,
        ctx: &TemplateContext,
        kind: ProjectType,
    ) -> Result<Tree, RenderError> {
        self.engine.render(ctx, kind)
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
