//! Template context: serializable rendering payload built from a [`Project`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbor_core::types::Project;

use crate::error::RenderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    pub project: ProjectCtx,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCtx {
    pub id: u64,
    pub owner: String,
    pub name: String,
    /// npm-safe lowercase name.
    pub slug: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub generated_at: DateTime<Utc>,
    pub generator: String,
}

impl TemplateContext {
    pub fn from_project(project: &Project) -> Self {
        TemplateContext {
            project: ProjectCtx {
                id: project.id.0,
                owner: project.owner.to_string(),
                name: project.name.clone(),
                slug: project.slug(),
                kind: project.project_type.to_string(),
            },
            meta: MetaCtx {
                generated_at: Utc::now(),
                generator: format!("arbor {}", env!("CARGO_PKG_VERSION")),
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}
