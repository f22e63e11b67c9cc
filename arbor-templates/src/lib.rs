//! # arbor-templates
//!
//! Tera-based expansion of starter files for new projects.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arbor_templates::Renderer;
//! use arbor_core::types::Project;
//!
//! fn starter_files(project: &Project) {
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(tree) = renderer.render(project) {
//!             for file in tree.files() {
//!                 println!("{}: {} bytes", file.path, file.content().len());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::TemplateContext;
pub use engine::{Renderer, TemplateEngine};
pub use error::RenderError;
