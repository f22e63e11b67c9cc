use arbor_core::types::{BranchName, OwnerId, Project, ProjectId, ProjectType};
use arbor_templates::{RenderError, Renderer, TemplateContext, TemplateEngine};
use chrono::Utc;
use rstest::rstest;
use tempfile::TempDir;

fn make_project(kind: ProjectType) -> Project {
    let now = Utc::now();
    Project {
        id: ProjectId(5),
        owner: OwnerId::from("ada"),
        name: "Landing Page".to_string(),
        project_type: kind,
        remote_repo: None,
        remote_branch: BranchName::default(),
        created_at: now,
        updated_at: now,
    }
}

fn write(dir: &std::path::Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

#[test]
fn user_template_overrides_embedded_one() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".arbor").join("templates");
    write(&dir, "html/index.html.tera", "<p>{{ project.slug }}</p>");

    let renderer = Renderer::with_user_templates_at(home.path()).unwrap();
    let tree = renderer.render(&make_project(ProjectType::Html)).unwrap();
    assert_eq!(tree.content_of("index.html"), Some("<p>landing-page</p>"));
    assert!(tree.contains("style.css"), "other embedded files remain");
}

#[test]
fn user_template_can_add_nested_files() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".arbor").join("templates");
    write(&dir, "node/lib/routes/health.js.tera", "export const name = '{{ project.name }}';");
    write(&dir, "node/notes.txt", "ignored: not a .tera file");

    let renderer = Renderer::with_user_templates_at(home.path()).unwrap();
    let tree = renderer.render(&make_project(ProjectType::Node)).unwrap();
    assert_eq!(
        tree.content_of("lib/routes/health.js"),
        Some("export const name = 'Landing Page';")
    );
    assert!(tree.get("lib/routes").unwrap().is_folder());
    assert!(!tree.contains("notes.txt"));
}

#[test]
fn missing_user_dir_falls_back_to_embedded() {
    let home = TempDir::new().unwrap();
    let renderer = Renderer::with_user_templates_at(home.path()).unwrap();
    let tree = renderer.render(&make_project(ProjectType::Blank)).unwrap();
    assert!(tree.content_of("README.md").unwrap().starts_with("# Landing Page"));
}

#[test]
fn broken_user_template_is_a_tera_error() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join("tpl");
    write(&dir, "blank/README.md.tera", "{{ unclosed");
    let err = TemplateEngine::new(Some(&dir)).err().expect("must fail");
    assert!(matches!(err, RenderError::Tera(_)), "got: {err}");
}

#[test]
fn template_names_are_scoped_to_kind() {
    let engine = TemplateEngine::new(None).unwrap();
    let names = engine.template_names(ProjectType::Html);
    assert_eq!(
        names,
        vec!["html/index.html.tera", "html/script.js.tera", "html/style.css.tera"]
    );
    let ctx = TemplateContext::from_project(&make_project(ProjectType::Html));
    let tree = engine.render(&ctx, ProjectType::Html).unwrap();
    assert_eq!(tree.file_count(), 3);
}

#[rstest]
#[case(ProjectType::Blank, "README.md", 1)]
#[case(ProjectType::Html, "index.html", 3)]
#[case(ProjectType::Node, "server.js", 2)]
#[case(ProjectType::ReactTailwind, "src/App.tsx", 6)]
fn embedded_template_renders_entry_file(
    #[case] kind: ProjectType,
    #[case] entry: &str,
    #[case] files: usize,
) {
    let engine = TemplateEngine::new(None).unwrap();
    let ctx = TemplateContext::from_project(&make_project(kind));
    let tree = engine.render(&ctx, kind).unwrap();
    assert!(tree.get(entry).unwrap().is_file(), "{entry} missing for {kind:?}");
    assert_eq!(tree.file_count(), files);
}
