use std::{fs, sync::Arc};

use prerender::{
    application::{
        host::ModuleSpec,
        pipeline::{ExportPipeline, ExportPlan},
        template::MountPoint,
    },
    domain::route::{RouteList, export_targets},
    infra::script_host::ScriptHostProvider,
};
use tempfile::TempDir;

const ENTRY_SERVER: &str = r#"
var pages = { "/": "<h1>Home</h1>", "/about": "<h1>About</h1>" };
module.exports.render = function (url) {
    if (!(url in pages)) { throw new Error("unknown route " + url); }
    return pages[url];
};
"#;

fn fixture() -> (TempDir, ExportPlan) {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path().join("dist");
    fs::create_dir_all(root.join("server")).expect("server dir");
    fs::write(
        root.join("index.html"),
        "<html><body><div id=\"root\"></div></body></html>",
    )
    .expect("write shell");
    fs::write(root.join("server/entry-server.js"), ENTRY_SERVER).expect("write module");

    let routes = RouteList::new(["/", "/about"]).expect("routes");
    let plan = ExportPlan {
        module: ModuleSpec {
            entry: root.join("server/entry-server.js"),
            export: "render".to_string(),
        },
        template_path: root.join("index.html"),
        mount: MountPoint::new("root"),
        require_placeholder: true,
        targets: export_targets(&routes, None),
        export_root: root,
        critical: None,
    };
    (dir, plan)
}

#[tokio::test]
async fn script_module_renders_every_route() {
    let (dir, plan) = fixture();

    let report = ExportPipeline::new(Arc::new(ScriptHostProvider), plan)
        .export()
        .await
        .expect("export succeeds");

    let root = dir.path().join("dist");
    assert_eq!(report.len(), 2);
    assert!(
        fs::read_to_string(root.join("index.html"))
            .expect("home")
            .contains("<div id=\"root\"><h1>Home</h1></div>")
    );
    assert!(
        fs::read_to_string(root.join("about/index.html"))
            .expect("about")
            .contains("<div id=\"root\"><h1>About</h1></div>")
    );
}

#[tokio::test]
async fn thrown_render_error_fails_with_route() {
    let (dir, mut plan) = fixture();
    let routes = RouteList::new(["/", "/pricing", "/about"]).expect("routes");
    plan.targets = export_targets(&routes, None);

    let err = ExportPipeline::new(Arc::new(ScriptHostProvider), plan)
        .export()
        .await
        .expect_err("unknown route");

    assert_eq!(err.stage(), "rendering");
    assert_eq!(err.route().map(|route| route.as_str()), Some("/pricing"));
    assert!(err.to_string().contains("unknown route /pricing"));
    assert!(!dir.path().join("dist/about").exists());
}

#[tokio::test]
async fn es_module_bundle_renders_every_route() {
    let (dir, plan) = fixture();
    let root = dir.path().join("dist");
    fs::write(
        root.join("server/pages.js"),
        "export const pages = { '/': '<h1>Home</h1>', '/about': '<h1>About</h1>' };",
    )
    .expect("write chunk");
    fs::write(
        root.join("server/entry-server.js"),
        "import { pages } from './pages.js';\nexport function render(url) { return pages[url]; }",
    )
    .expect("write module");

    let report = ExportPipeline::new(Arc::new(ScriptHostProvider), plan)
        .export()
        .await
        .expect("export succeeds");

    assert_eq!(report.len(), 2);
    assert!(
        fs::read_to_string(root.join("about/index.html"))
            .expect("about")
            .contains("<div id=\"root\"><h1>About</h1></div>")
    );
}
