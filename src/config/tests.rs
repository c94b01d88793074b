use std::path::Path;

use super::*;

fn cli(args: &[&str]) -> CliArgs {
    let mut argv = vec!["prerender"];
    argv.extend_from_slice(args);
    CliArgs::parse_from(argv)
}

#[test]
fn defaults_describe_a_standard_client_build() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.export.root, Path::new("dist"));
    assert_eq!(settings.export.template_path(), Path::new("dist/index.html"));
    assert_eq!(
        settings
            .export
            .routes
            .iter()
            .map(Route::as_str)
            .collect::<Vec<_>>(),
        vec!["/"]
    );
    assert!(settings.export.not_found_route.is_none());
    assert_eq!(settings.module.entry, Path::new("dist/server/entry-server.js"));
    assert_eq!(settings.module.export, "render");
    assert_eq!(settings.mount.element_id, "root");
    assert!(settings.mount.require_placeholder);
    assert!(settings.critical.enabled);
    assert_eq!(settings.critical.preload, PreloadStrategy::Media);
    assert!(!settings.critical.inline_fonts);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn bare_command_parses() {
    let args = cli(&[]);
    assert!(args.config_file.is_none());
    assert!(args.routes.is_empty());
    assert!(!args.no_critical);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.export.routes = Some(vec!["/".to_string(), "/pricing".to_string()]);
    raw.logging.level = Some("info".to_string());

    raw.apply_cli_overrides(&cli(&[
        "--route",
        "/",
        "--route",
        "/about/",
        "--export-root",
        "build/client",
        "--log-level",
        "debug",
        "--no-critical",
    ]));
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(
        settings
            .export
            .routes
            .iter()
            .map(Route::as_str)
            .collect::<Vec<_>>(),
        vec!["/", "/about"]
    );
    assert_eq!(settings.export.root, Path::new("build/client"));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(!settings.critical.enabled);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_cli_overrides(&cli(&["--log-json", "yes"]));
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn colliding_routes_are_rejected() {
    let mut raw = RawSettings::default();
    raw.export.routes = Some(vec!["/about".to_string(), "/about/".to_string()]);

    let err = Settings::from_raw(raw).expect_err("duplicate routes");
    assert!(matches!(err, LoadError::Invalid { key: "export.routes", .. }));
}

#[test]
fn malformed_routes_are_rejected() {
    for route in ["about", "/../secrets", "/a?b", "/a#b"] {
        let mut raw = RawSettings::default();
        raw.export.routes = Some(vec![route.to_string()]);
        assert!(
            matches!(
                Settings::from_raw(raw),
                Err(LoadError::Invalid {
                    key: "export.routes",
                    ..
                })
            ),
            "`{route}` should be rejected"
        );
    }
}

#[test]
fn empty_route_list_is_rejected() {
    let mut raw = RawSettings::default();
    raw.export.routes = Some(Vec::new());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "export.routes",
            ..
        })
    ));
}

#[test]
fn not_found_route_is_normalised() {
    let mut raw = RawSettings::default();
    raw.apply_cli_overrides(&cli(&["--not-found-route", "/404/"]));
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(
        settings.export.not_found_route.as_ref().map(Route::as_str),
        Some("/404")
    );
}

#[test]
fn mount_and_module_names_are_validated() {
    let mut raw = RawSettings::default();
    raw.mount.element_id = Some("  ".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "mount.element_id",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.mount.element_id = Some("app\"><script".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.module.export = Some("render-page".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "module.export",
            ..
        })
    ));
}

#[test]
fn critical_strategies_are_parsed() {
    let mut raw = RawSettings::default();
    raw.critical.keyframes = Some("all".to_string());
    raw.apply_cli_overrides(&cli(&["--critical-preload", "swap"]));
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.critical.preload, PreloadStrategy::Swap);
    assert_eq!(settings.critical.keyframes, KeyframesStrategy::All);

    let mut raw = RawSettings::default();
    raw.critical.preload = Some("eager".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "critical.preload",
            ..
        })
    ));
}

#[test]
fn settings_file_is_layered_under_cli() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("site.toml");
    std::fs::write(
        &path,
        "[export]\nroot = \"out\"\nroutes = [\"/\", \"/docs\"]\n\n[mount]\nelement_id = \"app\"\n",
    )
    .expect("write config");

    let path_arg = path.to_string_lossy().into_owned();
    let settings = load(&cli(&["--config-file", &path_arg, "--export-root", "public"]))
        .expect("valid settings");

    assert_eq!(settings.export.root, Path::new("public"));
    assert_eq!(settings.export.routes.len(), 2);
    assert_eq!(settings.mount.element_id, "app");
}
