use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.render.template_dir = Some(PathBuf::from("from-file"));

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        template_dir: Some(PathBuf::from("from-cli")),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.render.template_dir, PathBuf::from("from-cli"));
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(!settings.cache.disabled);
    assert_eq!(settings.cache.prefix, "content_blocks");
    assert_eq!(settings.cache.backend, CacheBackend::Database);
    assert_eq!(settings.cache.memory_limit, 1000);
    assert!(settings.cache.dedupe_inflight);
    assert_eq!(settings.cache.max_nesting_depth, 32);
    assert_eq!(settings.cache.parent_kinds, vec!["collection".to_string()]);
    assert_eq!(settings.database.max_connections.get(), 4);
    assert_eq!(
        settings.render.template_prefix,
        "content_blocks/content_blocks"
    );
    assert_eq!(settings.render.context_name, "content_block");
    assert!(settings.render.autoescape);
    assert!(settings.render.pre_render);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_global_overrides(&GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn rejects_invalid_values() {
    let cases: Vec<(&str, Box<dyn Fn(&mut RawSettings)>)> = vec![
        ("cache.prefix", Box::new(|raw: &mut RawSettings| raw.cache.prefix = Some("  ".into()))),
        ("cache.memory_limit", Box::new(|raw: &mut RawSettings| raw.cache.memory_limit = Some(0))),
        (
            "cache.max_nesting_depth",
            Box::new(|raw: &mut RawSettings| raw.cache.max_nesting_depth = Some(0)),
        ),
        ("cache.backend", Box::new(|raw: &mut RawSettings| raw.cache.backend = Some("redis".into()))),
        (
            "cache.parent_kinds",
            Box::new(|raw: &mut RawSettings| raw.cache.parent_kinds = Some(vec![" ".into()])),
        ),
        (
            "render.context_name",
            Box::new(|raw: &mut RawSettings| raw.render.context_name = Some(String::new())),
        ),
        ("logging.level", Box::new(|raw: &mut RawSettings| raw.logging.level = Some("loud".into()))),
        (
            "database.max_connections",
            Box::new(|raw: &mut RawSettings| raw.database.max_connections = Some(0)),
        ),
    ];

    for (expected, mutate) in cases {
        let mut raw = RawSettings::default();
        mutate(&mut raw);
        match Settings::from_raw(raw) {
            Err(LoadError::Invalid { key, .. }) => assert_eq!(key, expected),
            other => panic!("expected invalid `{expected}`, got {other:?}"),
        }
    }
}

#[test]
fn memory_backend_is_case_insensitive() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("Memory".into());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.apply_database_override(&DatabaseOverride {
        database_url: Some("   ".into()),
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn parse_set_cache_arguments() {
    let args = CliArgs::parse_from([
        "content-blocks",
        "set-cache",
        "--database-url",
        "postgres://example",
        "--block",
        "3",
        "--block",
        "7",
    ]);

    match args.command {
        Command::SetCache(set) => {
            assert_eq!(
                set.database.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(set.blocks, vec![3, 7]);
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "content-blocks",
        "--log-level",
        "warn",
        "render",
        "--block",
        "12",
        "--site",
        "2",
    ]);

    assert_eq!(args.overrides.log_level.as_deref(), Some("warn"));
    match args.command {
        Command::Render(render) => {
            assert_eq!(render.block, 12);
            assert_eq!(render.site, Some(2));
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
fn parse_template_document_arguments() {
    let args = CliArgs::parse_from(["content-blocks", "import-templates", "/tmp/templates.json"]);

    match args.command {
        Command::ImportTemplates(import) => {
            assert_eq!(import.file, std::path::Path::new("/tmp/templates.json"));
            assert!(import.database.database_url.is_none());
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
fn command_database_override_is_applied() {
    let args = CliArgs::parse_from([
        "content-blocks",
        "warm-cache",
        "--database-url",
        "postgres://warm",
    ]);
    let mut raw = RawSettings::default();
    raw.apply_database_override(args.command.database());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.database.url.as_deref(), Some("postgres://warm"));
}
