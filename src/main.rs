use std::{path::Path, process, sync::Arc};

use content_blocks::{
    application::{
        content_blocks::{ContentBlocks, ContentBlocksConfig},
        error::AppError,
        filters::BlockSubset,
        parents::parent_sites,
        render::TemplateRenderer,
        repos::Repositories,
        templates::TemplateDocument,
    },
    cache::{BulkReport, CacheBackend, CacheConfig, CacheStore, MemoryCacheStore},
    config,
    domain::{
        entities::Site,
        types::{BlockId, SiteId},
    },
    infra::{
        db::{PostgresCacheStore, PostgresRepositories},
        error::InfraError,
        telemetry,
        templates::MiniJinjaRenderer,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    telemetry::init(&settings.logging)?;

    let repositories = init_repositories(&settings).await?;
    let app = build_content_blocks(repositories.clone(), &settings);

    match cli_args.command {
        config::Command::Migrate(_) => {
            info!("database migrations applied");
            Ok(())
        }
        config::Command::ClearCache(_) => run_clear_cache(&app, &repositories, &settings).await,
        config::Command::SetCache(args) => {
            let subset = if args.blocks.is_empty() {
                BlockSubset::all()
            } else {
                BlockSubset::only(args.blocks.into_iter().map(BlockId))
            };
            let report = app.cache().set_cache_all(&subset).await?;
            log_report("set-cache", report);
            Ok(())
        }
        config::Command::WarmCache(_) => {
            let report = app.cache().get_or_set_cache_all().await?;
            log_report("warm-cache", report);
            Ok(())
        }
        config::Command::UpdateCache(args) => {
            let block = BlockId(args.block);
            let site = resolve_site(&app, block, args.site).await?;
            app.cache().update_cache(block, None, site.as_ref()).await?;
            info!(block_id = %block, "cache updated");
            Ok(())
        }
        config::Command::Render(args) => run_render(&app, args).await,
        config::Command::ExportTemplates(args) => run_export_templates(&app, &args.file).await,
        config::Command::ImportTemplates(args) => run_import_templates(&app, &args.file).await,
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(InfraError::from)?;

    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(InfraError::from)?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(InfraError::from)?;

    Ok(Arc::new(repositories))
}

fn build_content_blocks(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> ContentBlocks {
    let config = ContentBlocksConfig::from(settings);
    let renderer: Arc<dyn TemplateRenderer> = Arc::new(MiniJinjaRenderer::new(
        settings.render.template_dir.clone(),
        settings.render.autoescape,
    ));
    let store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new(&config.cache)),
        CacheBackend::Database => {
            Arc::new(PostgresCacheStore::new(repositories.pool().clone()))
        }
    };

    ContentBlocks::new(
        Repositories::from_shared(repositories),
        renderer,
        store,
        config,
    )
}

async fn run_clear_cache(
    app: &ContentBlocks,
    repositories: &PostgresRepositories,
    settings: &config::Settings,
) -> Result<(), AppError> {
    let report = app.cache().delete_cache_all().await?;
    log_report("clear-cache", report);

    // Entries of blocks no longer attached to any parent are only reachable by prefix.
    let cache = CacheConfig::from(&settings.cache);
    if cache.backend == CacheBackend::Database {
        let purged = PostgresCacheStore::new(repositories.pool().clone())
            .purge_prefix(&cache.prefix)
            .await?;
        info!(purged, prefix = %cache.prefix, "stale cache entries purged");
    }
    Ok(())
}

async fn run_render(app: &ContentBlocks, args: config::BlockArgs) -> Result<(), AppError> {
    let block = BlockId(args.block);
    let site = resolve_site(app, block, args.site).await?;
    let node = app.loader().load(block).await?;

    let html = if app.cache().can_cache(&node) {
        app.cache()
            .get_or_set_cache(&node, None, site.as_ref())
            .await?
    } else {
        app.renderer().render_html(&node, None, site.as_ref())?
    };
    println!("{html}");
    Ok(())
}

/// Find `site` among the sites of the parents holding `block`'s root.
async fn resolve_site(
    app: &ContentBlocks,
    block: BlockId,
    site: Option<i64>,
) -> Result<Option<Site>, AppError> {
    let Some(site_id) = site.map(SiteId) else {
        return Ok(None);
    };

    let loader = app.loader();
    let root = loader.root_of(loader.find(block).await?).await?;
    let parents = loader.repos().parents.clone();
    for parent in parents.parents_of_block(root.id).await? {
        let Some(record) = parents.find_parent(&parent).await? else {
            continue;
        };
        if let Some(site) = parent_sites(&record)
            .into_iter()
            .flatten()
            .find(|candidate| candidate.id == site_id)
        {
            return Ok(Some(site));
        }
    }
    Err(AppError::not_found("site", site_id))
}

async fn run_export_templates(app: &ContentBlocks, file: &Path) -> Result<(), AppError> {
    let document = app.templates().export().await?;
    let json = serde_json::to_string_pretty(&document).map_err(InfraError::from)?;
    tokio::fs::write(file, json)
        .await
        .map_err(|err| InfraError::file(file, err))?;

    info!(
        path = %file.display(),
        templates = document.templates.len(),
        "templates exported"
    );
    Ok(())
}

async fn run_import_templates(app: &ContentBlocks, file: &Path) -> Result<(), AppError> {
    let payload = tokio::fs::read_to_string(file)
        .await
        .map_err(|err| InfraError::file(file, err))?;
    let document: TemplateDocument = serde_json::from_str(&payload).map_err(InfraError::from)?;
    let report = app.templates().import(&document).await?;

    info!(
        path = %file.display(),
        templates = report.templates,
        fields_created = report.fields_created,
        fields_deleted = report.fields_deleted,
        block_fields_created = report.block_fields_created,
        "templates imported"
    );
    log_report("import-templates", report.cache);
    Ok(())
}

fn log_report(command: &'static str, report: BulkReport) {
    info!(
        command,
        parents = report.parents,
        blocks = report.blocks,
        unrenderable = report.unrenderable,
        "cache command finished"
    );
}
