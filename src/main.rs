use anyhow::{Context, Result};
use file_gateway::{
    app,
    config::{AppConfig, Command},
    services::{
        file_service::FileService,
        metadata::MetadataStore,
        object_store::{DiskObjectStore, ObjectStore},
        reconcile,
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting file-gateway with config: {:?}", cfg);

    // --- Metadata store ---
    let metadata = MetadataStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening metadata store at {}", cfg.database_url))?;
    metadata.migrate().await.context("applying migrations")?;

    // --- Object store ---
    let disk = DiskObjectStore::new(&cfg.storage_dir);
    tokio::fs::create_dir_all(disk.root())
        .await
        .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
    let objects: Arc<dyn ObjectStore> = Arc::new(disk);

    let service = FileService::new(metadata, objects, cfg.public_url_base.clone());

    match command {
        Command::Serve => serve(&cfg, service).await,
        Command::Migrate => {
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Command::CreateUser { name, admin } => {
            let user = service.metadata.create_user(&name, admin).await?;
            println!("created user {} ({}), admin={}", user.id, user.name, user.is_admin);
            println!("token: {}", user.api_token);
            Ok(())
        }
        Command::RegenerateToken { user_id } => {
            let token = service
                .metadata
                .regenerate_token(user_id)
                .await?
                .with_context(|| format!("no user with id {user_id}"))?;
            println!("token: {token}");
            Ok(())
        }
        Command::CreateBucket { name } => {
            service.objects.create_bucket(&name).await?;
            let bucket = match service.metadata.find_bucket_by_name(&name).await? {
                Some(existing) => existing,
                None => service.metadata.create_bucket(&name).await?,
            };
            println!("bucket {} ({}) ready", bucket.id, bucket.name);
            Ok(())
        }
        Command::Grant { user_id, bucket } => {
            let user = service
                .metadata
                .find_user(user_id)
                .await?
                .with_context(|| format!("no user with id {user_id}"))?;
            let bucket = service
                .metadata
                .find_bucket_by_name(&bucket)
                .await?
                .with_context(|| format!("no bucket named {bucket}"))?;
            service.metadata.add_member(user.id, bucket.id).await?;
            println!("user {} is now a member of {}", user.name, bucket.name);
            Ok(())
        }
        Command::Audit => {
            let report = reconcile::audit(&service).await.context("auditing stores")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn serve(cfg: &AppConfig, service: FileService) -> Result<()> {
    let router = app(service, cfg.max_upload_bytes);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;

    Ok(())
}
