//! adbandit CLI entry point

use std::collections::HashMap;
use std::sync::Arc;

use adbandit::adapters::RestPlatform;
use adbandit::cli::{commands, ArmCommands, CampaignCommands, Cli, Commands};
use adbandit::domain::models::CampaignStatus;
use adbandit::domain::ports::{
    AdPlatform, CampaignRepository, ChangeLogRepository, PosteriorRepository,
};
use adbandit::infrastructure::config::ConfigLoader;
use adbandit::infrastructure::credentials::PlatformCredentials;
use adbandit::infrastructure::database::{
    CampaignRepositoryImpl, ChangeLogRepositoryImpl, DatabaseConnection, PosteriorRepositoryImpl,
};
use adbandit::infrastructure::logging;
use adbandit::services::Engine;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    // Initialize database connection
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    let database_url = format!("sqlite:{}", config.database.path);
    let db = DatabaseConnection::new(&database_url)
        .await
        .context("Failed to connect to database")?;
    db.migrate()
        .await
        .context("Failed to run database migrations")?;

    // Initialize repositories for the read/admin paths
    let campaigns: Arc<dyn CampaignRepository> =
        Arc::new(CampaignRepositoryImpl::new(db.pool().clone()));
    let posteriors: Arc<dyn PosteriorRepository> =
        Arc::new(PosteriorRepositoryImpl::new(db.pool().clone()));
    let changes: Arc<dyn ChangeLogRepository> =
        Arc::new(ChangeLogRepositoryImpl::new(db.pool().clone()));

    match cli.command {
        Commands::Run => {
            let mut platforms: HashMap<String, Arc<dyn AdPlatform>> = HashMap::new();
            for platform_config in &config.platforms {
                let credentials = PlatformCredentials::from_env(&platform_config.name);
                let Some(api_key) = credentials.api_key else {
                    warn!(
                        platform = %platform_config.name,
                        "no credentials; bids and polling disabled for this platform"
                    );
                    continue;
                };
                match RestPlatform::new(
                    platform_config.name.clone(),
                    platform_config.base_url.clone(),
                    platform_config.account_id.clone(),
                    api_key,
                ) {
                    Ok(platform) => {
                        platforms.insert(platform_config.name.clone(), Arc::new(platform));
                    }
                    Err(e) => {
                        warn!(platform = %platform_config.name, error = %e, "platform setup failed");
                    }
                }
            }

            let (engine, _events) = Engine::build(config, db.pool().clone(), platforms);
            let handle = engine.handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.stop();
                }
            });

            let result = engine.run().await;
            db.close().await;
            result
        }
        Commands::Campaign(cmd) => match cmd {
            CampaignCommands::Create {
                name,
                budget,
                kpi,
                risk_tolerance,
                variance_limit,
                cadence_min,
            } => {
                commands::campaign_create(
                    &campaigns,
                    &config.engine,
                    commands::CampaignCreateArgs {
                        name,
                        budget,
                        kpi,
                        risk_tolerance,
                        variance_limit,
                        cadence_min,
                    },
                    cli.json,
                )
                .await
            }
            CampaignCommands::List { status } => {
                commands::campaign_list(&campaigns, status, cli.json).await
            }
            CampaignCommands::Show { campaign_id } => {
                commands::campaign_show(&campaigns, &posteriors, campaign_id, cli.json).await
            }
            CampaignCommands::Activate { campaign_id } => {
                commands::campaign_set_status(&campaigns, campaign_id, CampaignStatus::Active)
                    .await
            }
            CampaignCommands::Pause { campaign_id } => {
                commands::campaign_set_status(&campaigns, campaign_id, CampaignStatus::Paused)
                    .await
            }
            CampaignCommands::Resume { campaign_id } => {
                commands::campaign_set_status(&campaigns, campaign_id, CampaignStatus::Active)
                    .await
            }
        },
        Commands::Arm(cmd) => match cmd {
            ArmCommands::Add {
                campaign_id,
                platform,
                channel,
                creative,
                bid,
            } => {
                commands::arm_add(
                    &campaigns,
                    commands::ArmAddArgs {
                        campaign_id,
                        platform,
                        channel,
                        creative,
                        bid,
                    },
                    cli.json,
                )
                .await
            }
            ArmCommands::List { campaign_id } => {
                commands::arm_list(&campaigns, campaign_id, cli.json).await
            }
            ArmCommands::Disable { arm_id } => {
                commands::arm_set_disabled(&campaigns, arm_id, true).await
            }
            ArmCommands::Enable { arm_id } => {
                commands::arm_set_disabled(&campaigns, arm_id, false).await
            }
        },
        Commands::Changes { campaign_id, limit } => {
            commands::changes_list(&changes, campaign_id, limit, cli.json).await
        }
        Commands::Discover { platform } => {
            let platform_config = config
                .platforms
                .iter()
                .find(|p| p.name == platform)
                .with_context(|| format!("platform '{platform}' is not configured"))?;
            let credentials = PlatformCredentials::from_env(&platform);
            let api_key = credentials
                .api_key
                .with_context(|| format!("no API key in environment for '{platform}'"))?;
            let rest: Arc<dyn AdPlatform> = Arc::new(RestPlatform::new(
                platform_config.name.clone(),
                platform_config.base_url.clone(),
                platform_config.account_id.clone(),
                api_key,
            )?);
            commands::discover(&rest, &platform_config.account_id, cli.json).await
        }
    }
}
