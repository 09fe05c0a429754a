//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// Continuous ad-budget optimizer.
#[derive(Debug, Parser)]
#[command(name = "adbandit", version, about)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the optimization engine until interrupted.
    Run,

    /// Manage campaigns.
    #[command(subcommand)]
    Campaign(CampaignCommands),

    /// Manage arms.
    #[command(subcommand)]
    Arm(ArmCommands),

    /// Inspect the allocation change log.
    Changes {
        campaign_id: i64,
        /// Maximum rows to show.
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// List campaigns visible on a configured platform's account.
    Discover { platform: String },
}

#[derive(Debug, Subcommand)]
pub enum CampaignCommands {
    /// Create a campaign in Draft.
    Create {
        name: String,
        /// Total budget in account currency.
        #[arg(long)]
        budget: f64,
        /// Primary KPI: roas | cpa | revenue | conversions.
        #[arg(long, default_value = "roas")]
        kpi: String,
        /// Risk tolerance in [0, 1]; engine default when omitted.
        #[arg(long)]
        risk_tolerance: Option<f64>,
        /// Reward-variance ceiling; engine default when omitted.
        #[arg(long)]
        variance_limit: Option<f64>,
        /// Decision cadence in minutes; engine default when omitted.
        #[arg(long)]
        cadence_min: Option<u64>,
    },
    /// List campaigns, optionally by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one campaign with its arms and posteriors.
    Show { campaign_id: i64 },
    /// Draft -> Active.
    Activate { campaign_id: i64 },
    /// Active -> Paused.
    Pause { campaign_id: i64 },
    /// Paused -> Active.
    Resume { campaign_id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum ArmCommands {
    /// Add an arm to a campaign.
    Add {
        campaign_id: i64,
        #[arg(long)]
        platform: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        creative: String,
        #[arg(long)]
        bid: f64,
    },
    /// List a campaign's arms.
    List { campaign_id: i64 },
    /// Pin an arm's allocation to zero.
    Disable { arm_id: i64 },
    /// Lift the pin.
    Enable { arm_id: i64 },
}
