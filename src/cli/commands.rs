//! CLI command handlers over the read views and repositories.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::models::{
    CampaignStatus, EngineConfig, NewArm, NewCampaign, PrimaryKpi,
};
use crate::domain::ports::{
    AdPlatform, CampaignRepository, ChangeLogRepository, PosteriorRepository,
};

pub struct CampaignCreateArgs {
    pub name: String,
    pub budget: f64,
    pub kpi: String,
    pub risk_tolerance: Option<f64>,
    pub variance_limit: Option<f64>,
    pub cadence_min: Option<u64>,
}

pub async fn campaign_create(
    campaigns: &Arc<dyn CampaignRepository>,
    engine: &EngineConfig,
    args: CampaignCreateArgs,
    json: bool,
) -> Result<()> {
    let kpi = PrimaryKpi::from_str(&args.kpi)
        .with_context(|| format!("unknown KPI '{}'", args.kpi))?;
    let draft = NewCampaign {
        name: args.name,
        total_budget: args.budget,
        start: Utc::now(),
        end: None,
        primary_kpi: kpi,
        risk_tolerance: args.risk_tolerance.unwrap_or(engine.risk_tolerance_default),
        variance_limit: args.variance_limit.unwrap_or(engine.variance_limit_default),
        cadence_ms: args
            .cadence_min
            .map_or(engine.cycle_default_ms, |m| m * 60_000),
    };
    let campaign = campaigns.create(&draft).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&campaign)?);
    } else {
        println!(
            "created campaign {} '{}' (budget {:.2}, cadence {}m)",
            campaign.id,
            campaign.name,
            campaign.total_budget,
            campaign.cadence_ms / 60_000
        );
    }
    Ok(())
}

pub async fn campaign_list(
    campaigns: &Arc<dyn CampaignRepository>,
    status: Option<String>,
    json: bool,
) -> Result<()> {
    let filter = match status {
        Some(s) => Some(
            CampaignStatus::from_str(&s).with_context(|| format!("unknown status '{s}'"))?,
        ),
        None => None,
    };
    let rows = campaigns.list(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "id", "name", "status", "kpi", "budget", "cadence",
    ]);
    for c in rows {
        table.add_row(vec![
            c.id.to_string(),
            c.name.clone(),
            c.status.as_str().to_string(),
            c.primary_kpi.as_str().to_string(),
            format!("{:.2}", c.total_budget),
            format!("{}m", c.cadence_ms / 60_000),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn campaign_show(
    campaigns: &Arc<dyn CampaignRepository>,
    posteriors: &Arc<dyn PosteriorRepository>,
    campaign_id: i64,
    json: bool,
) -> Result<()> {
    let Some(campaign) = campaigns.get(campaign_id).await? else {
        bail!("campaign {campaign_id} not found");
    };
    let arms = campaigns.list_arms(campaign_id).await?;
    let posterior_rows = posteriors.for_campaign(campaign_id).await?;
    let spent = posteriors.campaign_spend(campaign_id).await?;

    if json {
        let doc = serde_json::json!({
            "campaign": campaign,
            "arms": arms,
            "posteriors": posterior_rows,
            "spent": spent,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!(
        "campaign {} '{}' [{}] budget {:.2} spent {:.2}",
        campaign.id,
        campaign.name,
        campaign.status.as_str(),
        campaign.total_budget,
        spent
    );

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "arm", "key", "bid", "disabled", "alpha", "beta", "trials", "mean roas", "spend",
    ]);
    for arm in &arms {
        let p = posterior_rows.iter().find(|p| p.arm_id == arm.id);
        table.add_row(vec![
            arm.id.to_string(),
            arm.arm_key(),
            format!("{:.4}", arm.bid),
            arm.disabled.to_string(),
            p.map_or("-".to_string(), |p| format!("{:.1}", p.alpha)),
            p.map_or("-".to_string(), |p| format!("{:.1}", p.beta)),
            p.map_or("-".to_string(), |p| p.trials.to_string()),
            p.map_or("-".to_string(), |p| format!("{:.3}", p.mean_reward())),
            p.map_or("-".to_string(), |p| format!("{:.2}", p.spend)),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn campaign_set_status(
    campaigns: &Arc<dyn CampaignRepository>,
    campaign_id: i64,
    status: CampaignStatus,
) -> Result<()> {
    campaigns.update_status(campaign_id, status).await?;
    println!("campaign {campaign_id} -> {}", status.as_str());
    Ok(())
}

pub struct ArmAddArgs {
    pub campaign_id: i64,
    pub platform: String,
    pub channel: String,
    pub creative: String,
    pub bid: f64,
}

pub async fn arm_add(
    campaigns: &Arc<dyn CampaignRepository>,
    args: ArmAddArgs,
    json: bool,
) -> Result<()> {
    let arm = campaigns
        .add_arm(
            args.campaign_id,
            &NewArm {
                platform: args.platform,
                channel: args.channel,
                creative: args.creative,
                bid: args.bid,
            },
        )
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&arm)?);
    } else {
        println!("added arm {} ({})", arm.id, arm.arm_key());
    }
    Ok(())
}

pub async fn arm_list(
    campaigns: &Arc<dyn CampaignRepository>,
    campaign_id: i64,
    json: bool,
) -> Result<()> {
    let arms = campaigns.list_arms(campaign_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&arms)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["id", "platform", "channel", "creative", "bid", "disabled"]);
    for arm in arms {
        table.add_row(vec![
            arm.id.to_string(),
            arm.platform.clone(),
            arm.channel.clone(),
            arm.creative.clone(),
            format!("{:.4}", arm.bid),
            arm.disabled.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn arm_set_disabled(
    campaigns: &Arc<dyn CampaignRepository>,
    arm_id: i64,
    disabled: bool,
) -> Result<()> {
    campaigns.set_arm_disabled(arm_id, disabled).await?;
    println!(
        "arm {arm_id} {}",
        if disabled { "disabled" } else { "enabled" }
    );
    Ok(())
}

pub async fn discover(
    platform: &Arc<dyn AdPlatform>,
    account_id: &str,
    json: bool,
) -> Result<()> {
    let remote = platform
        .list_campaigns(account_id)
        .await
        .with_context(|| format!("discovery failed on platform '{}'", platform.name()))?;

    if json {
        let doc: Vec<_> = remote
            .iter()
            .map(|c| serde_json::json!({"external_id": c.external_id, "name": c.name}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["external id", "name"]);
    for c in remote {
        table.add_row(vec![c.external_id, c.name]);
    }
    println!("{table}");
    Ok(())
}

pub async fn changes_list(
    changes: &Arc<dyn ChangeLogRepository>,
    campaign_id: i64,
    limit: u32,
    json: bool,
) -> Result<()> {
    let from = chrono::DateTime::<Utc>::UNIX_EPOCH;
    let to = Utc::now() + chrono::Duration::days(1);
    let rows = changes.range(campaign_id, from, to, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "ts", "arm", "old", "new", "Δ%", "reason", "by",
    ]);
    for c in rows {
        table.add_row(vec![
            c.ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            c.arm_id.to_string(),
            format!("{:.4}", c.old_alloc),
            format!("{:.4}", c.new_alloc),
            format!("{:+.1}", c.change_pct()),
            c.reason.as_str().to_string(),
            c.initiated_by.as_str().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
