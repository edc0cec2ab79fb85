//! Terminal follower for one event: prints pushed notices, insights and a
//! periodic summary of the merged local state.

use std::time::Duration;

use tokio::{signal, time::interval};
use tracing_subscriber::EnvFilter;

use nutshell::{
    client::{views, LiveSession},
    config::ClientConfig,
    models::{Insight, InsightKind},
    wire::EventType,
};

const SUMMARY_EVERY: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = ClientConfig::from_env()?;
    tracing::info!(
        component = "console",
        server = %config.server_url,
        event_id = config.event_id,
        "starting live session"
    );
    let session = LiveSession::start(&config).await?;

    session.sync().subscribe(EventType::InsightsGenerated, |data| {
        let batch: Vec<Insight> = serde_json::from_value(data.clone())?;
        for insight in &batch {
            tracing::info!(kind = %insight.insight_type, title = %insight.title, "new insight");
        }
        Ok(())
    });
    session.sync().subscribe(EventType::InsightAdded, |data| {
        let insight: Insight = serde_json::from_value(data.clone())?;
        tracing::info!(id = insight.id, kind = %insight.insight_type, title = %insight.title, "insight added");
        Ok(())
    });
    session.sync().subscribe(EventType::InsightUpdated, |data| {
        let insight: Insight = serde_json::from_value(data.clone())?;
        tracing::info!(
            id = insight.id,
            status = %insight.status,
            title = %insight.title,
            "insight reviewed"
        );
        Ok(())
    });

    let mut ticker = interval(SUMMARY_EVERY);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for notice in session.take_notices() {
                    tracing::info!(message = %notice.message, tables = ?notice.table_ids, "notice");
                }
                session.with_state(|state| {
                    tracing::info!(
                        connection = ?session.sync().state(),
                        tables = state.tables().len(),
                        hot = views::hot_tables(state.tables()).len(),
                        transcripts = state.transcripts().len(),
                        unmapped = state.unmapped_transcripts(),
                        insights = state.insights().len(),
                        actions = views::insights_of_kind(state.insights(), InsightKind::ActionItem).len(),
                        questions = state.questions().len(),
                        "event summary"
                    );
                });
            }
            _ = signal::ctrl_c() => {
                tracing::info!("console received shutdown signal");
                break;
            }
        }
    }

    session.shutdown();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
