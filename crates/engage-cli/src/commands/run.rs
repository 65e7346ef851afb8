use std::sync::Arc;
use tracing::{info, warn};

use engage_channels::FileInbox;
use engage_config::{ConfigLoader, EngageConfig};
use engage_core::{EventBus, Result};
use engage_runtime::{CycleOrchestrator, EngagementState};

pub(super) async fn cmd_run(
    config: EngageConfig,
    config_loader: ConfigLoader,
    once: bool,
) -> Result<()> {
    println!("Engage v{}", env!("CARGO_PKG_VERSION"));
    println!("   Persona: {}", config.agent.name);
    println!("   Inbox: {}", config.adapters.inbox_dir.display());
    println!("   Memory: {}", config.memory.db_path.display());

    let store = super::open_store(&config)?;
    let generator = super::build_generator(&config)?;
    let platform = Arc::new(FileInbox::new(&config.adapters.inbox_dir));
    let state = Arc::new(EngagementState::from_config(&config));

    let orchestrator = CycleOrchestrator::new(
        &config,
        platform,
        generator,
        store,
        state,
        EventBus::default(),
    );

    if once {
        let report = orchestrator.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // Kept alive for the duration of the loop
    let _watcher = match config_loader.watch() {
        Ok(w) => {
            println!("   Config hot-reload: enabled");
            Some(w)
        }
        Err(e) => {
            warn!(error = %e, "config hot-reload disabled");
            None
        }
    };
    let orchestrator = orchestrator.with_live_config(config_loader.shared());
    println!();

    let stop = orchestrator.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current cycle");
            stop.cancel();
        }
    });

    orchestrator.run().await
}
