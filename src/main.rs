//! Process entry point: loads configuration, brings up every component in
//! dependency order (stores, clock, personas, orchestrator), then serves
//! the HTTP surface with a shared `AppState` handed into `warp`'s filter
//! tree.

use anima_engine::clock::Clock;
use anima_engine::config::{self, EngineConfig};
use anima_engine::dialogue::DialogueLog;
use anima_engine::http::{self, AppState};
use anima_engine::llm::factory::build_provider;
use anima_engine::mood::MoodStore;
use anima_engine::orchestrator::Orchestrator;
use anima_engine::persona::PersonaStore;
use anima_engine::plot::state_machine::StateMachine;
use anima_engine::store::durable::DurableStore;
use anima_engine::store::hot::HotStore;
use anima_engine::tools::{CurrentTimeTool, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

fn config_path() -> std::path::PathBuf {
    let app_data = dirs_next::data_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("anima-engine");
    app_data.join("engine_config.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = Arc::new(config::load_engine_config(&config_path()));

    let hot = Arc::new(HotStore::new());
    let durable = Arc::new(DurableStore::connect(&config.database_url).await?);
    let clock = Arc::new(Clock::new(hot.clone(), config.zone_offset_minutes, Duration::from_secs(config.clock_ttl_secs)));
    let personas = Arc::new(PersonaStore::new(config.persona_root.clone()));
    let mood_store = Arc::new(MoodStore::new(hot.clone(), durable.clone(), Duration::from_secs(config.mood_ttl_secs)));
    let dialogue = Arc::new(DialogueLog::new(hot, durable.clone()));
    let state_machine = Arc::new(StateMachine::new(durable.clone(), config.plot_root.clone()));

    let persona_provider = build_provider(&config.persona_model);
    let system_provider = build_provider(config.system_model());

    let mut tools = ToolRegistry::new();
    tools.register(CurrentTimeTool::new(clock.clone()));
    let tools = Arc::new(tools);

    let orchestrator = Arc::new(Orchestrator::new(
        persona_provider,
        system_provider.clone(),
        config.clone(),
        clock.clone(),
        mood_store.clone(),
        dialogue.clone(),
        tools,
    ));

    let state = AppState {
        config: config.clone(),
        clock,
        personas,
        mood_store,
        dialogue,
        durable,
        orchestrator,
        system_provider,
        state_machine,
    };

    let bind = config.http_bind;
    let shutdown_dialogue = state.dialogue.clone();
    let (_, server) = warp::serve(http::routes(state)).bind_with_graceful_shutdown(bind, async move {
        tokio::signal::ctrl_c().await.ok();
    });

    tracing::info!(%bind, "starting anima-engine");
    server.await;

    tracing::info!("shutting down, flushing open sessions");
    if let Err(e) = shutdown_dialogue.flush_all_open_sessions().await {
        tracing::warn!(error = %e, "shutdown flush failed");
    }

    Ok(())
}
