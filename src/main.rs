use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use youai::provider::{ProviderId, Registry};
use youai::search::WebSearch;
use youai::settings::Settings;
use youai::store::Store;
use youai::{app, chat, cli, config, paths};

const DEFAULT_PROVIDER: &str = "gemini";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the streamed reply.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    // Resolve and create dirs early.
    let config_dir = paths::config_dir()?;
    let state_dir = paths::state_dir()?;

    let cfg = config::Config::load_optional(config_dir.join("config.toml"))?.unwrap_or_default();
    tracing::debug!(?config_dir, ?state_dir, ?cfg, "resolved config");

    let settings = Settings::load(paths::overrides_path()?)?;

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let registry = Arc::new(Registry::new(http.clone(), settings.clone()));
    let search = Arc::new(WebSearch::new(http, settings.clone()));
    let chat = chat::Chat::new(registry.clone(), search);

    let requested = args.provider.as_deref().map(|name| registry.resolve(name).id());
    let default_provider = requested.unwrap_or_else(|| {
        registry
            .resolve(cfg.provider.as_deref().unwrap_or(DEFAULT_PROVIDER))
            .id()
    });

    let options = app::merge_options(cfg.augment_options(), &args.augment);

    match args.cmd {
        Some(cli::Command::Providers) => return app::cmd_providers(&registry, default_provider),
        Some(cli::Command::Key { cmd }) => return app::cmd_key(&settings, cmd),
        Some(cli::Command::Sessions { cmd }) => {
            let mut store = Store::open(&state_dir, default_provider);
            return app::cmd_sessions(&mut store, cmd);
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            apply_model(&settings, args.model.as_deref(), default_provider);
            let store = Store::open(&state_dir, default_provider);
            return youai::tui::run_tui(chat, store, options).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() && args.file.is_none() {
        anyhow::bail!("No prompt provided. Try: youai \"Hello\" or `youai tui` (feature flag)");
    }

    let mut store = Store::open(&state_dir, default_provider);
    let provider = requested.or_else(|| provider_from_config(&cfg, &registry, &store));
    let effective = match provider {
        Some(p) => p,
        None if args.new_session => default_provider,
        None => store.active().provider,
    };
    apply_model(&settings, args.model.as_deref(), effective);

    app::cmd_ask(
        &chat,
        &mut store,
        app::Ask {
            prompt,
            file: args.file,
            provider,
            new_session: args.new_session,
            options,
        },
    )
    .await
}

fn apply_model(settings: &Settings, model: Option<&str>, provider: ProviderId) {
    let Some(model) = model else {
        return;
    };
    match app::model_key(provider) {
        Some(key) => settings.set_transient(key, model),
        None => tracing::warn!(%provider, "--model has no effect for this provider"),
    }
}

/// The configured provider only applies to sessions that are still empty.
fn provider_from_config(cfg: &config::Config, registry: &Registry, store: &Store) -> Option<ProviderId> {
    let name = cfg.provider.as_deref()?;
    store.active().is_empty().then(|| registry.resolve(name).id())
}
