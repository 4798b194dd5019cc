use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use open_queue::{
    audio::{
        player::AudioPlayer,
        registry::SessionRegistry,
        resolver::{TrackResolver, YtDlpExtractor},
        songbird_transport::SongbirdTransport,
    },
    bot::{notifier::DiscordNotifier, OpenQueueBot},
    config::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_queue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Queue v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let extractor = Arc::new(YtDlpExtractor::new(config.ytdlp_path.clone()));
    if let Err(e) = extractor.verify().await {
        error!("❌ {:?}", e);
    }

    // Voz y avisos se crean antes que el cliente para armar el registro
    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));
    let notifier = Arc::new(DiscordNotifier::new(http));

    let (connect_timeout, read_timeout) = config.http_timeouts();
    let transport = Arc::new(SongbirdTransport::new(
        songbird.clone(),
        connect_timeout,
        read_timeout,
    )?);
    let resolver = Arc::new(TrackResolver::new(extractor, config.resolver_config()));
    let registry = SessionRegistry::new(
        transport,
        resolver,
        notifier.clone(),
        config.session_settings(),
    );
    let player = AudioPlayer::new(registry.clone());

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = OpenQueueBot::new(config.clone(), player, notifier);
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        registry.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    YtDlpExtractor::new(config.ytdlp_path.clone()).verify().await?;
    println!("OK");
    Ok(())
}
