use anyhow::Result;
use serenity::model::id::GuildId;
use songbird::constants::TIMESTEP_LENGTH;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::io::{BufReader, BufWriter};
use tracing::{debug, error, info, warn};

use jukebox::{
    audio::{
        codec::{encode_pcm_stream, OpusFrameEncoder},
        sink::VoiceConnection,
    },
    sources::{Download, LocalFileFetcher, TrackFetcher},
    Config, PlayerState, Registry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando jukebox v{}", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Manejar health check si es necesario
    if args.iter().any(|arg| arg == "--health-check") {
        return health_check();
    }

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    match args.first().map(String::as_str) {
        Some("encode") => match (args.get(1), args.get(2)) {
            (Some(input), Some(output)) => encode(&config, Path::new(input), Path::new(output)).await,
            _ => usage(),
        },
        Some("play") if args.len() > 1 => play(config, &args[1..]).await,
        _ => usage(),
    }
}

fn usage() -> Result<()> {
    anyhow::bail!(
        "Uso:\n  jukebox encode <entrada.pcm> <salida.dca>\n  jukebox play <archivo.dca>...\n  jukebox --health-check"
    )
}

fn health_check() -> Result<()> {
    // Verificar que el encoder opus esté disponible y la config sea válida
    let config = Config::load()?;
    OpusFrameEncoder::new(config.opus_bitrate)?;
    println!("OK");
    Ok(())
}

/// Codifica PCM crudo (s16le mono 48 kHz) a un archivo de paquetes opus
async fn encode(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let reader = BufReader::new(tokio::fs::File::open(input).await?);
    let writer = BufWriter::new(tokio::fs::File::create(output).await?);
    let encoder = OpusFrameEncoder::new(config.opus_bitrate)?;

    let frames = encode_pcm_stream(reader, writer, encoder).await?;
    info!(
        "✅ {} codificado: {} frames ({:?})",
        output.display(),
        frames,
        TIMESTEP_LENGTH * frames as u32
    );
    Ok(())
}

/// Reproduce archivos ya codificados en una conexión local que consume a tiempo real
async fn play(config: Arc<Config>, files: &[String]) -> Result<()> {
    let registry = Registry::new(config.clone());
    let player = registry.player(GuildId::new(1));

    let (connection, mut packets) = VoiceConnection::new(config.sink_queue_size);
    player.set_voice_connection(Arc::new(connection)).await;

    let transport = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TIMESTEP_LENGTH);
        let mut sent = 0u64;
        while packets.recv().await.is_some() {
            sent += 1;
            ticker.tick().await;
        }
        sent
    });

    let fetcher: Arc<dyn TrackFetcher> = Arc::new(LocalFileFetcher::new(&config.data_dir));
    for file in files {
        let download = Download::spawn(file.clone(), fetcher.clone(), player.clone());
        while !download.is_finished().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        debug!("Descarga terminada: {}", download.url());
    }

    let tracks = player.snapshot().tracks().len();
    if tracks == 0 {
        anyhow::bail!("Ningún archivo se pudo cargar");
    }
    info!("▶️ Reproduciendo {} pistas", tracks);

    let mut now_playing: Option<PathBuf> = None;
    loop {
        let snapshot = player.snapshot();
        if let Some(track) = snapshot.current_track() {
            if now_playing.as_ref() != Some(&track.audio_file_path) {
                info!(
                    "🎶 Sonando {} (en la lista desde {})",
                    track.audio_file_path.display(),
                    track.added_at.format("%H:%M:%S")
                );
                now_playing = Some(track.audio_file_path.clone());
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("⚠️ Señal de shutdown recibida, deteniendo...");
                player.reset().await;
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                if !matches!(player.state(), PlayerState::Playing | PlayerState::Paused) {
                    break;
                }
            }
        }
    }

    // Soltar el player y el registro cierra el worker y luego el transporte
    drop(player);
    drop(registry);
    match transport.await {
        Ok(sent) => info!("📊 {} paquetes enviados", sent),
        Err(e) => error!("Error en el transporte: {:?}", e),
    }

    Ok(())
}
