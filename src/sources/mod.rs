use anyhow::Result;
use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{player::Player, snapshot::Track};

/// Fuente que deja una pista lista para reproducir (descargada y codificada)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    /// Obtiene la pista; debe abandonar el trabajo cuando `cancel` se dispara
    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<Track>;
}

/// Fuente para archivos ya codificados en disco, relativos a `DATA_DIR`
pub struct LocalFileFetcher {
    data_dir: PathBuf,
}

impl LocalFileFetcher {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl TrackFetcher for LocalFileFetcher {
    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<Track> {
        let path = self.data_dir.join(url.strip_prefix("file://").unwrap_or(url));

        let metadata = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("Descarga cancelada: {}", url),
            metadata = tokio::fs::metadata(&path) => metadata?,
        };
        if !metadata.is_file() {
            anyhow::bail!("No es un archivo: {}", path.display());
        }

        debug!("📁 Archivo local listo: {}", path.display());
        Ok(Track::new(url, path))
    }
}

/// Descarga en segundo plano que termina entregando la pista al player.
///
/// `cancel()` dispara el token y espera a que la tarea salga; es idempotente
/// y las llamadas concurrentes esperan a la primera.
pub struct Download {
    url: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Download {
    pub fn spawn(url: impl Into<String>, fetcher: Arc<dyn TrackFetcher>, player: Arc<Player>) -> Self {
        let url = url.into();
        let cancel = CancellationToken::new();

        let task = {
            let url = url.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                info!("⬇️ Descargando {} para guild {}", url, player.guild_id());
                match fetcher.fetch(&url, cancel.clone()).await {
                    Ok(_) if cancel.is_cancelled() => {
                        debug!("Descarga de {} cancelada tras terminar", url);
                    }
                    Ok(track) => {
                        player.play(track.source_url, track.audio_file_path).await;
                    }
                    Err(e) if cancel.is_cancelled() => {
                        debug!("Descarga de {} cancelada: {}", url, e);
                    }
                    Err(e) => warn!("❌ Descarga fallida {}: {}", url, e),
                }
            })
        };

        Self {
            url,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cancela y espera a que la tarea termine
    pub async fn cancel(&self) {
        self.cancel.cancel();

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                warn!("⚠️ Tarea de descarga {} terminó con error: {}", self.url, e);
            }
        }
    }

    pub async fn is_finished(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::state::PlayerState, config::Config};
    use serenity::model::id::GuildId;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };
    use tempfile::TempDir;

    fn player() -> Arc<Player> {
        Arc::new(Player::spawn(GuildId::new(7), Arc::new(Config::default())))
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("timeout");
    }

    #[tokio::test]
    async fn test_finished_download_reaches_player() {
        let mut fetcher = MockTrackFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url, _| url.ends_with("example.com/a"))
            .times(1)
            .returning(|url, _| Ok(Track::new(url, "/tmp/a.dca")));

        let player = player();
        let download = Download::spawn("https://example.com/a", Arc::new(fetcher), player.clone());
        assert_eq!(download.url(), "https://example.com/a");

        wait_until(|| player.snapshot().tracks().len() == 1).await;
        // Sin conexión de voz el player queda en Idle con la pista en la lista
        wait_until(|| player.state() == PlayerState::Idle).await;
        assert_eq!(player.snapshot().tracks()[0].source_url, "https://example.com/a");

        download.cancel().await;
        assert!(download.is_finished().await);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_player_untouched() {
        let mut fetcher = MockTrackFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_, _| Err(anyhow::anyhow!("404")));

        let player = player();
        let download = Download::spawn("https://example.com/b", Arc::new(fetcher), player.clone());
        download.cancel().await;

        assert!(player.snapshot().tracks().is_empty());
        assert_eq!(player.state(), PlayerState::Default);
    }

    /// Se queda esperando hasta que lo cancelen
    struct StalledFetcher {
        exited: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TrackFetcher for StalledFetcher {
        async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<Track> {
            cancel.cancelled().await;
            self.exited.store(true, Ordering::SeqCst);
            anyhow::bail!("cancelado: {}", url)
        }
    }

    #[tokio::test]
    async fn test_cancel_waits_for_exit_and_is_idempotent() {
        let exited = Arc::new(AtomicBool::new(false));
        let player = player();
        let download = Arc::new(Download::spawn(
            "https://example.com/slow",
            Arc::new(StalledFetcher {
                exited: exited.clone(),
            }),
            player.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!download.is_finished().await);

        let other = download.clone();
        let concurrent = tokio::spawn(async move { other.cancel().await });
        download.cancel().await;
        concurrent.await.unwrap();

        assert!(exited.load(Ordering::SeqCst));
        assert!(download.is_finished().await);
        download.cancel().await;
        assert!(player.snapshot().tracks().is_empty());
    }

    #[tokio::test]
    async fn test_local_file_fetcher() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("song.dca"), b"").unwrap();
        let fetcher = LocalFileFetcher::new(dir.path());

        let track = fetcher
            .fetch("file://song.dca", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(track.audio_file_path, dir.path().join("song.dca"));

        assert!(fetcher
            .fetch("missing.dca", CancellationToken::new())
            .await
            .is_err());
        assert!(fetcher.fetch("", CancellationToken::new()).await.is_err());
    }
}
