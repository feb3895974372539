use bytes::BytesMut;
use futures::FutureExt;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{any::Any, panic::AssertUnwindSafe, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    fs::File,
    io::BufReader,
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::{
    codec::{CodecError, PacketReader, MAX_PACKET_LEN},
    sink::{AudioSink, OpusSender},
    snapshot::{Snapshot, Track},
    state::{transition, Event, PlayerState, Signal, StreamAction},
};
use crate::config::Config;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("could not open audio source {}: {source}", .path.display())]
    SourceOpen { path: PathBuf, source: CodecError },

    #[error("frame read failed: {0}")]
    Codec(#[from] CodecError),

    #[error("no audience: voice connection absent or not ready")]
    NoAudience,

    #[error("playlist is empty")]
    EmptyPlaylist,
}

/// Player de un guild: API de control + worker dedicado.
///
/// Los métodos de control solo encolan señales (o tocan el [`Snapshot`] bajo
/// su lock); toda la lógica de reproducción vive en el worker.
pub struct Player {
    guild_id: GuildId,
    signals: mpsc::Sender<Signal>,
    requests: mpsc::Sender<Track>,
    snapshot: Arc<Mutex<Snapshot>>,
    worker: JoinHandle<()>,
}

impl Player {
    /// Crea el player y arranca su worker (requiere un runtime de tokio activo)
    pub fn spawn(guild_id: GuildId, config: Arc<Config>) -> Self {
        let (signals, signals_rx) = mpsc::channel(1);
        let (requests, requests_rx) = mpsc::channel(1);
        let snapshot = Arc::new(Mutex::new(Snapshot::default()));

        let worker = Worker {
            guild_id,
            ring: FrameRing::new(config.frame_ring_slots),
            config,
            snapshot: snapshot.clone(),
            signals: signals_rx,
            requests: requests_rx,
            state: PlayerState::Default,
            stream: None,
            faults: 0,
        };
        let worker = tokio::spawn(worker.run());

        info!("🎛️ Player creado para guild {}", guild_id);

        Self {
            guild_id,
            signals,
            requests,
            snapshot,
            worker,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Encola una pista ya descargada; espera solo si otra solicitud sigue pendiente.
    ///
    /// Se puede cancelar en cualquier punto: el lugar para la señal se reserva
    /// antes de llenar el slot, así la solicitud nunca queda sin su `Play`.
    pub async fn play(&self, url: impl Into<String>, file_path: impl Into<PathBuf>) {
        let track = Track::new(url, file_path);

        let Ok(permit) = self.signals.reserve().await else {
            warn!("⚠️ Worker del guild {} no disponible, solicitud descartada", self.guild_id);
            return;
        };
        if self.requests.send(track).await.is_err() {
            warn!("⚠️ Worker del guild {} no disponible, solicitud descartada", self.guild_id);
            return;
        }
        permit.send(Signal::Play);
    }

    /// Pausa la reproducción actual
    pub async fn pause(&self) {
        self.send(Signal::Pause).await;
    }

    /// Reanuda la reproducción
    pub async fn resume(&self) {
        self.send(Signal::Resume).await;
    }

    pub async fn stop(&self) {
        self.send(Signal::Stop).await;
    }

    /// Salta a la siguiente pista
    pub async fn next(&self) {
        self.send(Signal::Next).await;
    }

    pub async fn previous(&self) {
        self.send(Signal::Previous).await;
    }

    /// Suelta la conexión y vacía la lista
    pub async fn reset(&self) {
        self.send(Signal::Reset).await;
    }

    /// Vuelve a reproducir la pista actual desde el principio
    pub async fn restart_track(&self) {
        self.send(Signal::RestartTrack).await;
    }

    /// Activa/desactiva el loop de la lista
    pub fn cycle_repeat_mode(&self) -> String {
        let looping = self.snapshot.lock().toggle_loop();
        if looping {
            "🔁 Loop activado".to_string()
        } else {
            "➡️ Loop desactivado".to_string()
        }
    }

    pub async fn set_voice_connection(&self, sink: Arc<dyn AudioSink>) {
        self.snapshot.lock().sink = Some(sink);
        self.send(Signal::NewSink).await;
    }

    /// Vacía la lista de inmediato, sin pasar por el worker
    pub fn clear_playlist(&self) {
        self.snapshot.lock().clear_tracks();
    }

    /// Copia completa del estado actual
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().clone()
    }

    pub fn state(&self) -> PlayerState {
        self.snapshot.lock().state
    }

    pub fn is_worker_alive(&self) -> bool {
        !self.worker.is_finished()
    }

    async fn send(&self, signal: Signal) {
        if self.signals.send(signal).await.is_err() {
            warn!(
                "⚠️ Worker del guild {} no disponible, señal {:?} descartada",
                self.guild_id, signal
            );
        }
    }
}

/// Buffers reutilizables para los paquetes en tránsito.
///
/// Cada slot entrega su contenido como `Bytes`; cuando ese `Bytes` se suelta
/// el slot recupera la memoria en el siguiente `reserve`.
struct FrameRing {
    slots: Vec<BytesMut>,
    next: usize,
}

impl FrameRing {
    fn new(slots: usize) -> Self {
        Self {
            slots: (0..slots.max(1))
                .map(|_| BytesMut::with_capacity(MAX_PACKET_LEN))
                .collect(),
            next: 0,
        }
    }

    fn next_slot(&mut self) -> &mut BytesMut {
        let index = self.next;
        self.next = (index + 1) % self.slots.len();

        let slot = &mut self.slots[index];
        slot.clear();
        slot.reserve(MAX_PACKET_LEN);
        slot
    }
}

struct ActiveStream {
    index: usize,
    path: PathBuf,
    reader: PacketReader<BufReader<File>>,
    /// `None` obliga a resolver de nuevo el destino antes del próximo envío
    sender: Option<OpusSender>,
    frames: u64,
}

enum Flow {
    Continue,
    Closed,
}

enum Pump {
    Sent,
    Ended { frames: u64 },
    Failed(PlayerError),
}

struct Worker {
    guild_id: GuildId,
    config: Arc<Config>,
    snapshot: Arc<Mutex<Snapshot>>,
    signals: mpsc::Receiver<Signal>,
    requests: mpsc::Receiver<Track>,
    state: PlayerState,
    stream: Option<ActiveStream>,
    ring: FrameRing,
    faults: u32,
}

impl Worker {
    /// Bucle del worker. Solo termina cuando se sueltan todos los handles de control.
    async fn run(mut self) {
        debug!("Worker iniciado para guild {}", self.guild_id);

        loop {
            match AssertUnwindSafe(self.step()).catch_unwind().await {
                Ok(Flow::Continue) => self.faults = 0,
                Ok(Flow::Closed) => {
                    info!("🔌 Canal de control cerrado, worker del guild {} termina", self.guild_id);
                    return;
                }
                Err(panic) => {
                    self.faults += 1;
                    error!(
                        "💥 Fallo en el worker del guild {} ({} seguidos): {}",
                        self.guild_id,
                        self.faults,
                        panic_message(&*panic)
                    );
                    self.recover().await;
                }
            }
        }
    }

    /// Una iteración: en Playing sondea señales sin bloquear y envía un frame;
    /// en cualquier otro estado espera la próxima señal.
    async fn step(&mut self) -> Flow {
        if self.state == PlayerState::Playing {
            if self.stream.is_none() {
                self.enter(PlayerState::Playing, StreamAction::Start).await;
                return Flow::Continue;
            }

            match self.signals.try_recv() {
                Ok(signal) => self.on_signal(signal).await,
                Err(TryRecvError::Empty) => self.pump_frame().await,
                Err(TryRecvError::Disconnected) => return Flow::Closed,
            }
        } else {
            match self.signals.recv().await {
                Some(signal) => self.on_signal(signal).await,
                None => return Flow::Closed,
            }
        }

        Flow::Continue
    }

    async fn on_signal(&mut self, signal: Signal) {
        let event = match signal {
            // La solicitud siempre se encola antes que su señal
            Signal::Play => match self.requests.recv().await {
                Some(track) => Event::Play(track),
                None => return,
            },
            Signal::NewSink => Event::NewSink,
            Signal::Resume => Event::Resume,
            Signal::Pause => Event::Pause,
            Signal::Stop => Event::Stop,
            Signal::Reset => Event::Reset,
            Signal::Next => Event::Next,
            Signal::Previous => Event::Previous,
            Signal::RestartTrack => Event::RestartTrack,
        };

        self.apply(event).await;
    }

    async fn apply(&mut self, event: Event) {
        let step = {
            let mut snap = self.snapshot.lock();
            transition(self.state, event, &mut snap)
        };
        self.enter(step.state, step.stream).await;
    }

    async fn enter(&mut self, state: PlayerState, action: StreamAction) {
        let state = match action {
            StreamAction::Keep => state,
            StreamAction::Close => {
                self.close_stream();
                state
            }
            StreamAction::Reroute => {
                if let Some(stream) = self.stream.as_mut() {
                    stream.sender = None;
                }
                debug!("🔀 Guild {}: destino de audio actualizado", self.guild_id);
                state
            }
            StreamAction::Start => {
                self.close_stream();
                match self.open_stream().await {
                    Ok(stream) => {
                        info!(
                            "▶️ Guild {}: reproduciendo pista {} ({})",
                            self.guild_id,
                            stream.index,
                            stream.path.display()
                        );
                        self.stream = Some(stream);
                        state
                    }
                    Err(e) => {
                        self.report(&e);
                        PlayerState::Idle
                    }
                }
            }
        };

        self.set_state(state);
    }

    async fn open_stream(&mut self) -> Result<ActiveStream, PlayerError> {
        let (index, path, sender) = {
            let mut snap = self.snapshot.lock();
            let index = snap.resolve().ok_or(PlayerError::EmptyPlaylist)?;
            let sender = snap
                .sink
                .as_ref()
                .and_then(|sink| sink.opus_sender())
                .ok_or(PlayerError::NoAudience)?;
            (index, snap.tracks[index].audio_file_path.clone(), sender)
        };

        let reader = PacketReader::open(&path)
            .await
            .map_err(|source| PlayerError::SourceOpen {
                path: path.clone(),
                source,
            })?;

        Ok(ActiveStream {
            index,
            path,
            reader,
            sender: Some(sender),
            frames: 0,
        })
    }

    async fn pump_frame(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let buf = self.ring.next_slot();

        let outcome = match stream.reader.read_packet(buf).await {
            Ok(0) => Pump::Ended {
                frames: stream.frames,
            },
            Ok(_) => {
                let packet = buf.split().freeze();
                if stream.sender.is_none() {
                    stream.sender = self
                        .snapshot
                        .lock()
                        .sink
                        .as_ref()
                        .and_then(|sink| sink.opus_sender());
                }

                match &stream.sender {
                    Some(sender) => match sender.send(packet).await {
                        Ok(()) => {
                            stream.frames += 1;
                            Pump::Sent
                        }
                        Err(_) => Pump::Failed(PlayerError::NoAudience),
                    },
                    None => Pump::Failed(PlayerError::NoAudience),
                }
            }
            Err(e) => Pump::Failed(e.into()),
        };

        match outcome {
            Pump::Sent => {}
            Pump::Ended { frames } => {
                debug!("⏹️ Guild {}: pista terminada tras {} frames", self.guild_id, frames);
                self.apply(Event::TrackEnded).await;
            }
            Pump::Failed(e) => {
                self.report(&e);
                self.close_stream();
                self.set_state(PlayerState::Idle);
            }
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(
                "Guild {}: stream de la pista {} cerrado ({}, {} frames enviados)",
                self.guild_id,
                stream.index,
                stream.path.display(),
                stream.frames
            );
        }
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            debug!("Guild {}: {:?} -> {:?}", self.guild_id, self.state, state);
        }
        self.state = state;
        self.snapshot.lock().state = state;
    }

    fn report(&self, e: &PlayerError) {
        match e {
            PlayerError::NoAudience | PlayerError::EmptyPlaylist => {
                debug!("🔇 Guild {}: {}", self.guild_id, e)
            }
            PlayerError::Codec(CodecError::InvalidLength(_)) => {
                warn!("⚠️ Guild {}: pista abortada: {}", self.guild_id, e)
            }
            _ => error!("❌ Guild {}: pista abortada: {}", self.guild_id, e),
        }
    }

    /// Vuelve a un estado seguro tras un fallo, con backoff exponencial.
    /// Al agotar el presupuesto de fallos seguidos se desmonta el player.
    async fn recover(&mut self) {
        self.stream = None;
        let backoff = self.backoff();

        if self.faults >= self.config.max_consecutive_faults {
            error!(
                "🚨 Guild {}: {} fallos seguidos, se reinicia el player",
                self.guild_id, self.faults
            );
            self.snapshot.lock().teardown();
            self.set_state(PlayerState::Default);
            self.faults = 0;
        } else if self.state != PlayerState::Default {
            self.set_state(PlayerState::Idle);
        }

        warn!("⏳ Guild {}: reintentando en {:?}", self.guild_id, backoff);
        tokio::time::sleep(backoff).await;
    }

    fn backoff(&self) -> Duration {
        let exponent = self.faults.saturating_sub(1).min(16);
        let delay = self
            .config
            .restart_backoff()
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_restart_backoff());
        let jitter = fastrand::u64(0..=delay.as_millis() as u64 / 4);
        delay + Duration::from_millis(jitter)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic sin mensaje".to_string()
    }
}
