use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Canal de solo envío para paquetes opus
pub type OpusSender = mpsc::Sender<Bytes>;

/// Destino de audio (p.ej. una conexión de voz activa).
///
/// `None` significa "sin audiencia": la conexión no existe o todavía no está
/// lista. El player nunca lo trata como error.
pub trait AudioSink: Send + Sync {
    fn opus_sender(&self) -> Option<OpusSender>;
}

/// Conexión de voz local: flag de disponibilidad + canal de paquetes
pub struct VoiceConnection {
    state: Mutex<ConnectionState>,
}

struct ConnectionState {
    ready: bool,
    opus_tx: OpusSender,
}

impl VoiceConnection {
    /// Crea una conexión lista y el receptor que consume el transporte
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (opus_tx, opus_rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            state: Mutex::new(ConnectionState {
                ready: true,
                opus_tx,
            }),
        };
        (connection, opus_rx)
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
        debug!("🔌 Conexión de voz lista: {}", ready);
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }
}

impl AudioSink for VoiceConnection {
    fn opus_sender(&self) -> Option<OpusSender> {
        let state = self.state.lock();
        if state.ready && !state.opus_tx.is_closed() {
            Some(state.opus_tx.clone())
        } else {
            None
        }
    }
}
