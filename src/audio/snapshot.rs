use chrono::{DateTime, Utc};
use std::{fmt, path::PathBuf, sync::Arc};
use tracing::{debug, info};

use super::{sink::AudioSink, state::PlayerState};

/// Una pista ya descargada y codificada; su identidad es la ruta del archivo
#[derive(Debug, Clone)]
pub struct Track {
    pub source_url: String,
    pub audio_file_path: PathBuf,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(source_url: impl Into<String>, audio_file_path: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            audio_file_path: audio_file_path.into(),
            added_at: Utc::now(),
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.audio_file_path == other.audio_file_path
    }
}

impl Eq for Track {}

/// Registro completo de reproducción de un guild.
///
/// Solo se modifica bajo el lock del player; los lectores reciben un clon
/// completo, nunca un estado a medias.
#[derive(Clone, Default)]
pub struct Snapshot {
    pub(crate) tracks: Vec<Track>,
    pub(crate) current_index: Option<usize>,
    pub(crate) looping: bool,
    pub(crate) sink: Option<Arc<dyn AudioSink>>,
    pub(crate) state: PlayerState,
}

impl Snapshot {
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Índice de la pista en curso; `None` equivale a "ninguna"
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn position_of(&self, track: &Track) -> Option<usize> {
        self.tracks.iter().position(|t| t == track)
    }

    /// Agrega una pista salvo que su archivo ya esté en la lista; devuelve su índice
    pub(crate) fn add_track(&mut self, track: Track) -> usize {
        if let Some(index) = self.position_of(&track) {
            debug!("Pista ya en la lista: {}", track.audio_file_path.display());
            return index;
        }

        info!("➕ Agregado a la lista: {}", track.audio_file_path.display());
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    /// Reemplaza la lista por una sola pista, sin resolver el índice
    pub(crate) fn replace_with(&mut self, track: Track) {
        info!("🎵 Nueva lista con: {}", track.audio_file_path.display());
        self.tracks = vec![track];
        self.current_index = None;
    }

    /// Pista a reproducir al (re)iniciar el stream: "ninguna" se resuelve a 0
    pub(crate) fn resolve(&mut self) -> Option<usize> {
        let index = match self.current_index {
            Some(i) if i < self.tracks.len() => Some(i),
            _ if self.tracks.is_empty() => None,
            _ => Some(0),
        };
        self.current_index = index;
        index
    }

    /// Avanza una posición. Al pasar la última pista vuelve a 0 con loop activo
    /// o queda en "ninguna" (lista agotada).
    pub(crate) fn advance(&mut self) -> Option<usize> {
        let next = match self.current_index {
            None if self.tracks.is_empty() => None,
            None => Some(0),
            Some(i) if i + 1 < self.tracks.len() => Some(i + 1),
            Some(_) if self.looping && !self.tracks.is_empty() => Some(0),
            Some(_) => None,
        };

        if next.is_none() {
            info!("📭 Lista agotada");
        }
        self.current_index = next;
        next
    }

    /// Retrocede una posición; desde la primera (o "ninguna") va a la última
    pub(crate) fn step_back(&mut self) -> Option<usize> {
        let previous = match self.current_index {
            _ if self.tracks.is_empty() => None,
            Some(i) if i > 0 && i <= self.tracks.len() => Some(i - 1),
            _ => Some(self.tracks.len() - 1),
        };
        self.current_index = previous;
        previous
    }

    pub(crate) fn clear_tracks(&mut self) {
        let cleared = self.tracks.len();
        self.tracks.clear();
        self.current_index = None;
        info!("🗑️ Lista limpiada: {} pistas removidas", cleared);
    }

    /// Cambia el modo loop y devuelve el nuevo valor
    pub(crate) fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        if self.looping {
            info!("🔁 Repetir lista activado");
        } else {
            info!("➡️ Repetición desactivada");
        }
        self.looping
    }

    /// Suelta la conexión y vacía la lista
    pub(crate) fn teardown(&mut self) {
        self.tracks.clear();
        self.current_index = None;
        self.sink = None;
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("tracks", &self.tracks.len())
            .field("current_index", &self.current_index)
            .field("looping", &self.looping)
            .field("sink", &self.sink.is_some())
            .field("state", &self.state)
            .finish()
    }
}
