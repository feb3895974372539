//! Tabla de transiciones del player: `(estado, evento) -> (estado, acción sobre el stream)`.
//!
//! La tabla es una función pura sobre el [`Snapshot`]; el worker solo ejecuta
//! la acción resultante (abrir, cerrar o re-enrutar el stream).

use tracing::debug;

use super::snapshot::{Snapshot, Track};

/// Señal de control enviada al worker de un player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    NewSink,
    Play,
    Resume,
    Pause,
    Stop,
    Reset,
    Next,
    Previous,
    RestartTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Default,
    Idle,
    Playing,
    Paused,
}

/// Entrada de la tabla: señales (con la pista ya extraída para `Play`) y fin de pista
#[derive(Debug, Clone)]
pub(crate) enum Event {
    Play(Track),
    NewSink,
    Resume,
    Pause,
    Stop,
    Reset,
    Next,
    Previous,
    RestartTrack,
    TrackEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamAction {
    /// Seguir con el stream actual (si hay)
    Keep,
    /// Cerrar lo que haya y abrir la pista en `current_index`
    Start,
    Close,
    /// Volver a resolver el destino de los paquetes
    Reroute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step {
    pub state: PlayerState,
    pub stream: StreamAction,
}

impl Step {
    fn to(state: PlayerState, stream: StreamAction) -> Self {
        Self { state, stream }
    }

    fn stay(state: PlayerState) -> Self {
        Self::to(state, StreamAction::Keep)
    }
}

pub(crate) fn transition(state: PlayerState, event: Event, snap: &mut Snapshot) -> Step {
    use PlayerState::*;
    use StreamAction::*;

    debug!("Transición: {:?} + {:?}", state, event);

    match (state, event) {
        (_, Event::Reset) => {
            snap.teardown();
            Step::to(Default, Close)
        }

        // Default: la primera pista reemplaza la lista
        (Default, Event::Play(track)) => {
            snap.replace_with(track);
            Step::to(Playing, Start)
        }
        (Default, Event::Resume) if !snap.tracks.is_empty() => {
            snap.current_index = Some(0);
            Step::to(Playing, Start)
        }
        (Default, _) => Step::stay(Default),

        // Idle: como Default pero agrega a la lista existente
        // Apunta a la pista pedida; un `Previous` previo en Idle solo cuenta para `Resume`
        (Idle, Event::Play(track)) => {
            let index = snap.add_track(track);
            snap.current_index = Some(index);
            Step::to(Playing, Start)
        }
        (Idle, Event::Resume) if !snap.tracks.is_empty() => Step::to(Playing, Start),
        (Idle, Event::Previous) => {
            snap.step_back();
            Step::stay(Idle)
        }
        (Idle, _) => Step::stay(Idle),

        // Playing / Paused comparten las salidas
        (Playing | Paused, Event::Stop) => Step::to(Idle, Close),
        (Playing | Paused, Event::Next | Event::TrackEnded) => match snap.advance() {
            Some(_) => Step::to(Playing, Start),
            None => Step::to(Idle, Close),
        },
        (Playing | Paused, Event::Previous) => {
            snap.step_back();
            Step::to(Playing, Start)
        }
        (Playing | Paused, Event::RestartTrack) => Step::to(Playing, Start),
        (Playing | Paused, Event::Play(track)) => {
            snap.add_track(track);
            Step::stay(state)
        }
        (Playing | Paused, Event::NewSink) => Step::to(state, Reroute),

        (Playing, Event::Pause) => Step::stay(Paused),
        (Paused, Event::Resume) => Step::stay(Playing),
        (Playing | Paused, Event::Pause | Event::Resume) => Step::stay(state),
    }
}
