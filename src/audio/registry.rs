use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::{debug, info};

use super::player::Player;
use crate::config::Config;

/// Players por guild, creados de forma perezosa.
///
/// Las lecturas van directo al mapa; la creación pasa por `create_lock` y
/// vuelve a mirar el mapa antes de insertar, así nunca se arrancan dos
/// workers para el mismo guild.
pub struct Registry {
    players: DashMap<GuildId, Arc<Player>>,
    create_lock: Mutex<()>,
    config: Arc<Config>,
    spawned: AtomicUsize,
}

impl Registry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            players: DashMap::new(),
            create_lock: Mutex::new(()),
            config,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Devuelve el player del guild, creándolo (y arrancando su worker) si no existe
    pub fn player(&self, guild_id: GuildId) -> Arc<Player> {
        if let Some(player) = self.get(guild_id) {
            return player;
        }

        let _guard = self.create_lock.lock();
        if let Some(player) = self.get(guild_id) {
            debug!("Player del guild {} creado por otra tarea", guild_id);
            return player;
        }

        let player = Arc::new(Player::spawn(guild_id, self.config.clone()));
        self.players.insert(guild_id, player.clone());
        let total = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        info!("📋 Registro: {} players activos", total);

        player
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Workers arrancados desde que existe el registro
    pub fn workers_spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(Arc::new(Config::default())))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_share_one_player() {
        let registry = registry();
        let guild_id = GuildId::new(42);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.player(guild_id) })
            })
            .collect();

        let mut players = Vec::new();
        for handle in handles {
            players.push(handle.await.unwrap());
        }

        assert!(players.iter().all(|p| Arc::ptr_eq(p, &players[0])));
        assert_eq!(registry.workers_spawned(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_guilds_get_separate_players() {
        let registry = registry();
        assert!(registry.get(GuildId::new(1)).is_none());

        let first = registry.player(GuildId::new(1));
        let second = registry.player(GuildId::new(2));

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.guild_id(), GuildId::new(1));
        assert!(Arc::ptr_eq(&registry.get(GuildId::new(1)).unwrap(), &first));
        assert_eq!(registry.workers_spawned(), 2);
    }
}
