use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{FactoryId, Packet, ShopId, TeamId, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::GameConfig;
use crate::error::{GameError, StoreError};
use crate::live_factory::LiveFactory;
use crate::live_shop::LiveShop;
use crate::live_user::LiveUser;
use crate::store::{DocumentStore, TeamDoc};

/// Packets addressed to individual players
pub type Outbound = Vec<(UserId, Packet)>;

fn saved(result: Result<(), StoreError>, failure: &mut Option<StoreError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Store write failed: {}", e);
            failure.get_or_insert(e);
            false
        }
    }
}

/// Current unix time in milliseconds
pub fn unix_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}

pub struct GameState {
    pub tick: u32,
    pub(crate) config: GameConfig,
    pub(crate) store: Box<dyn DocumentStore>,
    pub(crate) teams: HashMap<TeamId, TeamDoc>,
    pub(crate) users: HashMap<UserId, LiveUser>,
    pub(crate) factories: BTreeMap<FactoryId, LiveFactory>,
    pub(crate) shops: BTreeMap<ShopId, LiveShop>,
    pub(crate) rng: StdRng,
}

impl GameState {
    pub fn new(
        store: Box<dyn DocumentStore>,
        config: GameConfig,
        now: u64,
    ) -> Result<Self, StoreError> {
        Self::with_rng(store, config, now, StdRng::from_entropy())
    }

    pub fn with_rng(
        store: Box<dyn DocumentStore>,
        config: GameConfig,
        now: u64,
        rng: StdRng,
    ) -> Result<Self, StoreError> {
        let world = store.load()?;

        let teams = world.teams.into_iter().map(|t| (t.id, t)).collect();
        let users = world
            .users
            .into_iter()
            .map(|u| (u.id, LiveUser::new(u)))
            .collect();
        let factories = world
            .factories
            .into_iter()
            .map(|f| (f.id, LiveFactory::new(f, now)))
            .collect();
        let shops = world
            .shops
            .into_iter()
            .map(|s| (s.id, LiveShop::new(s)))
            .collect();

        let state = Self {
            tick: 0,
            config,
            store,
            teams,
            users,
            factories,
            shops,
            rng,
        };

        info!(
            "Loaded game {}: {} teams, {} users, {} factories, {} shops",
            world.game,
            state.teams.len(),
            state.users.len(),
            state.factories.len(),
            state.shops.len()
        );
        Ok(state)
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn user(&self, id: UserId) -> Option<&LiveUser> {
        self.users.get(&id)
    }

    pub fn factory(&self, id: FactoryId) -> Option<&LiveFactory> {
        self.factories.get(&id)
    }

    pub fn shop(&self, id: ShopId) -> Option<&LiveShop> {
        self.shops.get(&id)
    }

    pub fn team_name(&self, id: TeamId) -> Option<&str> {
        self.teams.get(&id).map(|t| t.name.as_str())
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .users
            .values()
            .filter(|u| u.online)
            .map(|u| u.id())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn online_team_members(&self, team: TeamId) -> Vec<UserId> {
        self.online_users()
            .into_iter()
            .filter(|id| self.users[id].team() == team)
            .collect()
    }

    /// Brings a player online. Everything they have discovered is reported
    /// again on the next sync.
    pub fn connect(&mut self, user_id: UserId) -> Result<Outbound, GameError> {
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or(GameError::UnknownUser(user_id))?;
        user.go_online();
        let team = user.team();

        for factory in self.factories.values_mut() {
            factory.forget_sent(user_id);
        }
        for shop in self.shops.values_mut() {
            shop.forget_sent(user_id);
        }

        info!(
            "User {} joined for team {}",
            user_id,
            self.team_name(team).unwrap_or("?")
        );
        Ok(vec![(user_id, Packet::Connected { user_id, team })])
    }

    pub fn disconnect(&mut self, user_id: UserId) {
        if let Some(user) = self.users.get_mut(&user_id) {
            user.go_offline();
            info!("User {} left", user_id);
        }
    }

    /// Writes every document changed since the last flush. A document whose
    /// save fails stays dirty and is retried on the next flush; the remaining
    /// documents are still written. Returns the first failure.
    pub(crate) fn flush_dirty(&mut self) -> Result<(), StoreError> {
        let mut failure = None;

        for user in self.users.values_mut().filter(|u| u.is_dirty()) {
            if saved(self.store.save_user(&user.doc), &mut failure) {
                user.mark_saved();
            }
        }
        for factory in self.factories.values_mut().filter(|f| f.is_dirty()) {
            if saved(self.store.save_factory(&factory.doc), &mut failure) {
                factory.mark_saved();
            }
        }
        for shop in self.shops.values_mut().filter(|s| s.is_dirty()) {
            if saved(self.store.save_shop(&shop.doc), &mut failure) {
                shop.mark_saved();
            }
        }
        saved(self.store.commit(), &mut failure);

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Advances timed state: production, ping expiry and shop handovers
    pub fn tick(&mut self, now: u64) -> Outbound {
        self.tick += 1;
        let mut outbound = Vec::new();

        for factory in self.factories.values_mut() {
            if factory.produce(now, &self.config) {
                debug!("Factory {} produced", factory.id());
            }
            factory.expire_pings(now);
        }

        let shop_ids: Vec<ShopId> = self
            .shops
            .values()
            .filter(|s| s.due_for_handover(now))
            .map(|s| s.id())
            .collect();
        for shop_id in shop_ids {
            outbound.extend(self.run_handover(shop_id, now));
        }

        if let Err(e) = self.flush_dirty() {
            error!("Failed to persist tick {}: {}", self.tick, e);
        }
        outbound
    }

    fn run_handover(&mut self, shop_id: ShopId, now: u64) -> Outbound {
        let owners: HashSet<UserId> = self.shops.values().map(|s| s.owner()).collect();
        let mut candidates: Vec<UserId> = self
            .users
            .values()
            .filter(|u| u.online && u.location.is_some() && !owners.contains(&u.id()))
            .map(|u| u.id())
            .collect();
        candidates.sort_unstable();
        let new_owner = candidates.choose(&mut self.rng).copied();

        let Some(shop) = self.shops.get_mut(&shop_id) else {
            return Vec::new();
        };
        match shop.hand_over(new_owner, now, &self.config, &mut self.rng) {
            Some(previous) => {
                let packet = Packet::ShopHandover {
                    shop: shop_id,
                    from: previous,
                    to: shop.owner(),
                };
                vec![(previous, packet.clone()), (shop.owner(), packet)]
            }
            None => {
                debug!("No candidate for shop {}, ownership extended", shop_id);
                Vec::new()
            }
        }
    }

    /// Reconciles every online player against every live object and returns
    /// the resulting state updates.
    pub fn sync(&mut self, now: u64) -> Outbound {
        let mut outbound = Vec::new();
        let online = self.online_users();

        for id in &online {
            if let Some(view) = self.users.get_mut(id).and_then(|u| u.reconcile()) {
                outbound.push((*id, Packet::UserState(view)));
            }
        }

        for id in &online {
            let user = &self.users[id];
            for factory in self.factories.values_mut() {
                if let Some(view) = factory.reconcile(user, now, &self.config) {
                    outbound.push((*id, Packet::FactoryState(view)));
                }
            }
            for shop in self.shops.values_mut() {
                let location = LiveShop::location_of(self.users.get(&shop.owner()));
                if let Some(view) = shop.reconcile(user, location, now, &self.config) {
                    outbound.push((*id, Packet::ShopState(view)));
                }
            }
        }

        if let Err(e) = self.flush_dirty() {
            error!("Failed to persist discoveries: {}", e);
        }
        outbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WorldDocument};
    use shared::Location;

    fn center() -> Location {
        Location::new(52.0, 13.0)
    }

    fn demo_game() -> GameState {
        let store = MemoryStore::new(WorldDocument::demo(center(), 0));
        GameState::with_rng(
            Box::new(store),
            GameConfig::default(),
            0,
            StdRng::seed_from_u64(11),
        )
        .unwrap()
    }

    fn place(game: &mut GameState, user: UserId, seq: u32, location: Location) {
        game.users
            .get_mut(&user)
            .unwrap()
            .set_location(seq, location);
    }

    #[test]
    fn test_load_demo_world() {
        let game = demo_game();
        assert_eq!(game.users.len(), 6);
        assert_eq!(game.factories.len(), 6);
        assert_eq!(game.team_name(1), Some("Red"));
        assert!(game.online_users().is_empty());
    }

    #[test]
    fn test_connect_unknown_user() {
        let mut game = demo_game();
        assert!(matches!(game.connect(99), Err(GameError::UnknownUser(99))));
    }

    #[test]
    fn test_connect_reports_team() {
        let mut game = demo_game();
        let out = game.connect(2).unwrap();
        assert_eq!(out.len(), 1);
        match &out[0] {
            (2, Packet::Connected { user_id, team }) => {
                assert_eq!(*user_id, 2);
                assert_eq!(*team, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(game.online_users(), vec![2]);
    }

    #[test]
    fn test_sync_sends_user_and_allied_factories() {
        let mut game = demo_game();
        game.connect(1).unwrap();

        let out = game.sync(0);
        let user_states = out
            .iter()
            .filter(|(_, p)| matches!(p, Packet::UserState(_)))
            .count();
        let factories: Vec<&shared::FactoryView> = out
            .iter()
            .filter_map(|(_, p)| match p {
                Packet::FactoryState(v) => Some(v),
                _ => None,
            })
            .collect();

        assert_eq!(user_states, 1);
        // team 1 owns factories 1 and 4 in the demo world
        assert_eq!(factories.len(), 2);
        assert!(factories.iter().all(|f| f.ally));
        assert!(game.sync(0).is_empty());
    }

    #[test]
    fn test_sync_discovers_nearby_factories_and_persists() {
        let mut game = demo_game();
        game.connect(1).unwrap();
        place(&mut game, 1, 1, center());

        let out = game.sync(0);
        let factories = out
            .iter()
            .filter(|(_, p)| matches!(p, Packet::FactoryState(_)))
            .count();
        assert_eq!(factories, 6);
        assert!(game.factories.values().all(|f| f.is_visible_to(1)));
    }

    #[test]
    fn test_reconnect_resends_known_factories() {
        let mut game = demo_game();
        game.connect(1).unwrap();
        place(&mut game, 1, 1, center());
        game.sync(0);

        game.disconnect(1);
        assert!(game.sync(0).is_empty());

        game.connect(1).unwrap();
        let out = game.sync(0);
        let factories = out
            .iter()
            .filter(|(_, p)| matches!(p, Packet::FactoryState(_)))
            .count();
        assert_eq!(factories, 6);
    }

    #[test]
    fn test_tick_runs_production() {
        let mut game = demo_game();
        game.tick(10_000);
        // level 1 factories turn 5 materials into products
        assert!(game
            .factories
            .values()
            .all(|f| f.doc.stock_out == 5 && f.doc.stock_in == 15));
        assert_eq!(game.tick, 1);
    }

    #[test]
    fn test_tick_hands_over_due_shop() {
        let mut game = demo_game();
        game.connect(1).unwrap();
        game.connect(3).unwrap();
        place(&mut game, 3, 1, center());

        assert!(game.tick(1_000).is_empty());

        let out = game.tick(300_000);
        assert_eq!(out.len(), 2);
        assert_eq!(game.shops[&1].owner(), 3);
        assert_eq!(game.shops[&1].doc.handover_at, 600_000);
        for (_, packet) in &out {
            match packet {
                Packet::ShopHandover { shop, from, to } => {
                    assert_eq!((*shop, *from, *to), (1, 1, 3));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_handover_without_candidates_extends() {
        let mut game = demo_game();
        let out = game.tick(300_000);
        assert!(out.is_empty());
        assert_eq!(game.shops[&1].owner(), 1);
        assert_eq!(game.shops[&1].doc.handover_at, 600_000);
    }
}
