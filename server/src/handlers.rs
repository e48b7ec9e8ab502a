//! Player action dispatch
//!
//! Turns in-game client packets into [`Action`]s and applies them to the
//! [`GameState`]. Connection management packets are handled by the network
//! layer and never reach this module.

use log::{debug, error};
use shared::{FactoryId, Location, Packet, ShopId, UserId};

use crate::error::GameError;
use crate::game::{GameState, Outbound};
use crate::live_shop::LiveShop;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    UpdateLocation { sequence: u32, location: Location },
    Attack(FactoryId),
    LevelUp(FactoryId),
    Deposit { factory: FactoryId, amount: i64 },
    Collect(FactoryId),
    Ping(FactoryId),
    Buy { shop: ShopId, amount: i64 },
    Sell { shop: ShopId, amount: i64 },
}

impl Action {
    pub fn from_packet(packet: &Packet) -> Option<Action> {
        let action = match *packet {
            Packet::UpdateLocation { sequence, location } => {
                Action::UpdateLocation { sequence, location }
            }
            Packet::Attack { factory } => Action::Attack(factory),
            Packet::LevelUp { factory } => Action::LevelUp(factory),
            Packet::Deposit { factory, amount } => Action::Deposit { factory, amount },
            Packet::Collect { factory } => Action::Collect(factory),
            Packet::Ping { factory } => Action::Ping(factory),
            Packet::Buy { shop, amount } => Action::Buy { shop, amount },
            Packet::Sell { shop, amount } => Action::Sell { shop, amount },
            _ => return None,
        };
        Some(action)
    }
}

/// Reply sent to a player whose action was refused
pub fn rejection(error: &GameError) -> Packet {
    Packet::Rejected {
        reason: error.to_string(),
    }
}

impl GameState {
    /// Applies `action` on behalf of `user_id` and writes the changed
    /// documents through to the store. State changes reach players on the
    /// next sync; only direct replies are returned here.
    ///
    /// A failed write does not undo the action. The documents stay dirty and
    /// are written by a later flush.
    pub fn handle(
        &mut self,
        user_id: UserId,
        action: Action,
        now: u64,
    ) -> Result<Outbound, GameError> {
        let result = self.apply(user_id, action, now);
        if let Err(e) = self.flush_dirty() {
            error!("Failed to persist action of user {}: {}", user_id, e);
        }
        result
    }

    fn apply(&mut self, user_id: UserId, action: Action, now: u64) -> Result<Outbound, GameError> {
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or(GameError::UnknownUser(user_id))?;
        if !user.online {
            return Err(GameError::Offline);
        }

        match action {
            Action::UpdateLocation { sequence, location } => {
                if !user.set_location(sequence, location) {
                    debug!("Dropped stale location {} from user {}", sequence, user_id);
                }
                Ok(Vec::new())
            }

            Action::Attack(factory_id) => {
                let factory = self
                    .factories
                    .get_mut(&factory_id)
                    .ok_or(GameError::UnknownFactory(factory_id))?;
                let outcome = factory.attack(user_id, &mut self.users, now, &self.config)?;

                let packet = Packet::AttackResult {
                    factory: factory_id,
                    conquer_value: outcome.conquer_value,
                    conquered: outcome.conquered,
                };
                let mut outbound = vec![(user_id, packet.clone())];
                if let (true, Some(previous)) = (outcome.conquered, outcome.previous_team) {
                    for member in self.online_team_members(previous) {
                        outbound.push((member, packet.clone()));
                    }
                }
                Ok(outbound)
            }

            Action::LevelUp(factory_id) => {
                let factory = self
                    .factories
                    .get_mut(&factory_id)
                    .ok_or(GameError::UnknownFactory(factory_id))?;
                factory.level_up(user, &self.config)?;
                Ok(Vec::new())
            }

            Action::Deposit { factory, amount } => {
                let live = self
                    .factories
                    .get_mut(&factory)
                    .ok_or(GameError::UnknownFactory(factory))?;
                live.deposit(user, amount, &self.config)?;
                Ok(Vec::new())
            }

            Action::Collect(factory_id) => {
                let factory = self
                    .factories
                    .get_mut(&factory_id)
                    .ok_or(GameError::UnknownFactory(factory_id))?;
                factory.collect(user, &self.config)?;
                Ok(Vec::new())
            }

            Action::Ping(factory_id) => {
                let team = user.team();
                let factory = self
                    .factories
                    .get_mut(&factory_id)
                    .ok_or(GameError::UnknownFactory(factory_id))?;
                factory.ping(user, now, &self.config)?;

                let packet = Packet::Pinged {
                    factory: factory_id,
                    by: user_id,
                };
                // teammates who cannot see the factory yet are not told about it
                let factory = self
                    .factories
                    .get(&factory_id)
                    .ok_or(GameError::UnknownFactory(factory_id))?;
                Ok(self
                    .online_team_members(team)
                    .into_iter()
                    .filter(|member| {
                        self.users
                            .get(member)
                            .map_or(false, |u| factory.can_see(u, &self.config))
                    })
                    .map(|member| (member, packet.clone()))
                    .collect())
            }

            Action::Buy { shop, amount } => self.trade(user_id, shop, amount, true),
            Action::Sell { shop, amount } => self.trade(user_id, shop, amount, false),
        }
    }

    fn trade(
        &mut self,
        user_id: UserId,
        shop_id: ShopId,
        amount: i64,
        buying: bool,
    ) -> Result<Outbound, GameError> {
        let shop = self
            .shops
            .get_mut(&shop_id)
            .ok_or(GameError::UnknownShop(shop_id))?;
        let owner = shop.owner();
        let location = LiveShop::location_of(self.users.get(&owner));

        let user = self
            .users
            .get_mut(&user_id)
            .ok_or(GameError::UnknownUser(user_id))?;
        let outcome = if buying {
            shop.buy(user, amount, location, &self.config)?
        } else {
            shop.sell(user, amount, location, &self.config)?
        };

        if let Some(owner) = self.users.get_mut(&owner) {
            owner.earn(outcome.commission);
        }
        debug!(
            "User {} {} {} units at shop {} for {}",
            user_id,
            if buying { "bought" } else { "sold" },
            outcome.units,
            shop_id,
            outcome.total
        );
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::error::StoreError;
    use crate::store::{DocumentStore, FactoryDoc, MemoryStore, ShopDoc, UserDoc, WorldDocument};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn center() -> Location {
        Location::new(52.0, 13.0)
    }

    fn factory_location(game: &GameState, id: FactoryId) -> Location {
        game.factory(id).unwrap().doc.location
    }

    fn online_game(users: &[UserId]) -> GameState {
        let store = MemoryStore::new(WorldDocument::demo(center(), 0));
        let mut game = GameState::with_rng(
            Box::new(store),
            GameConfig::default(),
            0,
            StdRng::seed_from_u64(5),
        )
        .unwrap();
        for &id in users {
            game.connect(id).unwrap();
        }
        game
    }

    /// Memory store whose next `factory_failures` factory saves fail
    struct FlakyStore {
        inner: MemoryStore,
        factory_failures: u32,
    }

    impl DocumentStore for FlakyStore {
        fn load(&self) -> Result<WorldDocument, StoreError> {
            self.inner.load()
        }

        fn save_user(&mut self, doc: &UserDoc) -> Result<(), StoreError> {
            self.inner.save_user(doc)
        }

        fn save_factory(&mut self, doc: &FactoryDoc) -> Result<(), StoreError> {
            if self.factory_failures > 0 {
                self.factory_failures -= 1;
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
            }
            self.inner.save_factory(doc)
        }

        fn save_shop(&mut self, doc: &ShopDoc) -> Result<(), StoreError> {
            self.inner.save_shop(doc)
        }
    }

    fn go_to(game: &mut GameState, user: UserId, location: Location) {
        let seq = game.user(user).unwrap().last_location_seq + 1;
        game.handle(user, Action::UpdateLocation { sequence: seq, location }, 0)
            .unwrap();
    }

    #[test]
    fn test_action_from_packet() {
        assert_eq!(
            Action::from_packet(&Packet::Deposit {
                factory: 3,
                amount: 7
            }),
            Some(Action::Deposit {
                factory: 3,
                amount: 7
            })
        );
        assert_eq!(
            Action::from_packet(&Packet::Ping { factory: 2 }),
            Some(Action::Ping(2))
        );
        assert_eq!(Action::from_packet(&Packet::Heartbeat), None);
        assert_eq!(
            Action::from_packet(&Packet::Connect {
                client_version: 1,
                user_id: 1
            }),
            None
        );
    }

    #[test]
    fn test_offline_user_rejected() {
        let mut game = online_game(&[]);
        let result = game.handle(1, Action::Collect(1), 0);
        assert!(matches!(result, Err(GameError::Offline)));
    }

    #[test]
    fn test_unknown_factory_rejected() {
        let mut game = online_game(&[1]);
        let result = game.handle(1, Action::LevelUp(42), 0);
        assert!(matches!(result, Err(GameError::UnknownFactory(42))));
        match rejection(&result.unwrap_err()) {
            Packet::Rejected { reason } => assert_eq!(reason, "Unknown factory 42"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_level_up_persists_through_store() {
        let mut game = online_game(&[1]);
        let target = factory_location(&game, 1);
        go_to(&mut game, 1, target);

        game.handle(1, Action::LevelUp(1), 0).unwrap();
        assert_eq!(game.factory(1).unwrap().doc.level, 2);
        assert_eq!(game.user(1).unwrap().doc.money, 400);

        let world = game.store.load().unwrap();
        let saved = world.factories.iter().find(|f| f.id == 1).unwrap();
        assert_eq!(saved.level, 2);
        let saved_user = world.users.iter().find(|u| u.id == 1).unwrap();
        assert_eq!(saved_user.money, 400);
    }

    #[test]
    fn test_group_attack_conquers_factory() {
        // users 2, 4 and 6 are team 2; factory 1 belongs to team 1
        let mut game = online_game(&[1, 2, 4, 6]);
        let target = factory_location(&game, 1);
        for id in [2, 4, 6] {
            go_to(&mut game, id, target);
        }

        let out = game.handle(2, Action::Attack(1), 0).unwrap();
        // 15 strength against defence 10
        let results: Vec<&UserId> = out
            .iter()
            .filter(|(_, p)| {
                matches!(
                    p,
                    Packet::AttackResult {
                        conquer_value: 5,
                        conquered: true,
                        ..
                    }
                )
            })
            .map(|(id, _)| id)
            .collect();
        assert_eq!(results, vec![&2, &1]);
        assert_eq!(game.factory(1).unwrap().doc.team, Some(2));
    }

    #[test]
    fn test_defender_in_range_blocks_conquest() {
        let mut game = online_game(&[1, 2, 4, 6]);
        let target = factory_location(&game, 1);
        for id in [1, 2, 4, 6] {
            go_to(&mut game, id, target);
        }

        let out = game.handle(2, Action::Attack(1), 0).unwrap();
        assert_eq!(out.len(), 1);
        match &out[0].1 {
            Packet::AttackResult {
                conquer_value,
                conquered,
                ..
            } => {
                assert_eq!(*conquer_value, 0);
                assert!(!conquered);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(game.factory(1).unwrap().doc.defence, 5);
    }

    #[test]
    fn test_ping_notifies_online_teammates() {
        let mut game = online_game(&[1, 2, 3]);
        game.sync(0);

        let out = game.handle(1, Action::Ping(1), 0).unwrap();
        let recipients: Vec<UserId> = out.iter().map(|(id, _)| *id).collect();
        assert_eq!(recipients, vec![1, 3]);

        let synced = game.sync(1);
        let pinged_for: Vec<UserId> = synced
            .iter()
            .filter_map(|(id, p)| match p {
                Packet::FactoryState(v) if v.id == 1 && v.pinged => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(pinged_for, vec![1, 3]);
    }

    #[test]
    fn test_ping_allied_factory_right_after_connect() {
        let mut game = online_game(&[1]);

        let out = game.handle(1, Action::Ping(1), 0).unwrap();
        assert_eq!(out.len(), 1);
        assert!(game.factory(1).unwrap().is_visible_to(1));
    }

    #[test]
    fn test_ping_not_sent_to_teammates_who_never_saw_factory() {
        // factory 1 belongs to team 1; user 4 is on team 2 and has no location
        let mut game = online_game(&[2, 4]);
        let target = factory_location(&game, 1);
        go_to(&mut game, 2, target);

        let out = game.handle(2, Action::Ping(1), 0).unwrap();
        let recipients: Vec<UserId> = out.iter().map(|(id, _)| *id).collect();
        assert_eq!(recipients, vec![2]);
    }

    #[test]
    fn test_failed_write_keeps_action_and_retries() {
        let store = FlakyStore {
            inner: MemoryStore::new(WorldDocument::demo(center(), 0)),
            factory_failures: 1,
        };
        let mut game = GameState::with_rng(
            Box::new(store),
            GameConfig::default(),
            0,
            StdRng::seed_from_u64(5),
        )
        .unwrap();
        game.connect(1).unwrap();
        let target = factory_location(&game, 1);
        go_to(&mut game, 1, target);

        // the level up happened even though its factory write failed
        assert!(game.handle(1, Action::LevelUp(1), 0).is_ok());
        assert_eq!(game.factory(1).unwrap().doc.level, 2);
        assert!(game.factory(1).unwrap().is_dirty());

        let world = game.store.load().unwrap();
        assert_eq!(world.factories.iter().find(|f| f.id == 1).unwrap().level, 1);
        assert_eq!(world.users.iter().find(|u| u.id == 1).unwrap().money, 400);

        game.tick(1_000);
        let world = game.store.load().unwrap();
        assert_eq!(world.factories.iter().find(|f| f.id == 1).unwrap().level, 2);
        assert!(!game.factory(1).unwrap().is_dirty());
    }

    #[test]
    fn test_ping_unseen_factory_rejected() {
        let mut game = online_game(&[1]);
        game.sync(0);
        // factory 2 belongs to team 2 and is far from the unplaced player
        let result = game.handle(1, Action::Ping(2), 0);
        assert!(matches!(result, Err(GameError::NotVisible)));
    }

    #[test]
    fn test_trade_pays_owner_commission() {
        let mut game = online_game(&[1, 2]);
        go_to(&mut game, 1, center());
        go_to(&mut game, 2, center().offset_m(5.0, 0.0));

        game.handle(2, Action::Buy { shop: 1, amount: 10 }, 0).unwrap();
        assert_eq!(game.user(2).unwrap().doc.money, 400);
        assert_eq!(game.user(2).unwrap().doc.materials, 20);
        assert_eq!(game.user(1).unwrap().doc.money, 510);
    }

    #[test]
    fn test_trade_at_closed_shop_rejected() {
        let mut game = online_game(&[2]);
        go_to(&mut game, 2, center());

        let result = game.handle(2, Action::Sell { shop: 1, amount: 1 }, 0);
        assert!(matches!(result, Err(GameError::ShopClosed)));
    }

    #[test]
    fn test_deposit_then_collect_cycle() {
        let mut game = online_game(&[1]);
        let target = factory_location(&game, 1);
        go_to(&mut game, 1, target);

        game.handle(1, Action::Deposit { factory: 1, amount: 10 }, 0)
            .unwrap();
        assert_eq!(game.factory(1).unwrap().doc.stock_in, 30);

        game.tick(10_000);
        game.handle(1, Action::Collect(1), 10_000).unwrap();
        assert_eq!(game.user(1).unwrap().doc.products, 5);
        assert_eq!(game.factory(1).unwrap().doc.stock_out, 0);
    }
}
