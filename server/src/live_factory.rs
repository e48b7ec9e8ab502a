//! Live factory state
//!
//! A [`LiveFactory`] owns the factory document and remembers, per player, what
//! that player was last told about it. Every game-state mutation bumps the
//! factory revision; [`LiveFactory::reconcile`] compares the current derived
//! state of a player against that memo and only produces a view when something
//! the player can observe has changed.
//!
//! Visibility is sticky: once a player has been within visibility range of a
//! factory (or it belonged to their team) it stays on their map for good. The
//! set of players that discovered a factory is persisted with the document.

use log::{debug, info};
use shared::{FactoryView, TeamId, UserId};
use std::collections::HashMap;

use crate::config::GameConfig;
use crate::error::GameError;
use crate::live_user::LiveUser;
use crate::store::FactoryDoc;

/// Flags a player observes on a factory besides the document itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    in_range: bool,
    ally: bool,
    pinged: bool,
}

#[derive(Debug, Default)]
struct UserMemo {
    sent_revision: Option<u64>,
    sent: Option<Observed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackOutcome {
    pub conquer_value: i64,
    pub conquered: bool,
    pub previous_team: Option<TeamId>,
    pub looted: u32,
}

#[derive(Debug)]
pub struct LiveFactory {
    pub doc: FactoryDoc,
    revision: u64,
    memos: HashMap<UserId, UserMemo>,
    /// Ping expiry per team
    pings: HashMap<TeamId, u64>,
    last_production_at: u64,
    dirty: bool,
}

impl LiveFactory {
    pub fn new(doc: FactoryDoc, now: u64) -> Self {
        Self {
            doc,
            revision: 0,
            memos: HashMap::new(),
            pings: HashMap::new(),
            last_production_at: now,
            dirty: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.doc.id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn is_ally(&self, user: &LiveUser) -> bool {
        self.doc.team == Some(user.team())
    }

    pub fn is_visible_to(&self, user: UserId) -> bool {
        self.doc.seen_by.contains(&user)
    }

    pub fn is_pinged(&self, team: TeamId, now: u64) -> bool {
        self.pings.get(&team).map_or(false, |&expiry| now < expiry)
    }

    fn in_range(&self, user: &LiveUser, config: &GameConfig) -> bool {
        user.distance_to(&self.doc.location)
            .map_or(false, |d| d <= config.action_range_m)
    }

    fn ensure_in_range(&self, user: &LiveUser, config: &GameConfig) -> Result<(), GameError> {
        user.ensure_within(&self.doc.location, config.action_range_m)
    }

    fn ensure_ally(&self, user: &LiveUser) -> Result<(), GameError> {
        if self.is_ally(user) {
            Ok(())
        } else {
            Err(GameError::NotAllied)
        }
    }

    fn view(&self, observed: Observed) -> FactoryView {
        FactoryView {
            id: self.doc.id,
            name: self.doc.name.clone(),
            team: self.doc.team,
            level: self.doc.level,
            defence: self.doc.defence,
            stock_in: self.doc.stock_in,
            stock_out: self.doc.stock_out,
            location: self.doc.location,
            in_range: observed.in_range,
            ally: observed.ally,
            pinged: observed.pinged,
        }
    }

    /// Records `user` as having seen the factory when it is allied or within
    /// visibility range. Returns whether the factory is visible to them.
    fn discover(&mut self, user: &LiveUser, config: &GameConfig) -> bool {
        if !self.can_see(user, config) {
            return false;
        }
        if self.doc.seen_by.insert(user.id()) {
            debug!("User {} discovered factory {}", user.id(), self.doc.id);
            self.dirty = true;
        }
        true
    }

    /// Whether `user` has seen the factory or would discover it right now
    pub fn can_see(&self, user: &LiveUser, config: &GameConfig) -> bool {
        self.is_visible_to(user.id())
            || self.is_ally(user)
            || user
                .distance_to(&self.doc.location)
                .map_or(false, |d| d <= config.visibility_range_m)
    }

    /// Recomputes what `user` observes and returns a view when it differs from
    /// what they were last sent. Discovering the factory marks it for saving.
    pub fn reconcile(
        &mut self,
        user: &LiveUser,
        now: u64,
        config: &GameConfig,
    ) -> Option<FactoryView> {
        if !self.discover(user, config) {
            return None;
        }
        let ally = self.is_ally(user);

        let observed = Observed {
            in_range: self.in_range(user, config),
            ally,
            pinged: self.is_pinged(user.team(), now),
        };

        let revision = self.revision;
        let memo = self.memos.entry(user.id()).or_default();
        if memo.sent_revision == Some(revision) && memo.sent == Some(observed) {
            return None;
        }
        memo.sent_revision = Some(revision);
        memo.sent = Some(observed);

        Some(self.view(observed))
    }

    /// Drops what `user` was told so the next reconcile reports everything
    /// again. Visibility is kept.
    pub fn forget_sent(&mut self, user: UserId) {
        self.memos.remove(&user);
    }

    /// Runs production if an interval has elapsed. Returns whether the factory
    /// changed.
    pub fn produce(&mut self, now: u64, config: &GameConfig) -> bool {
        let interval = config.production_interval_ms.max(1);
        let elapsed = now.saturating_sub(self.last_production_at) / interval;
        if elapsed == 0 {
            return false;
        }
        // stay on the interval grid regardless of when the tick fired
        self.last_production_at += elapsed * interval;

        let capacity = self.doc.level * config.stock_out_per_level;
        let room = capacity.saturating_sub(self.doc.stock_out);
        let produced = self
            .doc
            .stock_in
            .min(self.doc.level * config.production_per_level)
            .min(room);

        let max_defence = config.max_defence(self.doc.level);
        let defence = (self.doc.defence + config.defence_regen).min(max_defence.max(self.doc.defence));

        if produced == 0 && defence == self.doc.defence {
            return false;
        }

        self.doc.stock_in -= produced;
        self.doc.stock_out += produced;
        self.doc.defence = defence;
        self.touch();
        true
    }

    pub fn level_up(&mut self, user: &mut LiveUser, config: &GameConfig) -> Result<u32, GameError> {
        self.ensure_ally(user)?;
        self.ensure_in_range(user, config)?;
        if self.doc.level >= config.max_level {
            return Err(GameError::MaxLevel);
        }

        user.pay(config.level_up_cost(self.doc.level))?;
        self.doc.level += 1;
        self.doc.defence += config.defence_per_level;
        self.touch();

        info!(
            "User {} raised factory {} to level {}",
            user.id(),
            self.doc.id,
            self.doc.level
        );
        Ok(self.doc.level)
    }

    /// Moves carried materials into the factory's input stock
    pub fn deposit(
        &mut self,
        user: &mut LiveUser,
        amount: i64,
        config: &GameConfig,
    ) -> Result<u32, GameError> {
        if amount <= 0 || amount > user.doc.materials as i64 {
            return Err(GameError::InvalidAmount(amount));
        }
        self.ensure_ally(user)?;
        self.ensure_in_range(user, config)?;

        let capacity = self.doc.level * config.stock_in_per_level;
        let room = capacity.saturating_sub(self.doc.stock_in);
        if room == 0 {
            return Err(GameError::CapacityExceeded);
        }

        let moved = (amount as u32).min(room);
        user.take_materials(moved)?;
        self.doc.stock_in += moved;
        self.touch();
        Ok(moved)
    }

    /// Moves produced goods into the player's inventory
    pub fn collect(&mut self, user: &mut LiveUser, config: &GameConfig) -> Result<u32, GameError> {
        self.ensure_ally(user)?;
        self.ensure_in_range(user, config)?;
        if self.doc.stock_out == 0 {
            return Err(GameError::NothingToCollect);
        }

        let room = user.product_room(config);
        if room == 0 {
            return Err(GameError::CapacityExceeded);
        }

        let moved = self.doc.stock_out.min(room);
        self.doc.stock_out -= moved;
        user.add_products(moved);
        self.touch();
        Ok(moved)
    }

    /// Sum of strengths of online players in action range, allies counting
    /// against attackers, minus the factory's defence.
    pub fn conquer_value<'a>(
        &self,
        users: impl IntoIterator<Item = &'a LiveUser>,
        config: &GameConfig,
    ) -> i64 {
        let pressure: i64 = users
            .into_iter()
            .filter(|user| self.in_range(user, config))
            .map(|user| {
                let strength = user.strength() as i64;
                if self.is_ally(user) {
                    -strength
                } else {
                    strength
                }
            })
            .sum();

        pressure - self.doc.defence as i64
    }

    pub fn attack(
        &mut self,
        attacker: UserId,
        users: &mut HashMap<UserId, LiveUser>,
        now: u64,
        config: &GameConfig,
    ) -> Result<AttackOutcome, GameError> {
        {
            let user = users.get(&attacker).ok_or(GameError::UnknownUser(attacker))?;
            self.ensure_in_range(user, config)?;
            if self.is_ally(user) {
                return Err(GameError::OwnFactory);
            }
            user.ensure_attack_ready(now, config)?;
        }

        let conquer_value = self.conquer_value(users.values(), config);
        let user = users
            .get_mut(&attacker)
            .ok_or(GameError::UnknownUser(attacker))?;
        user.last_attack_at = Some(now);

        let previous_team = self.doc.team;
        if conquer_value <= 0 {
            self.doc.defence = self.doc.defence.saturating_sub(user.strength());
            self.touch();
            debug!(
                "User {} failed to take factory {} (conquer value {}), defence now {}",
                attacker, self.doc.id, conquer_value, self.doc.defence
            );
            return Ok(AttackOutcome {
                conquer_value,
                conquered: false,
                previous_team,
                looted: 0,
            });
        }

        let looted = self.doc.stock_out.min(user.product_room(config));
        user.add_products(looted);

        self.doc.team = Some(user.team());
        self.doc.level = self.doc.level.saturating_sub(1).max(1);
        self.doc.defence = config.max_defence(self.doc.level);
        self.doc.stock_out = 0;
        self.pings.clear();
        self.touch();

        info!(
            "Team {} conquered factory {} from {:?} (conquer value {})",
            user.team(),
            self.doc.id,
            previous_team,
            conquer_value
        );

        Ok(AttackOutcome {
            conquer_value,
            conquered: true,
            previous_team,
            looted,
        })
    }

    /// Marks the factory for the pinging player's whole team
    pub fn ping(&mut self, user: &LiveUser, now: u64, config: &GameConfig) -> Result<(), GameError> {
        if !user.online {
            return Err(GameError::Offline);
        }
        if !self.discover(user, config) {
            return Err(GameError::NotVisible);
        }
        self.pings.insert(user.team(), now + config.ping_duration_ms);
        Ok(())
    }

    /// Forgets expired pings. Returns whether any expired.
    pub fn expire_pings(&mut self, now: u64) -> bool {
        let before = self.pings.len();
        self.pings.retain(|_, expiry| now < *expiry);
        before != self.pings.len()
    }
}
