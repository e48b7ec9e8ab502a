//! Runtime state of a player
//!
//! Wraps the persistent [`UserDoc`] with everything that only exists while the
//! server runs: whether the player is connected, where they are and what was
//! last reported to them.

use shared::{Location, TeamId, UserId, UserView};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::store::UserDoc;

#[derive(Debug)]
pub struct LiveUser {
    pub doc: UserDoc,
    pub online: bool,
    pub location: Option<Location>,
    /// Highest location sequence accepted since the player connected
    pub last_location_seq: u32,
    pub last_attack_at: Option<u64>,
    sent: Option<UserView>,
    dirty: bool,
}

impl LiveUser {
    pub fn new(doc: UserDoc) -> Self {
        Self {
            doc,
            online: false,
            location: None,
            last_location_seq: 0,
            last_attack_at: None,
            sent: None,
            dirty: false,
        }
    }

    pub fn id(&self) -> UserId {
        self.doc.id
    }

    pub fn team(&self) -> TeamId {
        self.doc.team
    }

    pub fn strength(&self) -> u32 {
        self.doc.strength
    }

    pub fn go_online(&mut self) {
        self.online = true;
        self.last_location_seq = 0;
        self.sent = None;
    }

    pub fn go_offline(&mut self) {
        self.online = false;
        self.location = None;
    }

    /// Applies a location update unless it is older than one already seen.
    /// Returns whether the update was accepted.
    pub fn set_location(&mut self, sequence: u32, location: Location) -> bool {
        if !self.online || sequence <= self.last_location_seq {
            return false;
        }
        self.last_location_seq = sequence;
        self.location = Some(location);
        true
    }

    /// Location of an online player, or the reason there is none
    pub fn position(&self) -> Result<Location, GameError> {
        if !self.online {
            return Err(GameError::Offline);
        }
        self.location.ok_or(GameError::NoLocation)
    }

    /// Distance to `target` for online players with a known location
    pub fn distance_to(&self, target: &Location) -> Option<f64> {
        if !self.online {
            return None;
        }
        self.location.map(|loc| loc.distance_m(target))
    }

    pub fn ensure_within(&self, target: &Location, range_m: f64) -> Result<(), GameError> {
        let position = self.position()?;
        if position.within(target, range_m) {
            Ok(())
        } else {
            Err(GameError::NotInRange)
        }
    }

    pub fn ensure_attack_ready(&self, now: u64, config: &GameConfig) -> Result<(), GameError> {
        if let Some(last) = self.last_attack_at {
            let ready_at = last + config.attack_cooldown_ms;
            if now < ready_at {
                return Err(GameError::AttackCooldown {
                    remaining_ms: ready_at - now,
                });
            }
        }
        Ok(())
    }

    pub fn pay(&mut self, amount: i64) -> Result<(), GameError> {
        if self.doc.money < amount {
            return Err(GameError::InsufficientFunds {
                needed: amount,
                available: self.doc.money,
            });
        }
        self.doc.money -= amount;
        self.dirty = true;
        Ok(())
    }

    pub fn earn(&mut self, amount: i64) {
        if amount != 0 {
            self.doc.money += amount;
            self.dirty = true;
        }
    }

    pub fn product_room(&self, config: &GameConfig) -> u32 {
        config.carry_capacity.saturating_sub(self.doc.products)
    }

    pub fn material_room(&self, config: &GameConfig) -> u32 {
        config.carry_capacity.saturating_sub(self.doc.materials)
    }

    pub fn add_materials(&mut self, amount: u32) {
        self.doc.materials += amount;
        self.dirty = true;
    }

    pub fn take_materials(&mut self, amount: u32) -> Result<(), GameError> {
        if amount > self.doc.materials {
            return Err(GameError::InvalidAmount(amount as i64));
        }
        self.doc.materials -= amount;
        self.dirty = true;
        Ok(())
    }

    pub fn add_products(&mut self, amount: u32) {
        self.doc.products += amount;
        self.dirty = true;
    }

    pub fn take_products(&mut self, amount: u32) -> Result<(), GameError> {
        if amount > self.doc.products {
            return Err(GameError::InvalidAmount(amount as i64));
        }
        self.doc.products -= amount;
        self.dirty = true;
        Ok(())
    }

    pub fn view(&self) -> UserView {
        UserView {
            id: self.doc.id,
            name: self.doc.name.clone(),
            team: self.doc.team,
            money: self.doc.money,
            strength: self.doc.strength,
            materials: self.doc.materials,
            products: self.doc.products,
        }
    }

    /// Returns the player's own state if it changed since last reported
    pub fn reconcile(&mut self) -> Option<UserView> {
        let view = self.view();
        if self.sent.as_ref() == Some(&view) {
            return None;
        }
        self.sent = Some(view.clone());
        Some(view)
    }

    /// Whether the document has changes the store has not seen yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }
}


#[cfg(test)]
pub(crate) use tests::test_user;
