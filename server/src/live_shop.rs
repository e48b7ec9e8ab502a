//! Live shop state
//!
//! A shop travels with its owner: it sits wherever the owner currently is and
//! is closed while the owner is offline. Ownership is temporary; once the
//! scheduled handover time passes the game hands the shop to another player
//! and rolls new prices.

use log::info;
use rand::Rng;
use shared::{Location, ShopId, ShopView, UserId};
use std::collections::HashMap;

use crate::config::GameConfig;
use crate::error::GameError;
use crate::live_user::LiveUser;
use crate::store::ShopDoc;

/// What a player was last told about a shop
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sent {
    revision: u64,
    in_range: bool,
    location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeOutcome {
    pub units: u32,
    pub total: i64,
    pub commission: i64,
}

#[derive(Debug)]
pub struct LiveShop {
    pub doc: ShopDoc,
    revision: u64,
    sent: HashMap<UserId, Sent>,
    dirty: bool,
}

/// Rolls `base` within `±jitter` of itself, never below 1
pub fn roll_price<R: Rng + ?Sized>(base: u32, jitter: f64, rng: &mut R) -> u32 {
    let factor = 1.0 + jitter * rng.gen_range(-1.0..=1.0);
    (base as f64 * factor).round().max(1.0) as u32
}

impl LiveShop {
    pub fn new(doc: ShopDoc) -> Self {
        Self {
            doc,
            revision: 0,
            sent: HashMap::new(),
            dirty: false,
        }
    }

    pub fn id(&self) -> ShopId {
        self.doc.id
    }

    pub fn owner(&self) -> UserId {
        self.doc.owner
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

    /// The shop's position given its owner, `None` while closed
    pub fn location_of(owner: Option<&LiveUser>) -> Option<Location> {
        owner.filter(|o| o.online).and_then(|o| o.location)
    }

    fn view(&self, sent: Sent, now: u64) -> ShopView {
        ShopView {
            id: self.doc.id,
            owner: self.doc.owner,
            sell_price: self.doc.sell_price,
            buy_price: self.doc.buy_price,
            location: sent.location,
            in_range: sent.in_range,
            handover_in_ms: self.doc.handover_at.saturating_sub(now),
        }
    }

    /// Returns a view for `user` when what they observe changed. Owners always
    /// see their shop; others see it while it is open and within visibility
    /// range. A shop leaving sight is reported once with no location.
    pub fn reconcile(
        &mut self,
        user: &LiveUser,
        location: Option<Location>,
        now: u64,
        config: &GameConfig,
    ) -> Option<ShopView> {
        let is_owner = user.id() == self.doc.owner;
        let distance = location.and_then(|loc| user.distance_to(&loc));
        let in_range = !is_owner && distance.map_or(false, |d| d <= config.shop_range_m);
        let shown = is_owner || distance.map_or(false, |d| d <= config.visibility_range_m);

        let current = Sent {
            revision: self.revision,
            in_range,
            location: if shown { location } else { None },
        };

        match self.sent.get(&user.id()) {
            None if !shown => return None,
            Some(previous) if *previous == current => return None,
            _ => {}
        }

        self.sent.insert(user.id(), current);
        Some(self.view(current, now))
    }

    pub fn forget_sent(&mut self, user: UserId) {
        self.sent.remove(&user);
    }

    fn ensure_trade(
        &self,
        user: &LiveUser,
        amount: i64,
        location: Option<Location>,
        config: &GameConfig,
    ) -> Result<u32, GameError> {
        if amount <= 0 || amount > u32::MAX as i64 {
            return Err(GameError::InvalidAmount(amount));
        }
        if user.id() == self.doc.owner {
            return Err(GameError::OwnShop);
        }
        let location = location.ok_or(GameError::ShopClosed)?;
        user.ensure_within(&location, config.shop_range_m)?;
        Ok(amount as u32)
    }

    /// Sells materials to `user`
    pub fn buy(
        &mut self,
        user: &mut LiveUser,
        amount: i64,
        location: Option<Location>,
        config: &GameConfig,
    ) -> Result<TradeOutcome, GameError> {
        let units = self.ensure_trade(user, amount, location, config)?;
        if units > user.material_room(config) {
            return Err(GameError::CapacityExceeded);
        }

        let total = units as i64 * self.doc.sell_price as i64;
        user.pay(total)?;
        user.add_materials(units);

        Ok(TradeOutcome {
            units,
            total,
            commission: config.commission(total),
        })
    }

    /// Buys products from `user`
    pub fn sell(
        &mut self,
        user: &mut LiveUser,
        amount: i64,
        location: Option<Location>,
        config: &GameConfig,
    ) -> Result<TradeOutcome, GameError> {
        let units = self.ensure_trade(user, amount, location, config)?;
        user.take_products(units)?;

        let total = units as i64 * self.doc.buy_price as i64;
        user.earn(total);

        Ok(TradeOutcome {
            units,
            total,
            commission: config.commission(total),
        })
    }

    pub fn due_for_handover(&self, now: u64) -> bool {
        now >= self.doc.handover_at
    }

    pub fn roll_prices<R: Rng + ?Sized>(&mut self, config: &GameConfig, rng: &mut R) {
        self.doc.sell_price = roll_price(config.material_price, config.price_jitter, rng);
        self.doc.buy_price = roll_price(config.product_price, config.price_jitter, rng);
        self.touch();
    }

    /// Transfers the shop to `new_owner`, or extends the current ownership
    /// when nobody can take it over. Returns the previous owner on transfer.
    pub fn hand_over<R: Rng + ?Sized>(
        &mut self,
        new_owner: Option<UserId>,
        now: u64,
        config: &GameConfig,
        rng: &mut R,
    ) -> Option<UserId> {
        self.doc.handover_at = now + config.shop_lifetime_ms;

        let Some(new_owner) = new_owner else {
            self.touch();
            return None;
        };

        let previous = self.doc.owner;
        self.doc.owner = new_owner;
        self.roll_prices(config, rng);
        info!(
            "Shop {} handed over from user {} to user {}",
            self.doc.id, previous, new_owner
        );
        Some(previous)
    }
}
