//! Persistent document store
//!
//! The live layer keeps everything in memory and writes a document back after
//! each mutation. Two backends exist: an in-memory store used by tests and a
//! JSON file holding the whole world.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::{FactoryId, GameId, Location, ShopId, TeamId, UserId};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamDoc {
    pub id: TeamId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDoc {
    pub id: UserId,
    pub game: GameId,
    pub name: String,
    pub team: TeamId,
    pub money: i64,
    pub strength: u32,
    #[serde(default)]
    pub materials: u32,
    #[serde(default)]
    pub products: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactoryDoc {
    pub id: FactoryId,
    pub game: GameId,
    pub name: String,
    pub team: Option<TeamId>,
    pub level: u32,
    pub defence: u32,
    #[serde(default)]
    pub stock_in: u32,
    #[serde(default)]
    pub stock_out: u32,
    pub location: Location,
    /// Users that have discovered this factory
    #[serde(default)]
    pub seen_by: BTreeSet<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShopDoc {
    pub id: ShopId,
    pub game: GameId,
    pub owner: UserId,
    pub sell_price: u32,
    pub buy_price: u32,
    /// Unix millis of the next scheduled ownership transfer
    pub handover_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldDocument {
    pub game: GameId,
    pub teams: Vec<TeamDoc>,
    pub users: Vec<UserDoc>,
    pub factories: Vec<FactoryDoc>,
    pub shops: Vec<ShopDoc>,
}

fn upsert<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

impl WorldDocument {
    pub fn empty(game: GameId) -> Self {
        Self {
            game,
            ..Default::default()
        }
    }

    pub fn upsert_user(&mut self, doc: &UserDoc) {
        upsert(&mut self.users, doc, |u| u.id == doc.id);
    }

    pub fn upsert_factory(&mut self, doc: &FactoryDoc) {
        upsert(&mut self.factories, doc, |f| f.id == doc.id);
    }

    pub fn upsert_shop(&mut self, doc: &ShopDoc) {
        upsert(&mut self.shops, doc, |s| s.id == doc.id);
    }

    /// Drops documents that belong to other games
    pub fn retain_game(&mut self) {
        let game = self.game;
        self.users.retain(|u| u.game == game);
        self.factories.retain(|f| f.game == game);
        self.shops.retain(|s| s.game == game);
    }

    /// Two teams of three players with six factories in a ring around `center`
    /// and one shop.
    pub fn demo(center: Location, now_ms: u64) -> Self {
        let game = 1;
        let teams = vec![
            TeamDoc {
                id: 1,
                name: "Red".to_string(),
            },
            TeamDoc {
                id: 2,
                name: "Blue".to_string(),
            },
        ];

        let users = (1..=6)
            .map(|id| UserDoc {
                id,
                game,
                name: format!("player{}", id),
                team: if id % 2 == 1 { 1 } else { 2 },
                money: 500,
                strength: 5,
                materials: 10,
                products: 0,
            })
            .collect();

        let factories = (0..6u32)
            .map(|i| {
                let angle = (i as f64) * std::f64::consts::PI / 3.0;
                FactoryDoc {
                    id: i + 1,
                    game,
                    name: format!("Factory {}", i + 1),
                    team: match i % 3 {
                        0 => Some(1),
                        1 => Some(2),
                        _ => None,
                    },
                    level: 1,
                    defence: 10,
                    stock_in: 20,
                    stock_out: 0,
                    location: center.offset_m(150.0 * angle.sin(), 150.0 * angle.cos()),
                    seen_by: BTreeSet::new(),
                }
            })
            .collect();

        let shops = vec![ShopDoc {
            id: 1,
            game,
            owner: 1,
            sell_price: 10,
            buy_price: 20,
            handover_at: now_ms + 300_000,
        }];

        Self {
            game,
            teams,
            users,
            factories,
            shops,
        }
    }
}

/// Backend the live layer loads from and writes through to
pub trait DocumentStore: Send {
    fn load(&self) -> Result<WorldDocument, StoreError>;
    fn save_user(&mut self, doc: &UserDoc) -> Result<(), StoreError>;
    fn save_factory(&mut self, doc: &FactoryDoc) -> Result<(), StoreError>;
    fn save_shop(&mut self, doc: &ShopDoc) -> Result<(), StoreError>;

    /// Makes every save since the last commit durable. Backends that write
    /// each document directly have nothing to do.
    fn commit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Keeps the world in memory; counts writes so tests can assert write-through
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub world: WorldDocument,
    pub writes: usize,
}

impl MemoryStore {
    pub fn new(world: WorldDocument) -> Self {
        Self { world, writes: 0 }
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<WorldDocument, StoreError> {
        let mut world = self.world.clone();
        world.retain_game();
        Ok(world)
    }

    fn save_user(&mut self, doc: &UserDoc) -> Result<(), StoreError> {
        self.writes += 1;
        self.world.upsert_user(doc);
        Ok(())
    }

    fn save_factory(&mut self, doc: &FactoryDoc) -> Result<(), StoreError> {
        self.writes += 1;
        self.world.upsert_factory(doc);
        Ok(())
    }

    fn save_shop(&mut self, doc: &ShopDoc) -> Result<(), StoreError> {
        self.writes += 1;
        self.world.upsert_shop(doc);
        Ok(())
    }
}

/// Whole world in one JSON file. Saves update the in-memory copy and
/// [`DocumentStore::commit`] rewrites the file once through a temp file.
pub struct JsonStore {
    path: PathBuf,
    world: WorldDocument,
    pending: bool,
}

impl JsonStore {
    /// Opens the store at `path`, creating it from `seed` when the file does
    /// not exist yet.
    pub fn open(path: &Path, seed: WorldDocument) -> Result<Self, StoreError> {
        let world = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let world: WorldDocument = serde_json::from_str(&raw)?;
            if world.game != seed.game {
                return Err(StoreError::WrongGame {
                    expected: seed.game,
                    found: world.game,
                });
            }
            info!("Loaded world for game {} from {}", world.game, path.display());
            world
        } else {
            info!("Creating new world file {}", path.display());
            seed
        };

        let store = Self {
            path: path.to_path_buf(),
            world,
            pending: false,
        };
        store.flush()?;
        Ok(store)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(&self.world)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Flushed world to {}", self.path.display());
        Ok(())
    }
}

impl DocumentStore for JsonStore {
    fn load(&self) -> Result<WorldDocument, StoreError> {
        let mut world = self.world.clone();
        world.retain_game();
        Ok(world)
    }

    fn save_user(&mut self, doc: &UserDoc) -> Result<(), StoreError> {
        self.world.upsert_user(doc);
        self.pending = true;
        Ok(())
    }

    fn save_factory(&mut self, doc: &FactoryDoc) -> Result<(), StoreError> {
        self.world.upsert_factory(doc);
        self.pending = true;
        Ok(())
    }

    fn save_shop(&mut self, doc: &ShopDoc) -> Result<(), StoreError> {
        self.world.upsert_shop(doc);
        self.pending = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.pending {
            return Ok(());
        }
        // stays pending on failure so the next commit retries the whole file
        self.flush()?;
        self.pending = false;
        Ok(())
    }
}
