use shared::{FactoryId, GameId, ShopId, UserId};

/// Errors raised by the persistent document store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store holds game {found}, expected {expected}")]
    WrongGame { expected: GameId, found: GameId },
}

/// Reasons a player action is refused
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Unknown user {0}")]
    UnknownUser(UserId),
    #[error("Unknown factory {0}")]
    UnknownFactory(FactoryId),
    #[error("Unknown shop {0}")]
    UnknownShop(ShopId),
    #[error("User is offline")]
    Offline,
    #[error("Location unknown")]
    NoLocation,
    #[error("Not in range")]
    NotInRange,
    #[error("Factory not visible")]
    NotVisible,
    #[error("Cannot attack an allied factory")]
    OwnFactory,
    #[error("Factory belongs to another team")]
    NotAllied,
    #[error("Attack on cooldown for {remaining_ms}ms")]
    AttackCooldown { remaining_ms: u64 },
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },
    #[error("Factory already at maximum level")]
    MaxLevel,
    #[error("Capacity exceeded")]
    CapacityExceeded,
    #[error("Nothing to collect")]
    NothingToCollect,
    #[error("Cannot trade at your own shop")]
    OwnShop,
    #[error("Shop is closed")]
    ShopClosed,
    #[error("Invalid amount {0}")]
    InvalidAmount(i64),
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}
