use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub type UserId = u32;
pub type TeamId = u32;
pub type FactoryId = u32;
pub type ShopId = u32;
pub type GameId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &Location) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    pub fn within(&self, other: &Location, range_m: f64) -> bool {
        self.distance_m(other) <= range_m
    }

    /// Moves the location by the given offsets in meters. Used for seeding
    /// worlds and tests, accurate enough for short distances.
    pub fn offset_m(&self, north_m: f64, east_m: f64) -> Location {
        let d_lat = north_m / EARTH_RADIUS_M;
        let d_lng = east_m / (EARTH_RADIUS_M * self.lat.to_radians().cos());
        Location {
            lat: self.lat + d_lat.to_degrees(),
            lng: self.lng + d_lng.to_degrees(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserView {
    pub id: UserId,
    pub name: String,
    pub team: TeamId,
    pub money: i64,
    pub strength: u32,
    pub materials: u32,
    pub products: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FactoryView {
    pub id: FactoryId,
    pub name: String,
    pub team: Option<TeamId>,
    pub level: u32,
    pub defence: u32,
    pub stock_in: u32,
    pub stock_out: u32,
    pub location: Location,
    pub in_range: bool,
    pub ally: bool,
    pub pinged: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShopView {
    pub id: ShopId,
    pub owner: UserId,
    pub sell_price: u32,
    pub buy_price: u32,
    pub location: Option<Location>,
    pub in_range: bool,
    pub handover_in_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        user_id: UserId,
    },
    Heartbeat,
    Disconnect,
    UpdateLocation {
        sequence: u32,
        location: Location,
    },
    Attack {
        factory: FactoryId,
    },
    LevelUp {
        factory: FactoryId,
    },
    Deposit {
        factory: FactoryId,
        amount: i64,
    },
    Collect {
        factory: FactoryId,
    },
    Ping {
        factory: FactoryId,
    },
    Buy {
        shop: ShopId,
        amount: i64,
    },
    Sell {
        shop: ShopId,
        amount: i64,
    },

    Connected {
        user_id: UserId,
        team: TeamId,
    },
    Disconnected {
        reason: String,
    },
    UserState(UserView),
    FactoryState(FactoryView),
    ShopState(ShopView),
    Pinged {
        factory: FactoryId,
        by: UserId,
    },
    AttackResult {
        factory: FactoryId,
        conquer_value: i64,
        conquered: bool,
    },
    ShopHandover {
        shop: ShopId,
        from: UserId,
        to: UserId,
    },
    Rejected {
        reason: String,
    },
}

impl Packet {
    /// True for packets a client is allowed to send.
    pub fn is_client_packet(&self) -> bool {
        matches!(
            self,
            Packet::Connect { .. }
                | Packet::Heartbeat
                | Packet::Disconnect
                | Packet::UpdateLocation { .. }
                | Packet::Attack { .. }
                | Packet::LevelUp { .. }
                | Packet::Deposit { .. }
                | Packet::Collect { .. }
                | Packet::Ping { .. }
                | Packet::Buy { .. }
                | Packet::Sell { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_distance_same_point() {
        let loc = Location::new(52.52, 13.405);
        assert_approx_eq!(loc.distance_m(&loc), 0.0, 1e-6);
    }

    #[test]
    fn test_distance_known_pair() {
        // Berlin to Paris is roughly 878 km
        let berlin = Location::new(52.5200, 13.4050);
        let paris = Location::new(48.8566, 2.3522);
        let d = berlin.distance_m(&paris);
        assert!((870_000.0..890_000.0).contains(&d), "got {}", d);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Location::new(10.0, 20.0);
        let b = Location::new(10.01, 20.02);
        assert_approx_eq!(a.distance_m(&b), b.distance_m(&a), 1e-6);
    }

    #[test]
    fn test_offset_matches_distance() {
        let origin = Location::new(48.0, 11.0);
        let north = origin.offset_m(100.0, 0.0);
        let east = origin.offset_m(0.0, 100.0);
        assert_approx_eq!(origin.distance_m(&north), 100.0, 0.5);
        assert_approx_eq!(origin.distance_m(&east), 100.0, 0.5);
    }

    #[test]
    fn test_within_range_boundary() {
        let origin = Location::new(0.0, 0.0);
        let near = origin.offset_m(39.0, 0.0);
        let far = origin.offset_m(41.0, 0.0);
        assert!(origin.within(&near, 40.0));
        assert!(!origin.within(&far, 40.0));
    }

    #[test]
    fn test_client_packet_classification() {
        assert!(Packet::Heartbeat.is_client_packet());
        assert!(Packet::Attack { factory: 1 }.is_client_packet());
        assert!(!Packet::Connected { user_id: 1, team: 1 }.is_client_packet());
        assert!(!Packet::Rejected {
            reason: "nope".to_string()
        }
        .is_client_packet());
    }

    #[test]
    fn test_packet_serialization_factory_state() {
        let view = FactoryView {
            id: 7,
            name: "Mill".to_string(),
            team: Some(2),
            level: 3,
            defence: 30,
            stock_in: 12,
            stock_out: 4,
            location: Location::new(1.5, 2.5),
            in_range: true,
            ally: false,
            pinged: true,
        };
        let packet = Packet::FactoryState(view.clone());

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::FactoryState(v) => assert_eq!(v, view),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_update_location() {
        let packet = Packet::UpdateLocation {
            sequence: 9,
            location: Location::new(-33.86, 151.2),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::UpdateLocation { sequence, location } => {
                assert_eq!(sequence, 9);
                assert_approx_eq!(location.lat, -33.86, 1e-9);
                assert_approx_eq!(location.lng, 151.2, 1e-9);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
