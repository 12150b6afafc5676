//! Canonical game records (spec §3). These are the client's own
//! representation; [`crate::adapters`] translate them to and from each
//! server dialect's wire shape, and [`crate::schema`] validates them
//! structurally.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Vector2 { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Circle,
    Food,
    Obstacle,
    Unknown,
}

impl Default for EntityKind {
    fn default() -> Self {
        EntityKind::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Active,
    Inactive,
    Spectating,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub position: Vector2,
    pub velocity: Vector2,
    pub mass: f64,
    pub radius: f64,
    pub kind: EntityKind,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<f64>,
}

impl Entity {
    /// Structural invariants from spec §3: non-negative mass/radius.
    pub fn is_physically_valid(&self) -> bool {
        self.mass >= 0.0 && self.radius >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    #[serde(flatten)]
    pub entity: Entity,
    pub player_id: String,
    pub name: String,
    pub direction: Vector2,
    pub score: i64,
    pub state: PlayerState,
    pub input_direction: Vector2,
    pub max_speed: f64,
    pub acceleration: f64,
}

impl Player {
    /// Invariant: `player_id = id`.
    pub fn is_consistent(&self) -> bool {
        self.player_id == self.entity.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    #[serde(flatten)]
    pub entity: Entity,
    pub circle_id: String,
    pub value: i64,
    pub circle_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respawn_time: Option<f64>,
}

impl Circle {
    /// Invariant: `circle_id = id`.
    pub fn is_consistent(&self) -> bool {
        self.circle_id == self.entity.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_invariant_holds_for_well_formed_record() {
        let p = Player {
            entity: Entity {
                id: "e1".into(),
                position: Vector2::ZERO,
                velocity: Vector2::ZERO,
                mass: 1.0,
                radius: 1.0,
                kind: EntityKind::Player,
                active: true,
                created_at: None,
                updated_at: None,
            },
            player_id: "e1".into(),
            name: "alice".into(),
            direction: Vector2::ZERO,
            score: 0,
            state: PlayerState::Active,
            input_direction: Vector2::ZERO,
            max_speed: 10.0,
            acceleration: 1.0,
        };
        assert!(p.is_consistent());
        assert!(p.entity.is_physically_valid());
    }
}
