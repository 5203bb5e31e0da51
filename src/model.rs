//! Game data as pushed by the server.
//!
//! These types are read-only on the client: they are replaced wholesale by
//! every push and only change through mutation round-trips.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ContractError;

// ── Enums ───────────────────────────────────────────────────────────

/// Server-reported stage of a game.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Lobby,
    Playing,
    Finished,
    /// A phase name this client does not know about.
    Unknown(String),
}

impl Phase {
    /// Map the wire name of a phase.
    pub fn from_name(name: &str) -> Self {
        match name {
            "lobby" => Self::Lobby,
            "playing" => Self::Playing,
            "finished" => Self::Finished,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The wire name of this phase.
    pub fn name(&self) -> &str {
        match self {
            Self::Lobby => "lobby",
            Self::Playing => "playing",
            Self::Finished => "finished",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// A named integer game setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub value: i64,
}

/// A position in the supply chain. `value` orders players across every view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Absent on the single-player projection, which only carries the name.
    #[serde(default)]
    pub id: String,
    pub name: String,
}

/// The `state { name }` object the server uses to report the phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateName {
    pub name: String,
}

/// One player's standing within one game.
///
/// The aggregate game push only fills `player`, `role` and `outgoing`; the
/// remaining fields default to zero / empty there and are populated by the
/// per-player subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player: Player,
    pub role: Role,
    #[serde(default)]
    pub incoming: i64,
    /// `-1` until this week's shipment has been submitted.
    #[serde(default)]
    pub outgoing: i64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub backlog: i64,
    #[serde(default)]
    pub lastsent: i64,
    #[serde(default)]
    pub pending0: i64,
    #[serde(default)]
    pub outstanding: i64,
    #[serde(default)]
    pub costs: i64,
    #[serde(default)]
    pub incomingprev: Vec<i64>,
    #[serde(default)]
    pub outgoingprev: Vec<i64>,
    #[serde(default)]
    pub stockbackprev: Vec<i64>,
    #[serde(default)]
    pub deliveredprev: Vec<i64>,
    #[serde(default)]
    pub costprev: Vec<i64>,
}

/// Sentinel `outgoing` value of a player who has not shipped this week.
pub const NOT_SUBMITTED: i64 = -1;

impl PlayerState {
    /// Whether this week's shipment is still outstanding.
    pub fn is_waiting(&self) -> bool {
        self.outgoing == NOT_SUBMITTED
    }

    /// Verify that all history series have one entry per simulated week.
    pub fn check_history(&self) -> Result<(), ContractError> {
        let lengths = [
            self.incomingprev.len(),
            self.outgoingprev.len(),
            self.stockbackprev.len(),
            self.deliveredprev.len(),
            self.costprev.len(),
        ];
        let [first, ..] = lengths;
        if lengths.iter().all(|len| *len == first) {
            Ok(())
        } else {
            Err(ContractError::UnevenHistory {
                player: self.player.name.clone(),
                lengths,
            })
        }
    }
}

/// Full game state, including every player's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub week: i64,
    pub lastweek: i64,
    /// Total customer demand over the game.
    #[serde(default)]
    pub totalcustomer: i64,
    /// Holiday interval in weeks; `0` means no holidays.
    #[serde(default)]
    pub holiday: i64,
    #[serde(default)]
    pub settings: Vec<Setting>,
    #[serde(default)]
    pub players: Vec<Player>,
    pub state: StateName,
    #[serde(rename = "playerState", default)]
    pub player_state: Vec<PlayerState>,
}

impl Game {
    pub fn phase(&self) -> Phase {
        Phase::from_name(&self.state.name)
    }

    /// Player states ordered by ascending role value.
    ///
    /// The sort is stable, so players sharing a role keep the server's order.
    pub fn states_by_role(&self) -> Vec<&PlayerState> {
        let mut states: Vec<&PlayerState> = self.player_state.iter().collect();
        states.sort_by_key(|state| state.role.value);
        states
    }

    /// Weeks until the next holiday, when holidays are configured.
    ///
    /// Always in `1..=holiday`, whatever week the server reports.
    pub fn weeks_until_holiday(&self) -> Option<i64> {
        (self.holiday > 0).then(|| self.holiday - self.week.rem_euclid(self.holiday))
    }

    /// Verify the history invariant for every player in the game.
    pub fn check_history(&self) -> Result<(), ContractError> {
        self.player_state
            .iter()
            .try_for_each(PlayerState::check_history)
    }
}
