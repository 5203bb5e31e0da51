//! View data for each game phase.
//!
//! Every builder here is a pure function of the game data it is handed plus
//! the caller's local input state. Rosters and result cards are always
//! ordered by ascending role value.

use std::collections::BTreeMap;
use std::fmt;

use crate::identity::Identity;
use crate::model::{Game, PlayerState, Role, Setting};
use crate::shipment::ShipmentDraft;

/// What the client should currently display.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Loading(&'static str),
    Error(String),
    Lobby(LobbyView),
    Play(PlayView),
    Results(ResultsView),
    /// The server reported a phase this client does not know.
    UnknownPhase { game_id: String, phase: String },
}

// ── Lobby ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LobbyView {
    pub game_id: String,
    pub players: Vec<LobbyEntry>,
    /// Roles the own player may switch to.
    pub roles: Vec<Role>,
    pub settings: Vec<SettingField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyEntry {
    pub player_id: String,
    pub name: String,
    pub role: Role,
    pub is_self: bool,
    pub action: RosterAction,
}

/// The roster action offered next to a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterAction {
    Leave,
    Kick,
}

/// A game setting with the local edit, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingField {
    pub name: String,
    pub value: i64,
    pub draft: Option<String>,
}

pub fn lobby(
    game: &Game,
    identity: &Identity,
    roles: &[Role],
    drafts: &BTreeMap<String, String>,
) -> LobbyView {
    let players = game
        .states_by_role()
        .into_iter()
        .map(|state| {
            let is_self = state.player.id == identity.as_str();
            LobbyEntry {
                player_id: state.player.id.clone(),
                name: state.player.name.clone(),
                role: state.role.clone(),
                is_self,
                action: if is_self {
                    RosterAction::Leave
                } else {
                    RosterAction::Kick
                },
            }
        })
        .collect();

    let settings = game
        .settings
        .iter()
        .map(|setting| SettingField {
            name: setting.name.clone(),
            value: setting.value,
            draft: drafts.get(&setting.name).cloned(),
        })
        .collect();

    LobbyView {
        game_id: game.id.clone(),
        players,
        roles: roles.to_vec(),
        settings,
    }
}

// ── Play ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PlayView {
    pub game_id: String,
    /// One-based number of the week being played.
    pub week: i64,
    pub lastweek: i64,
    /// Own role name.
    pub role: String,
    pub holiday_in: Option<i64>,
    pub roster: Vec<RosterEntry>,
    pub dashboard: Dashboard,
    pub history: History,
    pub settings: Vec<Setting>,
    pub draft: DraftView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub role: String,
    /// This week's shipment has not been submitted yet.
    pub waiting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dashboard {
    pub incoming: i64,
    pub backlog: i64,
    pub stock: i64,
    pub last_sent: i64,
    pub pending: i64,
    pub outstanding: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftView {
    pub value: String,
    pub valid: bool,
}

/// The five per-week history series of one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    pub incoming: Vec<i64>,
    pub outgoing: Vec<i64>,
    pub cost: Vec<i64>,
    pub stock: Vec<i64>,
    pub delivered: Vec<i64>,
}

impl History {
    pub fn of(state: &PlayerState) -> Self {
        Self {
            incoming: state.incomingprev.clone(),
            outgoing: state.outgoingprev.clone(),
            cost: state.costprev.clone(),
            stock: state.stockbackprev.clone(),
            delivered: state.deliveredprev.clone(),
        }
    }
}

/// Build the play view.
///
/// The roster comes from the game; the dashboard from the own player's
/// state, which is subscribed separately and may briefly lag the game.
pub fn play(game: &Game, own: &PlayerState, draft: &ShipmentDraft) -> PlayView {
    let roster = game
        .states_by_role()
        .into_iter()
        .map(|state| RosterEntry {
            name: state.player.name.clone(),
            role: state.role.name.clone(),
            waiting: state.is_waiting(),
        })
        .collect();

    PlayView {
        game_id: game.id.clone(),
        week: game.week + 1,
        lastweek: game.lastweek,
        role: own.role.name.clone(),
        holiday_in: game.weeks_until_holiday(),
        roster,
        dashboard: Dashboard {
            incoming: own.incoming,
            backlog: own.backlog,
            stock: own.stock,
            last_sent: own.lastsent,
            pending: own.pending0,
            outstanding: own.outstanding,
        },
        history: History::of(own),
        settings: game.settings.clone(),
        draft: DraftView {
            value: draft.value().to_string(),
            valid: draft.is_valid(),
        },
    }
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsView {
    pub game_id: String,
    pub total_customers: i64,
    pub cards: Vec<ResultCard>,
    pub settings: Vec<Setting>,
}

/// One player's card on the results view.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultCard {
    Loading { name: String },
    Failed { name: String, message: String },
    NoData { name: String },
    Ready(PlayerResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerResult {
    pub name: String,
    pub role: String,
    /// Share of total customer demand delivered, in percent.
    pub delivered_percent: Option<f64>,
    /// Cost per delivered unit.
    pub stage_cost: Option<f64>,
    pub history: History,
}

/// Build a results card from a player's final state.
pub fn result_card(state: &PlayerState, total_customers: i64) -> ResultCard {
    let (Some(&delivered), Some(&cost)) = (state.deliveredprev.last(), state.costprev.last())
    else {
        return ResultCard::NoData {
            name: state.player.name.clone(),
        };
    };

    ResultCard::Ready(PlayerResult {
        name: state.player.name.clone(),
        role: state.role.name.clone(),
        delivered_percent: ratio(100.0 * delivered as f64, total_customers),
        stage_cost: ratio(cost as f64, delivered),
        history: History::of(state),
    })
}

fn ratio(numerator: f64, denominator: i64) -> Option<f64> {
    (denominator != 0).then(|| numerator / denominator as f64)
}

pub fn results(game: &Game, cards: Vec<ResultCard>) -> ResultsView {
    ResultsView {
        game_id: game.id.clone(),
        total_customers: game.totalcustomer,
        cards,
        settings: game.settings.clone(),
    }
}

// ── Text rendering ──────────────────────────────────────────────────

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading(message) => f.write_str(message),
            Self::Error(message) => write!(f, "Error! {message}"),
            Self::Lobby(view) => view.fmt(f),
            Self::Play(view) => view.fmt(f),
            Self::Results(view) => view.fmt(f),
            Self::UnknownPhase { game_id, phase } => {
                write!(f, "'{game_id}' ERROR: unknown state '{phase}'")
            }
        }
    }
}

impl fmt::Display for LobbyView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "'{}' Lobby", self.game_id)?;
        for entry in &self.players {
            let action = match entry.action {
                RosterAction::Leave => "Leave",
                RosterAction::Kick => "Kick",
            };
            writeln!(f, "  {} ({}) [{action}]", entry.name, entry.role.name)?;
        }
        let roles: Vec<&str> = self.roles.iter().map(|r| r.name.as_str()).collect();
        writeln!(f, "Roles: {}", roles.join(", "))?;
        writeln!(f, "Game Options")?;
        for setting in &self.settings {
            match &setting.draft {
                Some(draft) => writeln!(f, "  {} {} (editing: {draft})", setting.name, setting.value)?,
                None => writeln!(f, "  {} {}", setting.name, setting.value)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for PlayView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "'{}' Week {}/{}", self.game_id, self.week, self.lastweek)?;
        writeln!(f, "{}", self.role)?;
        if let Some(weeks) = self.holiday_in {
            writeln!(f, "Holiday in {weeks} Weeks")?;
        }
        for entry in &self.roster {
            let status = if entry.waiting { "waiting" } else { "done" };
            writeln!(f, "  {} ({}) {status}", entry.name, entry.role)?;
        }
        let d = &self.dashboard;
        writeln!(
            f,
            "Incoming {} | Backlog {} | Stock {} | Last Sent {} | Pending {} | Outstanding {}",
            d.incoming, d.backlog, d.stock, d.last_sent, d.pending, d.outstanding
        )?;
        let marker = if self.draft.valid { "valid" } else { "invalid" };
        writeln!(f, "Outgoing: [{}] ({marker})", self.draft.value)?;
        write!(f, "{}", self.history)
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  incoming  {:?}", self.incoming)?;
        writeln!(f, "  outgoing  {:?}", self.outgoing)?;
        writeln!(f, "  cost      {:?}", self.cost)?;
        writeln!(f, "  stock     {:?}", self.stock)?;
        writeln!(f, "  delivered {:?}", self.delivered)
    }
}

impl fmt::Display for ResultsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "'{}' Game Complete!", self.game_id)?;
        writeln!(f, "Total customers: {}", self.total_customers)?;
        for card in &self.cards {
            match card {
                ResultCard::Loading { name } => writeln!(f, "{name}: Loading...")?,
                ResultCard::Failed { name, message } => writeln!(f, "{name}: Error! {message}")?,
                ResultCard::NoData { name } => writeln!(f, "{name}: No data available.")?,
                ResultCard::Ready(result) => {
                    writeln!(f, "{} ({})", result.name, result.role)?;
                    match result.delivered_percent {
                        Some(pct) => writeln!(f, "  Delivered: {pct:.2}%")?,
                        None => writeln!(f, "  Delivered: n/a")?,
                    }
                    match result.stage_cost {
                        Some(cost) => writeln!(f, "  Stage cost: ${cost:.2}")?,
                        None => writeln!(f, "  Stage cost: n/a")?,
                    }
                    write!(f, "{}", result.history)?;
                }
            }
        }
        writeln!(f, "Game Options")?;
        for setting in &self.settings {
            writeln!(f, "  {} {}", setting.name, setting.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::tests::{game, state};

    #[test]
    fn lobby_marks_own_row_and_sorts_by_role() {
        let mut g = game("lobby", vec![state("b", 2, -1), state("a", 1, -1)]);
        g.settings = vec![Setting {
            name: "holiday".into(),
            value: 0,
        }];
        let mut drafts = BTreeMap::new();
        drafts.insert("holiday".to_string(), "4".to_string());
        let me = Identity::new("b").unwrap();

        let view = lobby(&g, &me, &[], &drafts);
        let ids: Vec<&str> = view.players.iter().map(|p| p.player_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(view.players[0].action, RosterAction::Kick);
        assert_eq!(view.players[1].action, RosterAction::Leave);
        assert!(view.players[1].is_self);
        assert_eq!(view.settings[0].draft.as_deref(), Some("4"));
    }

    #[test]
    fn play_view_numbers_weeks_from_one() {
        let mut g = game("playing", vec![state("b", 2, -1), state("a", 1, 5)]);
        g.week = 4;
        g.lastweek = 20;
        g.holiday = 3;
        let own = state("a", 1, 5);
        let mut draft = ShipmentDraft::new();
        draft.input("7");

        let view = play(&g, &own, &draft);
        assert_eq!(view.week, 5);
        assert_eq!(view.lastweek, 20);
        assert_eq!(view.holiday_in, Some(2));
        assert_eq!(view.role, "role-1");
        assert_eq!(
            view.roster,
            vec![
                RosterEntry {
                    name: "name-a".into(),
                    role: "role-1".into(),
                    waiting: false
                },
                RosterEntry {
                    name: "name-b".into(),
                    role: "role-2".into(),
                    waiting: true
                },
            ]
        );
        assert_eq!(
            view.draft,
            DraftView {
                value: "7".into(),
                valid: true
            }
        );
        assert!(view.to_string().contains("Week 5/20"));
    }

    #[test]
    fn result_card_computes_ratios() {
        let mut s = state("a", 1, 0);
        s.incomingprev = vec![4, 4];
        s.outgoingprev = vec![4, 4];
        s.stockbackprev = vec![12, 8];
        s.deliveredprev = vec![4, 40];
        s.costprev = vec![10, 100];

        let ResultCard::Ready(result) = result_card(&s, 50) else {
            panic!("expected a ready card");
        };
        assert_eq!(result.delivered_percent, Some(80.0));
        assert_eq!(result.stage_cost, Some(2.5));
    }

    #[test]
    fn result_card_without_history_has_no_data() {
        let s = state("a", 1, 0);
        assert_eq!(
            result_card(&s, 50),
            ResultCard::NoData {
                name: "name-a".into()
            }
        );
    }

    #[test]
    fn zero_denominators_are_undefined() {
        let mut s = state("a", 1, 0);
        s.incomingprev = vec![0];
        s.outgoingprev = vec![0];
        s.stockbackprev = vec![0];
        s.deliveredprev = vec![0];
        s.costprev = vec![7];

        let ResultCard::Ready(result) = result_card(&s, 0) else {
            panic!("expected a ready card");
        };
        assert_eq!(result.delivered_percent, None);
        assert_eq!(result.stage_cost, None);
        assert!(View::Results(results(&game("finished", vec![]), vec![ResultCard::Ready(result)]))
            .to_string()
            .contains("Stage cost: n/a"));
    }

    #[test]
    fn unknown_phase_renders_fallback() {
        let view = View::UnknownPhase {
            game_id: "g1".into(),
            phase: "paused".into(),
        };
        assert_eq!(view.to_string(), "'g1' ERROR: unknown state 'paused'");
    }
}
