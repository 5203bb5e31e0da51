//! Game phase controller.
//!
//! [`GameController`] follows one game's subscription and owns whatever the
//! current phase needs locally: the role list and setting drafts in the
//! lobby, the own player's subscription and shipment draft while playing,
//! and one subscription per results card once finished. All of it is
//! discarded when the server reports a different phase.
//!
//! ```rust,ignore
//! let mut controller = GameController::start(&handle, "g1", identity)?;
//! while let Some(view) = controller.next().await {
//!     println!("{view}");
//! }
//! ```

use std::collections::{BTreeMap, HashMap};

use futures_util::future::select_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ClientHandle;
use crate::effect::OncePerKey;
use crate::error::{OperationError, Result};
use crate::identity::Identity;
use crate::model::{Game, Phase, PlayerState, Role};
use crate::operation::{
    AddPlayerMutation, ChangePlayerRoleMutation, GameData, GameRolesQuery, GameSubscription,
    GameVariables, NoVariables, OutgoingVariables, PlayerStateSubscription, PlayerVariables,
    RemovePlayerMutation, RoleVariables, SetGameSettingMutation, SettingVariables,
    StartGameMutation, SubmitOutgoingMutation,
};
use crate::shipment::ShipmentDraft;
use crate::subscription::{StableSubscription, SubscriptionState};
use crate::views::{self, ResultCard, View};

/// Where the controller stands with respect to the game subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseState {
    Loading,
    /// The subscription failed before any game data arrived.
    Error(OperationError),
    Lobby,
    Playing,
    Finished,
    UnknownPhase(String),
}

impl PhaseState {
    /// Derive the phase from the game subscription's latched state.
    ///
    /// Data takes precedence over a later error, so a transient failure
    /// never moves the controller out of the phase it is showing.
    pub fn of<V>(state: &SubscriptionState<GameData, V>) -> Self {
        match (&state.data, &state.error) {
            (Some(data), _) => match data.game.phase() {
                Phase::Lobby => Self::Lobby,
                Phase::Playing => Self::Playing,
                Phase::Finished => Self::Finished,
                Phase::Unknown(name) => Self::UnknownPhase(name),
            },
            (None, Some(err)) => Self::Error(err.clone()),
            (None, None) => Self::Loading,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKind {
    Lobby,
    Playing,
    Finished,
}

/// Phase-local state. Replaced wholesale on every phase change.
enum Session {
    Idle,
    Lobby(LobbySession),
    Playing(PlaySession),
    Finished(ResultsSession),
}

impl Session {
    fn kind(&self) -> Option<SessionKind> {
        match self {
            Self::Idle => None,
            Self::Lobby(_) => Some(SessionKind::Lobby),
            Self::Playing(_) => Some(SessionKind::Playing),
            Self::Finished(_) => Some(SessionKind::Finished),
        }
    }

    async fn changed(&mut self) {
        match self {
            Self::Idle => std::future::pending().await,
            Self::Lobby(lobby) => lobby.changed().await,
            Self::Playing(play) => play.changed().await,
            Self::Finished(results) => results.changed().await,
        }
    }
}

// ── Lobby ───────────────────────────────────────────────────────────

enum Roles {
    Pending(oneshot::Receiver<Result<Vec<Role>>>),
    Ready(Vec<Role>),
    Failed(String),
}

struct LobbySession {
    roles: Roles,
    drafts: BTreeMap<String, String>,
}

impl LobbySession {
    fn start(handle: &ClientHandle) -> Self {
        let (tx, rx) = oneshot::channel();
        let handle = handle.clone();
        tokio::spawn(async move {
            let roles = handle
                .query::<GameRolesQuery>(NoVariables {})
                .await
                .map(|data| data.game_roles);
            if let Err(e) = &roles {
                error!("failed to load game roles: {e}");
            }
            if tx.send(roles).is_err() {
                debug!("lobby left before roles arrived");
            }
        });
        Self {
            roles: Roles::Pending(rx),
            drafts: BTreeMap::new(),
        }
    }

    async fn changed(&mut self) {
        let Roles::Pending(rx) = &mut self.roles else {
            return std::future::pending().await;
        };
        let outcome = rx.await;
        self.roles = match outcome {
            Ok(Ok(roles)) => Roles::Ready(roles),
            Ok(Err(e)) => Roles::Failed(e.to_string()),
            Err(_) => Roles::Failed("roles request was dropped".into()),
        };
    }

    fn view(&self, game: &Game, identity: &Identity) -> View {
        match &self.roles {
            Roles::Pending(_) => View::Loading("Loading Lobby..."),
            Roles::Failed(message) => View::Error(message.clone()),
            Roles::Ready(roles) => View::Lobby(views::lobby(game, identity, roles, &self.drafts)),
        }
    }
}

// ── Play ────────────────────────────────────────────────────────────

type PlayerSubscription = StableSubscription<PlayerStateSubscription>;

fn open_player(
    handle: &ClientHandle,
    game_id: &str,
    player_id: &str,
) -> std::result::Result<PlayerSubscription, String> {
    handle
        .subscribe::<PlayerStateSubscription>(PlayerVariables {
            game_id: game_id.to_string(),
            player_id: player_id.to_string(),
        })
        .map_err(|e| {
            error!(player = player_id, "failed to subscribe to player state: {e}");
            e.to_string()
        })
}

struct PlaySession {
    player: std::result::Result<PlayerSubscription, String>,
    draft: ShipmentDraft,
}

impl PlaySession {
    fn start(handle: &ClientHandle, game_id: &str, identity: &Identity) -> Self {
        Self {
            player: open_player(handle, game_id, identity.as_str()),
            draft: ShipmentDraft::new(),
        }
    }

    async fn changed(&mut self) {
        match &mut self.player {
            Ok(player) => {
                player.changed().await;
            }
            Err(_) => std::future::pending().await,
        }
    }

    fn view(&self, game: &Game) -> View {
        let player = match &self.player {
            Ok(player) => player,
            Err(message) => return View::Error(message.clone()),
        };
        match (player.data(), player.error()) {
            (Some(data), _) => View::Play(views::play(game, &data.player_state, &self.draft)),
            (None, Some(err)) => View::Error(err.to_string()),
            (None, None) => View::Loading("Loading Play..."),
        }
    }
}

// ── Results ─────────────────────────────────────────────────────────

struct CardSlot {
    player_id: String,
    name: String,
    player: std::result::Result<PlayerSubscription, String>,
}

impl CardSlot {
    fn card(&self, total_customers: i64) -> ResultCard {
        let player = match &self.player {
            Ok(player) => player,
            Err(message) => {
                return ResultCard::Failed {
                    name: self.name.clone(),
                    message: message.clone(),
                }
            }
        };
        match (player.data(), player.error()) {
            (Some(data), _) => views::result_card(&data.player_state, total_customers),
            (None, Some(err)) => ResultCard::Failed {
                name: self.name.clone(),
                message: err.to_string(),
            },
            (None, None) => ResultCard::Loading {
                name: self.name.clone(),
            },
        }
    }
}

#[derive(Default)]
struct ResultsSession {
    cards: Vec<CardSlot>,
}

impl ResultsSession {
    /// Keep one card per player in role order, opening and releasing
    /// subscriptions as the roster changes.
    fn sync(&mut self, handle: &ClientHandle, game: &Game) {
        let mut previous: HashMap<String, CardSlot> = self
            .cards
            .drain(..)
            .map(|slot| (slot.player_id.clone(), slot))
            .collect();

        self.cards = game
            .states_by_role()
            .into_iter()
            .map(|state: &PlayerState| match previous.remove(&state.player.id) {
                Some(mut slot) => {
                    slot.name.clone_from(&state.player.name);
                    slot
                }
                None => CardSlot {
                    player_id: state.player.id.clone(),
                    name: state.player.name.clone(),
                    player: open_player(handle, &game.id, &state.player.id),
                },
            })
            .collect();

        if !previous.is_empty() {
            debug!(released = previous.len(), "released results cards");
        }
    }

    async fn changed(&mut self) {
        let pending: Vec<_> = self
            .cards
            .iter_mut()
            .filter_map(|slot| slot.player.as_mut().ok())
            .map(|player| Box::pin(player.changed()))
            .collect();
        if pending.is_empty() {
            return std::future::pending().await;
        }
        select_all(pending).await;
    }

    fn view(&self, game: &Game) -> View {
        let cards = self
            .cards
            .iter()
            .map(|slot| slot.card(game.totalcustomer))
            .collect();
        View::Results(views::results(game, cards))
    }
}

// ── Controller ──────────────────────────────────────────────────────

/// Drives the views of one game for one player.
///
/// The join request is sent exactly once per distinct identity over the
/// controller's lifetime; pushes and re-renders never repeat it.
pub struct GameController {
    handle: ClientHandle,
    game_id: String,
    identity: Identity,
    joins: OncePerKey<Identity>,
    game: StableSubscription<GameSubscription>,
    session: Session,
}

impl GameController {
    /// Subscribe to `game_id` and join it as `identity`.
    ///
    /// # Errors
    ///
    /// Fails if the game subscription cannot be opened.
    pub fn start(
        handle: &ClientHandle,
        game_id: impl Into<String>,
        identity: Identity,
    ) -> Result<Self> {
        let game_id = game_id.into();
        let game = handle.subscribe::<GameSubscription>(GameVariables {
            game_id: game_id.clone(),
        })?;
        let mut controller = Self {
            handle: handle.clone(),
            game_id,
            identity,
            joins: OncePerKey::new(),
            game,
            session: Session::Idle,
        };
        controller.ensure_joined();
        Ok(controller)
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> PhaseState {
        PhaseState::of(self.game.state())
    }

    /// Latest game data, if any has arrived.
    pub fn game(&self) -> Option<&Game> {
        self.game.data().map(|data| &data.game)
    }

    /// Switch to another identity, joining the game as it if that has not
    /// happened yet. Phase-local state is rebuilt for the new identity.
    pub fn set_identity(&mut self, identity: Identity) -> Option<JoinHandle<()>> {
        if identity == self.identity {
            return None;
        }
        info!(game = %self.game_id, "identity changed");
        self.identity = identity;
        self.session = Session::Idle;
        self.reconcile();
        self.ensure_joined()
    }

    /// Wait for the next change and return the view to display.
    ///
    /// Returns `None` once the game subscription has ended.
    pub async fn next(&mut self) -> Option<View> {
        tokio::select! {
            live = self.game.changed() => {
                if !live {
                    info!(game = %self.game_id, "game subscription ended");
                    return None;
                }
            }
            () = self.session.changed() => {}
        }
        self.reconcile();
        Some(self.view())
    }

    /// The view for the current state.
    pub fn view(&self) -> View {
        let data = match (self.game.data(), self.game.error()) {
            (Some(data), _) => data,
            (None, Some(err)) => return View::Error(err.to_string()),
            (None, None) => return View::Loading("Loading..."),
        };
        let game = &data.game;

        match (&self.session, game.phase()) {
            (Session::Lobby(lobby), Phase::Lobby) => lobby.view(game, &self.identity),
            (Session::Playing(play), Phase::Playing) => play.view(game),
            (Session::Finished(results), Phase::Finished) => results.view(game),
            (_, Phase::Unknown(phase)) => View::UnknownPhase {
                game_id: game.id.clone(),
                phase,
            },
            _ => View::Loading("Loading..."),
        }
    }

    // ── Play actions ────────────────────────────────────────────────

    /// Edit the shipment draft. Returns its validity; `false` outside play.
    pub fn input_shipment(&mut self, text: &str) -> bool {
        match &mut self.session {
            Session::Playing(play) => play.draft.input(text),
            _ => false,
        }
    }

    /// Submit the shipment draft if it is valid, resetting it.
    pub fn submit_shipment(&mut self) -> Option<JoinHandle<()>> {
        let Session::Playing(play) = &mut self.session else {
            return None;
        };
        let outgoing = play.draft.submit()?;
        info!(game = %self.game_id, outgoing, "submitting shipment");
        Some(
            self.handle
                .fire::<SubmitOutgoingMutation>(OutgoingVariables {
                    game_id: self.game_id.clone(),
                    player_id: self.identity.as_str().to_string(),
                    outgoing,
                }),
        )
    }

    // ── Lobby actions ───────────────────────────────────────────────

    pub fn start_game(&self) -> Option<JoinHandle<()>> {
        if !self.in_lobby() {
            return None;
        }
        Some(self.handle.fire::<StartGameMutation>(GameVariables {
            game_id: self.game_id.clone(),
        }))
    }

    /// Change the own player's role.
    pub fn change_role(&self, role: i32) -> Option<JoinHandle<()>> {
        if !self.in_lobby() {
            return None;
        }
        Some(self.handle.fire::<ChangePlayerRoleMutation>(RoleVariables {
            game_id: self.game_id.clone(),
            player_id: self.identity.as_str().to_string(),
            role,
        }))
    }

    /// Leave the game.
    pub fn leave(&self) -> Option<JoinHandle<()>> {
        self.remove_player(self.identity.as_str())
    }

    /// Remove a player from the lobby: leave for the own id, kick otherwise.
    pub fn remove_player(&self, player_id: &str) -> Option<JoinHandle<()>> {
        if !self.in_lobby() {
            return None;
        }
        Some(self.handle.fire::<RemovePlayerMutation>(PlayerVariables {
            game_id: self.game_id.clone(),
            player_id: player_id.to_string(),
        }))
    }

    /// Edit a setting locally. Returns `false` outside the lobby.
    pub fn edit_setting(&mut self, name: &str, text: impl Into<String>) -> bool {
        match &mut self.session {
            Session::Lobby(lobby) => {
                lobby.drafts.insert(name.to_string(), text.into());
                true
            }
            _ => false,
        }
    }

    /// Send a setting's draft to the server if it is a 32-bit integer.
    ///
    /// A draft that does not parse, or is out of range, is kept for further
    /// editing.
    pub fn commit_setting(&mut self, name: &str) -> Option<JoinHandle<()>> {
        let Session::Lobby(lobby) = &mut self.session else {
            return None;
        };
        let draft = lobby.drafts.get(name)?;
        let Ok(value) = draft.trim().parse::<i32>() else {
            warn!(setting = name, draft = %draft, "setting draft is not a 32-bit integer");
            return None;
        };
        lobby.drafts.remove(name);
        Some(self.handle.fire::<SetGameSettingMutation>(SettingVariables {
            game_id: self.game_id.clone(),
            name: name.to_string(),
            value,
        }))
    }

    // ── Internals ───────────────────────────────────────────────────

    fn in_lobby(&self) -> bool {
        matches!(self.session, Session::Lobby(_))
    }

    fn ensure_joined(&mut self) -> Option<JoinHandle<()>> {
        let mut fired = None;
        let handle = &self.handle;
        let game_id = &self.game_id;
        self.joins.run(&self.identity, |identity| {
            info!(game = %game_id, player = %identity, "joining game");
            fired = Some(handle.fire::<AddPlayerMutation>(PlayerVariables {
                game_id: game_id.clone(),
                player_id: identity.as_str().to_string(),
            }));
        });
        fired
    }

    /// Replace the phase-local session when the phase has changed.
    fn reconcile(&mut self) {
        let wanted = match self.phase() {
            PhaseState::Lobby => Some(SessionKind::Lobby),
            PhaseState::Playing => Some(SessionKind::Playing),
            PhaseState::Finished => Some(SessionKind::Finished),
            PhaseState::Loading | PhaseState::Error(_) | PhaseState::UnknownPhase(_) => None,
        };

        if self.session.kind() != wanted {
            debug!(
                game = %self.game_id,
                from = ?self.session.kind(),
                to = ?wanted,
                "phase changed, discarding phase-local state"
            );
            self.session = match wanted {
                Some(SessionKind::Lobby) => Session::Lobby(LobbySession::start(&self.handle)),
                Some(SessionKind::Playing) => Session::Playing(PlaySession::start(
                    &self.handle,
                    &self.game_id,
                    &self.identity,
                )),
                Some(SessionKind::Finished) => Session::Finished(ResultsSession::default()),
                None => Session::Idle,
            };
        }

        if let (Session::Finished(results), Some(data)) = (&mut self.session, self.game.data()) {
            results.sync(&self.handle, &data.game);
        }
    }
}

impl std::fmt::Debug for GameController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameController")
            .field("game_id", &self.game_id)
            .field("identity", &self.identity)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::model::tests::{game, state};

    fn loaded(phase: &str) -> SubscriptionState<GameData, ()> {
        let mut s = SubscriptionState::new(());
        s.apply(Ok(GameData {
            game: game(phase, vec![state("a", 1, -1)]),
        }));
        s
    }

    #[test]
    fn loading_until_first_push() {
        let s: SubscriptionState<GameData, ()> = SubscriptionState::new(());
        assert_eq!(PhaseState::of(&s), PhaseState::Loading);
    }

    #[test]
    fn error_before_data() {
        let mut s: SubscriptionState<GameData, ()> = SubscriptionState::new(());
        s.apply(Err(OperationError::new("no such game")));
        assert_eq!(
            PhaseState::of(&s),
            PhaseState::Error(OperationError::new("no such game"))
        );
    }

    #[test]
    fn phase_follows_data() {
        assert_eq!(PhaseState::of(&loaded("lobby")), PhaseState::Lobby);
        assert_eq!(PhaseState::of(&loaded("playing")), PhaseState::Playing);
        assert_eq!(PhaseState::of(&loaded("finished")), PhaseState::Finished);
        assert_eq!(
            PhaseState::of(&loaded("unknown-phase-xyz")),
            PhaseState::UnknownPhase("unknown-phase-xyz".into())
        );
    }

    #[test]
    fn later_error_keeps_phase() {
        let mut s = loaded("playing");
        s.apply(Err(OperationError::new("transient")));
        assert_eq!(PhaseState::of(&s), PhaseState::Playing);
    }

    #[test]
    fn finished_may_still_move_on() {
        let mut s = loaded("finished");
        s.apply(Ok(GameData {
            game: game("lobby", vec![]),
        }));
        assert_eq!(PhaseState::of(&s), PhaseState::Lobby);
    }
}
