//! GraphQL operations consumed by the client.
//!
//! Every server operation is a zero-sized marker type implementing
//! [`GraphQlOperation`], which ties together its document, its variables and
//! the shape of its `data`. [`OperationKind::of`] classifies any document so
//! the client can pick the channel that carries it.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ContractError, Result};
use crate::model::{Game, PlayerState, Role};
use crate::protocol::GraphQlRequest;

// ── Classification ──────────────────────────────────────────────────

/// The kind of the first executable definition in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Classify a document by its first operation definition.
    ///
    /// Fragment definitions, comments and string literals are skipped. A
    /// bare selection set (`{ ... }`) is the query shorthand. Returns `None`
    /// when the document holds no operation definition.
    pub fn of(document: &str) -> Option<Self> {
        let bytes = document.as_bytes();
        let mut i = 0;
        let mut depth = 0usize;
        let mut in_fragment = false;

        while let Some(&b) = bytes.get(i) {
            match b {
                b'#' => {
                    while bytes.get(i).is_some_and(|c| *c != b'\n') {
                        i += 1;
                    }
                }
                b'"' => {
                    i = skip_string(bytes, i);
                    continue;
                }
                b'{' => {
                    if depth == 0 && !in_fragment {
                        return Some(Self::Query);
                    }
                    depth += 1;
                }
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        in_fragment = false;
                    }
                }
                b if b.is_ascii_alphabetic() || b == b'_' => {
                    let start = i;
                    while bytes
                        .get(i)
                        .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
                    {
                        i += 1;
                    }
                    if depth == 0 && !in_fragment {
                        match document.get(start..i) {
                            Some("query") => return Some(Self::Query),
                            Some("mutation") => return Some(Self::Mutation),
                            Some("subscription") => return Some(Self::Subscription),
                            Some("fragment") => in_fragment = true,
                            _ => {}
                        }
                    }
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// Whether this operation produces a stream of results.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Subscription)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        })
    }
}

/// Return the index just past the string literal opening at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let block = bytes.get(start + 1) == Some(&b'"') && bytes.get(start + 2) == Some(&b'"');
    if block {
        let mut i = start + 3;
        while i < bytes.len() {
            if bytes.get(i..i + 3) == Some(b"\"\"\"".as_slice()) {
                return i + 3;
            }
            // Escaped triple quote inside a block string.
            if bytes.get(i..i + 4) == Some(b"\\\"\"\"".as_slice()) {
                i += 4;
                continue;
            }
            i += 1;
        }
        return bytes.len();
    }

    let mut i = start + 1;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'\\' => i += 2,
            b'"' => return i + 1,
            b'\n' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

// ── Typed operations ────────────────────────────────────────────────

/// A server operation with typed variables and result data.
pub trait GraphQlOperation {
    /// Variables sent with the document.
    type Variables: Serialize + Clone + fmt::Debug + Send + 'static;
    /// The decoded `data` object of a successful result.
    type Data: DeserializeOwned + Clone + fmt::Debug + Send + 'static;

    /// Operation name, as declared in the document.
    const NAME: &'static str;
    /// The operation document.
    const DOCUMENT: &'static str;

    /// Build the wire request for `variables`.
    fn request(variables: &Self::Variables) -> Result<GraphQlRequest> {
        Ok(GraphQlRequest::new(Self::DOCUMENT)
            .with_variables(serde_json::to_value(variables)?)
            .with_operation_name(Self::NAME))
    }

    /// Reject decoded data that breaks an invariant of the data model.
    fn check(_data: &Self::Data) -> std::result::Result<(), ContractError> {
        Ok(())
    }
}

/// Variables of operations that take none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoVariables {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameVariables {
    pub game_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerVariables {
    pub game_id: String,
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleVariables {
    pub game_id: String,
    pub player_id: String,
    pub role: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingVariables {
    pub game_id: String,
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingVariables {
    pub game_id: String,
    pub player_id: String,
    pub outgoing: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistsVariables {
    pub id: String,
}

// ── Subscriptions ───────────────────────────────────────────────────

/// Full game state, pushed on every simulation tick or roster change.
#[derive(Debug, Clone, Copy)]
pub struct GameSubscription;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GameData {
    pub game: Game,
}

impl GraphQlOperation for GameSubscription {
    type Variables = GameVariables;
    type Data = GameData;
    const NAME: &'static str = "Game";
    const DOCUMENT: &'static str = "subscription Game($gameId: String!) {
    game(gameId: $gameId) {
        id
        week
        totalcustomer
        lastweek
        holiday
        settings { name value }
        players { id name }
        state { name }
        playerState {
            player { id name }
            role { name value }
            incoming
            outgoing
            stock
            backlog
            lastsent
            pending0
            outgoingprev
            incomingprev
            stockbackprev
            deliveredprev
            costprev
            costs
            outstanding
        }
    }
}";

    fn check(data: &GameData) -> std::result::Result<(), ContractError> {
        data.game.check_history()
    }
}

/// One player's state within a game.
#[derive(Debug, Clone, Copy)]
pub struct PlayerStateSubscription;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateData {
    pub player_state: PlayerState,
}

impl GraphQlOperation for PlayerStateSubscription {
    type Variables = PlayerVariables;
    type Data = PlayerStateData;
    const NAME: &'static str = "PlayerState";
    const DOCUMENT: &'static str = "subscription PlayerState($gameId: String!, $playerId: String!) {
    playerState(gameId: $gameId, playerId: $playerId) {
        player { name }
        incoming
        outgoing
        stock
        backlog
        lastsent
        pending0
        outgoingprev
        incomingprev
        stockbackprev
        deliveredprev
        costprev
        costs
        outstanding
        role { name value }
    }
}";

    fn check(data: &PlayerStateData) -> std::result::Result<(), ContractError> {
        data.player_state.check_history()
    }
}

// ── Queries ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct GameExistsQuery;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameExistsData {
    pub game_exists: bool,
}

impl GraphQlOperation for GameExistsQuery {
    type Variables = ExistsVariables;
    type Data = GameExistsData;
    const NAME: &'static str = "GameExists";
    const DOCUMENT: &'static str = "query GameExists($id: String!) {
    gameExists(gameId: $id)
}";
}

#[derive(Debug, Clone, Copy)]
pub struct GameRolesQuery;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRolesData {
    pub game_roles: Vec<Role>,
}

impl GraphQlOperation for GameRolesQuery {
    type Variables = NoVariables;
    type Data = GameRolesData;
    const NAME: &'static str = "Roles";
    const DOCUMENT: &'static str = "query Roles {
    gameRoles { name value }
}";
}

// ── Mutations ───────────────────────────────────────────────────────

/// Generic `data` of the boolean-returning mutations, keyed by field name.
pub type MutationData = std::collections::HashMap<String, Option<bool>>;

macro_rules! mutation {
    ($(#[$meta:meta])* $ty:ident, $vars:ty, $name:literal, $doc:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $ty;

        impl GraphQlOperation for $ty {
            type Variables = $vars;
            type Data = MutationData;
            const NAME: &'static str = $name;
            const DOCUMENT: &'static str = $doc;
        }
    };
}

mutation!(
    /// Add a player to a game; duplicate joins are a no-op on the server.
    AddPlayerMutation,
    PlayerVariables,
    "JoinGame",
    "mutation JoinGame($gameId: String!, $playerId: String!) {
    addPlayer(gameId: $gameId, playerId: $playerId)
}"
);

mutation!(
    /// Remove a player from a game (leave, or kick another player).
    RemovePlayerMutation,
    PlayerVariables,
    "LeaveGame",
    "mutation LeaveGame($gameId: String!, $playerId: String!) {
    removePlayer(gameId: $gameId, playerId: $playerId)
}"
);

mutation!(
    StartGameMutation,
    GameVariables,
    "StartGame",
    "mutation StartGame($gameId: String!) {
    startGame(gameId: $gameId)
}"
);

mutation!(
    ChangePlayerRoleMutation,
    RoleVariables,
    "ChangePlayerRole",
    "mutation ChangePlayerRole($gameId: String!, $playerId: String!, $role: Int!) {
    changePlayerRole(gameId: $gameId, playerId: $playerId, role: $role)
}"
);

mutation!(
    SetGameSettingMutation,
    SettingVariables,
    "SetGameSetting",
    "mutation SetGameSetting($gameId: String!, $name: String!, $value: Int!) {
    setGameSetting(gameId: $gameId, name: $name, value: $value)
}"
);

mutation!(
    /// Submit this week's outgoing shipment.
    SubmitOutgoingMutation,
    OutgoingVariables,
    "SubmitOutgoing",
    "mutation SubmitOutgoing($gameId: String!, $playerId: String!, $outgoing: Int!) {
    submitOutgoing(gameId: $gameId, playerId: $playerId, outgoing: $outgoing)
}"
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_named_operations() {
        assert_eq!(
            OperationKind::of(GameSubscription::DOCUMENT),
            Some(OperationKind::Subscription)
        );
        assert_eq!(
            OperationKind::of(GameRolesQuery::DOCUMENT),
            Some(OperationKind::Query)
        );
        assert_eq!(
            OperationKind::of(SubmitOutgoingMutation::DOCUMENT),
            Some(OperationKind::Mutation)
        );
    }

    #[test]
    fn bare_selection_set_is_a_query() {
        assert_eq!(
            OperationKind::of("  { gameRoles { name } }"),
            Some(OperationKind::Query)
        );
    }

    #[test]
    fn leading_fragments_and_comments_are_skipped() {
        let doc = r#"
            # subscription in a comment does not count
            fragment Fields on Game { id week }
            subscription Game($gameId: String! = "query {") {
                game(gameId: $gameId) { ...Fields }
            }
        "#;
        assert_eq!(OperationKind::of(doc), Some(OperationKind::Subscription));
    }

    #[test]
    fn keyword_inside_selection_is_not_an_operation() {
        assert_eq!(
            OperationKind::of("fragment F on Query { subscription mutation }"),
            None
        );
        assert_eq!(OperationKind::of(""), None);
        assert_eq!(OperationKind::of("# only a comment"), None);
    }

    #[test]
    fn block_strings_are_skipped() {
        let doc = r#"fragment F on Game @d(a: """ { \""" """) { id } subscription S { z }"#;
        assert_eq!(OperationKind::of(doc), Some(OperationKind::Subscription));
    }

    #[test]
    fn request_uses_camel_case_variables() {
        let request = SubmitOutgoingMutation::request(&OutgoingVariables {
            game_id: "g1".into(),
            player_id: "p1".into(),
            outgoing: 8,
        })
        .unwrap();
        assert_eq!(
            request.variables,
            Some(json!({ "gameId": "g1", "playerId": "p1", "outgoing": 8 }))
        );
        assert_eq!(request.operation_name.as_deref(), Some("SubmitOutgoing"));
    }

    #[test]
    fn no_variables_serialize_as_empty_object() {
        let request = GameRolesQuery::request(&NoVariables {}).unwrap();
        assert_eq!(request.variables, Some(json!({})));
    }

    #[test]
    fn game_check_rejects_uneven_history() {
        let data: GameData = serde_json::from_value(json!({
            "game": {
                "id": "g1", "week": 1, "lastweek": 2, "state": { "name": "playing" },
                "playerState": [{
                    "player": { "id": "p", "name": "P" },
                    "role": { "name": "retailer", "value": 1 },
                    "incomingprev": [1], "outgoingprev": [], "stockbackprev": [1],
                    "deliveredprev": [1], "costprev": [1]
                }]
            }
        }))
        .unwrap();
        assert!(GameSubscription::check(&data).is_err());
    }
}
