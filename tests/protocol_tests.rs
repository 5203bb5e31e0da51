//! Wire-format tests for the `graphql-transport-ws` frames and the game
//! payloads, checked against literal JSON as the server sends it.

use beer_game_client::operation::{GameData, GameSubscription, GraphQlOperation, PlayerStateData};
use beer_game_client::protocol::{ClientMessage, GraphQlRequest, GraphQlResponse, ServerMessage};
use beer_game_client::{CloseCode, Phase};
use serde_json::{json, Value};

fn to_value(msg: &ClientMessage) -> Value {
    serde_json::to_value(msg).unwrap()
}

// ════════════════════════════════════════════════════════════════════
// Client frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn connection_init_without_payload() {
    assert_eq!(
        to_value(&ClientMessage::ConnectionInit { payload: None }),
        json!({ "type": "connection_init" })
    );
}

#[test]
fn ping_and_pong_frames() {
    assert_eq!(
        to_value(&ClientMessage::Ping { payload: None }),
        json!({ "type": "ping" })
    );
    assert_eq!(
        to_value(&ClientMessage::Pong { payload: None }),
        json!({ "type": "pong" })
    );
}

#[test]
fn subscribe_frame_carries_request() {
    let request = GameSubscription::request(&beer_game_client::operation::GameVariables {
        game_id: "g1".into(),
    })
    .unwrap();
    let value = to_value(&ClientMessage::Subscribe {
        id: "op-1".into(),
        payload: request,
    });

    assert_eq!(value["type"], "subscribe");
    assert_eq!(value["id"], "op-1");
    assert_eq!(value["payload"]["operationName"], "Game");
    assert_eq!(value["payload"]["variables"], json!({ "gameId": "g1" }));
    assert!(value["payload"]["query"]
        .as_str()
        .unwrap()
        .starts_with("subscription "));
}

#[test]
fn complete_frame() {
    assert_eq!(
        to_value(&ClientMessage::Complete { id: "op-1".into() }),
        json!({ "type": "complete", "id": "op-1" })
    );
}

#[test]
fn request_body_omits_absent_fields() {
    let value = serde_json::to_value(GraphQlRequest::new("query { gameRoles { name } }")).unwrap();
    assert_eq!(value, json!({ "query": "query { gameRoles { name } }" }));
}

// ════════════════════════════════════════════════════════════════════
// Server frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn connection_ack_with_server_payload() {
    let msg: ServerMessage =
        serde_json::from_str(r#"{"type":"connection_ack","payload":{"query":"","variables":null}}"#)
            .unwrap();
    assert!(matches!(msg, ServerMessage::ConnectionAck { payload: Some(_) }));
}

#[test]
fn next_frame_with_data() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"next","id":"op-1","payload":{"data":{"gameExists":true}}}"#,
    )
    .unwrap();
    assert_eq!(
        msg,
        ServerMessage::Next {
            id: "op-1".into(),
            payload: GraphQlResponse::from_data(json!({ "gameExists": true })),
        }
    );
}

#[test]
fn next_frame_with_errors() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"next","id":"op-1","payload":{"data":null,"errors":[{"message":"no such game","path":["game"]}]}}"#,
    )
    .unwrap();
    let ServerMessage::Next { payload, .. } = msg else {
        panic!("expected next");
    };
    assert_eq!(payload.data, None);
    assert_eq!(payload.errors[0].message, "no such game");
    assert_eq!(payload.errors[0].path, Some(vec![json!("game")]));
}

#[test]
fn error_and_complete_frames() {
    let msg: ServerMessage =
        serde_json::from_str(r#"{"type":"error","id":"op-2","payload":[{"message":"bad"}]}"#)
            .unwrap();
    assert!(matches!(msg, ServerMessage::Error { ref id, ref payload } if id == "op-2" && payload.len() == 1));

    let msg: ServerMessage = serde_json::from_str(r#"{"type":"complete","id":"op-2"}"#).unwrap();
    assert_eq!(msg, ServerMessage::Complete { id: "op-2".into() });
}

#[test]
fn unknown_frame_type_is_rejected() {
    assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"ka"}"#).is_err());
    assert!(serde_json::from_str::<ServerMessage>("not json").is_err());
}

// ════════════════════════════════════════════════════════════════════
// Game payloads
// ════════════════════════════════════════════════════════════════════

#[test]
fn full_game_payload_decodes() {
    let raw = json!({
        "game": {
            "id": "g1",
            "week": 4,
            "totalcustomer": 32,
            "lastweek": 20,
            "holiday": 6,
            "settings": [{ "name": "maxweeks", "value": 20 }, { "name": "holiday", "value": 6 }],
            "players": [{ "id": "p1", "name": "Ann" }],
            "state": { "name": "playing" },
            "playerState": [{
                "player": { "id": "p1", "name": "Ann" },
                "role": { "name": "Retailer", "value": 1 },
                "incoming": 4, "outgoing": -1, "stock": 8, "backlog": 0,
                "lastsent": 4, "pending0": 4, "outstanding": 8, "costs": 20,
                "incomingprev": [4, 4, 4, 4],
                "outgoingprev": [4, 4, 4, 4],
                "stockbackprev": [12, 12, 8, 8],
                "deliveredprev": [4, 8, 12, 16],
                "costprev": [6, 12, 16, 20]
            }]
        }
    });
    let data: GameData = serde_json::from_value(raw).unwrap();
    assert!(GameSubscription::check(&data).is_ok());

    let game = &data.game;
    assert_eq!(game.phase(), Phase::Playing);
    assert_eq!(game.totalcustomer, 32);
    assert_eq!(game.weeks_until_holiday(), Some(2));
    let [state] = game.player_state.as_slice() else {
        panic!("expected one player state");
    };
    assert_eq!(state.player.id, "p1");
    assert!(state.is_waiting());
    assert_eq!(state.incomingprev.len(), 4);
}

#[test]
fn player_state_payload_without_player_id() {
    let data: PlayerStateData = serde_json::from_value(json!({
        "playerState": {
            "player": { "name": "Ann" },
            "role": { "name": "Retailer", "value": 1 },
            "incoming": 4, "outgoing": 8
        }
    }))
    .unwrap();
    assert_eq!(data.player_state.player.id, "");
    assert!(!data.player_state.is_waiting());
}

// ════════════════════════════════════════════════════════════════════
// Close codes
// ════════════════════════════════════════════════════════════════════

#[test]
fn close_codes_round_trip_their_numbers() {
    for code in [4400u16, 4401, 4403, 4406, 4408, 4409, 4429, 4500] {
        let parsed = CloseCode::from_u16(code).unwrap();
        assert_eq!(parsed.as_u16(), code);
    }
    assert_eq!(CloseCode::from_u16(1000), None);
}
