#![no_main]

use beer_game_client::operation::{GameData, GameSubscription, GraphQlOperation};
use beer_game_client::protocol::ServerMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw-byte path, including serde_json's own UTF-8 validation.
    let _ = serde_json::from_slice::<ServerMessage>(data);

    // A `next` frame's data goes on to the game decoder and contract check.
    if let Ok(ServerMessage::Next { payload, .. }) = serde_json::from_slice::<ServerMessage>(data) {
        if let Some(value) = payload.data {
            if let Ok(game) = serde_json::from_value::<GameData>(value) {
                let _ = GameSubscription::check(&game);
                let _ = game.game.states_by_role();
                let _ = game.game.weeks_until_holiday();
            }
        }
    }
});
