//! Stabilized subscriptions.
//!
//! A raw subscription yields a stream of pushes. A [`StableSubscription`]
//! folds that stream into a [`SubscriptionState`] that behaves like a
//! latched value: once data has arrived it is never taken away by a later
//! error, a dropped channel or a re-established one.

use tracing::{debug, error};

use crate::client::{ClientHandle, RawSubscription, StreamEvent};
use crate::error::{BeerGameError, OperationError, Result};
use crate::operation::GraphQlOperation;
use crate::protocol::GraphQlResponse;

/// Decode a result into `O::Data`, enforcing the operation's data contract.
///
/// # Errors
///
/// [`BeerGameError::Operation`] for GraphQL errors or a missing `data`
/// object, [`BeerGameError::Serialization`] for a malformed payload and
/// [`BeerGameError::Contract`] for data that breaks an invariant.
pub(crate) fn decode_response<O: GraphQlOperation>(response: GraphQlResponse) -> Result<O::Data> {
    if !response.errors.is_empty() {
        return Err(OperationError {
            messages: response.errors.into_iter().map(|e| e.message).collect(),
        }
        .into());
    }
    let data = response
        .data
        .ok_or_else(|| OperationError::new("response carried no data"))?;
    let data: O::Data = serde_json::from_value(data)?;
    O::check(&data)?;
    Ok(data)
}

/// The latched view of a subscription.
///
/// * `loading` is `true` only until the first data or error arrives.
/// * `data` is the most recent successful push and is never cleared by an
///   error.
/// * `error` is the most recent failure; a later successful push clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState<D, V> {
    pub loading: bool,
    pub error: Option<OperationError>,
    pub data: Option<D>,
    pub variables: V,
}

impl<D, V> SubscriptionState<D, V> {
    pub fn new(variables: V) -> Self {
        Self {
            loading: true,
            error: None,
            data: None,
            variables,
        }
    }

    /// Fold one push into the state.
    pub fn apply(&mut self, push: std::result::Result<D, OperationError>) {
        match push {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(err) => self.error = Some(err),
        }
        self.loading = self.data.is_none() && self.error.is_none();
    }
}

/// A subscription whose state survives errors and channel re-establishment.
///
/// Dropping it ends the underlying operation on the server.
pub struct StableSubscription<O: GraphQlOperation> {
    handle: ClientHandle,
    raw: RawSubscription,
    state: SubscriptionState<O::Data, O::Variables>,
    ended: bool,
    end_reported: bool,
}

impl<O: GraphQlOperation> StableSubscription<O> {
    /// Open `O` with `variables` on the streaming channel.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be built or the client has shut down.
    pub fn open(handle: &ClientHandle, variables: O::Variables) -> Result<Self> {
        let raw = handle.open_stream(O::request(&variables)?)?;
        debug!(operation = O::NAME, id = raw.id(), "subscription opened");
        Ok(Self {
            handle: handle.clone(),
            raw,
            state: SubscriptionState::new(variables),
            ended: false,
            end_reported: false,
        })
    }

    pub fn state(&self) -> &SubscriptionState<O::Data, O::Variables> {
        &self.state
    }

    pub fn data(&self) -> Option<&O::Data> {
        self.state.data.as_ref()
    }

    pub fn error(&self) -> Option<&OperationError> {
        self.state.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.state.loading
    }

    pub fn variables(&self) -> &O::Variables {
        &self.state.variables
    }

    /// Whether the server has finished the operation.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Wait until the state changes.
    ///
    /// Pushes that arrived together are folded in one step, so only the most
    /// recent one is observable. Returns `true` after a push and `false`
    /// exactly once when the stream ends; afterwards it never resolves.
    ///
    /// Cancel-safe.
    pub async fn changed(&mut self) -> bool {
        if self.ended {
            if !self.end_reported {
                self.end_reported = true;
                return false;
            }
            return std::future::pending().await;
        }

        let Some(event) = self.raw.recv().await else {
            self.ended = true;
            self.end_reported = true;
            return false;
        };
        let mut updated = self.absorb(event);
        while !self.ended {
            let Some(event) = self.raw.try_recv() else {
                break;
            };
            updated |= self.absorb(event);
        }

        if updated {
            true
        } else {
            self.end_reported = true;
            false
        }
    }

    /// Replace the variables, starting over with a fresh subscription.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open). On failure the current subscription is
    /// kept.
    pub fn resubscribe(&mut self, variables: O::Variables) -> Result<()> {
        let raw = self.handle.open_stream(O::request(&variables)?)?;
        debug!(operation = O::NAME, id = raw.id(), "subscription replaced");
        self.raw = raw;
        self.state = SubscriptionState::new(variables);
        self.ended = false;
        self.end_reported = false;
        Ok(())
    }

    /// Apply one event. Returns whether the state was updated.
    fn absorb(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::Next(response) => {
                let push = decode_response::<O>(response).map_err(|err| {
                    error!(operation = O::NAME, "subscription push rejected: {err}");
                    into_operation_error(err)
                });
                self.state.apply(push);
                true
            }
            StreamEvent::Error(err) => {
                error!(operation = O::NAME, "subscription failed: {err}");
                self.state.apply(Err(err));
                self.ended = true;
                true
            }
            StreamEvent::Complete => {
                debug!(operation = O::NAME, "subscription completed by server");
                self.ended = true;
                false
            }
        }
    }
}

impl<O: GraphQlOperation> std::fmt::Debug for StableSubscription<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StableSubscription")
            .field("operation", &O::NAME)
            .field("id", &self.raw.id())
            .field("state", &self.state)
            .field("ended", &self.ended)
            .finish()
    }
}

fn into_operation_error(err: BeerGameError) -> OperationError {
    match err {
        BeerGameError::Operation(err) => err,
        other => OperationError::new(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::operation::{GameExistsData, GameExistsQuery, GameSubscription};
    use crate::protocol::GraphQlError;
    use serde_json::json;

    type State = SubscriptionState<u32, ()>;

    #[test]
    fn starts_loading() {
        let state = State::new(());
        assert!(state.loading);
        assert_eq!(state.data, None);
        assert_eq!(state.error, None);
    }

    #[test]
    fn error_before_data_stops_loading() {
        let mut state = State::new(());
        state.apply(Err(OperationError::new("boom")));
        assert!(!state.loading);
        assert_eq!(state.data, None);
        assert_eq!(state.error, Some(OperationError::new("boom")));
    }

    #[test]
    fn error_keeps_data_and_success_clears_error() {
        let mut state = State::new(());
        state.apply(Ok(1));
        state.apply(Err(OperationError::new("boom")));
        assert_eq!(state.data, Some(1));
        assert!(state.error.is_some());
        assert!(!state.loading);

        state.apply(Ok(2));
        assert_eq!(state.data, Some(2));
        assert_eq!(state.error, None);
    }

    #[test]
    fn loading_never_returns() {
        let mut state = State::new(());
        state.apply(Err(OperationError::new("first")));
        state.apply(Err(OperationError::new("second")));
        assert!(!state.loading);
        state.apply(Ok(3));
        assert!(!state.loading);
    }

    #[test]
    fn decode_reports_server_errors() {
        let response = GraphQlResponse {
            data: None,
            errors: vec![
                GraphQlError {
                    message: "game not found".into(),
                    path: None,
                },
                GraphQlError {
                    message: "second".into(),
                    path: None,
                },
            ],
        };
        match decode_response::<GameExistsQuery>(response) {
            Err(BeerGameError::Operation(err)) => {
                assert_eq!(err.messages, ["game not found", "second"]);
            }
            other => panic!("expected operation error, got {other:?}"),
        }
    }

    #[test]
    fn decode_parses_data() {
        let data =
            decode_response::<GameExistsQuery>(GraphQlResponse::from_data(json!({ "gameExists": false })))
                .unwrap();
        assert_eq!(data, GameExistsData { game_exists: false });
    }

    #[test]
    fn decode_rejects_contract_violation() {
        let response = GraphQlResponse::from_data(json!({
            "game": {
                "id": "g1", "week": 1, "lastweek": 2, "state": { "name": "playing" },
                "playerState": [{
                    "player": { "id": "p", "name": "P" },
                    "role": { "name": "retailer", "value": 1 },
                    "incomingprev": [1, 2], "outgoingprev": [1], "stockbackprev": [1],
                    "deliveredprev": [1], "costprev": [1]
                }]
            }
        }));
        let err = decode_response::<GameSubscription>(response).unwrap_err();
        assert!(matches!(err, BeerGameError::Contract(_)));
        assert!(into_operation_error(err).to_string().contains("unequal lengths"));
    }

    #[test]
    fn missing_data_is_an_error() {
        let err = decode_response::<GameExistsQuery>(GraphQlResponse::default()).unwrap_err();
        assert_eq!(
            into_operation_error(err),
            OperationError::new("response carried no data")
        );
    }
}
