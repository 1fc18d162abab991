//! Subscription channels and the replay history used after reconnects

use crate::{
    auth::{AuthMode, Credentials},
    data::Params,
};
use parking_lot::Mutex;
use std::fmt;

const SUBSCRIBE_PREFIX: &str = "subscribe";
const UNSUBSCRIBE_PREFIX: &str = "un";

/// Streaming channels offered by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ticker,
    Orderbook,
    Trades,
    Candles,
    Reports,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Ticker,
        Channel::Orderbook,
        Channel::Trades,
        Channel::Candles,
        Channel::Reports,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Ticker => "Ticker",
            Channel::Orderbook => "Orderbook",
            Channel::Trades => "Trades",
            Channel::Candles => "Candles",
            Channel::Reports => "Reports",
        }
    }

    pub fn subscribe_method(&self) -> String {
        format!("{}{}", SUBSCRIBE_PREFIX, self.name())
    }

    pub fn unsubscribe_method(&self) -> String {
        unsubscribe_method(&self.subscribe_method())
    }

    /// Method to send: the unsubscribe variant when `cancel` is set
    pub fn method(&self, cancel: bool) -> String {
        if cancel {
            self.unsubscribe_method()
        } else {
            self.subscribe_method()
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        let name = method
            .strip_prefix(UNSUBSCRIBE_PREFIX)
            .unwrap_or(method)
            .strip_prefix(SUBSCRIBE_PREFIX)?;
        Channel::ALL.into_iter().find(|channel| channel.name() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `"un" + subscribe_method`
pub fn unsubscribe_method(subscribe_method: &str) -> String {
    format!("{}{}", UNSUBSCRIBE_PREFIX, subscribe_method)
}

pub fn is_subscribe(method: &str) -> bool {
    method.starts_with(SUBSCRIBE_PREFIX)
}

pub fn is_unsubscribe(method: &str) -> bool {
    method
        .strip_prefix(UNSUBSCRIBE_PREFIX)
        .map(is_subscribe)
        .unwrap_or(false)
}

/// A command re-issued after the connection is re-opened
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEntry {
    /// Login is re-signed with a fresh nonce, never replayed verbatim
    Login { credentials: Credentials, mode: AuthMode },
    Subscribe { method: String, params: Params },
}

/// Record of the session state a reconnect has to restore
#[derive(Debug, Default)]
pub struct SubscriptionHistory {
    login: Mutex<Option<(Credentials, AuthMode)>>,
    subscriptions: Mutex<Vec<(String, Params)>>,
}

impl SubscriptionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_login(&self, credentials: Credentials, mode: AuthMode) {
        *self.login.lock() = Some((credentials, mode));
    }

    /// Track a transmitted request; only (un)subscribe methods change the history
    pub fn record(&self, method: &str, params: &Params) {
        let mut subscriptions = self.subscriptions.lock();

        if is_unsubscribe(method) {
            let subscribe = &method[UNSUBSCRIBE_PREFIX.len()..];
            let before = subscriptions.len();
            subscriptions.retain(|(m, p)| !(m == subscribe && p == params));

            if subscriptions.len() == before {
                // params may differ in optional fields; fall back to the symbol
                let symbol = params.get("symbol");
                subscriptions.retain(|(m, p)| !(m == subscribe && p.get("symbol") == symbol));
            }
            tracing::debug!("Removed {} from subscription history", subscribe);
        } else if is_subscribe(method) {
            if !subscriptions.iter().any(|(m, p)| m == method && p == params) {
                subscriptions.push((method.to_string(), params.clone()));
                tracing::debug!("Added {} to subscription history", method);
            }
        }
    }

    /// Commands to re-issue, login first, subscriptions in original order
    pub fn replay_plan(&self) -> Vec<ReplayEntry> {
        let mut plan = Vec::new();

        if let Some((credentials, mode)) = self.login.lock().clone() {
            plan.push(ReplayEntry::Login { credentials, mode });
        }

        plan.extend(
            self.subscriptions
                .lock()
                .iter()
                .map(|(method, params)| ReplayEntry::Subscribe {
                    method: method.clone(),
                    params: params.clone(),
                }),
        );
        plan
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().map(|(method, _)| method.clone()).collect()
    }

    pub fn clear(&self) {
        *self.login.lock() = None;
        self.subscriptions.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(symbol: &str) -> Params {
        let mut params = Params::new();
        params.insert("symbol".into(), json!(symbol));
        params
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Channel::Ticker.subscribe_method(), "subscribeTicker");
        assert_eq!(Channel::Orderbook.unsubscribe_method(), "unsubscribeOrderbook");
        assert_eq!(Channel::Reports.method(true), "unsubscribeReports");
        assert_eq!(Channel::Candles.method(false), "subscribeCandles");
    }

    #[test]
    fn test_from_method() {
        assert_eq!(Channel::from_method("subscribeTrades"), Some(Channel::Trades));
        assert_eq!(Channel::from_method("unsubscribeTrades"), Some(Channel::Trades));
        assert_eq!(Channel::from_method("getTrades"), None);
        assert_eq!(Channel::from_method("subscribeNothing"), None);
    }

    #[test]
    fn test_history_tracks_subscribe_and_unsubscribe() {
        let history = SubscriptionHistory::new();
        history.record("subscribeTicker", &params("BTCUSD"));
        history.record("subscribeTicker", &params("ETHBTC"));
        history.record("subscribeTicker", &params("BTCUSD"));
        history.record("getTrades", &params("BTCUSD"));
        assert_eq!(history.active_subscriptions().len(), 2);

        history.record("unsubscribeTicker", &params("BTCUSD"));
        assert_eq!(
            history.replay_plan(),
            vec![ReplayEntry::Subscribe { method: "subscribeTicker".into(), params: params("ETHBTC") }]
        );
    }

    #[test]
    fn test_unsubscribe_matches_on_symbol() {
        let history = SubscriptionHistory::new();
        let mut candle_params = params("BTCUSD");
        candle_params.insert("period".into(), json!("M30"));
        history.record("subscribeCandles", &candle_params);

        history.record("unsubscribeCandles", &params("BTCUSD"));
        assert!(history.active_subscriptions().is_empty());
    }

    #[test]
    fn test_login_replayed_first() {
        let history = SubscriptionHistory::new();
        history.record("subscribeReports", &Params::new());
        history.record_login(Credentials::new("k", "s"), AuthMode::Signed);

        let plan = history.replay_plan();
        assert!(matches!(plan[0], ReplayEntry::Login { mode: AuthMode::Signed, .. }));
        assert!(matches!(&plan[1], ReplayEntry::Subscribe { method, .. } if method == "subscribeReports"));

        history.clear();
        assert!(history.replay_plan().is_empty());
    }
}
