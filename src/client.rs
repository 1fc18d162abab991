//! Main client interface for the HitBTC WebSocket API
//!
//! Every endpoint method builds a method name and a params object and hands
//! them to [`ConnectionManager::send`]. Each returns the id the request was
//! sent with; the response arrives later through [`HitBtcClient::recv`].

use crate::{
    auth::{AuthMode, Credentials},
    connection::{ConnectionManager, Connector},
    data::{ClientConfig, ConnectionState, Outcome, Params, RequestId},
    error::{ClientError, SinkError},
    subscription::Channel,
    worker::Worker,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Build a params object from key/value pairs
pub fn params<'a, I>(pairs: I) -> Params
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// WebSocket client for the HitBTC API
pub struct HitBtcClient {
    manager: ConnectionManager,
    credentials: Option<Credentials>,
}

impl HitBtcClient {
    /// Create a client; nothing is connected until [`start`](Self::start)
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            manager: ConnectionManager::new(config)?,
            credentials: None,
        })
    }

    /// Create a client with a custom transport and worker
    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        worker: Box<dyn Worker>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            manager: ConnectionManager::with_parts(config, connector, worker)?,
            credentials: None,
        })
    }

    /// Credentials used by [`login`](Self::login) when none are given per call
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn credentials_given(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn start(&self) -> Result<(), ClientError> {
        tracing::info!("Starting HitBTC WebSocket client");
        self.manager.connect()?;
        Ok(())
    }

    pub async fn stop(&self) {
        tracing::info!("Stopping HitBTC WebSocket client");
        self.manager.disconnect().await;
    }

    /// Next outcome, see [`OutputReceiver::pop`](crate::sink::OutputReceiver::pop)
    pub async fn recv(&self, block: bool, timeout: Option<Duration>) -> Result<Outcome, SinkError> {
        self.manager.recv(block, timeout).await
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Wait for the socket to open
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        self.manager.wait_for_state(ConnectionState::Connected, timeout).await
    }

    /// Send any method; the endpoint wrappers below all end up here
    pub async fn send(
        &self,
        method: &str,
        params: Params,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.manager.send(method, params, id).await
    }

    /// Authenticate the session
    ///
    /// `key` and `secret` override the stored credentials field by field.
    /// Fails with `AuthError::MissingCredentials` when neither source
    /// provides both.
    pub async fn login(
        &self,
        key: Option<&str>,
        secret: Option<&str>,
        mode: AuthMode,
        nonce: Option<&str>,
    ) -> Result<RequestId, ClientError> {
        let credentials = Credentials::resolve(self.credentials.as_ref(), key, secret)?;
        self.manager.login(&credentials, mode, nonce).await
    }

    /// Request all available currencies
    pub async fn request_currencies(&self, id: Option<RequestId>) -> Result<RequestId, ClientError> {
        self.send("getCurrencies", Params::new(), id).await
    }

    pub async fn request_currency(
        &self,
        currency: &str,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.send("getCurrency", params([("currency", Value::from(currency))]), id)
            .await
    }

    /// Request all available symbols
    pub async fn request_symbols(&self, id: Option<RequestId>) -> Result<RequestId, ClientError> {
        self.send("getSymbols", Params::new(), id).await
    }

    pub async fn request_symbol(
        &self,
        symbol: &str,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.send("getSymbol", params([("symbol", Value::from(symbol))]), id)
            .await
    }

    /// Request trades for a symbol; `params` must contain `symbol` and may
    /// carry `limit`, `sort`, `by`, `from`, `till` and `offset`
    pub async fn request_trades(
        &self,
        params: Params,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.send("getTrades", params, id).await
    }

    /// Request trading balances (requires login)
    pub async fn request_balance(&self, id: Option<RequestId>) -> Result<RequestId, ClientError> {
        self.send("getTradingBalance", Params::new(), id).await
    }

    /// Request active orders (requires login)
    pub async fn request_active_orders(
        &self,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.send("getOrders", Params::new(), id).await
    }

    /// Place a new order (requires login)
    pub async fn place_order(
        &self,
        params: Params,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.send("newOrder", params, id).await
    }

    pub async fn cancel_order(
        &self,
        client_order_id: &str,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.send(
            "cancelOrder",
            params([("clientOrderId", Value::from(client_order_id))]),
            id,
        )
        .await
    }

    /// Replace an order; `params` carries `clientOrderId`, `requestClientId`,
    /// `quantity` and `price`
    pub async fn replace_order(
        &self,
        params: Params,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.send("cancelReplaceOrder", params, id).await
    }

    /// Subscribe to (or with `cancel`, unsubscribe from) a channel
    pub async fn subscribe(
        &self,
        channel: Channel,
        cancel: bool,
        params: Params,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        let method = channel.method(cancel);
        tracing::info!("{} {}", if cancel { "Unsubscribing from" } else { "Subscribing to" }, channel);
        self.send(&method, params, id).await
    }

    pub async fn subscribe_ticker(
        &self,
        symbol: &str,
        cancel: bool,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.subscribe(Channel::Ticker, cancel, params([("symbol", Value::from(symbol))]), id)
            .await
    }

    /// Order book snapshots and updates; `limit` bounds the book depth
    pub async fn subscribe_book(
        &self,
        symbol: &str,
        limit: Option<u32>,
        cancel: bool,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        let mut book_params = params([("symbol", Value::from(symbol))]);
        if let Some(limit) = limit {
            book_params.insert("limit".to_string(), Value::from(limit));
        }
        self.subscribe(Channel::Orderbook, cancel, book_params, id).await
    }

    pub async fn subscribe_trades(
        &self,
        symbol: &str,
        cancel: bool,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.subscribe(Channel::Trades, cancel, params([("symbol", Value::from(symbol))]), id)
            .await
    }

    /// Candles for `symbol`; `period` is e.g. `M30` or `H1`
    pub async fn subscribe_candles(
        &self,
        symbol: &str,
        period: Option<&str>,
        cancel: bool,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        let mut candle_params = params([("symbol", Value::from(symbol))]);
        if let Some(period) = period {
            candle_params.insert("period".to_string(), Value::from(period));
        }
        self.subscribe(Channel::Candles, cancel, candle_params, id).await
    }

    /// Account reports (requires login)
    pub async fn subscribe_reports(
        &self,
        cancel: bool,
        id: Option<RequestId>,
    ) -> Result<RequestId, ClientError> {
        self.subscribe(Channel::Reports, cancel, Params::new(), id).await
    }
}

/// Builder pattern for client configuration
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.config.url = url.to_string();
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.config.pong_timeout = timeout;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.config.raw = raw;
        self
    }

    pub fn suppress_delivery(mut self, suppress: bool) -> Self {
        self.config.suppress_delivery = suppress;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.config.silent = silent;
        self
    }

    pub fn request_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.request_ttl = ttl;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = timeout;
        self
    }

    pub fn resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.config.resubscribe_on_reconnect = enabled;
        self
    }

    pub fn log_span(mut self, span: tracing::Span) -> Self {
        self.config.log_span = Some(span);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, ConnectionError};
    use serde_json::json;

    #[test]
    fn test_params_helper() {
        let built = params([("symbol", json!("BTCUSD")), ("limit", json!(10))]);
        assert_eq!(Value::Object(built), json!({"symbol": "BTCUSD", "limit": 10}));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfigBuilder::new()
            .url("wss://example.com/ws")
            .queue_capacity(5)
            .silent(true)
            .resubscribe_on_reconnect(true)
            .build();

        assert_eq!(config.url, "wss://example.com/ws");
        assert_eq!(config.queue_capacity, 5);
        assert!(config.silent);
        assert!(config.resubscribe_on_reconnect);
        assert_eq!(config.ping_interval, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_login_without_credentials() {
        let client = HitBtcClient::new(ClientConfig::default()).unwrap();
        assert!(!client.credentials_given());

        let result = client.login(None, Some("secret"), AuthMode::Signed, None).await;
        assert!(matches!(result, Err(ClientError::Auth(AuthError::MissingCredentials))));
    }

    #[tokio::test]
    async fn test_wrappers_require_connection() {
        let client = HitBtcClient::new(ClientConfig::default())
            .unwrap()
            .with_credentials(Credentials::new("key", "secret"));

        let result = client.subscribe_ticker("ETHBTC", false, None).await;
        assert!(matches!(
            result,
            Err(ClientError::Connection(ConnectionError::NotConnected))
        ));

        let result = client.login(None, None, AuthMode::Basic, None).await;
        assert!(matches!(
            result,
            Err(ClientError::Connection(ConnectionError::NotConnected))
        ));
    }
}
