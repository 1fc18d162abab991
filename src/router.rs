//! Classification and dispatch of inbound frames
//!
//! Every decoded frame is either a response (`id` with `result` or `error`),
//! a stream notification (`method` with object `params` carrying `symbol`),
//! or malformed. Malformed frames and responses nobody waits for are logged
//! and dropped; neither ever stops the connection.

use crate::{
    data::{Outcome, Params, RequestId, RpcError},
    error::{ClientError, ErrorReporter, MessageError, RegistryError},
    registry::RequestRegistry,
    report::Reporter,
    sink::OutputSink,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of classifying one decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// `id` is `None` when the server echoed something that is not a usable id (e.g. `null`)
    Response { id: Option<RequestId>, response: Value },
    Stream { method: String, symbol: String, params: Params },
    Malformed(MessageError),
}

/// Classify a decoded frame. Total over all JSON values.
pub fn classify(decoded: Value) -> Classified {
    let mut object = match decoded {
        Value::Object(object) => object,
        other => {
            return Classified::Malformed(MessageError::Malformed(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    let has_outcome = object.contains_key("result") || object.contains_key("error");
    if has_outcome {
        if let Some(id) = object.get("id").map(RequestId::from_value) {
            return Classified::Response {
                id,
                response: Value::Object(object),
            };
        }
    }

    let method = match object.get("method").and_then(Value::as_str) {
        Some(method) => method.to_string(),
        None if has_outcome => {
            return Classified::Malformed(MessageError::MissingField(
                "response without an id".to_string(),
            ))
        }
        None => {
            return Classified::Malformed(MessageError::Malformed(
                "neither a response nor a notification".to_string(),
            ))
        }
    };

    let mut params = match object.remove("params") {
        Some(Value::Object(params)) => params,
        Some(other) => {
            return Classified::Malformed(MessageError::Malformed(format!(
                "{} notification with {} params",
                method,
                type_name(&other)
            )))
        }
        None => return Classified::Malformed(MessageError::MissingField(format!("{}.params", method))),
    };

    match params.remove("symbol") {
        Some(Value::String(symbol)) => Classified::Stream { method, symbol, params },
        _ => Classified::Malformed(MessageError::MissingField(format!("{}.params.symbol", method))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// What happened to a routed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Success,
    Failure,
    Stream,
    Raw,
    /// Response whose id matches no pending request; dropped
    UnknownId,
    /// Undecodable or unclassifiable frame; dropped
    Malformed,
}

/// Counters of routed frames
#[derive(Debug, Default)]
pub struct RouterStats {
    successes: AtomicU64,
    failures: AtomicU64,
    streams: AtomicU64,
    raw: AtomicU64,
    unknown_ids: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterCounts {
    pub successes: u64,
    pub failures: u64,
    pub streams: u64,
    pub raw: u64,
    pub unknown_ids: u64,
    pub malformed: u64,
}

impl RouterStats {
    fn record(&self, route: Route) {
        let counter = match route {
            Route::Success => &self.successes,
            Route::Failure => &self.failures,
            Route::Stream => &self.streams,
            Route::Raw => &self.raw,
            Route::UnknownId => &self.unknown_ids,
            Route::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterCounts {
        RouterCounts {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            streams: self.streams.load(Ordering::Relaxed),
            raw: self.raw.load(Ordering::Relaxed),
            unknown_ids: self.unknown_ids.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Routes classified frames to the registry and the output sink
pub struct MessageRouter {
    registry: Arc<RequestRegistry>,
    sink: OutputSink,
    reporter: Reporter,
    raw: bool,
    stats: RouterStats,
}

impl MessageRouter {
    pub fn new(registry: Arc<RequestRegistry>, sink: OutputSink, reporter: Reporter, raw: bool) -> Self {
        Self {
            registry,
            sink,
            reporter,
            raw,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterCounts {
        self.stats.snapshot()
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    /// Handle one inbound text frame
    pub async fn route(&self, text: &str) -> Route {
        let route = self.dispatch(text).await;
        self.stats.record(route);
        route
    }

    async fn dispatch(&self, text: &str) -> Route {
        if self.raw {
            self.deliver(Outcome::Raw(text.to_string())).await;
            return Route::Raw;
        }

        let decoded: Value = match serde_json::from_str(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                let error = ClientError::from(MessageError::InvalidJson(e.to_string()));
                ErrorReporter::report(&error, Some(text));
                return Route::Malformed;
            }
        };

        match classify(decoded) {
            Classified::Response { id, response } => self.handle_response(id, response, text).await,
            Classified::Stream { method, symbol, params } => {
                tracing::trace!("Stream {} for {}", method, symbol);
                self.deliver(Outcome::StreamEvent { method, symbol, params }).await;
                Route::Stream
            }
            Classified::Malformed(error) => {
                ErrorReporter::report(&ClientError::from(error), Some(text));
                Route::Malformed
            }
        }
    }

    async fn handle_response(&self, id: Option<RequestId>, response: Value, text: &str) -> Route {
        let request = match id {
            Some(id) => self.registry.pop(&id),
            None => Err(RegistryError::UnknownRequestId(RequestId::Str(
                response.get("id").map(Value::to_string).unwrap_or_default(),
            ))),
        };

        let request = match request {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Could not find request relating to response");
                ErrorReporter::report(&ClientError::from(e), Some(text));
                return Route::UnknownId;
            }
        };

        let (outcome, route) = if response.get("result").is_some() {
            (Outcome::ResponseSuccess { request, response }, Route::Success)
        } else {
            let error = parse_rpc_error(response.get("error"));
            (Outcome::ResponseFailure { request, error, response }, Route::Failure)
        };

        tracing::debug!("Response to {:?}", outcome.request().map(|r| &r.id));
        self.reporter.report(&outcome);
        self.deliver(outcome).await;
        route
    }

    async fn deliver(&self, outcome: Outcome) {
        if let Err(e) = self.sink.push(outcome).await {
            tracing::debug!("Outcome not delivered: {}", e);
        }
    }
}

fn parse_rpc_error(error: Option<&Value>) -> RpcError {
    match error {
        Some(value @ Value::Object(_)) => {
            serde_json::from_value(value.clone()).unwrap_or_else(|_| RpcError {
                code: value.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: value.to_string(),
                description: None,
            })
        }
        Some(other) => RpcError {
            code: 0,
            message: other.to_string(),
            description: None,
        },
        None => RpcError {
            code: 0,
            message: "missing error object".to_string(),
            description: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sink;
    use serde_json::json;

    fn router(raw: bool) -> (MessageRouter, sink::OutputReceiver) {
        let (sink, rx) = sink::channel(16, true);
        let router = MessageRouter::new(Arc::new(RequestRegistry::new()), sink, Reporter::new(true), raw);
        (router, rx)
    }

    #[test]
    fn test_classify_response() {
        let classified = classify(json!({"jsonrpc": "2.0", "id": 7, "result": [1, 2]}));
        assert!(matches!(classified, Classified::Response { id: Some(RequestId::Int(7)), .. }));

        let classified = classify(json!({"id": "abc", "error": {"code": 1}}));
        assert!(matches!(classified, Classified::Response { id: Some(RequestId::Str(_)), .. }));

        let classified = classify(json!({"id": null, "error": {"code": 1}}));
        assert!(matches!(classified, Classified::Response { id: None, .. }));
    }

    #[test]
    fn test_classify_stream_extracts_symbol() {
        let classified = classify(json!({
            "jsonrpc": "2.0",
            "method": "ticker",
            "params": {"symbol": "ETHBTC", "ask": "0.054464", "bid": "0.054463"}
        }));

        match classified {
            Classified::Stream { method, symbol, params } => {
                assert_eq!(method, "ticker");
                assert_eq!(symbol, "ETHBTC");
                assert!(!params.contains_key("symbol"));
                assert_eq!(params.get("ask"), Some(&json!("0.054464")));
            }
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_idless_result_falls_through_to_stream() {
        let classified = classify(json!({
            "result": true,
            "method": "snapshotOrderbook",
            "params": {"symbol": "ETHBTC", "sequence": 1}
        }));
        assert!(matches!(classified, Classified::Stream { ref symbol, .. } if symbol == "ETHBTC"));
    }

    #[test]
    fn test_classify_malformed() {
        for frame in [
            json!([1, 2, 3]),
            json!("text"),
            json!({"result": true}),
            json!({"method": "ticker"}),
            json!({"method": "ticker", "params": [1]}),
            json!({"method": "ticker", "params": {"ask": "1"}}),
            json!({"foo": "bar"}),
        ] {
            assert!(matches!(classify(frame.clone()), Classified::Malformed(_)), "{}", frame);
        }
    }

    #[tokio::test]
    async fn test_matched_response_popped_and_delivered() {
        let (router, mut rx) = router(false);
        router.registry().register(RequestId::Int(7), "getTrades", Params::new()).unwrap();

        let route = router.route(r#"{"jsonrpc":"2.0","id":7,"result":[]}"#).await;
        assert_eq!(route, Route::Success);
        assert!(!router.registry().contains(&RequestId::Int(7)));

        let outcome = rx.pop(false, None).await.unwrap();
        assert_eq!(outcome.category(), "Response");
        assert_eq!(outcome.status(), Some("Success"));
        assert_eq!(outcome.request().unwrap().method, "getTrades");
    }

    #[tokio::test]
    async fn test_error_response_delivered_as_failure() {
        let (router, mut rx) = router(false);
        router.registry().register(RequestId::Int(3), "getSymbol", Params::new()).unwrap();

        let frame = r#"{"id":3,"error":{"code":2001,"message":"Symbol not found","description":"x"}}"#;
        assert_eq!(router.route(frame).await, Route::Failure);

        match rx.pop(false, None).await.unwrap() {
            Outcome::ResponseFailure { error, request, .. } => {
                assert_eq!(error.code, 2001);
                assert_eq!(error.message, "Symbol not found");
                assert_eq!(request.id, RequestId::Int(3));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_id_not_delivered() {
        let (router, mut rx) = router(false);

        assert_eq!(router.route(r#"{"id":999,"result":{}}"#).await, Route::UnknownId);
        assert_eq!(rx.pop(false, None).await, Err(SinkError::Empty));
        assert_eq!(router.stats().unknown_ids, 1);
    }

    #[tokio::test]
    async fn test_malformed_dropped_and_processing_continues() {
        let (router, mut rx) = router(false);

        assert_eq!(router.route("not json").await, Route::Malformed);
        assert_eq!(router.route(r#"{"method":"ticker","params":{}}"#).await, Route::Malformed);
        assert_eq!(
            router.route(r#"{"method":"trades","params":{"symbol":"BTCUSD","data":[]}}"#).await,
            Route::Stream
        );

        let outcome = rx.pop(false, None).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::StreamEvent {
                method: "trades".into(),
                symbol: "BTCUSD".into(),
                params: json!({"data": []}).as_object().cloned().unwrap(),
            }
        );
        assert_eq!(router.stats().malformed, 2);
    }

    #[tokio::test]
    async fn test_raw_mode_passes_frames_through() {
        let (router, mut rx) = router(true);
        router.registry().register(RequestId::Int(1), "getSymbols", Params::new()).unwrap();

        assert_eq!(router.route(r#"{"id":1,"result":[]}"#).await, Route::Raw);
        assert_eq!(rx.pop(false, None).await.unwrap(), Outcome::Raw(r#"{"id":1,"result":[]}"#.into()));
        assert!(router.registry().contains(&RequestId::Int(1)));
    }
}
