//! Human-readable rendering of outcomes
//!
//! Successful responses are rendered with a per-method template, failures as
//! `{code} - {message} - {description}!` followed by the related request.

use crate::data::{Outcome, PendingRequest, RpcError};
use serde_json::Value;

const ORDER_REPORT: &str = "Trade ID ({id}): \tStatus: {status}\n\
    Order type: {type}\t\tPrice: {price}\t\tSize: {quantity}\n\
    Side: {side}\t\t\tCumulative size: {cumQuantity}\t\t\tTime in Force: {timeInForce}\n\
    Created at: {createdAt}\t\t\t\t\tUpdated at: {updatedAt}\n\
    Client Order ID: {clientOrderId}\t\t\t\tReport type: {reportType}";

const ORIGINAL_CLIENT_ORDER_ID: &str =
    "Original Request Client Order ID: {originalRequestClientOrderId}";

const CURRENCY: &str = "{fullName}({id}):\tIs a cryptocurrency: {crypto}\n\
    \tDeposits available: {payinEnabled}\n\
    \tpayinPaymentId available: {payinPaymentId}\n\
    \tRequired confirmations on deposit: {payinConfirmations}\n\
    \tWithdrawals available: {payoutEnabled}\n\
    \tpayoutIsPaymentId available: {payoutIsPaymentId}\n\
    \tTransfers enabled: {transferEnabled}\n";

const SYMBOL: &str = "{id}:\n\
    \tBase currency: {baseCurrency}\n\
    \tQuote currency: {quoteCurrency}\n\
    \tMinimum quantity increment: {quantityIncrement}\n\
    \tTick size: {tickSize}\n\
    \tTaker fee: {takeLiquidityRate}\n\
    \tMaker fee: {provideLiquidityRate}\n\
    \tFee currency: {feeCurrency}\n";

const TRADE: &str = "Trade ID ({id}):\tPrice: {price}\n\
    \tSize: {quantity}\n\
    \tSide: {side}\n\
    \tTimestamp: {timestamp}\n";

const BALANCE: &str = "Wallet: {currency}\t\tAvailable: {available}\t\tReserved: {reserved}\n";

/// How a successful response to a method is rendered
enum Template {
    /// Fixed confirmation text, `{symbol}` taken from the request params
    Confirmation(&'static str),
    /// One rendering per item of the result array
    PerItem(&'static str),
    /// A single rendering of the result object, with a headline
    Single(&'static str, String),
}

fn template_for(method: &str) -> Option<Template> {
    let template = match method {
        "login" => Template::Confirmation("Successfully logged in!"),
        "subscribeTicker" => Template::Confirmation("Successfully subscribed to {symbol} ticker data!"),
        "subscribeOrderbook" => {
            Template::Confirmation("Successfully subscribed to {symbol} order book data!")
        }
        "subscribeTrades" => Template::Confirmation("Successfully subscribed to {symbol} trade data!"),
        "subscribeCandles" => Template::Confirmation("Successfully subscribed to {symbol} candle data!"),
        "subscribeReports" => Template::Confirmation("Successfully subscribed to account reports!"),
        "getCurrencies" => Template::PerItem(CURRENCY),
        "getSymbols" => Template::PerItem(SYMBOL),
        "getTrades" => Template::PerItem(TRADE),
        "getTradingBalance" => Template::PerItem(BALANCE),
        "getOrders" => Template::PerItem(ORDER_REPORT),
        "getCurrency" => Template::Single(CURRENCY, String::new()),
        "getSymbol" => Template::Single(SYMBOL, String::new()),
        "newOrder" => Template::Single(
            ORDER_REPORT,
            "Successfully placed a new order via websocket!\n".to_string(),
        ),
        "cancelOrder" => Template::Single(
            ORDER_REPORT,
            "Successfully cancelled an order via websocket!\n".to_string(),
        ),
        "cancelReplaceOrder" => Template::Single(
            ORDER_REPORT,
            format!("Successfully replaced an order via websocket!\n{{}}{}", ORIGINAL_CLIENT_ORDER_ID),
        ),
        _ => return None,
    };
    Some(template)
}

/// Substitute `{field}` placeholders with values from `object`
///
/// Strings are inserted without quotes; absent fields render as `-`.
/// A bare `{}` is replaced by the whole value.
pub fn fill(template: &str, object: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let field = &after[..end];
                let value = if field.is_empty() { Some(object) } else { object.get(field) };
                out.push_str(&render_value(value));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render a successful response to `request`
pub fn render_success(request: &PendingRequest, result: &Value) -> String {
    let method = request.method.as_str();

    match template_for(method) {
        Some(Template::Confirmation(text)) => fill(text, &Value::Object(request.params.clone())),
        Some(Template::PerItem(item)) => {
            let mut text = format!("Successfully processed {} request:\n", method);
            match result.as_array() {
                Some(items) => {
                    for entry in items {
                        text.push_str(&fill(item, entry));
                    }
                }
                None => text.push_str(&fill(item, result)),
            }
            text
        }
        Some(Template::Single(body, headline)) => {
            let mut text = format!("Successfully processed {} request:\n", method);
            if headline.contains("{}") {
                // headline wraps the body: "<intro>{}<trailer>"
                let rendered = headline.replacen("{}", body, 1);
                text.push_str(&fill(&rendered, result));
            } else {
                text.push_str(&headline);
                text.push_str(&fill(body, result));
            }
            text
        }
        None => format!("Successfully processed {} request: {}", method, result),
    }
}

/// Render a failed response to `request`
pub fn render_failure(request: &PendingRequest, error: &RpcError) -> String {
    format!("{} Related Request: {}", error, request)
}

/// Render any outcome. Stream events and raw frames have no report.
pub fn render(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::ResponseSuccess { request, response } => {
            let result = response.get("result").unwrap_or(&Value::Null);
            Some(render_success(request, result))
        }
        Outcome::ResponseFailure { request, error, .. } => Some(render_failure(request, error)),
        Outcome::StreamEvent { .. } | Outcome::Raw(_) => None,
    }
}

/// Logs rendered responses and echoes them to stdout unless silenced
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    silent: bool,
}

impl Reporter {
    pub fn new(silent: bool) -> Self {
        Self { silent }
    }

    pub fn report(&self, outcome: &Outcome) {
        let Some(text) = render(outcome) else {
            return;
        };

        match outcome {
            Outcome::ResponseFailure { .. } => tracing::error!("{}", text),
            _ => tracing::info!("{}", text),
        }
        self.echo(&text);
    }

    pub fn echo(&self, text: &str) {
        if !self.silent {
            println!("{}", text);
        }
    }
}
