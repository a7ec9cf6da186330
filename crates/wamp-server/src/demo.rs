//! Reference handler set: constant getters, an error, an echo, and a
//! callback that asks the caller to add two numbers.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::instrument;
use wamp_rpc::{Connection, ErrorObject, MethodHandler, MethodRegistry};

/// Register every demo handler on `registry`.
pub fn register_demo(registry: &MethodRegistry) {
    registry.add("getTrue", Constant(Value::Bool(true)));
    registry.add("getFalse", Constant(Value::Bool(false)));
    registry.add("getNumber", Constant(json!(128)));
    registry.add("getString", Constant(json!("cjs-wamp")));
    registry.add("getError", ErrorHandler);
    registry.add("echo", EchoHandler);
    registry.add("rpc", SumCallbackHandler);
}

/// Returns a fixed value.
pub struct Constant(pub Value);

#[async_trait]
impl MethodHandler for Constant {
    async fn handle(&self, _params: Option<Value>, _peer: &Connection) -> Result<Value, ErrorObject> {
        Ok(self.0.clone())
    }
}

/// Always fails with `{"message": "oops"}`.
pub struct ErrorHandler;

#[async_trait]
impl MethodHandler for ErrorHandler {
    async fn handle(&self, _params: Option<Value>, _peer: &Connection) -> Result<Value, ErrorObject> {
        Err(ErrorObject::message("oops"))
    }
}

/// Returns its params, or `null` when there are none.
pub struct EchoHandler;

#[async_trait]
impl MethodHandler for EchoHandler {
    async fn handle(&self, params: Option<Value>, _peer: &Connection) -> Result<Value, ErrorObject> {
        Ok(params.unwrap_or(Value::Null))
    }
}

/// Forwards its params to the caller's `sum` method and returns the answer.
///
/// A failure on the caller's side is passed back as this call's error.
pub struct SumCallbackHandler;

#[async_trait]
impl MethodHandler for SumCallbackHandler {
    #[instrument(skip_all, fields(method = "rpc", connection = peer.id()))]
    async fn handle(&self, params: Option<Value>, peer: &Connection) -> Result<Value, ErrorObject> {
        peer.call("sum", params).await.map_err(ErrorObject::from)
    }
}

/// Adds `x` and `y`. The peer-side half of [`SumCallbackHandler`].
pub struct SumHandler;

#[async_trait]
impl MethodHandler for SumHandler {
    async fn handle(&self, params: Option<Value>, _peer: &Connection) -> Result<Value, ErrorObject> {
        let params = params.unwrap_or(Value::Null);
        let operand = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_f64)
                .ok_or_else(|| ErrorObject::invalid_params(format!("'{key}' must be a number")))
        };
        let (x, y) = (operand("x")?, operand("y")?);

        // keep integers integral on the wire
        if let (Some(a), Some(b)) = (params["x"].as_i64(), params["y"].as_i64()) {
            if let Some(sum) = a.checked_add(b) {
                return Ok(json!(sum));
            }
        }
        Ok(json!(x + y))
    }
}
