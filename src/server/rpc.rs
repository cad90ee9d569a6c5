//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! JSON-RPC 2.0 request/response wire types and the method dispatch
//! surface implemented by [`crate::session::Session`].
//!

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

#[derive(Deserialize, Debug)]
pub struct Request {
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct Response {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub id: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl Response {
    pub fn ok(id: Option<Value>, result: Value) -> Response {
        Response { jsonrpc: "2.0", result: Some(result), error: None, id }
    }

    pub fn err(id: Option<Value>, err: &RpcError) -> Response {
        Response { jsonrpc: "2.0", result: None, error: Some(ErrorBody { code: err.code(), message: err.to_string() }), id }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut s = serde_json::to_string(self)?;
        s.push_str("\r\n");
        Ok(s)
    }
}

/// The set of control-surface methods a session must be able to serve.
/// Matches the required subset of PHD2's documented event-server RPC
/// API.
pub trait RpcHandler {
    fn get_connected(&self) -> Result<Value, RpcError>;
    fn set_connected(&mut self, connected: bool) -> Result<Value, RpcError>;
    fn get_exposure(&self) -> Result<Value, RpcError>;
    fn set_exposure(&mut self, exposure_ms: u32) -> Result<Value, RpcError>;
    fn guide(&mut self, recalibrate: bool, settle: Value) -> Result<Value, RpcError>;
    fn dither(&mut self, pixels: f64, ra_only: bool, settle: Value) -> Result<Value, RpcError>;
    fn stop_capture(&mut self) -> Result<Value, RpcError>;
    fn loop_exposures(&mut self) -> Result<Value, RpcError>;
    fn find_star(&mut self) -> Result<Value, RpcError>;
    fn set_paused(&mut self, paused: bool, full: bool) -> Result<Value, RpcError>;
    fn get_app_state(&self) -> Result<Value, RpcError>;
    fn get_calibrated(&self) -> Result<Value, RpcError>;
    fn get_pixel_scale(&self) -> Result<Value, RpcError>;
    fn get_lock_position(&self) -> Result<Value, RpcError>;
    fn set_lock_position(&mut self, x: f64, y: f64) -> Result<Value, RpcError>;
}

/// Parses `params` as an ordered array or a named-object and extracts
/// positional arguments by index/key, mirroring jsonrpc2's permissive
/// by-position-or-by-name argument binding.
pub fn param_f64(params: &Value, index: usize, key: &str) -> Result<f64, RpcError> {
    match params {
        Value::Array(arr) => arr.get(index).and_then(Value::as_f64).ok_or(RpcError::InvalidParams),
        Value::Object(map) => map.get(key).and_then(Value::as_f64).ok_or(RpcError::InvalidParams),
        _ => Err(RpcError::InvalidParams),
    }
}

pub fn param_bool(params: &Value, index: usize, key: &str, default: bool) -> bool {
    match params {
        Value::Array(arr) => arr.get(index).and_then(Value::as_bool).unwrap_or(default),
        Value::Object(map) => map.get(key).and_then(Value::as_bool).unwrap_or(default),
        _ => default,
    }
}

/// Dispatches one parsed request against `handler`, producing a
/// response (or `None` for a notification with no `id`, per JSON-RPC
/// 2.0).
pub fn dispatch(handler: &mut dyn RpcHandler, request: Request) -> Option<Response> {
    let result = match request.method.as_str() {
        "get_connected" => handler.get_connected(),
        "set_connected" => match &request.params {
            Value::Array(a) => a.first().and_then(Value::as_bool).ok_or(RpcError::InvalidParams),
            Value::Object(m) => m.get("connected").and_then(Value::as_bool).ok_or(RpcError::InvalidParams),
            _ => Err(RpcError::InvalidParams),
        }
        .and_then(|connected| handler.set_connected(connected)),
        "get_exposure" => handler.get_exposure(),
        "set_exposure" => param_f64(&request.params, 0, "exposure").and_then(|ms| handler.set_exposure(ms as u32)),
        "guide" => {
            let recalibrate = param_bool(&request.params, 0, "recalibrate", false);
            handler.guide(recalibrate, request.params.clone())
        }
        "dither" => {
            let pixels = param_f64(&request.params, 0, "amount").unwrap_or(1.0);
            let ra_only = param_bool(&request.params, 1, "raOnly", false);
            handler.dither(pixels, ra_only, request.params.clone())
        }
        "stop_capture" => handler.stop_capture(),
        "loop" => handler.loop_exposures(),
        "find_star" => handler.find_star(),
        "set_paused" => {
            let paused = match &request.params {
                Value::Array(a) => a.first().and_then(Value::as_bool).ok_or(RpcError::InvalidParams),
                Value::Object(m) => m.get("paused").and_then(Value::as_bool).ok_or(RpcError::InvalidParams),
                _ => Err(RpcError::InvalidParams),
            };
            let full = param_bool(&request.params, 1, "full", false);
            paused.and_then(|paused| handler.set_paused(paused, full))
        }
        "get_app_state" => handler.get_app_state(),
        "get_calibrated" => handler.get_calibrated(),
        "get_pixel_scale" => handler.get_pixel_scale(),
        "get_lock_position" => handler.get_lock_position(),
        "set_lock_position" => {
            let x = param_f64(&request.params, 0, "x");
            let y = param_f64(&request.params, 1, "y");
            match (x, y) {
                (Ok(x), Ok(y)) => handler.set_lock_position(x, y),
                _ => Err(RpcError::InvalidParams),
            }
        }
        other => Err(RpcError::Failed(format!("unknown method: {}", other))),
    };

    request.id.map(|id| match result {
        Ok(value) => Response::ok(Some(id), value),
        Err(e) => Response::err(Some(id), &e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubHandler;

    impl RpcHandler for StubHandler {
        fn get_connected(&self) -> Result<Value, RpcError> {
            Ok(json!(true))
        }
        fn set_connected(&mut self, _connected: bool) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn get_exposure(&self) -> Result<Value, RpcError> {
            Ok(json!(1000))
        }
        fn set_exposure(&mut self, _exposure_ms: u32) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn guide(&mut self, _recalibrate: bool, _settle: Value) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn dither(&mut self, _pixels: f64, _ra_only: bool, _settle: Value) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn stop_capture(&mut self) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn loop_exposures(&mut self) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn find_star(&mut self) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn set_paused(&mut self, _paused: bool, _full: bool) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
        fn get_app_state(&self) -> Result<Value, RpcError> {
            Ok(json!("Guiding"))
        }
        fn get_calibrated(&self) -> Result<Value, RpcError> {
            Ok(json!(true))
        }
        fn get_pixel_scale(&self) -> Result<Value, RpcError> {
            Ok(json!(1.2))
        }
        fn get_lock_position(&self) -> Result<Value, RpcError> {
            Ok(json!([1.0, 2.0]))
        }
        fn set_lock_position(&mut self, _x: f64, _y: f64) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn dispatch_returns_result_for_known_method() {
        let mut handler = StubHandler;
        let req = Request { jsonrpc: Some("2.0".into()), method: "get_connected".into(), params: Value::Null, id: Some(json!(1)) };
        let response = dispatch(&mut handler, req).unwrap();
        assert_eq!(response.result, Some(json!(true)));
    }

    #[test]
    fn dispatch_invalid_params_yields_reserved_error_code() {
        let mut handler = StubHandler;
        let req = Request { jsonrpc: Some("2.0".into()), method: "set_lock_position".into(), params: json!({}), id: Some(json!(2)) };
        let response = dispatch(&mut handler, req).unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[test]
    fn notification_without_id_yields_no_response() {
        let mut handler = StubHandler;
        let req = Request { jsonrpc: Some("2.0".into()), method: "stop_capture".into(), params: Value::Null, id: None };
        assert!(dispatch(&mut handler, req).is_none());
    }
}
