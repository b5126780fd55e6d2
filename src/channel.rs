//! Method channel between the application layer and the alarm runtime.
//!
//! Messages use the JSON method codec: a call is `{"method": name, "args": value}`,
//! a success reply is `[result]`, an error reply is `[code, message, details]` and
//! a method nobody handles gets an empty reply. Every call produces a reply; no
//! failure escapes as a panic.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::alarm::model::AlarmRequest;
use crate::alarm::runtime::{AlarmRuntime, ScheduleError};

pub const SET_ALARM: &str = "setAlarm";
pub const STOP_NATIVE_ALARM: &str = "stopNativeAlarm";
pub const CANCEL_ALARM: &str = "cancelAlarm";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("method call must be a map with a string 'method'")]
    NotAMethodCall,
    #[cfg(test)]
    #[error("reply must be an empty message or a list of one or three elements")]
    NotAReply,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub args: Value,
}

impl MethodCall {
    #[cfg(test)]
    pub fn new(method: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut map) = value else {
            return Err(CodecError::NotAMethodCall);
        };
        let Some(Value::String(method)) = map.remove("method") else {
            return Err(CodecError::NotAMethodCall);
        };
        let args = map.remove("args").unwrap_or(Value::Null);
        Ok(Self { method, args })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        json!({ "method": self.method, "args": self.args }).to_string().into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodReply {
    Success(Value),
    Error {
        code: String,
        message: Option<String>,
        details: Value,
    },
    NotImplemented,
}

impl MethodReply {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        MethodReply::Error {
            code: code.to_string(),
            message: Some(message.into()),
            details: Value::Null,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            MethodReply::Success(result) => json!([result]).to_string().into_bytes(),
            MethodReply::Error {
                code,
                message,
                details,
            } => json!([code, message, details]).to_string().into_bytes(),
            MethodReply::NotImplemented => Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Ok(MethodReply::NotImplemented);
        }
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Array(mut items) = value else {
            return Err(CodecError::NotAReply);
        };
        match items.len() {
            1 => Ok(MethodReply::Success(items.remove(0))),
            3 => {
                let details = items.remove(2);
                let message = items.remove(1);
                let Value::String(code) = items.remove(0) else {
                    return Err(CodecError::NotAReply);
                };
                Ok(MethodReply::Error {
                    code,
                    message: message.as_str().map(str::to_string),
                    details,
                })
            }
            _ => Err(CodecError::NotAReply),
        }
    }
}

/// Named channel dispatching calls to one runtime.
pub struct AlarmChannel {
    name: String,
    runtime: Arc<AlarmRuntime>,
}

impl AlarmChannel {
    pub fn new(name: impl Into<String>, runtime: Arc<AlarmRuntime>) -> Self {
        Self {
            name: name.into(),
            runtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decodes one message, dispatches it and encodes the reply.
    pub fn handle_message(&self, bytes: &[u8]) -> Vec<u8> {
        let reply = match MethodCall::decode(bytes) {
            Ok(call) => self.handle_call(&call),
            Err(err) => {
                warn!(channel = %self.name, error = %err, "undecodable method call");
                MethodReply::error("bad_envelope", err.to_string())
            }
        };
        reply.encode()
    }

    pub fn handle_call(&self, call: &MethodCall) -> MethodReply {
        debug!(channel = %self.name, method = %call.method, "method call");
        panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(call))).unwrap_or_else(|_| {
            error!(channel = %self.name, method = %call.method, "method handler panicked");
            MethodReply::error("internal_error", format!("{} failed", call.method))
        })
    }

    fn dispatch(&self, call: &MethodCall) -> MethodReply {
        match call.method.as_str() {
            SET_ALARM => self.set_alarm(&call.args),
            STOP_NATIVE_ALARM => {
                let identifier = call.args.get("alarmId").and_then(Value::as_str);
                self.runtime.stop_native_alarm(identifier);
                MethodReply::Success(Value::Null)
            }
            CANCEL_ALARM => match call.args.get("alarmId").and_then(Value::as_str) {
                Some(identifier) => match self.runtime.cancel_alarm(identifier) {
                    Ok(_) => MethodReply::Success(Value::Null),
                    Err(err) => schedule_error_reply(err),
                },
                None => MethodReply::error(
                    "invalid_arguments",
                    "missing required argument 'alarmId'",
                ),
            },
            other => {
                debug!(channel = %self.name, method = %other, "method not implemented");
                MethodReply::NotImplemented
            }
        }
    }

    fn set_alarm(&self, args: &Value) -> MethodReply {
        let request = match AlarmRequest::from_arguments(args) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "rejected setAlarm arguments");
                return MethodReply::error("invalid_arguments", err.to_string());
            }
        };
        match self.runtime.set_alarm(&request) {
            Ok(_) => MethodReply::Success(Value::Null),
            Err(err) => schedule_error_reply(err),
        }
    }
}

fn schedule_error_reply(err: ScheduleError) -> MethodReply {
    let code = match &err {
        ScheduleError::InvalidRequest(_) => "invalid_arguments",
        ScheduleError::ExactAlarmDenied(_) => "exact_alarm_denied",
        ScheduleError::Scheduler(_) => "scheduler_error",
    };
    MethodReply::error(code, err.to_string())
}
