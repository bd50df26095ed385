use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{CallOptions, RPCErrors, Result, UbusReply, UbusTransport};

type ParamsMatcher = Box<dyn Fn(&Value) -> bool + Send + Sync>;

struct MockRule {
    object: String,
    method: String,
    matcher: Option<ParamsMatcher>,
    // the last queued outcome is sticky, earlier ones are consumed in order
    outcomes: VecDeque<Result<UbusReply>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub session: String,
    pub object: String,
    pub method: String,
    pub params: Value,
    pub timeout: Option<std::time::Duration>,
}

/// In-process stand-in for rpcd. Unmatched calls fail with `Protocol("Method not found")`.
#[derive(Default)]
pub struct MockUbus {
    rules: Mutex<Vec<MockRule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockUbus {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(&self, object: &str, method: &str, matcher: Option<ParamsMatcher>, outcomes: Vec<Result<UbusReply>>) {
        if let Ok(mut rules) = self.rules.lock() {
            // newest rule wins, so tests can override earlier setup
            rules.insert(
                0,
                MockRule {
                    object: object.to_string(),
                    method: method.to_string(),
                    matcher,
                    outcomes: outcomes.into_iter().collect(),
                },
            );
        }
    }

    pub fn on(&self, object: &str, method: &str, payload: Value) -> &Self {
        self.push_rule(object, method, None, vec![Ok(UbusReply::ok(payload))]);
        self
    }

    pub fn on_status(&self, object: &str, method: &str, status: i64) -> &Self {
        self.push_rule(object, method, None, vec![Ok(UbusReply::new(status, Value::Null))]);
        self
    }

    pub fn on_params<F>(&self, object: &str, method: &str, matcher: F, payload: Value) -> &Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.push_rule(object, method, Some(Box::new(matcher)), vec![Ok(UbusReply::ok(payload))]);
        self
    }

    pub fn on_sequence(&self, object: &str, method: &str, payloads: Vec<Value>) -> &Self {
        let outcomes = payloads.into_iter().map(|p| Ok(UbusReply::ok(p))).collect();
        self.push_rule(object, method, None, outcomes);
        self
    }

    pub fn on_params_sequence<F>(&self, object: &str, method: &str, matcher: F, payloads: Vec<Value>) -> &Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let outcomes = payloads.into_iter().map(|p| Ok(UbusReply::ok(p))).collect();
        self.push_rule(object, method, Some(Box::new(matcher)), outcomes);
        self
    }

    pub fn fail(&self, object: &str, method: &str, err: RPCErrors) -> &Self {
        self.push_rule(object, method, None, vec![Err(err)]);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, object: &str, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.object == object && c.method == method)
            .collect()
    }

    pub fn call_count(&self, object: &str, method: &str) -> usize {
        self.calls_to(object, method).len()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

#[async_trait]
impl UbusTransport for MockUbus {
    async fn call(
        &self,
        session: &str,
        object: &str,
        method: &str,
        params: Value,
        options: &CallOptions,
    ) -> Result<UbusReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                session: session.to_string(),
                object: object.to_string(),
                method: method.to_string(),
                params: params.clone(),
                timeout: options.timeout,
            });
        }

        let mut rules = self
            .rules
            .lock()
            .map_err(|_| RPCErrors::ReasonError("mock poisoned".to_string()))?;
        let rule = rules.iter_mut().find(|r| {
            r.object == object
                && r.method == method
                && r.matcher.as_ref().map(|m| m(&params)).unwrap_or(true)
        });

        match rule {
            Some(rule) => {
                if rule.outcomes.len() > 1 {
                    rule.outcomes
                        .pop_front()
                        .unwrap_or_else(|| Err(RPCErrors::Protocol("exhausted".to_string())))
                } else {
                    rule.outcomes
                        .front()
                        .cloned()
                        .unwrap_or_else(|| Err(RPCErrors::Protocol("exhausted".to_string())))
                }
            }
            None => Err(RPCErrors::Protocol("Method not found".to_string())),
        }
    }
}
