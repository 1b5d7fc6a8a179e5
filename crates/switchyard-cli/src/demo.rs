//! Agents the `switchyard` binary registers at startup.
//!
//! A small quoting pipeline: `crm` resolves the account, `pricing` prices the
//! order after asking `rates` for an exchange rate over the bus, and `mailer`
//! sends the result out.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{BusMessage, SwitchyardError};
use switchyard_orchestrator::{FnAgent, MessageBus, RuntimeBuilder};
use uuid::Uuid;

const UNIT_PRICE: f64 = 100.0;

fn rate_for(currency: &str) -> Option<f64> {
    match currency {
        "EUR" => Some(1.0),
        "USD" => Some(1.08),
        "GBP" => Some(0.86),
        _ => None,
    }
}

fn crm(payload: Value) -> Value {
    let entity = &payload["entity"];
    json!({
        "account": {
            "id": entity["id"].as_str().unwrap_or("anonymous"),
            "kind": entity["kind"].as_str().unwrap_or("account"),
            "status": "active",
        }
    })
}

fn rates(payload: Value) -> Result<Value, SwitchyardError> {
    let currency = payload["currency"].as_str().unwrap_or("EUR");
    let rate = rate_for(currency).ok_or_else(|| SwitchyardError::Handler {
        agent: "rates".into(),
        message: format!("no rate for currency '{currency}'"),
    })?;
    Ok(json!({ "currency": currency, "rate": rate }))
}

async fn pricing(bus: Arc<MessageBus>, timeout: Duration, payload: Value) -> Result<Value, SwitchyardError> {
    let quantity = payload["quantity"].as_u64().unwrap_or(1);
    let currency = payload["currency"].as_str().unwrap_or("EUR").to_string();

    let reply = bus
        .query(
            BusMessage::new("pricing", "rates", "rate?", json!({ "currency": currency })),
            timeout,
        )
        .await?;
    if let Some(error) = reply.payload["error"].as_str() {
        return Err(SwitchyardError::Handler {
            agent: "pricing".into(),
            message: format!("rate lookup failed: {error}"),
        });
    }
    let rate = reply.payload["rate"].as_f64().unwrap_or(1.0);

    let total = (quantity as f64 * UNIT_PRICE * rate * 100.0).round() / 100.0;
    Ok(json!({ "quantity": quantity, "currency": currency, "total": total }))
}

fn mailer(payload: Value) -> Result<Value, SwitchyardError> {
    let to = payload["to"].as_str().ok_or_else(|| SwitchyardError::Handler {
        agent: "mailer".into(),
        message: "no recipient in payload".into(),
    })?;
    Ok(json!({ "sent": true, "to": to, "message_id": Uuid::new_v4() }))
}

/// Register the demo agents. `pricing` queries `rates` with `query_timeout`.
pub fn register(builder: RuntimeBuilder, query_timeout: Duration) -> RuntimeBuilder {
    let bus = builder.bus();
    builder
        .register(Arc::new(FnAgent::new("crm", "CRM lookup", |p| async move {
            Ok(crm(p))
        })))
        .register(Arc::new(FnAgent::new("rates", "Exchange rates", |p| async move {
            rates(p)
        })))
        .register(Arc::new(FnAgent::new("pricing", "Pricing", move |p| {
            pricing(bus.clone(), query_timeout, p)
        })))
        .register(Arc::new(FnAgent::new("mailer", "Mailer", |p| async move {
            mailer(p)
        })))
}
