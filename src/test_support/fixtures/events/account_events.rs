// Shared test fixtures for account events.
// Compiled into the crate only during tests (cfg(test) in src/lib.rs).

use crate::core::commit::EventMessage;
use serde_json::json;

/// Canonical "account created" event used across session and store tests.
pub fn make_account_created_event(id: u32, amount: f64) -> EventMessage {
    EventMessage::new(json!({
        "type": "AccountCreated",
        "id": id,
        "amount": amount,
    }))
}

pub fn make_funds_transferred_event(amount: f64) -> EventMessage {
    EventMessage::new(json!({
        "type": "FundsTransferred",
        "amount": amount,
    }))
}
