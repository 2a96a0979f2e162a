//! End-to-end scenarios: scheduler, purchaser and state store wired
//! together over an in-memory exchange.

mod fake_exchange;
mod modes;
mod weekly_cycle;
