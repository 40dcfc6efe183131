//! Domain layer: the payment entity, its state machine, the ledger, and the
//! ports through which the core talks to storage, cache and processors.

pub mod ledger;
pub mod money;
pub mod payment;
pub mod ports;
