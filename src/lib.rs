//! USSD onboarding: registration and PIN management over a USSD gateway.

pub mod config;
pub mod error;
pub mod phone;
pub mod provisioning;
pub mod store;
pub mod ussd;
