// src/services/mod.rs

pub mod attempts;
pub mod checkout;
pub mod dictionary;
pub mod entitlement;
pub mod grader;
