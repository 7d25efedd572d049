// src/models/mod.rs

pub mod account;
pub mod category;
pub mod checkout;
pub mod exercise;
pub mod group;
pub mod product;
