// src/handlers/mod.rs

pub mod admin;
pub mod catalog;
pub mod exercise;
pub mod subscription;
