//! Wagate Server
//!
//! Protective messaging gateway in front of the Evolution API (WhatsApp).
//! Paces and disguises automated sends, and trips a persisted kill switch
//! the moment the provider reports a ban or unexpected disconnect.

pub mod api;
pub mod config;
pub mod db;
pub mod gateway;
