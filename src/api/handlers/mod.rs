//! API handlers for Ostello.
//!
//! This module organizes the service's route handlers: credential and
//! session lifecycle under `auth`, plus the health and root endpoints.

pub mod auth;
pub mod health;
pub mod root;
