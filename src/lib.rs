pub mod access;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod files;
pub mod models;
pub mod progress;
pub mod routes;
pub mod store;
pub mod structure;
