//! Livesite - ephemeral sites inside a shared hosted web engine for live tests
//!
//! This library carves out a dedicated site for each test application:
//! - Starts or reuses a single hosted web engine per process
//! - Loads, mutates and persists the engine's XML site and pool configuration
//! - Allocates free TCP ports for new site bindings
//! - Maps application descriptors to the virtual/physical paths the engine serves
//! - Serializes provisioning so parallel test runs never corrupt the shared file

pub mod application;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod host_config;
pub mod lock;
pub mod manager;
pub mod port;
pub mod site;
