pub mod config;
pub mod db;
pub mod execution;
pub mod memory;
pub mod queue;
pub mod subscription;
