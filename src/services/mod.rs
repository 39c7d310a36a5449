pub mod access;
pub mod config;
pub mod containers;
pub mod context;
pub mod guard;
pub mod logger;
pub mod registry;
pub mod resolver;
pub mod tool_executor;
pub mod validation;
