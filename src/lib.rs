pub mod app;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod models;
pub mod rpc;
pub mod services;
pub mod stores;
pub mod transport;
pub mod utils;
