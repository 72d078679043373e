pub mod binance;
pub mod cache;
pub mod http_client;
pub mod mock;
pub mod persistence;
pub mod telegram;
