pub mod binance;
pub mod scripted;

pub use binance::BinanceClient;
pub use scripted::ScriptedPriceSource;
