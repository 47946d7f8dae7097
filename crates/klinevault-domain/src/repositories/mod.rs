pub mod kline_source;
pub mod kline_store;
