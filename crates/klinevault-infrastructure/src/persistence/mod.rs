pub mod postgres_klines;
