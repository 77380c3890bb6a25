pub mod candle_store;
pub mod metrics_store;
pub mod rating_store;
pub mod run_store;
pub mod schema;
pub mod trade_store;

pub use candle_store::SqlCandleStore;
pub use metrics_store::SqlMetricsStore;
pub use rating_store::SqlRatingStore;
pub use run_store::SqlRunStore;
pub use schema::init_schema;
pub use trade_store::SqlTradeStore;
