/// Creates every table this crate's stores read and write, if absent.
/// Called once by the owning binary (`mrq-cli`) before first use — there is
/// no separate migration runner; schema evolution is additive
/// `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS` statements,
/// the same bootstrap idiom the corpus uses in its store test fixtures.
pub async fn init_schema(pool: &sqlx::AnyPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS candles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            open_time TEXT NOT NULL,
            close_time TEXT NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            quote_volume REAL NOT NULL,
            trade_count INTEGER NOT NULL,
            taker_buy_base REAL NOT NULL,
            taker_buy_quote REAL NOT NULL,
            UNIQUE(symbol, open_time)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_candles_symbol_time ON candles(symbol, open_time)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ratings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            rating REAL NOT NULL,
            rating_deviation REAL NOT NULL,
            volatility REAL NOT NULL,
            performance_score REAL NOT NULL,
            UNIQUE(symbol, timestamp)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ratings_symbol_time ON ratings(symbol, timestamp)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS backtest_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            base TEXT NOT NULL,
            quote TEXT NOT NULL,
            z_score_threshold REAL NOT NULL,
            ma_period INTEGER NOT NULL,
            profit_pct REAL NOT NULL,
            stop_loss_pct REAL NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            window_size_months INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            open_time TEXT NOT NULL,
            close_time TEXT NOT NULL,
            entry_price REAL NOT NULL,
            exit_price REAL NOT NULL,
            quantity REAL NOT NULL,
            exit_reason TEXT NOT NULL,
            pnl REAL NOT NULL,
            pnl_pct REAL NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_run_id ON trades(run_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS aggregate_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            symbol TEXT NOT NULL,
            base TEXT NOT NULL,
            quote TEXT NOT NULL,
            z_score_threshold REAL NOT NULL,
            ma_period INTEGER NOT NULL,
            profit_pct REAL NOT NULL,
            stop_loss_pct REAL NOT NULL,
            average_return_per_window REAL NOT NULL,
            std_return_per_window REAL NOT NULL,
            positive_window_ratio REAL NOT NULL,
            metrics_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(fingerprint, symbol, base, quote)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agg_metrics_fingerprint ON aggregate_metrics(fingerprint)")
        .execute(pool)
        .await?;

    Ok(())
}
