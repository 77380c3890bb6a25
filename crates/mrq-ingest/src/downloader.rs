use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, Semaphore};

use mrq_core::config::{IngestConfig, RateLimitConfig};
use mrq_core::error::Error;
use mrq_core::traits::{CandleStore, KlineSource};
use mrq_core::types::{Candle, ProgressState};

use crate::chunker::{split_into_chunks, DateChunk};
use crate::client::{kline_close_time, kline_open_time};
use crate::progress::IngestProgressFile;
use crate::rate_limiter::RateLimiter;

/// One ingest invocation: the symbols and date range to fetch, plus whether
/// to resume from persisted progress.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resume: bool,
}

/// One chunk that exhausted its retries without succeeding.
#[derive(Debug, Clone)]
pub struct FailedChunk {
    pub symbol: String,
    pub chunk: DateChunk,
    pub reason: String,
}

/// Summary of one `run_ingest` invocation.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub total_inserted: u64,
    pub failed_chunks: Vec<FailedChunk>,
}

/// Spawns the single writer task that drains the streaming-save queue:
/// a bounded `mpsc` channel of capacity `2 * flush_batch`
/// carries individual candles from every chunk downloader; the writer
/// batches them up to `flush_batch` before calling `store.insert_many`,
/// so back-pressure on the channel is what actually throttles producers
/// when persistence is the bottleneck, not an ad-hoc per-page write.
fn spawn_writer(
    store: Arc<dyn CandleStore>,
    flush_batch: usize,
    capacity: usize,
) -> (mpsc::Sender<Candle>, tokio::task::JoinHandle<u64>) {
    let (tx, mut rx) = mpsc::channel::<Candle>(capacity);
    let total_inserted = Arc::new(AtomicU64::new(0));

    let handle = tokio::spawn(async move {
        let mut buf: Vec<Candle> = Vec::with_capacity(flush_batch);
        while let Some(candle) = rx.recv().await {
            buf.push(candle);
            if buf.len() >= flush_batch {
                flush(&store, &mut buf, &total_inserted).await;
            }
        }
        flush(&store, &mut buf, &total_inserted).await;
        total_inserted.load(Ordering::SeqCst)
    });

    (tx, handle)
}

async fn flush(store: &Arc<dyn CandleStore>, buf: &mut Vec<Candle>, total: &Arc<AtomicU64>) {
    if buf.is_empty() {
        return;
    }
    match store.insert_many(buf, true).await {
        Ok(n) => {
            total.fetch_add(n, Ordering::SeqCst);
        }
        Err(e) => {
            tracing::error!(error = %e, batch_len = buf.len(), "streaming-save writer: flush failed");
        }
    }
    buf.clear();
}

/// Drives the ingest pipeline: per-symbol concurrency bounded by
/// `max_concurrent_symbols`, per-symbol chunk concurrency bounded by
/// `max_concurrent_chunks`, paging within a chunk, a bounded streaming-save
/// queue draining into `store` in batches of `flush_batch`, and progress
/// persistence after every completed chunk.
pub async fn run_ingest(
    source: Arc<dyn KlineSource>,
    store: Arc<dyn CandleStore>,
    progress_file: Arc<IngestProgressFile>,
    ingest_cfg: IngestConfig,
    rate_cfg: RateLimitConfig,
    spec: DownloadSpec,
) -> DownloadReport {
    let symbol_gate = Arc::new(Semaphore::new(ingest_cfg.max_concurrent_symbols));
    let progress = Arc::new(Mutex::new(if spec.resume { progress_file.load() } else { Default::default() }));

    let flush_batch = ingest_cfg.flush_batch.max(1);
    let (candle_tx, writer_handle) = spawn_writer(store, flush_batch, 2 * flush_batch);

    let failed = Arc::new(Mutex::new(Vec::<FailedChunk>::new()));

    let mut symbol_tasks = Vec::with_capacity(spec.symbols.len());
    for symbol in spec.symbols.clone() {
        let source = Arc::clone(&source);
        let progress_file = Arc::clone(&progress_file);
        let progress = Arc::clone(&progress);
        let failed = Arc::clone(&failed);
        let symbol_gate = Arc::clone(&symbol_gate);
        let candle_tx = candle_tx.clone();
        let ingest_cfg = ingest_cfg;
        let rate_cfg = rate_cfg;
        let requested_start = spec.start;
        let end = spec.end;
        let resume = spec.resume;

        symbol_tasks.push(tokio::spawn(async move {
            let _permit = symbol_gate.acquire_owned().await.unwrap();

            let start = if resume {
                progress_file.resume_start(&symbol, requested_start)
            } else {
                requested_start
            };

            let chunks = split_into_chunks(start, end, ingest_cfg.chunk_days);
            let total_chunks = chunks.len() as u64;
            let limiter = Arc::new(RateLimiter::new(&rate_cfg));
            let chunk_gate = Arc::new(Semaphore::new(ingest_cfg.max_concurrent_chunks));

            {
                let mut state = progress.lock().await;
                state
                    .entry(symbol.clone())
                    .or_insert_with(|| ProgressState::new(symbol.clone(), total_chunks, Utc::now()));
            }

            let mut chunk_tasks = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let source = Arc::clone(&source);
                let limiter = Arc::clone(&limiter);
                let chunk_gate = Arc::clone(&chunk_gate);
                let symbol = symbol.clone();
                let candle_tx = candle_tx.clone();
                let ingest_cfg = ingest_cfg;
                let rate_cfg = rate_cfg;

                chunk_tasks.push((chunk, tokio::spawn(async move {
                    let _permit = chunk_gate.acquire_owned().await.unwrap();
                    download_chunk(&source, &limiter, &symbol, chunk, &ingest_cfg, &rate_cfg, &candle_tx).await
                })));
            }

            for (chunk, task) in chunk_tasks {
                let outcome = task.await.unwrap_or_else(|e| Err(Error::PersistenceError(e.to_string())));
                let mut state = progress.lock().await;
                let entry = state.entry(symbol.clone()).or_insert_with(|| ProgressState::new(symbol.clone(), total_chunks, Utc::now()));
                match outcome {
                    Ok(records) => {
                        entry.completed_chunks += 1;
                        entry.cumulative_records += records;
                        entry.last_completed_time = Some(chunk.end);
                    }
                    Err(e) => {
                        failed.lock().await.push(FailedChunk {
                            symbol: symbol.clone(),
                            chunk,
                            reason: e.to_string(),
                        });
                    }
                }
                let _ = progress_file.save(&state);
            }
        }));
    }

    for task in symbol_tasks {
        let _ = task.await;
    }

    // Every chunk downloader held a clone of `candle_tx`; dropping this
    // last one closes the channel once those have all gone out of scope,
    // letting the writer drain its final partial batch and return.
    drop(candle_tx);
    let total_inserted = writer_handle.await.unwrap_or(0);

    DownloadReport {
        total_inserted,
        failed_chunks: Arc::try_unwrap(failed).map(|m| m.into_inner()).unwrap_or_default(),
    }
}

/// Pages through one chunk, advancing the cursor to the last received
/// close-time + 1, feeding each received candle into the streaming-save
/// queue as soon as it is received. Retries the whole chunk (from its
/// current cursor) up to `rate_cfg.max_retries` times with exponential
/// backoff on transient errors. The returned count is the number of
/// candles fetched (queued for persistence), not the number the writer
/// ultimately inserts after dedup — that total is reported separately
/// once the writer drains.
async fn download_chunk(
    source: &Arc<dyn KlineSource>,
    limiter: &Arc<RateLimiter>,
    symbol: &str,
    chunk: DateChunk,
    ingest_cfg: &IngestConfig,
    rate_cfg: &RateLimitConfig,
    candle_tx: &mpsc::Sender<Candle>,
) -> Result<u64, Error> {
    let mut cursor = chunk.start;
    let mut records = 0u64;
    let mut attempt = 0u32;

    'paging: while cursor < chunk.end {
        limiter.acquire().await;

        let page = match source.fetch(symbol, cursor, chunk.end, ingest_cfg.batch_size).await {
            Ok(page) => {
                limiter.on_success().await;
                page
            }
            Err(Error::RateLimited { retry_after_ms }) => {
                limiter.on_rate_limited(retry_after_ms.map(Duration::from_millis)).await;
                continue 'paging;
            }
            Err(Error::TransientNetwork(reason)) => {
                attempt += 1;
                if attempt > rate_cfg.max_retries {
                    return Err(Error::TransientNetwork(reason));
                }
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt.min(10)));
                tokio::time::sleep(backoff).await;
                continue 'paging;
            }
            Err(other) => return Err(other),
        };

        if page.is_empty() {
            break;
        }

        let mut last_close = None;
        let page_len = page.len();
        for raw in &page {
            let candle = Candle {
                symbol: symbol.to_string(),
                open_time: kline_open_time(raw),
                close_time: kline_close_time(raw),
                open: raw.open,
                high: raw.high,
                low: raw.low,
                close: raw.close,
                volume: raw.volume,
                quote_volume: raw.quote_volume,
                trade_count: raw.trade_count,
                taker_buy_base: raw.taker_buy_base,
                taker_buy_quote: raw.taker_buy_quote,
            };
            last_close = Some(candle.close_time);
            // Back-pressure: this await blocks once the bounded queue is
            // full, naturally throttling the fetch side when the
            // persistence writer is the bottleneck.
            if candle_tx.send(candle).await.is_err() {
                // Writer gone (shutdown mid-run); stop paging this chunk.
                break 'paging;
            }
            records += 1;
        }
        attempt = 0;

        cursor = last_close.map(|t| t + chrono::Duration::milliseconds(1)).unwrap_or(chunk.end);
        if (page_len as u32) < ingest_cfg.batch_size {
            break;
        }
    }

    Ok(records)
}
