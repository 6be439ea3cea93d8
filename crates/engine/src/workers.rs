//! Per-phase worker pools
//!
//! Each action phase runs a bounded queue drained by a fixed set of worker
//! threads. Results come back to the calling thread, which performs every
//! index commit; workers only ever talk to the transfer driver, so nothing
//! waiting on the driver holds the index writer.

use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared across phases
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `work` over `items` with `workers` threads and a queue bounded at
/// `depth`; the feeder blocks when workers saturate. `on_done` runs on the
/// calling thread for every finished item, in completion order.
///
/// Cancellation discards queued items; in-flight work finishes and is still
/// committed.
pub fn phase_map<T, R, E>(
    items: Vec<T>,
    workers: usize,
    depth: usize,
    cancel: &CancelFlag,
    work: impl Fn(T) -> Result<R, E> + Sync,
    mut on_done: impl FnMut(Result<R, E>),
) where
    T: Send,
    R: Send,
    E: Send,
{
    let workers = workers.max(1);
    let depth = depth.max(1);
    let (tx_item, rx_item) = bounded::<T>(depth);
    let (tx_res, rx_res) = bounded::<Result<R, E>>(depth);
    let work = &work;

    std::thread::scope(|s| {
        for _ in 0..workers {
            let rx = rx_item.clone();
            let tx = tx_res.clone();
            s.spawn(move || {
                for item in rx.iter() {
                    if tx.send(work(item)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(rx_item);
        drop(tx_res);

        let feeder_cancel = cancel.clone();
        s.spawn(move || {
            for item in items {
                if feeder_cancel.is_cancelled() {
                    tracing::info!("cancel requested; discarding queued actions");
                    break;
                }
                if tx_item.send(item).is_err() {
                    break;
                }
            }
            drop(tx_item);
        });

        for res in rx_res.iter() {
            on_done(res);
        }
    });
}
