use std::sync::{Mutex, PoisonError};
use std::thread;

use log::{debug, error};

use crate::error::{Result, ScrapeError};

/// Runs `work` over `items` on at most `workers` OS threads.
///
/// Each thread builds its own state with `init` (an HTTP client, a scanner) and keeps it
/// for every item it pulls, so nothing worker-local crosses threads. Items are handed out
/// from one shared queue; completion order is unspecified.
///
/// A worker whose `init` fails processes nothing; the remaining workers drain the queue
/// and the first init error is returned once all threads have finished.
pub fn run_pool<T, W, I, F>(items: Vec<T>, workers: usize, init: I, work: F) -> Result<()>
where
    T: Send,
    I: Fn(usize) -> Result<W> + Sync,
    F: Fn(&W, T) + Sync,
{
    if items.is_empty() {
        return Ok(());
    }
    let threads = workers.max(1).min(items.len());
    let queue = Mutex::new(items.into_iter());
    let first_error: Mutex<Option<ScrapeError>> = Mutex::new(None);

    let (queue, first_error, init, work) = (&queue, &first_error, &init, &work);
    thread::scope(|scope| {
        for id in 0..threads {
            scope.spawn(move || {
                let state = match init(id) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Worker {} failed to start: {}", id, e);
                        first_error
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get_or_insert(e);
                        return;
                    }
                };
                debug!("Worker {} started", id);

                loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                    match next {
                        Some(item) => work(&state, item),
                        None => break,
                    }
                }
                debug!("Worker {} finished", id);
            });
        }
    });

    let first = first_error.lock().unwrap_or_else(PoisonError::into_inner).take();
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
