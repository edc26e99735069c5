use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::debug;

/// Maps `f` over `items` on a dedicated pool of at most `limit` threads and
/// returns the results in input order.
pub fn map_bounded<T, R, F>(items: &[T], limit: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let workers = limit.min(items.len());
    if workers <= 1 {
        return items.iter().map(&f).collect();
    }

    match ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        Err(err) => {
            debug!("thread pool unavailable ({err}); running sequentially");
            items.iter().map(&f).collect()
        }
    }
}
