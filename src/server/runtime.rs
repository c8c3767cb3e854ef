//! Process runtime with a bounded teardown

use std::future::Future;
use std::time::Duration;
use tracing::info;

/// Upper bound on runtime teardown once the service future has returned
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive `future` to completion on a fresh multi-threaded runtime
///
/// Dropping a runtime waits for every blocking task, however long it runs.
/// This waits at most `shutdown_timeout` and leaves stragglers behind, so
/// the process can exit once the service is done.
pub fn block_on_bounded<F: Future>(
    future: F,
    shutdown_timeout: Duration,
) -> Result<F::Output, std::io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let output = runtime.block_on(future);

    info!(timeout = ?shutdown_timeout, "Shutting down runtime");
    runtime.shutdown_timeout(shutdown_timeout);
    Ok(output)
}
