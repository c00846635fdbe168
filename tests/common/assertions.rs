//! Polling helpers and custom assertions

use faceswap_tasks::{TransferCache, TransferEntry, TransferStatus};
use std::time::Duration;

/// Wait until a transfer reaches `want`, or panic after `timeout`
pub async fn wait_for_transfer(
    cache: &TransferCache,
    task_id: &str,
    want: TransferStatus,
    timeout: Duration,
) -> TransferEntry {
    let result = tokio::time::timeout(timeout, async {
        loop {
            if let Some(entry) = cache.status(task_id) {
                if entry.status == want {
                    return entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    match result {
        Ok(entry) => entry,
        Err(_) => panic!(
            "transfer {} did not reach {} within {:?} (last: {:?})",
            task_id,
            want,
            timeout,
            cache.status(task_id)
        ),
    }
}

/// Assert a mirrored URL points into local storage with the expected extension
pub fn assert_mirrored_url(url: &str, ext: &str) {
    assert!(
        url.starts_with("/uploads/results/"),
        "mirrored URL should live under /uploads/results/, got {}",
        url
    );
    assert!(url.ends_with(ext), "mirrored URL should end with {}, got {}", ext, url);
}
