//! Element lookup against live hierarchy snapshots

use super::error::{OrchestraError, OrchestraResult};
use super::filters::FilterWithDescription;
use crate::driver::common::{poll_until, PollConfig};
use crate::driver::hierarchy::UiElement;
use crate::driver::traits::Driver;

/// Poll fresh hierarchies until `filter` matches or `timeout_ms` elapses
pub async fn find_element_with_timeout(
    driver: &dyn Driver,
    filter: &FilterWithDescription,
    timeout_ms: u64,
    interval_ms: u64,
) -> OrchestraResult<Option<UiElement>> {
    let found = poll_until(PollConfig::new(timeout_ms, interval_ms), || async {
        let root = driver.view_hierarchy().await?;
        Ok::<_, anyhow::Error>(filter.find_in(&root))
    })
    .await?;
    Ok(found)
}

/// Like [`find_element_with_timeout`], but a miss is an `ElementNotFound`
/// carrying the hierarchy seen at that moment
pub async fn find_element(
    driver: &dyn Driver,
    filter: &FilterWithDescription,
    timeout_ms: u64,
    interval_ms: u64,
) -> OrchestraResult<UiElement> {
    match find_element_with_timeout(driver, filter, timeout_ms, interval_ms).await? {
        Some(element) => Ok(element),
        None => {
            let hierarchy = driver.view_hierarchy().await?;
            Err(OrchestraError::ElementNotFound {
                message: format!("Element not found: {}", filter.description),
                hierarchy: Box::new(hierarchy),
            })
        }
    }
}
