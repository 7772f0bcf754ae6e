//! Condition evaluation
//!
//! Clauses are checked in order (visible, not visible, script) and the first
//! false clause short-circuits. Script clauses arrive already interpolated.

use super::error::OrchestraResult;
use super::filters::build_filter;
use super::lookup::find_element_with_timeout;
use super::timeout::InteractionClock;
use crate::driver::traits::{DeviceInfo, Driver};
use crate::parser::types::{Condition, ElementSelector};
use crate::utils::config::OrchestraConfig;
use tokio::time::{Duration, Instant};

/// Truthiness of an evaluated script value
///
/// Blank, `false` (any case), `undefined`, `null` and numeric zero are false.
pub fn is_script_truthy(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("false")
        || trimmed == "undefined"
        || trimmed == "null"
    {
        return false;
    }
    !matches!(trimmed.parse::<f64>(), Ok(n) if n == 0.0)
}

/// Borrowed view of the interpreter state a condition needs
pub struct ConditionEvaluator<'a> {
    pub driver: &'a dyn Driver,
    pub device_info: &'a DeviceInfo,
    pub clock: &'a InteractionClock,
    pub config: &'a OrchestraConfig,
}

impl ConditionEvaluator<'_> {
    pub async fn evaluate(&self, condition: &Condition, timeout_ms: Option<u64>) -> OrchestraResult<bool> {
        let nominal = timeout_ms.unwrap_or(self.config.optional_lookup_timeout_ms);

        if let Some(selector) = &condition.visible {
            if !self.is_visible(selector, self.clock.adjusted(nominal)).await? {
                return Ok(false);
            }
        }

        if let Some(selector) = &condition.not_visible {
            if !self.becomes_invisible(selector, self.clock.adjusted(nominal)).await? {
                return Ok(false);
            }
        }

        if let Some(script) = &condition.script_condition {
            if !is_script_truthy(script) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn is_visible(
        &self,
        selector: &ElementSelector,
        timeout_ms: u64,
    ) -> OrchestraResult<bool> {
        let filter = build_filter(selector, self.device_info);
        let found = find_element_with_timeout(
            self.driver,
            &filter,
            timeout_ms,
            self.config.poll_interval_ms,
        )
        .await?;
        Ok(found.is_some())
    }

    /// Inverted wait: true as soon as one short lookup misses, false if the
    /// element stays found for the whole window
    async fn becomes_invisible(
        &self,
        selector: &ElementSelector,
        timeout_ms: u64,
    ) -> OrchestraResult<bool> {
        let filter = build_filter(selector, self.device_info);
        let end = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            let found = find_element_with_timeout(
                self.driver,
                &filter,
                self.config.not_visible_poll_ms,
                self.config.poll_interval_ms,
            )
            .await?;

            if found.is_none() {
                return Ok(true);
            }
            if Instant::now() >= end {
                log::debug!("{} still visible after {} ms", filter.description, timeout_ms);
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{screen, text_element, FakeDriver};
    use crate::driver::hierarchy::Bounds;

    #[test]
    fn test_script_truthiness() {
        for falsy in ["", "  ", "false", "FALSE", "undefined", "null", "0", "0.0", "-0"] {
            assert!(!is_script_truthy(falsy), "{:?} should be false", falsy);
        }
        for truthy in ["true", "1", "yes", "0.5", "[]", "{}", "NaN"] {
            assert!(is_script_truthy(truthy), "{:?} should be true", truthy);
        }
    }

    async fn setup() -> (FakeDriver, DeviceInfo) {
        let driver = FakeDriver::new();
        driver.open().await.unwrap();
        let info = driver.device_info().await.unwrap();
        (driver, info)
    }

    fn spinner() -> crate::driver::hierarchy::TreeNode {
        screen(vec![text_element("Loading", Bounds::new(0, 0, 100, 40))])
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_visible_false_when_element_stays() {
        let (driver, info) = setup().await;
        driver.set_hierarchy(spinner());
        let clock = InteractionClock::new();
        let config = OrchestraConfig::default();
        let evaluator = ConditionEvaluator {
            driver: &driver,
            device_info: &info,
            clock: &clock,
            config: &config,
        };

        let condition = Condition {
            not_visible: Some(ElementSelector::text("Loading")),
            ..Default::default()
        };
        let start = Instant::now();
        assert!(!evaluator.evaluate(&condition, Some(2000)).await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_visible_true_once_element_disappears() {
        let (driver, info) = setup().await;
        driver.queue_hierarchies(vec![spinner(), spinner(), spinner(), screen(vec![])]);
        let clock = InteractionClock::new();
        let config = OrchestraConfig::default();
        let evaluator = ConditionEvaluator {
            driver: &driver,
            device_info: &info,
            clock: &clock,
            config: &config,
        };

        let condition = Condition {
            not_visible: Some(ElementSelector::text("Loading")),
            ..Default::default()
        };
        assert!(evaluator.evaluate(&condition, Some(5000)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_uses_adjusted_timeout() {
        let (driver, info) = setup().await;
        driver.set_hierarchy(screen(vec![]));
        let clock = InteractionClock::new();
        let config = OrchestraConfig::default();

        tokio::time::sleep(Duration::from_millis(3000)).await;

        let evaluator = ConditionEvaluator {
            driver: &driver,
            device_info: &info,
            clock: &clock,
            config: &config,
        };
        let condition = Condition {
            visible: Some(ElementSelector::text("Missing")),
            ..Default::default()
        };

        let start = Instant::now();
        assert!(!evaluator.evaluate(&condition, Some(5000)).await.unwrap());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(2000));
        assert!(waited < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_clauses_must_hold() {
        let (driver, info) = setup().await;
        driver.set_hierarchy(spinner());
        let clock = InteractionClock::new();
        let config = OrchestraConfig::default();
        let evaluator = ConditionEvaluator {
            driver: &driver,
            device_info: &info,
            clock: &clock,
            config: &config,
        };

        let visible_and_true = Condition {
            visible: Some(ElementSelector::text("Loading")),
            script_condition: Some("true".into()),
            ..Default::default()
        };
        assert!(evaluator.evaluate(&visible_and_true, None).await.unwrap());

        let visible_and_false = Condition {
            script_condition: Some("false".into()),
            ..visible_and_true
        };
        assert!(!evaluator.evaluate(&visible_and_false, None).await.unwrap());

        assert!(evaluator.evaluate(&Condition::default(), None).await.unwrap());
    }
}
