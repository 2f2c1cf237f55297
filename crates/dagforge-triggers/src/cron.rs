// Schedule triggers: a cron string list per trigger, evaluated on every
// tick of the background loop.

use chrono::{DateTime, Utc};
use croner::Cron;
use dagforge_core::error::{DagforgeError, Result};

/// Parse a cron expression, rejecting malformed strings at trigger-rule
/// validation time rather than at tick time.
pub fn parse(expression: &str) -> Result<Cron> {
    Cron::new(expression)
        .parse()
        .map_err(|e| DagforgeError::validation(format!("invalid cron expression '{expression}': {e}")))
}

/// Is this schedule trigger ready to run? A trigger is ready if any of its
/// cron strings has a next occurrence at or before `now` that falls after
/// the trigger's `last_run`; evaluation stops at the first such string.
pub fn is_ready_to_run(cron_expressions: &[String], last_checked: DateTime<Utc>, last_run: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
    for expression in cron_expressions {
        let cron = parse(expression)?;
        let next_run = cron
            .find_next_occurrence(&last_checked, false)
            .map_err(|e| DagforgeError::validation(format!("cron evaluation failed for '{expression}': {e}")))?;
        if next_run <= now && last_run < next_run {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn every_minute_is_ready_after_a_minute_elapses() {
        let now = Utc::now();
        let last_checked = now - Duration::minutes(2);
        let last_run = now - Duration::days(1);
        let ready = is_ready_to_run(&["* * * * *".to_string()], last_checked, last_run, now).unwrap();
        assert!(ready);
    }

    #[test]
    fn already_run_since_next_occurrence_is_not_ready_again() {
        let now = Utc::now();
        let last_checked = now - Duration::minutes(2);
        // last_run is after the computed next_run, so it's already handled.
        let last_run = now + Duration::minutes(10);
        let ready = is_ready_to_run(&["* * * * *".to_string()], last_checked, last_run, now).unwrap();
        assert!(!ready);
    }

    #[test]
    fn invalid_expression_is_a_validation_error() {
        assert!(parse("not a cron string").is_err());
    }
}
