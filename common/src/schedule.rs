// Cron expression parsing and next-fire calculation

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Parse and validate a cron expression (Quartz syntax, second precision)
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Whether the expression is syntactically valid
pub fn is_valid_cron_expression(expression: &str) -> bool {
    parse_cron_expression(expression).is_ok()
}

/// Next fire time strictly after `after`, evaluated in `timezone` and
/// returned in UTC
pub fn next_fire_time(
    schedule: &CronSchedule,
    after: DateTime<Utc>,
    timezone: Tz,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&timezone))
        .next()
        .map(|next| next.with_timezone(&Utc))
}
