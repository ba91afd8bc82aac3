use async_trait::async_trait;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    /// Once a day at the given local wall-clock time.
    DailyAt(NaiveTime),
}

impl Schedule {
    pub fn delay_from(&self, now: NaiveDateTime) -> Duration {
        match self {
            Schedule::Every(interval) => *interval,
            Schedule::DailyAt(at) => {
                let today = now.date().and_time(*at);
                let next = if today > now {
                    today
                } else {
                    today + TimeDelta::days(1)
                };
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;
    fn schedule(&self) -> Schedule;
    fn run_on_start(&self) -> bool {
        false
    }
    async fn run(&self) -> Result<()>;
}
