use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer};

/// One weekly availability window.
///
/// `days` lists the weekdays the window opens on (empty means every day).
/// When `start` is later than `end` the window wraps past midnight into the
/// following day. A missing `start` means midnight, a missing `end` means the
/// end of the day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduleWindow {
    #[serde(default)]
    pub days: Vec<Weekday>,
    #[serde(default, deserialize_with = "hhmm")]
    pub start: Option<NaiveTime>,
    #[serde(default, deserialize_with = "hhmm")]
    pub end: Option<NaiveTime>,
}

impl ScheduleWindow {
    fn opens_on(&self, day: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&day)
    }

    /// A window that starts where it ends never opens
    pub fn is_empty(&self) -> bool {
        self.end == Some(self.start.unwrap_or(NaiveTime::MIN))
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        let day = at.weekday();
        let time = at.time();
        let start = self.start.unwrap_or(NaiveTime::MIN);

        match self.end {
            Some(end) if end < start => {
                // wraps: [start, 24:00) on the opening day, [00:00, end) on the next
                (self.opens_on(day) && time >= start) || (self.opens_on(day.pred()) && time < end)
            }
            Some(end) => self.opens_on(day) && time >= start && time < end,
            None => self.opens_on(day) && time >= start,
        }
    }
}

/// Set of weekly windows; an empty schedule never excludes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule {
    windows: Vec<ScheduleWindow>,
}

impl WeeklySchedule {
    pub fn new(windows: Vec<ScheduleWindow>) -> Self {
        Self { windows }
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn has_empty_window(&self) -> bool {
        self.windows.iter().any(ScheduleWindow::is_empty)
    }

    pub fn is_open(&self, at: NaiveDateTime) -> bool {
        self.windows.is_empty() || self.windows.iter().any(|w| w.contains(at))
    }
}

pub(crate) fn hhmm<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{}': {}", s, e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn time(h: u32, m: u32) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(h, m, 0)
    }

    #[test]
    fn test_empty_schedule_is_always_open() {
        let schedule = WeeklySchedule::default();
        assert!(schedule.is_open(at(2025, 1, 6, 3, 0)));
    }

    #[test]
    fn test_weekday_window() {
        // 2025-01-06 is a Monday
        let schedule = WeeklySchedule::new(vec![ScheduleWindow {
            days: vec![Weekday::Mon, Weekday::Tue],
            start: time(9, 0),
            end: time(18, 0),
        }]);

        assert!(schedule.is_open(at(2025, 1, 6, 9, 0)));
        assert!(schedule.is_open(at(2025, 1, 7, 17, 59)));
        assert!(!schedule.is_open(at(2025, 1, 6, 18, 0)));
        assert!(!schedule.is_open(at(2025, 1, 8, 12, 0)));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let schedule = WeeklySchedule::new(vec![ScheduleWindow {
            days: vec![Weekday::Fri],
            start: time(22, 0),
            end: time(2, 0),
        }]);

        // Friday 23:00 and Saturday 01:30 are inside, Saturday 22:30 is not
        assert!(schedule.is_open(at(2025, 1, 10, 23, 0)));
        assert!(schedule.is_open(at(2025, 1, 11, 1, 30)));
        assert!(!schedule.is_open(at(2025, 1, 11, 22, 30)));
        assert!(!schedule.is_open(at(2025, 1, 10, 1, 30)));
    }

    #[test]
    fn test_whole_day_window() {
        let schedule = WeeklySchedule::new(vec![ScheduleWindow {
            days: vec![Weekday::Sun],
            start: None,
            end: None,
        }]);
        assert!(schedule.is_open(at(2025, 1, 12, 0, 0)));
        assert!(schedule.is_open(at(2025, 1, 12, 23, 59)));
        assert!(!schedule.is_open(at(2025, 1, 13, 0, 0)));
    }

    #[test]
    fn test_parse_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            schedule: WeeklySchedule,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            schedule = [
              { days = ["mon", "Tuesday"], start = "08:30", end = "12:00" },
            ]
            "#,
        )
        .unwrap();

        assert!(parsed.schedule.is_open(at(2025, 1, 7, 8, 30)));
        assert!(!parsed.schedule.is_open(at(2025, 1, 7, 12, 0)));
    }

    #[test]
    fn test_start_equal_to_end_is_empty() {
        let window = ScheduleWindow {
            days: vec![],
            start: time(9, 0),
            end: time(9, 0),
        };
        assert!(window.is_empty());
        assert!(!window.contains(at(2025, 1, 6, 9, 0)));

        let midnight = ScheduleWindow {
            days: vec![],
            start: None,
            end: time(0, 0),
        };
        assert!(midnight.is_empty());
        assert!(WeeklySchedule::new(vec![midnight]).has_empty_window());
        assert!(!ScheduleWindow::default().is_empty());
    }

    #[test]
    fn test_rejects_bad_time() {
        let parsed: std::result::Result<ScheduleWindow, _> =
            toml::from_str(r#"start = "25:99""#);
        assert!(parsed.is_err());
    }
}
