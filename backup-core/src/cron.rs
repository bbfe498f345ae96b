//! 标准 5 字段 cron 表达式（分 时 日 月 周）的解析与下一次触发时间计算。
//!
//! 支持 `*`、单值、范围 `A-B`、步长 `*/S` / `A-B/S` / `N/S`、逗号列表，
//! 月份与星期可使用英文缩写（`jan`、`mon` 等）。星期字段 0 和 7 都表示周日。
//! 日和星期同时受限时，任一匹配即可（与 Vixie cron 一致）。

use crate::constants::schedule::{CRON_FIELDS_COUNT, NEXT_RUN_SEARCH_DAYS};
use crate::error::{BackupError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// 解析后的 cron 表达式，每个字段用位图表示允许的取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    day_of_month_any: bool,
    day_of_week_any: bool,
}

impl CronSchedule {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() != CRON_FIELDS_COUNT {
            return Err(BackupError::invalid_schedule(format!(
                "cron 表达式必须包含 {CRON_FIELDS_COUNT} 个字段: '{trimmed}'"
            )));
        }

        let minutes = parse_field(parts[0], 0, 59, &[], 0)?;
        let hours = parse_field(parts[1], 0, 23, &[], 0)?;
        let days_of_month = parse_field(parts[2], 1, 31, &[], 0)?;
        let months = parse_field(parts[3], 1, 12, &MONTH_NAMES, 1)?;
        let mut days_of_week = parse_field(parts[4], 0, 7, &WEEKDAY_NAMES, 0)?;
        // 7 与 0 同为周日
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            day_of_month_any: parts[2].starts_with('*'),
            day_of_week_any: parts[4].starts_with('*'),
        })
    }

    /// 计算严格晚于 `now` 的下一次触发时间（UTC）
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = now
            .naive_utc()
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);
        let limit = start + Duration::days(NEXT_RUN_SEARCH_DAYS);

        let mut candidate = start;
        while candidate <= limit {
            if !contains(self.months, candidate.month()) {
                candidate = first_minute_of_next_month(candidate)?;
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = start_of_day(candidate.date().succ_opt()?)?;
                continue;
            }
            if !contains(self.hours, candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !contains(self.minutes, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate.and_utc());
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = contains(self.days_of_month, date.day());
        let dow = contains(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.day_of_month_any || self.day_of_week_any {
            dom && dow
        } else {
            dom || dow
        }
    }
}

fn contains(bits: u64, value: u32) -> bool {
    bits & (1u64 << value) != 0
}

fn start_of_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

fn first_minute_of_next_month(current: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if current.month() == 12 {
        (current.year() + 1, 1)
    } else {
        (current.year(), current.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).and_then(start_of_day)
}

fn parse_field(raw: &str, min: u32, max: u32, names: &[&str], name_offset: u32) -> Result<u64> {
    let invalid = |detail: &str| {
        BackupError::invalid_schedule(format!("无效的 cron 字段 '{raw}': {detail}"))
    };

    let mut bits = 0u64;
    for part in raw.split(',') {
        if part.is_empty() {
            return Err(invalid("空的列表项"));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("步长必须是数字"))?;
                if step == 0 {
                    return Err(invalid("步长不能为 0"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let value = |text: &str| -> Result<u32> {
            let parsed = text.parse::<u32>().ok().or_else(|| {
                names
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(text))
                    .map(|index| index as u32 + name_offset)
            });
            match parsed {
                Some(v) if (min..=max).contains(&v) => Ok(v),
                Some(_) => Err(invalid(&format!("取值超出范围 ({min}-{max})"))),
                None => Err(invalid(&format!("无法识别 '{text}'"))),
            }
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (a, b) = (value(a)?, value(b)?);
            if a > b {
                return Err(invalid("范围起点大于终点"));
            }
            (a, b)
        } else {
            let v = value(range)?;
            // "N/S" 表示从 N 开始直到最大值
            if step.is_some() { (v, max) } else { (v, v) }
        };

        let step = step.unwrap_or(1) as usize;
        for v in (start..=end).step_by(step) {
            bits |= 1u64 << v;
        }
    }
    Ok(bits)
}
