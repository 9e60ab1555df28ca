//! A small iCalendar (RFC 5545) reader for VEVENTs.
//!
//! Only what feed import needs is understood: UID, SUMMARY, DTSTART, DTEND,
//! RRULE, EXDATE and RECURRENCE-ID. Date and floating values, and values with
//! a TZID other than UTC, are read as wall time in the caller's timezone.
//!
//! RRULE support covers FREQ (DAILY through YEARLY), INTERVAL, COUNT, UNTIL,
//! and plain weekday BYDAY lists for weekly rules (with WKST) and for
//! single-day daily rules. A rule with any other BY* part, or with ordinal
//! BYDAY entries such as `1MO`, is not expanded and the event imports once
//! under its bare UID.
//!
//! Each occurrence of a recurring event carries its own identity,
//! `UID/<instance start as YYYYMMDDTHHMMSSZ>`, and only the first
//! [`MAX_UPCOMING_INSTANCES`] occurrences inside the window are returned.
//! The window starts today, so later occurrences come in on later syncs
//! as they move up; an endless daily series never floods a project with
//! years of todos at once.

use std::collections::{HashMap, HashSet};

use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Utc, Weekday,
};

use crate::error::{Result, TodoSyncError};
use crate::recurrence::RecurrenceUnit;

/// Upper bound on the periods scanned for one recurring event.
const MAX_EXPANSION_STEPS: u32 = 50_000;

/// Occurrences of one recurring event returned per parse.
pub const MAX_UPCOMING_INSTANCES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    /// Stable identity of this occurrence; the UID, with the instance start
    /// appended for occurrences of a recurring event.
    pub uid: String,
    pub summary: String,
    /// Start as written in the feed, with the offset it was expressed in.
    pub start: DateTime<FixedOffset>,
    pub end: Option<DateTime<FixedOffset>>,
    /// DTSTART carried `VALUE=DATE`.
    pub all_day: bool,
}

/// The span of time events are imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// From the start of `now`'s day in its own timezone through December 31,
    /// 23:59:59 UTC two years later.
    pub fn starting_today<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let midnight = now.date_naive().and_time(NaiveTime::MIN);
        let start = now
            .timezone()
            .from_local_datetime(&midnight)
            .earliest()
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(|| now.with_timezone(&Utc));
        let end = NaiveDate::from_ymd_opt(now.year() + 2, 12, 31)
            .and_then(|date| date.and_hms_opt(23, 59, 59))
            .map(|value| value.and_utc())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end }
    }

    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end >= self.start
    }
}

/// Parse `body` and return the events that fall inside `window`, in feed order.
pub fn parse_calendar<Tz: TimeZone>(
    body: &[u8],
    window: &Window,
    tz: &Tz,
) -> Result<Vec<CalendarEvent>> {
    let text = String::from_utf8_lossy(body);
    let lines = unfold_lines(&text);
    if !lines
        .iter()
        .any(|line| line.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(TodoSyncError::Parse(
            "body is not an iCalendar document".to_string(),
        ));
    }

    let raw_events = collect_events(&lines);
    let overridden: HashSet<(String, DateTime<Utc>)> = raw_events
        .iter()
        .filter_map(|raw| {
            let uid = raw.uid.clone()?;
            let instant = parse_date_value(raw.recurrence_id.as_ref()?, tz)?.0;
            Some((uid, instant.with_timezone(&Utc)))
        })
        .collect();

    let mut events = Vec::new();
    for raw in &raw_events {
        let Some(uid) = raw.uid.as_deref().filter(|uid| !uid.trim().is_empty()) else {
            tracing::debug!(summary = ?raw.summary, "skipping VEVENT without UID");
            continue;
        };
        let Some((start, all_day)) = raw.dtstart.as_ref().and_then(|p| parse_date_value(p, tz))
        else {
            tracing::debug!(uid, "skipping VEVENT without a readable DTSTART");
            continue;
        };
        let end = raw
            .dtend
            .as_ref()
            .and_then(|p| parse_date_value(p, tz))
            .map(|(end, _)| end);
        let summary = raw.summary.clone().unwrap_or_default();

        if let Some(recurrence_id) = raw.recurrence_id.as_ref() {
            let Some((instance, _)) = parse_date_value(recurrence_id, tz) else {
                continue;
            };
            let event = CalendarEvent {
                uid: instance_uid(uid, instance.with_timezone(&Utc)),
                summary,
                start,
                end,
                all_day,
            };
            if in_window(&event, window) {
                events.push(event);
            }
            continue;
        }

        let rule = raw.rrule.as_deref().and_then(RecurrenceRule::parse);
        match rule {
            None => {
                let event = CalendarEvent {
                    uid: uid.to_string(),
                    summary,
                    start,
                    end,
                    all_day,
                };
                if in_window(&event, window) {
                    events.push(event);
                }
            }
            Some(rule) => {
                let excluded: HashSet<DateTime<Utc>> = raw
                    .exdates
                    .iter()
                    .flat_map(|prop| split_multi_value(prop))
                    .filter_map(|prop| parse_date_value(&prop, tz))
                    .map(|(value, _)| value.with_timezone(&Utc))
                    .collect();
                let length = end.map(|end| end - start);
                let mut upcoming = 0;
                for instance in rule.expand(start, window) {
                    if upcoming >= MAX_UPCOMING_INSTANCES {
                        break;
                    }
                    let key = instance.with_timezone(&Utc);
                    if excluded.contains(&key) || overridden.contains(&(uid.to_string(), key)) {
                        continue;
                    }
                    let event = CalendarEvent {
                        uid: instance_uid(uid, key),
                        summary: summary.clone(),
                        start: instance,
                        end: length.map(|length| instance + length),
                        all_day,
                    };
                    if in_window(&event, window) {
                        events.push(event);
                        upcoming += 1;
                    }
                }
            }
        }
    }
    Ok(events)
}

fn instance_uid(uid: &str, start: DateTime<Utc>) -> String {
    format!("{uid}/{}", start.format("%Y%m%dT%H%M%SZ"))
}

fn in_window(event: &CalendarEvent, window: &Window) -> bool {
    let start = event.start.with_timezone(&Utc);
    let end = match event.end {
        Some(end) => end.with_timezone(&Utc),
        None if event.all_day => start + Duration::days(1),
        None => start,
    };
    window.overlaps(start, end.max(start))
}

#[derive(Debug, Clone, PartialEq)]
struct ContentLine {
    name: String,
    params: HashMap<String, String>,
    value: String,
}

impl ContentLine {
    fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct RawEvent {
    uid: Option<String>,
    summary: Option<String>,
    dtstart: Option<ContentLine>,
    dtend: Option<ContentLine>,
    rrule: Option<String>,
    exdates: Vec<ContentLine>,
    recurrence_id: Option<ContentLine>,
}

/// Join folded continuation lines (those starting with a space or tab).
fn unfold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        if !line.trim().is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

fn collect_events(lines: &[String]) -> Vec<RawEvent> {
    let mut events = Vec::new();
    let mut current: Option<RawEvent> = None;
    // Depth of components nested inside the current VEVENT (VALARM and friends).
    let mut nested = 0usize;

    for line in lines {
        let Some(prop) = parse_content_line(line) else {
            continue;
        };
        let name = prop.name.clone();
        match name.as_str() {
            "BEGIN" if prop.value.eq_ignore_ascii_case("VEVENT") && current.is_none() => {
                current = Some(RawEvent::default());
                nested = 0;
            }
            "BEGIN" if current.is_some() => nested += 1,
            "END" if current.is_some() && nested > 0 => nested -= 1,
            "END" if prop.value.eq_ignore_ascii_case("VEVENT") => {
                if let Some(event) = current.take() {
                    events.push(event);
                }
            }
            _ => {
                let Some(event) = current.as_mut().filter(|_| nested == 0) else {
                    continue;
                };
                match name.as_str() {
                    "UID" => event.uid = Some(prop.value.trim().to_string()),
                    "SUMMARY" => event.summary = Some(unescape_text(&prop.value)),
                    "DTSTART" => event.dtstart = Some(prop),
                    "DTEND" => event.dtend = Some(prop),
                    "RRULE" => event.rrule = Some(prop.value),
                    "EXDATE" => event.exdates.push(prop),
                    "RECURRENCE-ID" => event.recurrence_id = Some(prop),
                    _ => {}
                }
            }
        }
    }
    events
}

fn parse_content_line(line: &str) -> Option<ContentLine> {
    let mut in_quotes = false;
    let mut colon = None;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut parts = split_unquoted(head, ';').into_iter();
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((
                key.trim().to_ascii_uppercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();
    Some(ContentLine {
        name,
        params,
        value: value.to_string(),
    })
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&input[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

fn split_multi_value(prop: &ContentLine) -> Vec<ContentLine> {
    prop.value
        .split(',')
        .map(|value| ContentLine {
            name: prop.name.clone(),
            params: prop.params.clone(),
            value: value.trim().to_string(),
        })
        .collect()
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn is_utc_tzid(tzid: &str) -> bool {
    matches!(
        tzid.trim().to_ascii_uppercase().as_str(),
        "UTC" | "Z" | "GMT" | "ETC/UTC" | "ETC/GMT" | "ETC/ZULU"
    )
}

/// Read a DATE or DATE-TIME value. The flag is true for `VALUE=DATE`.
fn parse_date_value<Tz: TimeZone>(
    prop: &ContentLine,
    tz: &Tz,
) -> Option<(DateTime<FixedOffset>, bool)> {
    let value = prop.value.trim();
    let is_date = prop
        .param("VALUE")
        .is_some_and(|kind| kind.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));
    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some((resolve_wall_time(date.and_time(NaiveTime::MIN), tz), true));
    }

    if let Some(utc) = value.strip_suffix(['Z', 'z']) {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some((naive.and_utc().fixed_offset(), false));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    match prop.param("TZID") {
        Some(tzid) if is_utc_tzid(tzid) => Some((naive.and_utc().fixed_offset(), false)),
        _ => Some((resolve_wall_time(naive, tz), false)),
    }
}

fn resolve_wall_time<Tz: TimeZone>(naive: NaiveDateTime, tz: &Tz) -> DateTime<FixedOffset> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|value| value.fixed_offset())
        .unwrap_or_else(|| naive.and_utc().fixed_offset())
}

#[derive(Debug, Clone, PartialEq)]
struct RecurrenceRule {
    unit: RecurrenceUnit,
    interval: u32,
    count: Option<u32>,
    until: Option<DateTime<Utc>>,
    /// Weekdays of a weekly rule; empty means the weekday of DTSTART.
    by_day: Vec<Weekday>,
    week_start: Weekday,
}

impl RecurrenceRule {
    /// `None` for frequencies finer than a day, a missing FREQ, or BY* parts
    /// this reader cannot expand; such events import as a single occurrence.
    fn parse(value: &str) -> Option<Self> {
        let mut unit = None;
        let mut interval = 1;
        let mut count = None;
        let mut until = None;
        let mut by_day = Vec::new();
        let mut week_start = Weekday::Mon;
        for part in value.split(';') {
            let Some((key, val)) = part.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    unit = match val.trim().to_ascii_uppercase().as_str() {
                        "DAILY" => Some(RecurrenceUnit::Day),
                        "WEEKLY" => Some(RecurrenceUnit::Week),
                        "MONTHLY" => Some(RecurrenceUnit::Month),
                        "YEARLY" => Some(RecurrenceUnit::Year),
                        _ => None,
                    }
                }
                "INTERVAL" => interval = val.trim().parse().unwrap_or(1).max(1),
                "COUNT" => count = val.trim().parse().ok(),
                "UNTIL" => until = parse_until(val.trim()),
                "BYDAY" => {
                    by_day = val
                        .split(',')
                        .map(parse_weekday)
                        .collect::<Option<Vec<_>>>()?;
                }
                "WKST" => week_start = parse_weekday(val).unwrap_or(Weekday::Mon),
                other if other.starts_with("BY") => return None,
                _ => {}
            }
        }

        let mut unit = unit?;
        if !by_day.is_empty() {
            match unit {
                RecurrenceUnit::Week => {}
                // Every listed weekday of every week.
                RecurrenceUnit::Day if interval == 1 => unit = RecurrenceUnit::Week,
                _ => return None,
            }
        }
        Some(Self {
            unit,
            interval,
            count,
            until,
            by_day,
            week_start,
        })
    }

    /// Occurrence starts from `start` up to the end of `window`. Every
    /// occurrence is computed from `start` so month clamping never drifts.
    /// COUNT includes DTSTART, which is always the first occurrence.
    fn expand(&self, start: DateTime<FixedOffset>, window: &Window) -> Vec<DateTime<FixedOffset>> {
        let mut out = Vec::new();
        for instance in self.occurrences(start) {
            if self.count.is_some_and(|count| out.len() >= count as usize) {
                break;
            }
            let instant = instance.with_timezone(&Utc);
            if instant >= window.end || self.until.is_some_and(|until| instant > until) {
                break;
            }
            out.push(instance);
        }
        out
    }

    fn occurrences(
        &self,
        start: DateTime<FixedOffset>,
    ) -> Box<dyn Iterator<Item = DateTime<FixedOffset>>> {
        let unit = self.unit;
        let interval = self.interval;
        if self.by_day.is_empty() {
            return Box::new((0..MAX_EXPANSION_STEPS).map_while(move |step| {
                step.checked_mul(interval)
                    .and_then(|offset| unit.advance(start, offset))
            }));
        }

        let lead = days_into_week(start.weekday(), self.week_start);
        let mut offsets: Vec<i64> = self
            .by_day
            .iter()
            .map(|day| days_into_week(*day, self.week_start))
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        let leading = (!offsets.contains(&lead)).then_some(start);
        let period = 7 * i64::from(interval);
        let weekly = (0..i64::from(MAX_EXPANSION_STEPS)).flat_map(move |week| {
            offsets.clone().into_iter().filter_map(move |offset| {
                let delta = u64::try_from(week * period + offset - lead).ok()?;
                start.checked_add_days(Days::new(delta))
            })
        });
        Box::new(leading.into_iter().chain(weekly))
    }
}

/// Days from `week_start` forward to `day`, 0 through 6.
fn days_into_week(day: Weekday, week_start: Weekday) -> i64 {
    i64::from((day.num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7)
}

fn parse_weekday(code: &str) -> Option<Weekday> {
    match code.trim().to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_until(value: &str) -> Option<DateTime<Utc>> {
    if let Some(utc) = value.strip_suffix(['Z', 'z']) {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|naive| naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}
