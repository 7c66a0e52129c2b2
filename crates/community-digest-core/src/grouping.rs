//! Grouping engine: buckets raw chat records by day, channel, and thread.
//!
//! Grouping is pure in-memory work. The window it applies is what keeps a
//! partially elapsed day out of the summaries: only records strictly before
//! the start of the current calendar day (in the process's local offset)
//! are kept, so a day is summarized once and only after it has ended.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

use crate::models::RawRecord;

/// The `[from, today)` day window records must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupingWindow {
    /// First day included.
    pub from: NaiveDate,
    /// First day excluded: the current, possibly incomplete, day.
    pub today: NaiveDate,
    /// Offset used to map timestamps onto calendar days.
    pub offset: FixedOffset,
}

impl GroupingWindow {
    /// Window ending at the current local day.
    pub fn ending_today(from: NaiveDate) -> Self {
        let now = Local::now();
        Self {
            from,
            today: now.date_naive(),
            offset: now.offset().fix(),
        }
    }

    /// Window on UTC day boundaries, mostly for tests and replays.
    pub fn utc(from: NaiveDate, today: NaiveDate) -> Self {
        Self {
            from,
            today,
            offset: Utc.fix(),
        }
    }

    /// First instant of `from` in the window's offset.
    pub fn start(&self) -> DateTime<Utc> {
        let midnight = self.from.and_time(NaiveTime::MIN);
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc())
    }

    /// Whether the window covers no complete day.
    pub fn is_empty(&self) -> bool {
        self.from >= self.today
    }

    pub fn day_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.offset).date_naive()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        let day = self.day_of(timestamp);
        day >= self.from && day < self.today
    }
}

/// Threads of one channel. `None` holds records posted directly in the
/// channel, kept apart from any real thread id.
type Threads = BTreeMap<Option<String>, Vec<RawRecord>>;
type Channels = BTreeMap<String, Threads>;

/// Nested date → channel → thread → records mapping.
///
/// Built fresh per run and never persisted. Leaves are ordered by
/// timestamp; ties keep fetcher order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedRecords {
    days: BTreeMap<NaiveDate, Channels>,
}

impl GroupedRecords {
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    /// Channels active on `date`, each with its threads.
    pub fn channels_on(&self, date: NaiveDate) -> impl Iterator<Item = (&str, &Threads)> + '_ {
        self.days
            .get(&date)
            .into_iter()
            .flat_map(|channels| channels.iter().map(|(c, t)| (c.as_str(), t)))
    }

    pub fn thread(
        &self,
        date: NaiveDate,
        channel: &str,
        thread: Option<&str>,
    ) -> Option<&[RawRecord]> {
        self.days
            .get(&date)?
            .get(channel)?
            .get(&thread.map(str::to_string))
            .map(Vec::as_slice)
    }

    pub fn record_count(&self) -> usize {
        self.days
            .values()
            .flat_map(|c| c.values())
            .flat_map(|t| t.values())
            .map(Vec::len)
            .sum()
    }

    pub fn thread_count(&self) -> usize {
        self.days
            .values()
            .flat_map(|c| c.values())
            .map(BTreeMap::len)
            .sum()
    }
}

/// Bucket `records` into days, channels, and threads.
///
/// Drops records outside `window`, in channels not in `selected_channels`,
/// of non-conversational kinds, and repeated ids (first copy wins).
pub fn group_records<I>(
    records: I,
    window: &GroupingWindow,
    selected_channels: &BTreeSet<String>,
) -> GroupedRecords
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut seen = HashSet::new();
    let mut days: BTreeMap<NaiveDate, Channels> = BTreeMap::new();

    for record in records {
        if !record.kind.is_conversational()
            || !selected_channels.contains(&record.channel)
            || !window.contains(record.timestamp)
            || !seen.insert(record.id.clone())
        {
            continue;
        }
        let day = window.day_of(record.timestamp);
        let thread = record.thread.clone();
        days.entry(day)
            .or_default()
            .entry(record.channel.clone())
            .or_default()
            .entry(thread)
            .or_default()
            .push(record);
    }

    for leaf in days
        .values_mut()
        .flat_map(|c| c.values_mut())
        .flat_map(|t| t.values_mut())
    {
        leaf.sort_by_key(|r| r.timestamp);
    }

    GroupedRecords { days }
}
