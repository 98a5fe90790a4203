pub mod eth_data_types;
pub mod seed_data_types;
pub mod uzh_data_types;

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

/// Like `#[serde(default)]`, but also for an explicit `null`.
/// Pair with `default` so a missing key is covered too.
pub fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Institution {
    Eth,
    Uzh,
}

impl Institution {
    pub const ALL: [Institution; 2] = [Institution::Eth, Institution::Uzh];

    /// Stable code, used as cache key component.
    pub fn code(self) -> &'static str {
        match self {
            Institution::Eth => "ETH",
            Institution::Uzh => "UZH",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.code() == code)
    }
}

impl fmt::Display for Institution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Requested time window of menu data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Today,
    Tomorrow,
    ThisWeek,
    NextWeek,
}

impl Destination {
    pub const ALL: [Destination; 4] = [
        Destination::Today,
        Destination::Tomorrow,
        Destination::ThisWeek,
        Destination::NextWeek,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Destination::Today => "today",
            Destination::Tomorrow => "tomorrow",
            Destination::ThisWeek => "this_week",
            Destination::NextWeek => "next_week",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.code() == code)
    }

    /// Monday of the week the destination is indexed against.
    /// Today and Tomorrow both resolve against the current week.
    pub fn week_start(self, today: NaiveDate) -> NaiveDate {
        let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
        match self {
            Destination::NextWeek => monday + Duration::days(7),
            _ => monday,
        }
    }

    /// All calendar dates covered by the destination.
    pub fn target_dates(self, today: NaiveDate) -> Vec<NaiveDate> {
        match self {
            Destination::Today => vec![today],
            Destination::Tomorrow => vec![today + Duration::days(1)],
            Destination::ThisWeek | Destination::NextWeek => {
                let start = self.week_start(today);
                (0..7).map(|offset| start + Duration::days(offset)).collect()
            }
        }
    }
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "heute" => Ok(Destination::Today),
            "morgen" => Ok(Destination::Tomorrow),
            other => Destination::from_code(other)
                .ok_or_else(|| format!("unknown destination '{s}' (today|tomorrow|this_week|next_week)")),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Language {
    German,
    English,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::German, Language::English];

    pub fn code(self) -> &'static str {
        match self {
            Language::German => "de",
            Language::English => "en",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.code() == code)
    }

    /// The other language, used when there is no data for the requested one.
    pub fn fallback(self) -> Self {
        match self {
            Language::German => Language::English,
            Language::English => Language::German,
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_code(&s.to_lowercase()).ok_or_else(|| format!("unknown language '{s}' (de|en)"))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Menu {
    pub title: String,
    pub description: String,
    pub price: Vec<String>,
    pub allergens: Option<String>,
    pub is_vegetarian: bool,
    pub is_vegan: bool,
    pub image_url: Option<String>,
    pub weekday: Weekday,
    /// position among the same-day entries of one mensa
    pub index: u32,
}

/// A menu as it sits in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuRecord {
    pub mensa_id: Uuid,
    pub language: Language,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub menu: Menu,
}

impl MenuRecord {
    pub fn new(mensa_id: Uuid, language: Language, date: NaiveDate, mut menu: Menu) -> Self {
        menu.weekday = date.weekday();
        Self {
            mensa_id,
            language,
            date,
            created_at: Utc::now(),
            menu,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mensa {
    pub id: Uuid,
    pub title: String,
    pub meal_time: String,
    pub url: String,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: String,
    pub title: String,
    pub mensas: Vec<Mensa>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FetchRecord {
    pub institution: Institution,
    pub destination: Destination,
    pub language: Language,
    pub fetched_at: DateTime<Utc>,
}

impl FetchRecord {
    pub fn is_fresh(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.fetched_at) < threshold
    }
}

/// Deterministic mensa id, stable across restarts and refetches.
pub fn mensa_uuid(upstream_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, upstream_id.as_bytes())
}
