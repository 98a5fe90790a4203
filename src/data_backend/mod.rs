use std::{
    collections::HashMap,
    path::Path,
    sync::{OnceLock, PoisonError, RwLock},
};

use chrono::{NaiveDate, Utc};
use futures_util::future::BoxFuture;
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{
    config::HttpConfig,
    data_types::{
        seed_data_types::SeedLocation, Destination, FetchRecord, Institution, Language, Location,
        Mensa, Menu,
    },
    db_operations::MenuStore,
    errors::{FetchError, StoreError},
};

pub mod eth_parser;
pub mod uzh_parser;

/// One upstream menu source.
pub trait MenuProvider: Send + Sync {
    fn institution(&self) -> Institution;

    /// Reads the seed asset and registers its mensas for later lookups by
    /// upstream id. An unreadable or malformed seed yields no locations.
    fn load_outlets(&self) -> BoxFuture<'_, Vec<Location>>;

    /// Fetches, parses and stores the menus for the window. Never fails:
    /// errors are logged and the cache is left as it was.
    fn fetch_menus(&self, destination: Destination, language: Language) -> BoxFuture<'_, ()>;

    /// Placeholder phrases ("closed", "no menu today", ...) for `language`.
    fn no_menu_phrases(&self, language: Language) -> &'static [&'static str];

    fn is_no_menu_notice(&self, menu: &Menu, language: Language) -> bool {
        is_noise(menu, self.no_menu_phrases(language))
    }
}

/// What every provider needs: the store, an http client and the table of
/// registered mensas keyed by upstream id.
pub struct ProviderContext {
    store: MenuStore,
    client: reqwest::Client,
    mensas: RwLock<HashMap<String, Mensa>>,
}

impl ProviderContext {
    pub fn new(store: MenuStore, http: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(http.connect_timeout)
            .timeout(http.request_timeout)
            .build()?;

        Ok(Self {
            store,
            client,
            mensas: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &MenuStore {
        &self.store
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn register_mensa(&self, upstream_id: String, mensa: Mensa) {
        self.mensas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(upstream_id, mensa);
    }

    pub fn mensa_id(&self, upstream_id: &str) -> Option<Uuid> {
        self.mensas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(upstream_id)
            .map(|mensa| mensa.id)
    }

    /// Marks all `destinations` as freshly fetched. Only call after a fully successful fetch.
    pub async fn record_fetch(
        &self,
        institution: Institution,
        destinations: &[Destination],
        language: Language,
    ) -> Result<(), StoreError> {
        let fetched_at = Utc::now();
        for &destination in destinations {
            self.store
                .insert_fetch_record(FetchRecord {
                    institution,
                    destination,
                    language,
                    fetched_at,
                })
                .await?;
        }

        Ok(())
    }
}

/// Checks the status and deserializes the body. Body is read as text first
/// so that shape errors surface as json errors, not transport errors.
pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

pub async fn read_seed_locations<M: DeserializeOwned>(path: &Path) -> Vec<SeedLocation<M>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Seed {} unreadable: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_str(&text) {
        Ok(locations) => locations,
        Err(e) => {
            log::warn!("Seed {} malformed: {}", path.display(), e);
            Vec::new()
        }
    }
}

pub fn info_url(base: &str, slug: Option<&str>) -> String {
    match slug {
        Some(slug) if !slug.is_empty() => format!("{base}/{slug}"),
        _ => base.to_string(),
    }
}

/// Upstream dates are ISO dates, sometimes with a time part.
pub fn parse_upstream_date(raw: &str) -> Result<NaiveDate, FetchError> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| FetchError::InvalidDate(raw.to_string()))
}

fn line_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").expect("static regex"))
}

/// Turns upstream text into trimmed lines with single spaces, dropping empty lines.
pub fn normalize_text(raw: &str) -> String {
    let text = line_break_re().replace_all(raw, "\n");
    // workaround for html entities leaking through both apis
    let text = text
        .replace("&amp;", "&")
        .replace("&nbsp;", " ")
        .replace('\u{a0}', " ");

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 2 decimals, ascending, without duplicates.
pub fn format_prices(values: impl IntoIterator<Item = f64>) -> Vec<String> {
    let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);

    let mut prices: Vec<String> = values.iter().map(|v| format!("{v:.2}")).collect();
    prices.dedup();
    prices
}

pub fn join_allergens<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let names: Vec<&str> = names
        .into_iter()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

pub fn is_noise(menu: &Menu, phrases: &[&str]) -> bool {
    if menu.description.trim().is_empty() {
        return true;
    }

    let title = menu.title.to_lowercase();
    let description = menu.description.to_lowercase();
    phrases.iter().any(|phrase| {
        let phrase = phrase.to_lowercase();
        title.contains(&phrase) || description.contains(&phrase)
    })
}

/// Hands out positions among the same-day entries of one mensa.
#[derive(Default)]
pub struct DayIndex(HashMap<(Uuid, NaiveDate), u32>);

impl DayIndex {
    pub fn next(&mut self, mensa_id: Uuid, date: NaiveDate) -> u32 {
        let slot = self.0.entry((mensa_id, date)).or_insert(0);
        let index = *slot;
        *slot += 1;
        index
    }
}
