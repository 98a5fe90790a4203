use std::time::Instant;

use chrono::{Datelike, Duration, Local, NaiveDate};
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::config::EthConfig;
use crate::constants::ETH_INFO_URL;
use crate::data_backend::{
    format_prices, info_url, join_allergens, normalize_text, parse_upstream_date, read_json,
    read_seed_locations, DayIndex, MenuProvider, ProviderContext,
};
use crate::data_types::{
    eth_data_types::{EthLine, EthMeal, EthMealTime, EthResponse, EthWeeklyRota},
    mensa_uuid,
    seed_data_types::{EthSeedMensa, SeedLocation},
    Destination, Institution, Language, Location, Mensa, Menu, MenuRecord,
};
use crate::errors::FetchError;

const NO_MENU_DE: &[&str] = &[
    "Betriebsferien",
    "geschlossen",
    "kein Menü",
    "kein Angebot",
    "bald wieder für Sie da",
];
const NO_MENU_EN: &[&str] = &[
    "company holidays",
    "closed",
    "no menu",
    "no offer",
    "see you again soon",
];

/// ETH Zurich gastronomy, cookpit weekly rota API.
pub struct EthProvider {
    ctx: ProviderContext,
    config: EthConfig,
}

impl EthProvider {
    pub fn new(ctx: ProviderContext, config: EthConfig) -> Self {
        Self { ctx, config }
    }

    async fn try_fetch(&self, destination: Destination, language: Language) -> Result<usize, FetchError> {
        let week_start = destination.week_start(Local::now().date_naive());

        let response = self.request_rotas(week_start, language).await?;
        let records = self.parse_rotas(&response, week_start, language)?;
        let stored = self.ctx.store().insert_menus(records).await?;

        self.ctx
            .record_fetch(Institution::Eth, recorded_destinations(destination), language)
            .await?;

        Ok(stored)
    }

    async fn request_rotas(&self, week_start: NaiveDate, language: Language) -> Result<EthResponse, FetchError> {
        let valid_after = week_start.format("%Y-%m-%d").to_string();

        let now = Instant::now();
        let response = self
            .ctx
            .client()
            .get(format!(
                "{}/cookpit-pub-services/v1/weeklyrotas",
                self.config.api_url.trim_end_matches('/')
            ))
            .query(&[
                ("client-id", self.config.client_id.as_str()),
                ("lang", language.code()),
                ("rs-first", "0"),
                ("rs-size", "50"),
                ("valid-after", valid_after.as_str()),
            ])
            .send()
            .await?;
        log::debug!("ETH response: {:.2?}", now.elapsed());

        read_json(response).await
    }

    fn parse_rotas(
        &self,
        response: &EthResponse,
        week_start: NaiveDate,
        language: Language,
    ) -> Result<Vec<MenuRecord>, FetchError> {
        let mut index = DayIndex::default();
        let mut records = Vec::new();

        for rota in &response.weekly_rotas {
            for day in &rota.days {
                if !(1..=7).contains(&day.code) {
                    log::warn!("ETH: invalid day-of-week-code {}", day.code);
                    continue;
                }

                let outlets: Vec<(Uuid, &EthMealTime)> = day
                    .opening_hours
                    .iter()
                    .flat_map(|hours| &hours.meal_times)
                    .filter_map(|meal_time| {
                        let mensa_id = self.outlet_id(rota.facility_id, meal_time.name.as_deref());
                        if mensa_id.is_none() {
                            log::debug!(
                                "ETH: skipping unknown outlet {} {:?}",
                                rota.facility_id,
                                meal_time.name
                            );
                        }
                        mensa_id.map(|id| (id, meal_time))
                    })
                    .collect();

                let date = week_start + Duration::days(i64::from(day.code - 1));
                if outlets.is_empty() || !rota_covers(rota, date)? {
                    continue;
                }

                for (mensa_id, meal_time) in outlets {
                    for line in &meal_time.lines {
                        let Some(meal) = &line.meal else {
                            continue;
                        };

                        let mut menu = self.meal_to_menu(line, meal, date);
                        if self.is_no_menu_notice(&menu, language) {
                            log::debug!("ETH: dropping notice '{}' on {}", menu.title, date);
                            continue;
                        }
                        menu.index = index.next(mensa_id, date);
                        records.push(MenuRecord::new(mensa_id, language, date, menu));
                    }
                }
            }
        }

        Ok(records)
    }

    fn meal_to_menu(&self, line: &EthLine, meal: &EthMeal, date: NaiveDate) -> Menu {
        let classes: Vec<String> = meal.meal_classes.iter().map(|c| c.desc.to_lowercase()).collect();
        let is_vegan = classes.iter().any(|c| c.contains("vegan"));
        let is_vegetarian = is_vegan || classes.iter().any(|c| c.contains("vegetari"));

        Menu {
            title: normalize_text(&line.name),
            description: normalize_text(&format!("{}\n{}", meal.name, meal.description)),
            price: format_prices(meal.prices.iter().filter_map(|p| p.price)),
            allergens: join_allergens(meal.allergens.iter().map(|a| a.desc.as_str())),
            is_vegetarian,
            is_vegan,
            image_url: meal
                .image_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .map(|url| self.image_url(url)),
            weekday: date.weekday(),
            index: 0,
        }
    }

    // cookpit images are only served with the client id attached
    fn image_url(&self, url: &str) -> String {
        if url.contains('?') {
            url.to_string()
        } else {
            format!("{}?client-id={}", url, self.config.client_id)
        }
    }

    /// A facility serves one outlet per meal-time; seeds without meal-time
    /// names cover the whole facility.
    fn outlet_id(&self, facility_id: u32, meal_time: Option<&str>) -> Option<Uuid> {
        meal_time
            .and_then(|name| self.ctx.mensa_id(&outlet_key(facility_id, Some(name))))
            .or_else(|| self.ctx.mensa_id(&outlet_key(facility_id, None)))
    }

    fn register_seed(&self, seed: Vec<SeedLocation<EthSeedMensa>>) -> Vec<Location> {
        seed.into_iter()
            .map(|location| Location {
                id: location.id,
                title: location.title,
                mensas: location
                    .mensas
                    .into_iter()
                    .map(|seed_mensa| {
                        let mensa = Mensa {
                            id: mensa_uuid(&seed_mensa.id),
                            title: seed_mensa.title,
                            meal_time: seed_mensa.meal_time,
                            url: info_url(ETH_INFO_URL, seed_mensa.info_url_slug.as_deref()),
                            image_path: seed_mensa.image_path,
                        };
                        if seed_mensa.meal_time_names.is_empty() {
                            self.ctx
                                .register_mensa(outlet_key(seed_mensa.facility_id, None), mensa.clone());
                        }
                        for name in &seed_mensa.meal_time_names {
                            self.ctx.register_mensa(
                                outlet_key(seed_mensa.facility_id, Some(name.as_str())),
                                mensa.clone(),
                            );
                        }
                        mensa
                    })
                    .collect(),
            })
            .collect()
    }
}

impl MenuProvider for EthProvider {
    fn institution(&self) -> Institution {
        Institution::Eth
    }

    fn load_outlets(&self) -> BoxFuture<'_, Vec<Location>> {
        Box::pin(async move {
            let seed = read_seed_locations(&self.config.seed_path).await;
            self.register_seed(seed)
        })
    }

    fn fetch_menus(&self, destination: Destination, language: Language) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let now = Instant::now();
            match self.try_fetch(destination, language).await {
                Ok(stored) => log::info!(
                    "ETH {}/{}: stored {} menus in {:.2?}",
                    destination.code(),
                    language,
                    stored,
                    now.elapsed()
                ),
                Err(e) => log::warn!("ETH {}/{} fetch failed: {}", destination.code(), language, e),
            }
        })
    }

    fn no_menu_phrases(&self, language: Language) -> &'static [&'static str] {
        match language {
            Language::German => NO_MENU_DE,
            Language::English => NO_MENU_EN,
        }
    }
}

/// One weekly rota response serves today, tomorrow and this week alike.
fn recorded_destinations(destination: Destination) -> &'static [Destination] {
    match destination {
        Destination::NextWeek => &[Destination::NextWeek],
        _ => &[Destination::Today, Destination::Tomorrow, Destination::ThisWeek],
    }
}

fn outlet_key(facility_id: u32, meal_time: Option<&str>) -> String {
    match meal_time {
        Some(name) => format!("{}/{}", facility_id, name.trim().to_lowercase()),
        None => facility_id.to_string(),
    }
}

fn rota_covers(rota: &EthWeeklyRota, date: NaiveDate) -> Result<bool, FetchError> {
    if let Some(from) = rota.valid_from.as_deref() {
        if parse_upstream_date(from)? > date {
            return Ok(false);
        }
    }
    if let Some(to) = rota.valid_to.as_deref() {
        if parse_upstream_date(to)? < date {
            return Ok(false);
        }
    }

    Ok(true)
}
