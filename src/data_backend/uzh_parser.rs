use std::time::Instant;

use chrono::{Datelike, Local, NaiveDate};
use futures_util::future::BoxFuture;
use serde_json::json;

use crate::config::UzhConfig;
use crate::constants::UZH_INFO_URL;
use crate::data_backend::{
    format_prices, info_url, join_allergens, normalize_text, parse_upstream_date, read_json,
    read_seed_locations, DayIndex, MenuProvider, ProviderContext,
};
use crate::data_types::{
    mensa_uuid,
    seed_data_types::{SeedLocation, UzhSeedMensa},
    uzh_data_types::{UzhAmount, UzhMenuItem, UzhResponse},
    Destination, Institution, Language, Location, Mensa, Menu, MenuRecord,
};
use crate::errors::FetchError;

const NO_MENU_DE: &[&str] = &[
    "Betriebsferien",
    "geschlossen",
    "Wir sind bald wieder für Sie da",
    "kein Menüangebot",
    "Ruhetag",
];
const NO_MENU_EN: &[&str] = &[
    "company holidays",
    "closed",
    "We'll be back soon",
    "see you again soon",
    "no menu",
];

const MENU_QUERY: &str = r#"query MensaMenus($organisation: String!, $locale: String!, $from: String!, $to: String!) {
  organisation(where: { slug: $organisation }) {
    outlets {
      slug
      calendar {
        week: range(from: $from, to: $to) {
          daily {
            date
            menuItems(locale: $locale) {
              __typename
              ... on OutletMenuItemDish {
                category { name }
                prices { amount }
                dish {
                  name
                  description
                  isVegan
                  isVegetarian
                  imageUrl
                  allergens { allergen { name } }
                }
              }
              ... on OutletMenuItemInfoText {
                category { name }
                text
              }
            }
          }
        }
      }
    }
  }
}"#;

/// University of Zurich mensas, ZFV GraphQL API.
pub struct UzhProvider {
    ctx: ProviderContext,
    config: UzhConfig,
}

impl UzhProvider {
    pub fn new(ctx: ProviderContext, config: UzhConfig) -> Self {
        Self { ctx, config }
    }

    async fn try_fetch(&self, destination: Destination, language: Language) -> Result<usize, FetchError> {
        let today = Local::now().date_naive();
        let dates = destination.target_dates(today);
        let (Some(&from), Some(&to)) = (dates.first(), dates.last()) else {
            return Ok(0);
        };

        let response = self.request_menus(from, to, language).await?;
        let records = self.parse_response(response, &dates, language)?;
        let stored = self.ctx.store().insert_menus(records).await?;

        self.ctx
            .record_fetch(Institution::Uzh, &[destination], language)
            .await?;

        Ok(stored)
    }

    async fn request_menus(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        language: Language,
    ) -> Result<UzhResponse, FetchError> {
        let body = json!({
            "query": MENU_QUERY,
            "variables": {
                "organisation": self.config.organisation,
                "locale": language.code(),
                "from": from.format("%Y-%m-%d").to_string(),
                "to": to.format("%Y-%m-%d").to_string(),
            }
        });

        let mut request = self
            .ctx
            .client()
            .post(format!("{}/graphql", self.config.api_url.trim_end_matches('/')))
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("api-key", api_key);
        }

        let now = Instant::now();
        let response = request.send().await?;
        log::debug!("UZH response: {:.2?}", now.elapsed());

        read_json(response).await
    }

    fn parse_response(
        &self,
        response: UzhResponse,
        dates: &[NaiveDate],
        language: Language,
    ) -> Result<Vec<MenuRecord>, FetchError> {
        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(FetchError::Upstream(messages.join("; ")));
        }
        let organisation = response
            .data
            .and_then(|data| data.organisation)
            .ok_or_else(|| FetchError::Upstream(format!("no organisation '{}'", self.config.organisation)))?;

        let mut index = DayIndex::default();
        let mut records = Vec::new();

        for outlet in organisation.outlets {
            let Some(mensa_id) = self.ctx.mensa_id(&outlet.slug) else {
                log::debug!("UZH: skipping unknown outlet {}", outlet.slug);
                continue;
            };
            let days = outlet
                .calendar
                .and_then(|calendar| calendar.week)
                .map(|week| week.daily)
                .unwrap_or_default();

            for day in days {
                let date = parse_upstream_date(&day.date)?;
                if !dates.contains(&date) {
                    continue;
                }

                for item in &day.menu_items {
                    let mut menu = item_to_menu(item, date);
                    if self.is_no_menu_notice(&menu, language) {
                        log::debug!("UZH: dropping notice '{}' on {}", menu.description, date);
                        continue;
                    }
                    menu.index = index.next(mensa_id, date);
                    records.push(MenuRecord::new(mensa_id, language, date, menu));
                }
            }
        }

        Ok(records)
    }

    fn register_seed(&self, seed: Vec<SeedLocation<UzhSeedMensa>>) -> Vec<Location> {
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
                            url: info_url(UZH_INFO_URL, seed_mensa.info_url_slug.as_deref()),
                            image_path: seed_mensa.image_path,
                        };
                        self.ctx.register_mensa(seed_mensa.slug, mensa.clone());
                        mensa
                    })
                    .collect(),
            })
            .collect()
    }
}

impl MenuProvider for UzhProvider {
    fn institution(&self) -> Institution {
        Institution::Uzh
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
                    "UZH {}/{}: stored {} menus in {:.2?}",
                    destination.code(),
                    language,
                    stored,
                    now.elapsed()
                ),
                Err(e) => log::warn!("UZH {}/{} fetch failed: {}", destination.code(), language, e),
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

/// Dishes carry their name in the description, info texts only their text.
fn item_to_menu(item: &UzhMenuItem, date: NaiveDate) -> Menu {
    let category = item
        .category
        .as_ref()
        .map(|category| normalize_text(&category.name))
        .unwrap_or_default();

    match item.as_dish() {
        Some(dish) => Menu {
            title: if category.is_empty() {
                normalize_text(&dish.name)
            } else {
                category
            },
            description: normalize_text(&format!("{}\n{}", dish.name, dish.description)),
            price: format_prices(
                item.prices
                    .iter()
                    .filter_map(|p| p.amount.as_ref().and_then(UzhAmount::value)),
            ),
            allergens: join_allergens(
                dish.allergens
                    .iter()
                    .filter_map(|a| a.allergen.as_ref())
                    .map(|a| a.name.as_str()),
            ),
            is_vegetarian: dish.is_vegetarian || dish.is_vegan,
            is_vegan: dish.is_vegan,
            image_url: dish.image_url.clone().filter(|url| !url.is_empty()),
            weekday: date.weekday(),
            index: 0,
        },
        None => {
            let text = normalize_text(item.text.as_deref().unwrap_or_default());
            Menu {
                title: if category.is_empty() { text.clone() } else { category },
                description: text,
                price: Vec::new(),
                allergens: None,
                is_vegetarian: false,
                is_vegan: false,
                image_url: None,
                weekday: date.weekday(),
                index: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HttpConfig, db_operations::MenuStore};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn provider() -> UzhProvider {
        let store = MenuStore::open_in_memory().unwrap();
        let ctx = ProviderContext::new(store, &HttpConfig::default()).unwrap();
        let provider = UzhProvider::new(ctx, UzhConfig::default());
        provider.register_seed(vec![SeedLocation {
            id: "zentrum".into(),
            title: "Zentrum".into(),
            mensas: vec![UzhSeedMensa {
                id: "untere-mensa".into(),
                title: "Untere Mensa".into(),
                meal_time: "11:00-14:00".into(),
                slug: "zentrum-mensa".into(),
                info_url_slug: None,
                image_path: None,
            }],
        }]);
        provider
    }

    fn response(value: serde_json::Value) -> UzhResponse {
        serde_json::from_value(value).unwrap()
    }

    fn week(daily: serde_json::Value) -> UzhResponse {
        response(json!({
            "data": { "organisation": { "outlets": [
                { "slug": "zentrum-mensa", "calendar": { "week": { "daily": daily } } },
                { "slug": "unbekannt", "calendar": { "week": { "daily": daily } } }
            ] } }
        }))
    }

    #[test]
    fn dishes_and_info_texts_are_parsed() {
        let provider = provider();
        let response = week(json!([
            {
                "date": "2024-05-06T00:00:00",
                "menuItems": [
                    {
                        "__typename": "OutletMenuItemDish",
                        "category": { "name": "Farm" },
                        "prices": [{ "amount": "12.5" }, { "amount": 7.2 }],
                        "dish": {
                            "name": "Pasta",
                            "description": "mit   Pesto",
                            "isVegan": true,
                            "allergens": [{ "allergen": { "name": "Gluten" } }]
                        }
                    },
                    {
                        "__typename": "OutletMenuItemInfoText",
                        "category": { "name": "Info" },
                        "text": "Betriebsferien"
                    }
                ]
            },
            { "date": "2024-05-20", "menuItems": [
                { "category": { "name": "Farm" }, "dish": { "name": "Ausserhalb" } }
            ] }
        ]));

        let dates = Destination::ThisWeek.target_dates(date(8));
        let records = provider
            .parse_response(response, &dates, Language::German)
            .unwrap();

        assert_eq!(records.len(), 1);
        let menu = &records[0].menu;
        assert_eq!(records[0].mensa_id, mensa_uuid("untere-mensa"));
        assert_eq!(records[0].date, date(6));
        assert_eq!(menu.title, "Farm");
        assert_eq!(menu.description, "Pasta\nmit Pesto");
        assert_eq!(menu.price, vec!["7.20", "12.50"]);
        assert_eq!(menu.allergens.as_deref(), Some("Gluten"));
        assert!(menu.is_vegan && menu.is_vegetarian);
    }

    #[test]
    fn single_day_window_only_keeps_that_day() {
        let provider = provider();
        let response = week(json!([
            { "date": "2024-05-06", "menuItems": [{ "category": { "name": "Farm" }, "dish": { "name": "Montag" } }] },
            { "date": "2024-05-07", "menuItems": [{ "category": { "name": "Farm" }, "dish": { "name": "Dienstag" } }] }
        ]));

        let records = provider
            .parse_response(response, &Destination::Tomorrow.target_dates(date(6)), Language::German)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].menu.description, "Dienstag");
    }

    #[test]
    fn graphql_errors_fail_the_fetch() {
        let provider = provider();
        let response = response(json!({
            "data": null,
            "errors": [{ "message": "invalid api key" }]
        }));

        match provider.parse_response(response, &[date(6)], Language::German) {
            Err(FetchError::Upstream(message)) => assert_eq!(message, "invalid api key"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn null_optional_fields_do_not_fail_the_parse() {
        let provider = provider();
        let response = week(json!([
            {
                "date": "2024-05-06",
                "menuItems": [
                    {
                        "__typename": "OutletMenuItemDish",
                        "category": { "name": null },
                        "prices": [{ "amount": null }, { "amount": "6,50" }],
                        "dish": {
                            "name": "Gemüsecurry",
                            "description": null,
                            "isVegan": null,
                            "isVegetarian": true,
                            "imageUrl": null,
                            "allergens": null
                        }
                    },
                    {
                        "__typename": "OutletMenuItemDish",
                        "category": { "name": "Grill" },
                        "prices": null,
                        "dish": {
                            "name": "Bratwurst",
                            "allergens": [{ "allergen": null }, { "allergen": { "name": "Senf" } }]
                        }
                    }
                ]
            },
            { "date": "2024-05-07", "menuItems": null }
        ]));

        let records = provider
            .parse_response(response, &Destination::ThisWeek.target_dates(date(6)), Language::German)
            .unwrap();

        assert_eq!(records.len(), 2);
        let curry = &records[0].menu;
        assert_eq!(curry.title, "Gemüsecurry");
        assert_eq!(curry.description, "Gemüsecurry");
        assert_eq!(curry.price, vec!["6.50"]);
        assert_eq!(curry.allergens, None);
        assert!(curry.is_vegetarian && !curry.is_vegan);

        let wurst = &records[1].menu;
        assert!(wurst.price.is_empty());
        assert_eq!(wurst.allergens.as_deref(), Some("Senf"));
    }

    #[test]
    fn info_text_typename_wins_over_dish_shape() {
        let provider = provider();
        let response = week(json!([{
            "date": "2024-05-06",
            "menuItems": [{
                "__typename": "OutletMenuItemInfoText",
                "category": { "name": "Hinweis" },
                "dish": { "name": "Platzhalter" },
                "prices": [{ "amount": 1.0 }],
                "text": "Heute nur Take-away"
            }]
        }]));

        let records = provider
            .parse_response(response, &[date(6)], Language::German)
            .unwrap();

        assert_eq!(records.len(), 1);
        let menu = &records[0].menu;
        assert_eq!(menu.title, "Hinweis");
        assert_eq!(menu.description, "Heute nur Take-away");
        assert!(menu.price.is_empty());
    }

    #[test]
    fn missing_optional_fields_are_tolerated() {
        let provider = provider();
        let response = response(json!({
            "data": { "organisation": { "outlets": [
                { "slug": "zentrum-mensa", "calendar": null },
                { "slug": "zentrum-mensa" }
            ] } }
        }));

        let records = provider
            .parse_response(response, &[date(6)], Language::German)
            .unwrap();
        assert!(records.is_empty());
    }
}
