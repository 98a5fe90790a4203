use serde::Deserialize;

use super::null_default;

// cookpit weekly rota response, only the fields we read.
// Unknown fields are ignored, missing or null arrays default to empty.

#[derive(Deserialize, Debug, Default)]
pub struct EthResponse {
    #[serde(rename = "weekly-rota-array", default, deserialize_with = "null_default")]
    pub weekly_rotas: Vec<EthWeeklyRota>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct EthWeeklyRota {
    pub facility_id: u32,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    #[serde(rename = "day-of-week-array", default, deserialize_with = "null_default")]
    pub days: Vec<EthDayOfWeek>,
}

#[derive(Deserialize, Debug)]
pub struct EthDayOfWeek {
    /// 1 = monday .. 7 = sunday
    #[serde(rename = "day-of-week-code")]
    pub code: u32,
    #[serde(rename = "opening-hour-array", default, deserialize_with = "null_default")]
    pub opening_hours: Vec<EthOpeningHour>,
}

#[derive(Deserialize, Debug)]
pub struct EthOpeningHour {
    #[serde(rename = "meal-time-array", default, deserialize_with = "null_default")]
    pub meal_times: Vec<EthMealTime>,
}

/// "Mittagessen", "Abendessen", ... each served by its own outlet.
#[derive(Deserialize, Debug)]
pub struct EthMealTime {
    pub name: Option<String>,
    #[serde(rename = "line-array", default, deserialize_with = "null_default")]
    pub lines: Vec<EthLine>,
}

#[derive(Deserialize, Debug)]
pub struct EthLine {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    pub meal: Option<EthMeal>,
}

#[derive(Deserialize, Debug)]
pub struct EthMeal {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(rename = "meal-price-array", default, deserialize_with = "null_default")]
    pub prices: Vec<EthPrice>,
    #[serde(rename = "allergen-array", default, deserialize_with = "null_default")]
    pub allergens: Vec<EthDescribed>,
    #[serde(rename = "meal-class-array", default, deserialize_with = "null_default")]
    pub meal_classes: Vec<EthDescribed>,
    #[serde(rename = "image-url")]
    pub image_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct EthPrice {
    pub price: Option<f64>,
}

/// allergen and meal class entries share this shape
#[derive(Deserialize, Debug)]
pub struct EthDescribed {
    #[serde(default, deserialize_with = "null_default")]
    pub desc: String,
}
