use serde::Deserialize;

use super::null_default;

#[derive(Deserialize, Debug)]
pub struct UzhResponse {
    pub data: Option<UzhData>,
    #[serde(default, deserialize_with = "null_default")]
    pub errors: Vec<GraphQlError>,
}

#[derive(Deserialize, Debug)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Deserialize, Debug)]
pub struct UzhData {
    pub organisation: Option<UzhOrganisation>,
}

#[derive(Deserialize, Debug)]
pub struct UzhOrganisation {
    #[serde(default, deserialize_with = "null_default")]
    pub outlets: Vec<UzhOutlet>,
}

#[derive(Deserialize, Debug)]
pub struct UzhOutlet {
    pub slug: String,
    pub calendar: Option<UzhCalendar>,
}

#[derive(Deserialize, Debug)]
pub struct UzhCalendar {
    pub week: Option<UzhWeek>,
}

#[derive(Deserialize, Debug)]
pub struct UzhWeek {
    #[serde(default, deserialize_with = "null_default")]
    pub daily: Vec<UzhDay>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UzhDay {
    /// ISO date, sometimes with a time part attached
    pub date: String,
    #[serde(default, deserialize_with = "null_default")]
    pub menu_items: Vec<UzhMenuItem>,
}

/// Either a dish or a plain info text ("Betriebsferien", ...).
#[derive(Deserialize, Debug)]
pub struct UzhMenuItem {
    #[serde(rename = "__typename")]
    pub typename: Option<String>,
    pub category: Option<UzhCategory>,
    #[serde(default, deserialize_with = "null_default")]
    pub prices: Vec<UzhPrice>,
    pub dish: Option<UzhDish>,
    pub text: Option<String>,
}

pub const INFO_TEXT_TYPENAME: &str = "OutletMenuItemInfoText";

impl UzhMenuItem {
    /// The dish, unless the item is typed as an info text.
    pub fn as_dish(&self) -> Option<&UzhDish> {
        match self.typename.as_deref() {
            Some(INFO_TEXT_TYPENAME) => None,
            _ => self.dish.as_ref(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct UzhCategory {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct UzhPrice {
    pub amount: Option<UzhAmount>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum UzhAmount {
    Number(f64),
    Text(String),
}

impl UzhAmount {
    pub fn value(&self) -> Option<f64> {
        match self {
            UzhAmount::Number(n) => Some(*n),
            UzhAmount::Text(t) => t.trim().replace(',', ".").parse().ok(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UzhDish {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_default")]
    pub is_vegan: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub is_vegetarian: bool,
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub allergens: Vec<UzhDishAllergen>,
}

#[derive(Deserialize, Debug)]
pub struct UzhDishAllergen {
    pub allergen: Option<UzhAllergen>,
}

#[derive(Deserialize, Debug)]
pub struct UzhAllergen {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
}
