use serde::Deserialize;

/// One entry of a seed asset: a location and the mensas it groups.
#[derive(Deserialize, Debug)]
pub struct SeedLocation<M> {
    pub id: String,
    pub title: String,
    #[serde(default = "Vec::new")]
    pub mensas: Vec<M>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EthSeedMensa {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub meal_time: String,
    pub facility_id: u32,
    /// Upstream meal-time names ("Mittagessen", "Lunch", ...) served by this
    /// outlet. Empty means every meal-time of the facility.
    #[serde(default)]
    pub meal_time_names: Vec<String>,
    pub info_url_slug: Option<String>,
    pub image_path: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UzhSeedMensa {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub meal_time: String,
    pub slug: String,
    pub info_url_slug: Option<String>,
    pub image_path: Option<String>,
}
