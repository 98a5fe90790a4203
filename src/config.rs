use std::{path::PathBuf, time::Duration};

use crate::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_DB, ETH_API_URL, ETH_CLIENT_ID, REFRESH_THRESHOLD_HOURS,
    REQUEST_TIMEOUT_SECS, RETENTION_DAYS, UZH_API_URL, UZH_ORGANISATION,
};

/// Runtime configuration, passed down explicitly to the store, providers and coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub eth: EthConfig,
    pub uzh: UzhConfig,
    pub http: HttpConfig,
    pub refresh_threshold: chrono::Duration,
    pub retention: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct EthConfig {
    pub api_url: String,
    pub client_id: String,
    pub seed_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UzhConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub organisation: String,
    pub seed_path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB),
            eth: EthConfig::default(),
            uzh: UzhConfig::default(),
            http: HttpConfig::default(),
            refresh_threshold: chrono::Duration::hours(REFRESH_THRESHOLD_HOURS),
            retention: chrono::Duration::days(RETENTION_DAYS),
        }
    }
}

impl Default for EthConfig {
    fn default() -> Self {
        Self {
            api_url: ETH_API_URL.to_string(),
            client_id: ETH_CLIENT_ID.to_string(),
            seed_path: PathBuf::from("assets/eth_mensas.json"),
        }
    }
}

impl Default for UzhConfig {
    fn default() -> Self {
        Self {
            api_url: UZH_API_URL.to_string(),
            api_key: None,
            organisation: UZH_ORGANISATION.to_string(),
            seed_path: PathBuf::from("assets/uzh_mensas.json"),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}
