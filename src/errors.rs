use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Preisliste konnte nicht (de)serialisiert werden: {0}")]
    Json(#[from] serde_json::Error),
    #[error("DB-Task abgebrochen: {0}")]
    Background(#[from] tokio::task::JoinError),
    #[error("DB-Verbindung vergiftet (Panik in anderem Task)")]
    Poisoned,
    #[error("Unbekannter Code in DB: {0}")]
    UnknownCode(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Anfrage fehlgeschlagen: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Upstream antwortete mit {0}")]
    Status(reqwest::StatusCode),
    #[error("Antwort nicht lesbar: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Upstream meldet Fehler: {0}")]
    Upstream(String),
    #[error("Ungültiges Datum: {0}")]
    InvalidDate(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
