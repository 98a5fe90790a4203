use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{Duration, NaiveDate, Utc};
use futures_util::future::join_all;
use tokio::sync::{watch, OnceCell};
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    data_backend::MenuProvider,
    data_types::{Destination, Institution, Language, Location, Menu},
    db_operations::{MenuStore, MenuWatcher},
    errors::StoreError,
};

/// Per-institution busy flags plus their "any busy" aggregate.
struct BusyBoard {
    flags: Mutex<Vec<bool>>,
    slots: Vec<watch::Sender<bool>>,
    any: watch::Sender<bool>,
}

impl BusyBoard {
    fn new(len: usize) -> Self {
        Self {
            flags: Mutex::new(vec![false; len]),
            slots: (0..len).map(|_| watch::channel(false).0).collect(),
            any: watch::channel(false).0,
        }
    }

    fn set(&self, slot: usize, busy: bool) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flag) = flags.get_mut(slot) {
            *flag = busy;
        }
        if let Some(sender) = self.slots.get(slot) {
            sender.send_replace(busy);
        }

        let any = flags.iter().any(|flag| *flag);
        self.any.send_if_modified(|current| {
            let changed = *current != any;
            *current = any;
            changed
        });
    }

    fn guard(self: &Arc<Self>, slot: usize) -> BusyGuard {
        self.set(slot, true);
        BusyGuard {
            board: Arc::clone(self),
            slot,
        }
    }
}

/// Clears its flag on drop, unwinding included.
struct BusyGuard {
    board: Arc<BusyBoard>,
    slot: usize,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.board.set(self.slot, false);
    }
}

struct InstitutionSlot {
    provider: Arc<dyn MenuProvider>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

/// Decides when to fetch which institution and exposes the cache to consumers.
///
/// At most one fetch per institution runs at a time, fetches of different
/// institutions run in parallel.
pub struct SyncCoordinator {
    store: MenuStore,
    slots: Vec<InstitutionSlot>,
    busy: Arc<BusyBoard>,
    refresh_threshold: Duration,
    retention: Duration,
    locations: OnceCell<BTreeMap<Institution, Vec<Location>>>,
}

impl SyncCoordinator {
    pub fn new(store: MenuStore, providers: Vec<Arc<dyn MenuProvider>>, config: &SyncConfig) -> Self {
        let busy = Arc::new(BusyBoard::new(providers.len()));
        let slots = providers
            .into_iter()
            .map(|provider| InstitutionSlot {
                provider,
                lock: Arc::new(tokio::sync::Mutex::new(())),
            })
            .collect();

        Self {
            store,
            slots,
            busy,
            refresh_threshold: config.refresh_threshold,
            retention: config.retention,
            locations: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &MenuStore {
        &self.store
    }

    /// Fetches every institution, fresh or not. Returns the institutions that fetched.
    pub async fn force_refresh(&self, destination: Destination, language: Language) -> Vec<Institution> {
        self.refresh_all(destination, language, true).await
    }

    /// Fetches only institutions whose last fetch for the key is missing or older
    /// than the refresh threshold.
    pub async fn refresh_if_needed(
        &self,
        destination: Destination,
        language: Language,
    ) -> Vec<Institution> {
        self.refresh_all(destination, language, false).await
    }

    /// Returns whether `institution` fetched.
    pub async fn force_refresh_institution(
        &self,
        institution: Institution,
        destination: Destination,
        language: Language,
    ) -> bool {
        match self.slot_of(institution) {
            Some(slot) => self.refresh_slot(slot, destination, language, true).await.is_some(),
            None => {
                log::warn!("No provider for {}", institution);
                false
            }
        }
    }

    /// True while any institution is fetching.
    pub fn is_refreshing(&self) -> watch::Receiver<bool> {
        self.busy.any.subscribe()
    }

    pub fn institution_refreshing(&self, institution: Institution) -> Option<watch::Receiver<bool>> {
        self.slot_of(institution)
            .and_then(|slot| self.busy.slots.get(slot))
            .map(watch::Sender::subscribe)
    }

    pub fn observe_menus(&self, mensa_id: Uuid, language: Language, date: NaiveDate) -> MenuWatcher {
        self.store.watch_menus(mensa_id, language, date)
    }

    /// One-shot read, falls back to the other language when `language` has no rows.
    pub async fn menus(
        &self,
        mensa_id: Uuid,
        language: Language,
        date: NaiveDate,
    ) -> Result<Vec<Menu>, StoreError> {
        let menus = self.store.query_menus(mensa_id, language, date).await?;
        if !menus.is_empty() {
            return Ok(menus);
        }

        let fallback = language.fallback();
        log::debug!("No {} menus for {} on {}, trying {}", language, mensa_id, date, fallback);
        self.store.query_menus(mensa_id, fallback, date).await
    }

    /// Seeded locations per institution, loaded on first use.
    pub async fn base_locations(&self) -> &BTreeMap<Institution, Vec<Location>> {
        self.locations
            .get_or_init(|| async {
                let mut locations = BTreeMap::new();
                for slot in &self.slots {
                    let outlets = slot.provider.load_outlets().await;
                    log::debug!("{}: {} locations seeded", slot.provider.institution(), outlets.len());
                    locations.insert(slot.provider.institution(), outlets);
                }
                locations
            })
            .await
    }

    /// Drops menus older than the retention window.
    pub async fn delete_expired(&self) -> Result<usize, StoreError> {
        let deleted = self.store.delete_expired(Utc::now() - self.retention).await?;
        if deleted > 0 {
            log::info!("Deleted {} expired menus", deleted);
        }

        Ok(deleted)
    }

    pub async fn clear_cache(&self) -> Result<(), StoreError> {
        self.store.clear_all().await?;
        log::info!("Cache cleared");
        Ok(())
    }

    fn slot_of(&self, institution: Institution) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.provider.institution() == institution)
    }

    async fn refresh_all(&self, destination: Destination, language: Language, force: bool) -> Vec<Institution> {
        let runs = (0..self.slots.len()).map(|slot| self.refresh_slot(slot, destination, language, force));
        join_all(runs).await.into_iter().flatten().collect()
    }

    async fn refresh_slot(
        &self,
        slot: usize,
        destination: Destination,
        language: Language,
        force: bool,
    ) -> Option<Institution> {
        // providers resolve upstream ids through their seeded mensas
        self.base_locations().await;

        let InstitutionSlot { provider, lock } = self.slots.get(slot)?;
        let institution = provider.institution();

        if !force && is_fresh(&self.store, institution, destination, language, self.refresh_threshold).await {
            log::debug!("{} {}/{} is fresh", institution, destination.code(), language);
            return None;
        }

        let provider = Arc::clone(provider);
        let lock = Arc::clone(lock);
        let busy = Arc::clone(&self.busy);
        let store = self.store.clone();
        let threshold = self.refresh_threshold;

        // spawned so the fetch completes even if the caller goes away
        let task = tokio::spawn(async move {
            let _held = lock.lock().await;
            // someone else may have fetched while we waited for the lock
            if !force && is_fresh(&store, institution, destination, language, threshold).await {
                log::debug!("{} {}/{} fetched meanwhile", institution, destination.code(), language);
                return false;
            }

            let _busy = busy.guard(slot);
            provider.fetch_menus(destination, language).await;
            true
        });

        match task.await {
            Ok(true) => Some(institution),
            Ok(false) => None,
            Err(e) => {
                log::error!("{} refresh task failed: {}", institution, e);
                None
            }
        }
    }
}

async fn is_fresh(
    store: &MenuStore,
    institution: Institution,
    destination: Destination,
    language: Language,
    threshold: Duration,
) -> bool {
    match store.get_fetch_record(institution, destination, language).await {
        Ok(Some(record)) => record.is_fresh(Utc::now(), threshold),
        Ok(None) => false,
        Err(e) => {
            log::warn!("Fetch record for {} unreadable, treating as stale: {}", institution, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::BoxFuture;
    use tokio::sync::Semaphore;

    use crate::data_types::{mensa_uuid, FetchRecord, Mensa, MenuRecord};

    struct MockProvider {
        institution: Institution,
        store: MenuStore,
        fetches: AtomicUsize,
        seed_loads: AtomicUsize,
        gate: Semaphore,
        panics: bool,
    }

    impl MockProvider {
        fn new(institution: Institution, store: &MenuStore) -> Self {
            Self {
                institution,
                store: store.clone(),
                fetches: AtomicUsize::new(0),
                seed_loads: AtomicUsize::new(0),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
                panics: false,
            }
        }

        fn gated(mut self) -> Self {
            self.gate = Semaphore::new(0);
            self
        }

        fn panicking(mut self) -> Self {
            self.panics = true;
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl MenuProvider for MockProvider {
        fn institution(&self) -> Institution {
            self.institution
        }

        fn load_outlets(&self) -> BoxFuture<'_, Vec<Location>> {
            Box::pin(async move {
                self.seed_loads.fetch_add(1, Ordering::SeqCst);
                vec![Location {
                    id: self.institution.code().to_lowercase(),
                    title: self.institution.to_string(),
                    mensas: vec![Mensa {
                        id: mensa_uuid(self.institution.code()),
                        title: "Mensa".into(),
                        meal_time: "11:00-14:00".into(),
                        url: "https://example.org".into(),
                        image_path: None,
                    }],
                }]
            })
        }

        fn fetch_menus(&self, destination: Destination, language: Language) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let _permit = self.gate.acquire().await.unwrap();
                if self.panics {
                    panic!("upstream exploded");
                }
                self.store
                    .insert_fetch_record(FetchRecord {
                        institution: self.institution,
                        destination,
                        language,
                        fetched_at: Utc::now(),
                    })
                    .await
                    .unwrap();
            })
        }

        fn no_menu_phrases(&self, _language: Language) -> &'static [&'static str] {
            &[]
        }
    }

    fn coordinator(eth: &Arc<MockProvider>, uzh: &Arc<MockProvider>, store: &MenuStore) -> Arc<SyncCoordinator> {
        let providers: Vec<Arc<dyn MenuProvider>> = vec![eth.clone(), uzh.clone()];
        Arc::new(SyncCoordinator::new(store.clone(), providers, &SyncConfig::default()))
    }

    fn setup() -> (MenuStore, Arc<MockProvider>, Arc<MockProvider>) {
        let store = MenuStore::open_in_memory().unwrap();
        let eth = Arc::new(MockProvider::new(Institution::Eth, &store));
        let uzh = Arc::new(MockProvider::new(Institution::Uzh, &store));
        (store, eth, uzh)
    }

    async fn fetched_hours_ago(store: &MenuStore, institution: Institution, hours: i64) {
        store
            .insert_fetch_record(FetchRecord {
                institution,
                destination: Destination::Today,
                language: Language::German,
                fetched_at: Utc::now() - Duration::hours(hours),
            })
            .await
            .unwrap();
    }

    fn menu(title: &str) -> Menu {
        Menu {
            title: title.into(),
            description: "Pasta".into(),
            price: vec!["7.00".into()],
            allergens: None,
            is_vegetarian: true,
            is_vegan: false,
            image_url: None,
            weekday: chrono::Weekday::Mon,
            index: 0,
        }
    }

    #[tokio::test]
    async fn only_stale_institutions_are_fetched() {
        let (store, eth, uzh) = setup();
        fetched_hours_ago(&store, Institution::Eth, 13).await;
        fetched_hours_ago(&store, Institution::Uzh, 11).await;
        let coordinator = coordinator(&eth, &uzh, &store);

        let fetched = coordinator
            .refresh_if_needed(Destination::Today, Language::German)
            .await;

        assert_eq!(fetched, vec![Institution::Eth]);
        assert_eq!(eth.fetches(), 1);
        assert_eq!(uzh.fetches(), 0);
    }

    #[tokio::test]
    async fn missing_record_counts_as_stale() {
        let (store, eth, uzh) = setup();
        let coordinator = coordinator(&eth, &uzh, &store);

        let fetched = coordinator
            .refresh_if_needed(Destination::NextWeek, Language::English)
            .await;
        assert_eq!(fetched, vec![Institution::Eth, Institution::Uzh]);

        // records were written by the fetch, second call is a no-op
        let fetched = coordinator
            .refresh_if_needed(Destination::NextWeek, Language::English)
            .await;
        assert!(fetched.is_empty());
        assert_eq!(eth.fetches(), 1);
    }

    #[tokio::test]
    async fn force_refresh_ignores_freshness() {
        let (store, eth, uzh) = setup();
        fetched_hours_ago(&store, Institution::Eth, 0).await;
        fetched_hours_ago(&store, Institution::Uzh, 0).await;
        let coordinator = coordinator(&eth, &uzh, &store);

        let fetched = coordinator
            .force_refresh(Destination::Today, Language::German)
            .await;

        assert_eq!(fetched, vec![Institution::Eth, Institution::Uzh]);
        assert_eq!(eth.fetches(), 1);
        assert_eq!(uzh.fetches(), 1);
    }

    #[tokio::test]
    async fn institutions_refresh_independently() {
        let store = MenuStore::open_in_memory().unwrap();
        let eth = Arc::new(MockProvider::new(Institution::Eth, &store).gated());
        let uzh = Arc::new(MockProvider::new(Institution::Uzh, &store));
        let coordinator = coordinator(&eth, &uzh, &store);

        let mut any_busy = coordinator.is_refreshing();
        let mut eth_busy = coordinator.institution_refreshing(Institution::Eth).unwrap();
        let uzh_busy = coordinator.institution_refreshing(Institution::Uzh).unwrap();

        let blocked = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .force_refresh_institution(Institution::Eth, Destination::Today, Language::German)
                    .await
            })
        };

        eth_busy.wait_for(|busy| *busy).await.unwrap();
        assert!(*any_busy.borrow());
        assert!(!*uzh_busy.borrow());

        // uzh is not held up by the stuck eth fetch
        assert!(
            coordinator
                .force_refresh_institution(Institution::Uzh, Destination::Today, Language::German)
                .await
        );
        assert_eq!(uzh.fetches(), 1);
        assert!(*eth_busy.borrow());

        eth.gate.add_permits(1);
        assert!(blocked.await.unwrap());

        any_busy.wait_for(|busy| !*busy).await.unwrap();
        assert!(!*eth_busy.borrow());
    }

    #[tokio::test]
    async fn waiting_caller_does_not_fetch_again() {
        let store = MenuStore::open_in_memory().unwrap();
        let eth = Arc::new(MockProvider::new(Institution::Eth, &store).gated());
        let uzh = Arc::new(MockProvider::new(Institution::Uzh, &store));
        let coordinator = coordinator(&eth, &uzh, &store);
        let mut eth_busy = coordinator.institution_refreshing(Institution::Eth).unwrap();

        let spawn_refresh = || {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .refresh_if_needed(Destination::Today, Language::German)
                    .await
            })
        };

        let first = spawn_refresh();
        eth_busy.wait_for(|busy| *busy).await.unwrap();
        let second = spawn_refresh();
        tokio::task::yield_now().await;

        eth.gate.add_permits(1);
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert!(first.contains(&Institution::Eth));
        assert!(!second.contains(&Institution::Eth));
        assert_eq!(eth.fetches(), 1);
        assert_eq!(uzh.fetches(), 1);
    }

    #[tokio::test]
    async fn busy_flag_clears_when_fetch_panics() {
        let store = MenuStore::open_in_memory().unwrap();
        let eth = Arc::new(MockProvider::new(Institution::Eth, &store).panicking());
        let uzh = Arc::new(MockProvider::new(Institution::Uzh, &store));
        let coordinator = coordinator(&eth, &uzh, &store);

        for _ in 0..2 {
            assert!(
                !coordinator
                    .force_refresh_institution(Institution::Eth, Destination::Today, Language::German)
                    .await
            );
        }

        assert_eq!(eth.fetches(), 2);
        assert!(!*coordinator.is_refreshing().borrow());
        assert!(!*coordinator.institution_refreshing(Institution::Eth).unwrap().borrow());
    }

    #[tokio::test]
    async fn menus_fall_back_to_other_language() {
        let (store, eth, uzh) = setup();
        let coordinator = coordinator(&eth, &uzh, &store);
        let mensa = mensa_uuid("polymensa");
        let monday = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();

        store
            .insert_menu(MenuRecord::new(mensa, Language::English, monday, menu("GARDEN")))
            .await
            .unwrap();
        let menus = coordinator.menus(mensa, Language::German, monday).await.unwrap();
        assert_eq!(menus.len(), 1);
        assert_eq!(menus[0].title, "GARDEN");

        store
            .insert_menu(MenuRecord::new(mensa, Language::German, monday, menu("GARTEN")))
            .await
            .unwrap();
        let menus = coordinator.menus(mensa, Language::German, monday).await.unwrap();
        assert_eq!(menus[0].title, "GARTEN");
    }

    #[tokio::test]
    async fn seeds_are_loaded_once() {
        let (store, eth, uzh) = setup();
        let coordinator = coordinator(&eth, &uzh, &store);
        assert_eq!(eth.seed_loads.load(Ordering::SeqCst), 0);

        let locations = coordinator.base_locations().await;
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[&Institution::Uzh][0].mensas[0].id, mensa_uuid("UZH"));

        coordinator.base_locations().await;
        assert_eq!(eth.seed_loads.load(Ordering::SeqCst), 1);
        assert_eq!(uzh.seed_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_menus_are_swept() {
        let (store, eth, uzh) = setup();
        let coordinator = coordinator(&eth, &uzh, &store);
        let mensa = mensa_uuid("polymensa");
        let monday = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();

        let mut old = MenuRecord::new(mensa, Language::German, monday, menu("ALT"));
        old.created_at = Utc::now() - Duration::days(2);
        store
            .insert_menus(vec![old, MenuRecord::new(mensa, Language::German, monday, menu("NEU"))])
            .await
            .unwrap();

        assert_eq!(coordinator.delete_expired().await.unwrap(), 1);
        let menus = coordinator.menus(mensa, Language::German, monday).await.unwrap();
        assert_eq!(menus.len(), 1);
        assert_eq!(menus[0].title, "NEU");

        coordinator.clear_cache().await.unwrap();
        assert!(coordinator.menus(mensa, Language::German, monday).await.unwrap().is_empty());
    }
}
