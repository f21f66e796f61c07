use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::calendar::Day;
use crate::model::*;
use crate::store::{MemoryStore, StoreError};

// ── Harness ──────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("venuedb_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Delegates to a [`MemoryStore`], records which operations ran, and can
/// be told to fail individual operations.
struct RecordingStore {
    inner: MemoryStore,
    calls: Mutex<Vec<&'static str>>,
    fail_create_order: AtomicBool,
    fail_find_orders: AtomicBool,
    /// Pretend the conflict pre-check saw nothing, to exercise the race path.
    blind_conflict_check: AtomicBool,
}

impl RecordingStore {
    fn open(name: &str) -> Self {
        Self {
            inner: MemoryStore::open(&test_wal_path(name)).unwrap(),
            calls: Mutex::new(Vec::new()),
            fail_create_order: AtomicBool::new(false),
            fail_find_orders: AtomicBool::new(false),
            blind_conflict_check: AtomicBool::new(false),
        }
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn find_orders_by_date(&self, day: Day) -> Result<Vec<Order>, StoreError> {
        self.record("find_orders_by_date");
        if self.fail_find_orders.load(Ordering::SeqCst) {
            return Err(StoreError::Wal("injected read failure".into()));
        }
        self.inner.find_orders_by_date(day).await
    }

    async fn find_order_by_package_and_date(
        &self,
        package_id: PackageId,
        day: Day,
    ) -> Result<Option<Order>, StoreError> {
        self.record("find_order_by_package_and_date");
        if self.blind_conflict_check.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_order_by_package_and_date(package_id, day).await
    }

    async fn create_order(&self, order: Order) -> Result<OrderId, StoreError> {
        self.record("create_order");
        if self.fail_create_order.load(Ordering::SeqCst) {
            return Err(StoreError::Wal("injected write failure".into()));
        }
        self.inner.create_order(order).await
    }

    async fn find_package_by_id(&self, id: PackageId) -> Result<Option<Package>, StoreError> {
        self.record("find_package_by_id");
        self.inner.find_package_by_id(id).await
    }

    async fn find_packages_by_ids(&self, ids: &[PackageId]) -> Result<Vec<Package>, StoreError> {
        self.record("find_packages_by_ids");
        self.inner.find_packages_by_ids(ids).await
    }

    async fn find_packages_by_category_ids(
        &self,
        ids: &[CategoryId],
    ) -> Result<Vec<Package>, StoreError> {
        self.record("find_packages_by_category_ids");
        self.inner.find_packages_by_category_ids(ids).await
    }

    async fn find_categories_by_ids(
        &self,
        ids: &[CategoryId],
    ) -> Result<Vec<PackageCategory>, StoreError> {
        self.record("find_categories_by_ids");
        self.inner.find_categories_by_ids(ids).await
    }

    async fn find_categories_by_venue_id(
        &self,
        venue_id: VenueId,
    ) -> Result<Vec<PackageCategory>, StoreError> {
        self.record("find_categories_by_venue_id");
        self.inner.find_categories_by_venue_id(venue_id).await
    }

    async fn find_venues(
        &self,
        filter: &VenueFilter,
    ) -> Result<(Vec<Venue>, Option<Pagination>), StoreError> {
        self.record("find_venues");
        self.inner.find_venues(filter).await
    }

    async fn find_cities(&self) -> Result<Vec<City>, StoreError> {
        self.record("find_cities");
        self.inner.find_cities().await
    }

    async fn find_galleries_by_venue_ids(
        &self,
        ids: &[VenueId],
    ) -> Result<HashMap<VenueId, Vec<String>>, StoreError> {
        self.record("find_galleries_by_venue_ids");
        self.inner.find_galleries_by_venue_ids(ids).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.record("find_user_by_email");
        self.inner.find_user_by_email(email).await
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.record("create_user");
        self.inner.create_user(user).await
    }

    async fn insert_city(&self, city: City) -> Result<(), StoreError> {
        self.inner.insert_city(city).await
    }

    async fn insert_venue(&self, venue: Venue) -> Result<(), StoreError> {
        self.inner.insert_venue(venue).await
    }

    async fn insert_category(&self, category: PackageCategory) -> Result<(), StoreError> {
        self.inner.insert_category(category).await
    }

    async fn insert_package(&self, package: Package) -> Result<(), StoreError> {
        self.inner.insert_package(package).await
    }

    async fn insert_gallery_image(&self, image: GalleryImage) -> Result<(), StoreError> {
        self.inner.insert_gallery_image(image).await
    }
}

fn credentials() -> Arc<Credentials> {
    Arc::new(Credentials::new(b"engine-test-secret", Duration::from_secs(3600)))
}

fn venue(id: VenueId, city_id: CityId) -> Venue {
    Venue {
        id,
        city_id,
        name: format!("Venue {id}"),
        min_price: 1_000.0,
        max_price: 5_000.0,
        capacity: 300,
        star: 4.0,
        review_count: 10,
        thumbnail_url: format!("https://img.example/venue-{id}.jpg"),
        description: "A hall".into(),
        website: String::new(),
        phone: format!("+62-{id}"),
        email: String::new(),
        instagram: String::new(),
        address: String::new(),
        logo: String::new(),
        is_favourite: id == 1,
    }
}

fn package(id: PackageId, category_id: CategoryId) -> Package {
    Package {
        id,
        category_id,
        name: format!("Package {id}"),
        thumbnail_url: String::new(),
        price: 2_500.0,
        capacity: 100,
        description: String::new(),
    }
}

/// Two cities, three venues:
///   venue 1 (city 1): category 10 → packages 42, 43
///   venue 2 (city 1): category 20 → package 50
///   venue 3 (city 2): category 30 → package 60
async fn catalog(name: &str) -> (Engine<RecordingStore>, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::open(name));
    let engine = Engine::new(store.clone(), credentials());
    engine.add_city(City { id: 1, name: "Jakarta".into() }).await.unwrap();
    engine.add_city(City { id: 2, name: "Bandung".into() }).await.unwrap();
    for (id, city) in [(1, 1), (2, 1), (3, 2)] {
        engine.add_venue(venue(id, city)).await.unwrap();
    }
    for (id, venue_id) in [(10, 1), (20, 2), (30, 3)] {
        engine
            .add_category(PackageCategory {
                id,
                venue_id,
                description: format!("Category {id}"),
            })
            .await
            .unwrap();
    }
    for (id, category) in [(42, 10), (43, 10), (50, 20), (60, 30)] {
        engine.add_package(package(id, category)).await.unwrap();
    }
    engine
        .add_gallery_image(GalleryImage {
            id: 1,
            venue_id: 1,
            file_url: "https://img.example/g-1a.jpg".into(),
        })
        .await
        .unwrap();
    store.clear_calls();
    (engine, store)
}

fn utc(date: &str) -> DateTime<FixedOffset> {
    at(0, date, 0, 0)
}

fn at(offset_hours: i32, date: &str, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    let d = crate::calendar::parse_date(date).unwrap();
    FixedOffset::east_opt(offset_hours * 3600)
        .unwrap()
        .from_local_datetime(&d.and_hms_opt(hour, minute, 0).unwrap())
        .unwrap()
}

fn ids(page: &VenuePage) -> Vec<VenueId> {
    page.venues.iter().map(|l| l.venue.id).collect()
}

// ── Availability resolver ────────────────────────────────

#[tokio::test]
async fn no_date_excludes_nothing_and_touches_no_store() {
    let (engine, store) = catalog("resolver_no_date.wal").await;
    let excluded = engine.resolve_exclusions::<FixedOffset>(None).await.unwrap();
    assert!(excluded.is_empty());
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn day_without_orders_stops_after_first_hop() {
    let (engine, store) = catalog("resolver_empty_day.wal").await;
    let excluded = engine
        .resolve_exclusions(Some(&utc("2024-03-10")))
        .await
        .unwrap();
    assert!(excluded.is_empty());
    assert_eq!(store.calls(), vec!["find_orders_by_date"]);
}

#[tokio::test]
async fn booked_package_excludes_its_venue_through_three_hops() {
    let (engine, store) = catalog("resolver_hops.wal").await;
    engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
    store.clear_calls();

    let excluded = engine
        .resolve_exclusions(Some(&utc("2024-03-10")))
        .await
        .unwrap();
    assert_eq!(excluded, HashSet::from([1]));
    assert_eq!(
        store.calls(),
        vec!["find_orders_by_date", "find_packages_by_ids", "find_categories_by_ids"]
    );

    // A different day is unaffected.
    let other = engine
        .resolve_exclusions(Some(&utc("2024-03-11")))
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn sibling_packages_collapse_to_one_venue() {
    let (engine, _) = catalog("resolver_dedupe.wal").await;
    let day = utc("2024-04-01");
    engine.place_order(42, 7, &day).await.unwrap();
    engine.place_order(43, 8, &day).await.unwrap();
    engine.place_order(60, 9, &day).await.unwrap();
    let excluded = engine.resolve_exclusions(Some(&day)).await.unwrap();
    assert_eq!(excluded, HashSet::from([1, 3]));
}

#[tokio::test]
async fn large_hops_are_split_into_bounded_batches() {
    let (engine, store) = catalog("resolver_batches.wal").await;
    let day = utc("2024-04-01");
    for (package_id, user_id) in [(42, 7), (43, 8), (50, 9), (60, 10)] {
        engine.place_order(package_id, user_id, &day).await.unwrap();
    }
    store.clear_calls();

    // Four packages in chunks of two, then three categories in chunks of two.
    let excluded = engine.exclusions_for_day(Day::of(&day), 2).await.unwrap();
    assert_eq!(excluded, HashSet::from([1, 2, 3]));
    assert_eq!(
        store.calls(),
        vec![
            "find_orders_by_date",
            "find_packages_by_ids",
            "find_packages_by_ids",
            "find_categories_by_ids",
            "find_categories_by_ids",
        ]
    );

    // One id per call still finds the same venues.
    store.clear_calls();
    let one_by_one = engine.exclusions_for_day(Day::of(&day), 1).await.unwrap();
    assert_eq!(one_by_one, excluded);
    let calls = store.calls();
    assert_eq!(calls.iter().filter(|c| **c == "find_packages_by_ids").count(), 4);
    assert_eq!(calls.iter().filter(|c| **c == "find_categories_by_ids").count(), 3);

    // The public entry point fits all of them in one call per hop.
    store.clear_calls();
    assert_eq!(engine.resolve_exclusions(Some(&day)).await.unwrap(), excluded);
    assert_eq!(store.calls().len(), 3);
}

#[tokio::test]
async fn orders_whose_package_vanished_end_the_walk() {
    let (engine, store) = catalog("resolver_orphan.wal").await;
    // An order for a package id the catalog never had.
    store
        .inner
        .create_order(Order {
            id: ulid::Ulid::new(),
            package_id: 777,
            user_id: 1,
            date: Day::parse("2024-05-05").unwrap(),
        })
        .await
        .unwrap();
    store.clear_calls();
    let excluded = engine
        .resolve_exclusions(Some(&utc("2024-05-05")))
        .await
        .unwrap();
    assert!(excluded.is_empty());
    assert_eq!(store.calls(), vec!["find_orders_by_date", "find_packages_by_ids"]);
}

#[tokio::test]
async fn resolver_uses_the_local_calendar_day() {
    let (engine, _) = catalog("resolver_local_day.wal").await;
    engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
    // 23:30 at +07:00 on the 10th is still the 10th.
    let late = at(7, "2024-03-10", 23, 30);
    assert_eq!(
        engine.resolve_exclusions(Some(&late)).await.unwrap(),
        HashSet::from([1])
    );
}

#[tokio::test]
async fn resolver_store_failure_is_infrastructure() {
    let (engine, store) = catalog("resolver_failure.wal").await;
    store.fail_find_orders.store(true, Ordering::SeqCst);
    let err = engine
        .resolve_exclusions(Some(&utc("2024-03-10")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert!(err.to_string().contains("find_orders_by_date"));
}

// ── Booking guard ────────────────────────────────────────

#[tokio::test]
async fn first_booking_succeeds_and_is_stored_at_midnight() {
    let (engine, store) = catalog("guard_first.wal").await;
    let id = engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
    assert_eq!(
        store.calls(),
        vec!["find_package_by_id", "find_order_by_package_and_date", "create_order"]
    );
    let day = Day::parse("2024-03-10").unwrap();
    let stored = store
        .inner
        .find_order_by_package_and_date(42, day)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, id);
    assert_eq!(stored.user_id, 7);
    assert_eq!(stored.date.as_datetime(), crate::calendar::start_of(day.date()));
}

#[tokio::test]
async fn same_package_same_day_is_a_conflict() {
    let (engine, store) = catalog("guard_conflict.wal").await;
    engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
    store.clear_calls();

    // Different requester, different time of day: still the same slot.
    let err = engine
        .place_order(42, 8, &at(0, "2024-03-10", 18, 45))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("already reserved"));
    assert!(!store.calls().contains(&"create_order"));
    assert_eq!(store.inner.order_count(), 1);
}

#[tokio::test]
async fn next_day_is_free() {
    let (engine, _) = catalog("guard_next_day.wal").await;
    let a = assert_ok!(engine.place_order(42, 7, &utc("2024-03-10")).await);
    let b = assert_ok!(engine.place_order(42, 7, &utc("2024-03-11")).await);
    assert_ne!(a, b);
}

#[tokio::test]
async fn missing_package_names_date_and_id() {
    let (engine, store) = catalog("guard_missing.wal").await;
    let err = engine
        .place_order(9999, 7, &utc("2024-03-10"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let msg = err.to_string();
    assert!(msg.contains("9999") && msg.contains("2024-03-10"), "{msg}");
    assert_eq!(store.calls(), vec!["find_package_by_id"]);
}

#[tokio::test]
async fn commit_failure_is_infrastructure_not_conflict() {
    let (engine, store) = catalog("guard_commit_failure.wal").await;
    store.fail_create_order.store(true, Ordering::SeqCst);
    let err = engine
        .place_order(42, 7, &utc("2024-03-10"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert!(err.to_string().contains("create_order"));

    // Nothing was claimed, so the slot is still bookable.
    store.fail_create_order.store(false, Ordering::SeqCst);
    engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
}

#[tokio::test]
async fn losing_the_commit_race_is_a_conflict() {
    let (engine, store) = catalog("guard_race_path.wal").await;
    engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
    // Pre-check sees nothing; the unique index still refuses.
    store.blind_conflict_check.store(true, Ordering::SeqCst);
    let err = engine
        .place_order(42, 8, &utc("2024-03-10"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn concurrent_bookings_of_one_slot_admit_exactly_one() {
    let (engine, store) = catalog("guard_concurrent.wal").await;
    let day = utc("2024-07-01");
    let (a, b) = tokio::join!(engine.place_order(42, 7, &day), engine.place_order(42, 8, &day));
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser.kind(), ErrorKind::Conflict);
    assert_eq!(
        store
            .inner
            .find_orders_by_date(Day::parse("2024-07-01").unwrap())
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn many_tasks_racing_for_one_slot() {
    let (engine, _) = catalog("guard_many_tasks.wal").await;
    let mut handles = Vec::new();
    for requester in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.place_order(50, requester, &utc("2024-08-08")).await
        }));
    }
    let mut won = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test]
async fn booking_and_listing_share_one_notion_of_day() {
    let (engine, _) = catalog("guard_shared_day.wal").await;
    // Booked late evening at +07:00; listed early morning at -05:00.
    engine.place_order(42, 7, &at(7, "2024-03-10", 22, 0)).await.unwrap();
    let listing = engine
        .list_venues(&VenueQuery {
            date: Some(at(-5, "2024-03-10", 6, 0)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&listing), vec![2, 3]);
}

// ── Catalog queries ──────────────────────────────────────

#[tokio::test]
async fn listing_without_date_is_everything_enriched() {
    let (engine, store) = catalog("list_all.wal").await;
    let page = engine.list_venues(&VenueQuery::default()).await.unwrap();
    assert_eq!(ids(&page), vec![1, 2, 3]);
    assert_eq!(
        page.pagination,
        Pagination {
            page: 1,
            total_pages: 1,
            current_items: 3,
            total_items: 3,
        }
    );
    let first = &page.venues[0];
    assert_eq!(first.city.as_ref().map(|c| c.name.as_str()), Some("Jakarta"));
    assert_eq!(first.gallery, vec!["https://img.example/g-1a.jpg".to_string()]);
    assert!(page.venues[1].gallery.is_empty());
    assert_eq!(
        store.calls(),
        vec!["find_venues", "find_cities", "find_galleries_by_venue_ids"]
    );
}

#[tokio::test]
async fn listing_for_a_booked_day_hides_the_venue() {
    let (engine, _) = catalog("list_booked.wal").await;
    engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
    let booked = engine
        .list_venues(&VenueQuery {
            date: Some(utc("2024-03-10")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&booked), vec![2, 3]);
    assert_eq!(booked.pagination.total_items, 2);

    let free = engine
        .list_venues(&VenueQuery {
            date: Some(utc("2024-03-11")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&free), vec![1, 2, 3]);
}

#[tokio::test]
async fn listing_filters_and_pages() {
    let (engine, _) = catalog("list_filters.wal").await;
    let jakarta = engine
        .list_venues(&VenueQuery {
            city_id: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&jakarta), vec![1, 2]);

    let favourites = engine
        .list_venues(&VenueQuery {
            favourites_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&favourites), vec![1]);

    let second = engine
        .list_venues(&VenueQuery {
            page: Some(2),
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&second), vec![3]);
    assert_eq!(
        second.pagination,
        Pagination {
            page: 2,
            total_pages: 2,
            current_items: 1,
            total_items: 3,
        }
    );
}

#[tokio::test]
async fn zero_page_and_limit_fall_back_to_defaults() {
    let (engine, _) = catalog("list_defaults.wal").await;
    let page = engine
        .list_venues(&VenueQuery {
            page: Some(0),
            limit: Some(0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.pagination.page, 1);
    assert_eq!(page.venues.len(), 3);
}

#[tokio::test]
async fn venue_detail_groups_packages_by_category() {
    let (engine, _) = catalog("detail_venue.wal").await;
    let detail = engine.venue_detail(1).await.unwrap();
    assert_eq!(detail.name, "Venue 1");
    assert_eq!(detail.categories.len(), 1);
    let packages: Vec<PackageId> = detail.categories[0].packages.iter().map(|p| p.id).collect();
    assert_eq!(packages, vec![42, 43]);

    let err = engine.venue_detail(404).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn package_detail_carries_venue_contact_and_gallery() {
    let (engine, _) = catalog("detail_package.wal").await;
    let detail = engine.package_detail(42).await.unwrap();
    assert_eq!(detail.venue_name, "Venue 1");
    assert_eq!(detail.venue_phone, "+62-1");
    assert_eq!(detail.gallery.len(), 1);

    let err = engine.package_detail(9999).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn nearby_counts_venues_per_city() {
    let (engine, _) = catalog("nearby.wal").await;
    engine.add_city(City { id: 3, name: "Empty".into() }).await.unwrap();
    let nearby = engine.nearby().await.unwrap();
    assert_eq!(
        nearby,
        vec![
            NearbyCity {
                city_id: 1,
                city_name: "Jakarta".into(),
                total_venues: 2,
                thumbnail_url: "https://img.example/venue-1.jpg".into(),
            },
            NearbyCity {
                city_id: 2,
                city_name: "Bandung".into(),
                total_venues: 1,
                thumbnail_url: "https://img.example/venue-3.jpg".into(),
            },
        ]
    );
}

// ── Catalog administration ───────────────────────────────

#[tokio::test]
async fn admin_inserts_map_store_errors() {
    let (engine, _) = catalog("admin_errors.wal").await;
    let dup = engine.add_city(City { id: 1, name: "Again".into() }).await.unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::Conflict);

    let orphan = engine.add_venue(venue(9, 99)).await.unwrap_err();
    assert_eq!(orphan.kind(), ErrorKind::NotFound);
    assert!(orphan.to_string().contains("city 99"), "{orphan}");

    let blank = engine.add_city(City { id: 5, name: "  ".into() }).await.unwrap_err();
    assert_eq!(blank.kind(), ErrorKind::Validation);

    let mut bad_price = venue(9, 1);
    bad_price.min_price = 10_000.0;
    assert_eq!(
        engine.add_venue(bad_price).await.unwrap_err().kind(),
        ErrorKind::Validation
    );
}

// ── Accounts ─────────────────────────────────────────────

#[tokio::test]
async fn register_then_login_issues_a_usable_token() {
    let (engine, _) = catalog("accounts_login.wal").await;
    let user = engine
        .register("Guest@Example.com", "Guest Seven", "hunter2")
        .await
        .unwrap();
    assert_eq!(user.email, "guest@example.com");
    assert_ne!(user.password_hash, "hunter2");
    assert!(user.password_hash.starts_with("pbkdf2-sha256$"));

    let session = engine.login("GUEST@example.com", "hunter2").await.unwrap();
    assert_eq!(session.user_id, user.id);
    assert_eq!(session.fullname, "Guest Seven");

    let claims = engine.authenticate(&session.access_token).unwrap();
    assert_eq!(claims.id, user.id);

    let order = engine
        .place_order_as(&session.access_token, 42, &utc("2024-03-10"))
        .await
        .unwrap();
    let stored = engine
        .store()
        .inner
        .find_order_by_package_and_date(42, Day::parse("2024-03-10").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, order);
    assert_eq!(stored.user_id, user.id);
}

#[tokio::test]
async fn duplicate_and_blank_registrations_are_validation_errors() {
    let (engine, _) = catalog("accounts_register.wal").await;
    engine.register("a@example.com", "A", "pw").await.unwrap();
    let dup = engine.register("A@EXAMPLE.COM", "B", "pw").await.unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::Validation);
    assert!(dup.to_string().contains("already registered"));

    for (email, name, pw) in [("", "A", "pw"), ("b@example.com", " ", "pw"), ("c@example.com", "C", "")] {
        let err = engine.register(email, name, pw).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{email:?} {name:?} {pw:?}");
    }
}

#[tokio::test]
async fn bad_logins_are_indistinguishable() {
    let (engine, _) = catalog("accounts_bad_login.wal").await;
    engine.register("a@example.com", "A", "right").await.unwrap();
    let wrong_pw = assert_err!(engine.login("a@example.com", "wrong").await);
    let unknown = assert_err!(engine.login("nobody@example.com", "right").await);
    assert_eq!(wrong_pw.kind(), ErrorKind::Unauthorized);
    assert_eq!(unknown.kind(), ErrorKind::Unauthorized);
    assert_eq!(wrong_pw.to_string(), unknown.to_string());
}

#[tokio::test]
async fn ordering_without_a_valid_token_is_unauthorized() {
    let (engine, store) = catalog("accounts_token.wal").await;
    for token in ["", "garbage", "a.b.c"] {
        let err = engine
            .place_order_as(token, 42, &utc("2024-03-10"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
    assert!(store.calls().is_empty());
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn bookings_survive_restart() {
    let path = test_wal_path("restart.wal");
    {
        let store = Arc::new(MemoryStore::open(&path).unwrap());
        let engine = Engine::new(store, credentials());
        engine.add_city(City { id: 1, name: "Jakarta".into() }).await.unwrap();
        engine.add_venue(venue(1, 1)).await.unwrap();
        engine
            .add_category(PackageCategory {
                id: 10,
                venue_id: 1,
                description: "Wedding".into(),
            })
            .await
            .unwrap();
        engine.add_package(package(42, 10)).await.unwrap();
        engine.place_order(42, 7, &utc("2024-03-10")).await.unwrap();
    }

    let store = Arc::new(MemoryStore::open(&path).unwrap());
    let engine = Engine::new(store, credentials());
    let err = engine
        .place_order(42, 8, &utc("2024-03-10"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(
        engine
            .resolve_exclusions(Some(&utc("2024-03-10")))
            .await
            .unwrap(),
        HashSet::from([1])
    );
}
