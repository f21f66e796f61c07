use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, mpsc, oneshot};

use super::writer::{self, Append};
use super::{Store, StoreError};
use crate::calendar::Day;
use crate::model::*;

const WAL_CHANNEL_CAPACITY: usize = 4096;

/// In-memory store rebuilt from the WAL on open.
///
/// Catalog and user writes are serialized by `writes`. Orders are not: the
/// `(package, day)` slot index is claimed with a single `entry()` call, so
/// concurrent bookings of the same slot race on the index and exactly one
/// of them gets to append.
pub struct MemoryStore {
    cities: DashMap<CityId, City>,
    venues: DashMap<VenueId, Venue>,
    categories: DashMap<CategoryId, PackageCategory>,
    packages: DashMap<PackageId, Package>,
    gallery_images: DashMap<GalleryImageId, VenueId>,
    galleries: DashMap<VenueId, Vec<String>>,
    users: DashMap<UserId, User>,
    user_by_email: DashMap<String, UserId>,
    next_user_id: AtomicI64,
    /// Unique order index. A slot is claimed before its record is durable.
    order_slots: DashMap<(PackageId, Day), OrderId>,
    /// Committed orders only.
    orders: DashMap<OrderId, Order>,
    orders_by_day: DashMap<Day, Vec<OrderId>>,
    writes: Mutex<()>,
    wal_tx: mpsc::Sender<Append>,
    wal_path: PathBuf,
}

impl MemoryStore {
    /// Replay `wal_path`, cut any torn tail, and start the group-commit
    /// writer. Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let (wal, events) = crate::wal::Wal::recover(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(writer::run(wal, wal_rx));

        let store = Self {
            cities: DashMap::new(),
            venues: DashMap::new(),
            categories: DashMap::new(),
            packages: DashMap::new(),
            gallery_images: DashMap::new(),
            galleries: DashMap::new(),
            users: DashMap::new(),
            user_by_email: DashMap::new(),
            next_user_id: AtomicI64::new(1),
            order_slots: DashMap::new(),
            orders: DashMap::new(),
            orders_by_day: DashMap::new(),
            writes: Mutex::new(()),
            wal_tx,
            wal_path: wal_path.to_path_buf(),
        };
        for event in &events {
            store.apply(event);
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            venues = store.venues.len(),
            orders = store.orders.len(),
            "store loaded"
        );
        Ok(store)
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Apply a durable event to the in-memory maps.
    fn apply(&self, event: &Event) {
        match event {
            Event::CityAdded(city) => {
                self.cities.insert(city.id, city.clone());
            }
            Event::VenueAdded(venue) => {
                self.venues.insert(venue.id, venue.clone());
            }
            Event::CategoryAdded(category) => {
                self.categories.insert(category.id, category.clone());
            }
            Event::PackageAdded(package) => {
                self.packages.insert(package.id, package.clone());
            }
            Event::GalleryImageAdded(image) => {
                self.gallery_images.insert(image.id, image.venue_id);
                self.galleries
                    .entry(image.venue_id)
                    .or_default()
                    .push(image.file_url.clone());
            }
            Event::UserRegistered(user) => {
                self.next_user_id.fetch_max(user.id + 1, Ordering::Relaxed);
                self.user_by_email.insert(user.email.clone(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::OrderPlaced(order) => {
                self.order_slots.insert((order.package_id, order.date), order.id);
                self.orders_by_day.entry(order.date).or_default().push(order.id);
                self.orders.insert(order.id, order.clone());
            }
        }
    }

    /// Hand an event to the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (ack, done) = oneshot::channel();
        self.wal_tx
            .send(Append {
                event: event.clone(),
                ack,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        done.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply(&event);
        Ok(())
    }

    fn require_parent(
        present: bool,
        entity: &'static str,
        parent: &'static str,
        parent_id: i64,
    ) -> Result<(), StoreError> {
        if present {
            Ok(())
        } else {
            Err(StoreError::MissingParent {
                entity,
                parent,
                parent_id,
            })
        }
    }

    fn require_new(taken: bool, entity: &'static str, id: i64) -> Result<(), StoreError> {
        if taken {
            Err(StoreError::Duplicate {
                entity,
                key: id.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn paginate(mut venues: Vec<Venue>, page: PageRequest) -> (Vec<Venue>, Pagination) {
    let total = venues.len();
    let limit = page.limit.max(1) as usize;
    let offset = (page.page.max(1) as usize - 1).saturating_mul(limit);
    let window: Vec<Venue> = if offset >= total {
        Vec::new()
    } else {
        venues.drain(offset..total.min(offset + limit)).collect()
    };
    let pagination = Pagination {
        page: page.page,
        total_pages: total.div_ceil(limit) as u32,
        current_items: window.len() as u32,
        total_items: total as u32,
    };
    (window, pagination)
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_orders_by_date(&self, day: Day) -> Result<Vec<Order>, StoreError> {
        let Some(ids) = self.orders_by_day.get(&day).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.orders.get(id).map(|o| o.value().clone()))
            .collect())
    }

    async fn find_order_by_package_and_date(
        &self,
        package_id: PackageId,
        day: Day,
    ) -> Result<Option<Order>, StoreError> {
        let Some(id) = self.order_slots.get(&(package_id, day)).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.orders.get(&id).map(|o| o.value().clone()))
    }

    async fn create_order(&self, order: Order) -> Result<OrderId, StoreError> {
        let slot = (order.package_id, order.date);
        match self.order_slots.entry(slot) {
            Entry::Occupied(_) => {
                return Err(StoreError::Duplicate {
                    entity: "order",
                    key: format!("package {} on {}", order.package_id, order.date),
                });
            }
            Entry::Vacant(v) => {
                v.insert(order.id);
            }
        }
        // Shard guard released above; the slot stays claimed across the await.
        let id = order.id;
        let event = Event::OrderPlaced(order);
        if let Err(e) = self.wal_append(&event).await {
            self.order_slots.remove_if(&slot, |_, claimed| *claimed == id);
            return Err(e);
        }
        self.apply(&event);
        Ok(id)
    }

    async fn find_package_by_id(&self, id: PackageId) -> Result<Option<Package>, StoreError> {
        Ok(self.packages.get(&id).map(|p| p.value().clone()))
    }

    async fn find_packages_by_ids(&self, ids: &[PackageId]) -> Result<Vec<Package>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.packages.get(id).map(|p| p.value().clone()))
            .collect())
    }

    async fn find_packages_by_category_ids(
        &self,
        ids: &[CategoryId],
    ) -> Result<Vec<Package>, StoreError> {
        let mut found: Vec<Package> = self
            .packages
            .iter()
            .filter(|p| ids.contains(&p.category_id))
            .map(|p| p.value().clone())
            .collect();
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    async fn find_categories_by_ids(
        &self,
        ids: &[CategoryId],
    ) -> Result<Vec<PackageCategory>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.categories.get(id).map(|c| c.value().clone()))
            .collect())
    }

    async fn find_categories_by_venue_id(
        &self,
        venue_id: VenueId,
    ) -> Result<Vec<PackageCategory>, StoreError> {
        let mut found: Vec<PackageCategory> = self
            .categories
            .iter()
            .filter(|c| c.venue_id == venue_id)
            .map(|c| c.value().clone())
            .collect();
        found.sort_by_key(|c| c.id);
        Ok(found)
    }

    async fn find_venues(
        &self,
        filter: &VenueFilter,
    ) -> Result<(Vec<Venue>, Option<Pagination>), StoreError> {
        let mut matched: Vec<Venue> = self
            .venues
            .iter()
            .filter(|v| filter.id.is_none_or(|id| v.id == id))
            .filter(|v| !filter.exclude_ids.contains(&v.id))
            .filter(|v| filter.city_ids.is_empty() || filter.city_ids.contains(&v.city_id))
            .filter(|v| !filter.favourites_only || v.is_favourite)
            .map(|v| v.value().clone())
            .collect();
        matched.sort_by_key(|v| v.id);
        Ok(match filter.page {
            Some(page) => {
                let (window, pagination) = paginate(matched, page);
                (window, Some(pagination))
            }
            None => (matched, None),
        })
    }

    async fn find_cities(&self) -> Result<Vec<City>, StoreError> {
        let mut cities: Vec<City> = self.cities.iter().map(|c| c.value().clone()).collect();
        cities.sort_by_key(|c| c.id);
        Ok(cities)
    }

    async fn find_galleries_by_venue_ids(
        &self,
        ids: &[VenueId],
    ) -> Result<HashMap<VenueId, Vec<String>>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.galleries.get(id).map(|g| (*id, g.value().clone())))
            .collect())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let Some(id) = self.user_by_email.get(email).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let _guard = self.writes.lock().await;
        if self.user_by_email.contains_key(&user.email) {
            return Err(StoreError::Duplicate {
                entity: "user",
                key: user.email,
            });
        }
        let user = User {
            id: self.next_user_id.load(Ordering::Relaxed),
            email: user.email,
            fullname: user.fullname,
            password_hash: user.password_hash,
        };
        self.persist_and_apply(Event::UserRegistered(user.clone()))
            .await?;
        Ok(user)
    }

    async fn insert_city(&self, city: City) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        Self::require_new(self.cities.contains_key(&city.id), "city", city.id)?;
        self.persist_and_apply(Event::CityAdded(city)).await
    }

    async fn insert_venue(&self, venue: Venue) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        Self::require_new(self.venues.contains_key(&venue.id), "venue", venue.id)?;
        Self::require_parent(
            self.cities.contains_key(&venue.city_id),
            "venue",
            "city",
            venue.city_id,
        )?;
        self.persist_and_apply(Event::VenueAdded(venue)).await
    }

    async fn insert_category(&self, category: PackageCategory) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        Self::require_new(
            self.categories.contains_key(&category.id),
            "category",
            category.id,
        )?;
        Self::require_parent(
            self.venues.contains_key(&category.venue_id),
            "category",
            "venue",
            category.venue_id,
        )?;
        self.persist_and_apply(Event::CategoryAdded(category)).await
    }

    async fn insert_package(&self, package: Package) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        Self::require_new(self.packages.contains_key(&package.id), "package", package.id)?;
        Self::require_parent(
            self.categories.contains_key(&package.category_id),
            "package",
            "category",
            package.category_id,
        )?;
        self.persist_and_apply(Event::PackageAdded(package)).await
    }

    async fn insert_gallery_image(&self, image: GalleryImage) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        Self::require_new(
            self.gallery_images.contains_key(&image.id),
            "gallery image",
            image.id,
        )?;
        Self::require_parent(
            self.venues.contains_key(&image.venue_id),
            "gallery image",
            "venue",
            image.venue_id,
        )?;
        self.persist_and_apply(Event::GalleryImageAdded(image)).await
    }
}
