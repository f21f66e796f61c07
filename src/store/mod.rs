//! Durable state behind the engine.
//!
//! The engine only talks to [`Store`]. Every lookup that fans out over ids
//! takes the whole id set in one call so callers never loop per record.

mod memory;
mod writer;

pub use memory::MemoryStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::calendar::Day;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A unique key is already taken. For orders the key is `(package, day)`.
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },
    /// A record references a parent that does not exist.
    #[error("{entity} references missing {parent} {parent_id}")]
    MissingParent {
        entity: &'static str,
        parent: &'static str,
        parent_id: i64,
    },
    #[error("WAL error: {0}")]
    Wal(String),
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Orders ───────────────────────────────────────────────

    async fn find_orders_by_date(&self, day: Day) -> Result<Vec<Order>, StoreError>;

    async fn find_order_by_package_and_date(
        &self,
        package_id: PackageId,
        day: Day,
    ) -> Result<Option<Order>, StoreError>;

    /// Atomic check-then-insert on the `(package_id, date)` index.
    /// A taken slot is [`StoreError::Duplicate`].
    async fn create_order(&self, order: Order) -> Result<OrderId, StoreError>;

    // ── Packages and categories ──────────────────────────────

    async fn find_package_by_id(&self, id: PackageId) -> Result<Option<Package>, StoreError>;

    async fn find_packages_by_ids(&self, ids: &[PackageId]) -> Result<Vec<Package>, StoreError>;

    async fn find_packages_by_category_ids(
        &self,
        ids: &[CategoryId],
    ) -> Result<Vec<Package>, StoreError>;

    async fn find_categories_by_ids(
        &self,
        ids: &[CategoryId],
    ) -> Result<Vec<PackageCategory>, StoreError>;

    async fn find_categories_by_venue_id(
        &self,
        venue_id: VenueId,
    ) -> Result<Vec<PackageCategory>, StoreError>;

    // ── Venues, cities, galleries ────────────────────────────

    /// Venues matching `filter`, ordered by id. Pagination metadata is
    /// returned only when `filter.page` is set.
    async fn find_venues(
        &self,
        filter: &VenueFilter,
    ) -> Result<(Vec<Venue>, Option<Pagination>), StoreError>;

    async fn find_cities(&self) -> Result<Vec<City>, StoreError>;

    /// Image URLs per venue, in insertion order. Venues without images are absent.
    async fn find_galleries_by_venue_ids(
        &self,
        ids: &[VenueId],
    ) -> Result<HashMap<VenueId, Vec<String>>, StoreError>;

    // ── Users ────────────────────────────────────────────────

    /// `email` must already be lower-cased.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Assigns the id. A taken email is [`StoreError::Duplicate`].
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    // ── Catalog writes ───────────────────────────────────────

    async fn insert_city(&self, city: City) -> Result<(), StoreError>;

    async fn insert_venue(&self, venue: Venue) -> Result<(), StoreError>;

    async fn insert_category(&self, category: PackageCategory) -> Result<(), StoreError>;

    async fn insert_package(&self, package: Package) -> Result<(), StoreError>;

    async fn insert_gallery_image(&self, image: GalleryImage) -> Result<(), StoreError>;
}
