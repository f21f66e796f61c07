use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::Day;

pub type CityId = i64;
pub type VenueId = i64;
pub type CategoryId = i64;
pub type PackageId = i64;
pub type GalleryImageId = i64;
pub type UserId = i64;
pub type OrderId = Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub id: CityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub city_id: CityId,
    pub name: String,
    pub min_price: f64,
    pub max_price: f64,
    pub capacity: u32,
    pub star: f64,
    pub review_count: u32,
    pub thumbnail_url: String,
    pub description: String,
    pub website: String,
    pub phone: String,
    pub email: String,
    pub instagram: String,
    pub address: String,
    pub logo: String,
    pub is_favourite: bool,
}

/// Groups a venue's packages ("wedding", "meeting", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCategory {
    pub id: CategoryId,
    pub venue_id: VenueId,
    pub description: String,
}

/// The bookable unit. Owned by one category and, through it, one venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub category_id: CategoryId,
    pub name: String,
    pub thumbnail_url: String,
    pub price: f64,
    pub capacity: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub id: GalleryImageId,
    pub venue_id: VenueId,
    pub file_url: String,
}

/// A reservation of one package for one day. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub package_id: PackageId,
    pub user_id: UserId,
    pub date: Day,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Lower-cased; identity for login.
    pub email: String,
    pub fullname: String,
    /// Salted hash, see [`crate::credentials::hash_password`].
    pub password_hash: String,
}

/// A user before the store has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub fullname: String,
    pub password_hash: String,
}

/// WAL record. One variant per durable mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CityAdded(City),
    VenueAdded(Venue),
    CategoryAdded(PackageCategory),
    PackageAdded(Package),
    GalleryImageAdded(GalleryImage),
    UserRegistered(User),
    OrderPlaced(Order),
}

// ── Store filters ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

/// Venue selection pushed down to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VenueFilter {
    pub id: Option<VenueId>,
    /// `id NOT IN (...)`; filled by the availability resolver.
    pub exclude_ids: HashSet<VenueId>,
    /// `city_id IN (...)`; empty means any city.
    pub city_ids: Vec<CityId>,
    pub favourites_only: bool,
    /// `None` returns every match and no pagination.
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub page: u32,
    pub total_pages: u32,
    pub current_items: u32,
    pub total_items: u32,
}

// ── Engine queries and results ───────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VenueQuery {
    pub city_id: Option<CityId>,
    pub favourites_only: bool,
    /// Only venues with no booked package on this day.
    pub date: Option<DateTime<FixedOffset>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VenueListing {
    pub venue: Venue,
    pub city: Option<City>,
    pub gallery: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VenuePage {
    pub venues: Vec<VenueListing>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryDetail {
    pub id: CategoryId,
    pub description: String,
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueDetail {
    pub id: VenueId,
    pub name: String,
    pub description: String,
    pub website: String,
    pub phone: String,
    pub email: String,
    pub instagram: String,
    pub address: String,
    pub logo: String,
    pub categories: Vec<CategoryDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageDetail {
    pub id: PackageId,
    pub name: String,
    pub thumbnail_url: String,
    pub price: f64,
    pub capacity: u32,
    pub description: String,
    pub venue_name: String,
    pub venue_phone: String,
    pub gallery: Vec<String>,
}

/// Per-city venue summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearbyCity {
    pub city_id: CityId,
    pub city_name: String,
    pub total_venues: u32,
    pub thumbnail_url: String,
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub fullname: String,
    pub access_token: String,
}
