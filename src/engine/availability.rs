use std::collections::HashSet;

use chrono::{DateTime, TimeZone};
use tracing::debug;

use crate::calendar::Day;
use crate::limits::MAX_BATCH_IDS;
use crate::model::{CategoryId, PackageId, VenueId};
use crate::store::Store;

use super::error::store_err;
use super::{Engine, EngineError};

/// Collect the distinct values of `f` over `rows`, keeping first-seen order.
fn distinct<T, K: Copy + Eq + std::hash::Hash>(rows: &[T], f: impl Fn(&T) -> K) -> Vec<K> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.iter().map(f).filter(|k| seen.insert(*k)).collect()
}

impl<S: Store> Engine<S> {
    /// Venues that cannot be booked on the calendar day of `date`.
    ///
    /// Orders on the day → their packages → those packages' categories →
    /// the categories' venues. One batched store call per hop (split past
    /// [`MAX_BATCH_IDS`]); an empty hop ends the walk with an empty set. No
    /// date excludes nothing.
    pub async fn resolve_exclusions<Tz: TimeZone>(
        &self,
        date: Option<&DateTime<Tz>>,
    ) -> Result<HashSet<VenueId>, EngineError> {
        let Some(date) = date else {
            return Ok(HashSet::new());
        };
        self.exclusions_for_day(Day::of(date), MAX_BATCH_IDS).await
    }

    /// The three-hop walk for one day, with id lists split into chunks of
    /// at most `batch` per store call.
    pub(super) async fn exclusions_for_day(
        &self,
        day: Day,
        batch: usize,
    ) -> Result<HashSet<VenueId>, EngineError> {
        let batch = batch.max(1);
        let orders = self
            .store
            .find_orders_by_date(day)
            .await
            .map_err(store_err("find_orders_by_date", format!("date {day}")))?;
        let package_ids: Vec<PackageId> = distinct(&orders, |o| o.package_id);
        debug!(%day, orders = orders.len(), packages = package_ids.len(), "exclusion hop: orders");
        if package_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut packages = Vec::with_capacity(package_ids.len());
        for chunk in package_ids.chunks(batch) {
            packages.extend(
                self.store
                    .find_packages_by_ids(chunk)
                    .await
                    .map_err(store_err("find_packages_by_ids", format!("{} ids on {day}", chunk.len())))?,
            );
        }
        let category_ids: Vec<CategoryId> = distinct(&packages, |p| p.category_id);
        debug!(%day, categories = category_ids.len(), "exclusion hop: packages");
        if category_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut venues: HashSet<VenueId> = HashSet::new();
        for chunk in category_ids.chunks(batch) {
            let categories = self
                .store
                .find_categories_by_ids(chunk)
                .await
                .map_err(store_err(
                    "find_categories_by_ids",
                    format!("{} ids on {day}", chunk.len()),
                ))?;
            venues.extend(categories.iter().map(|c| c.venue_id));
        }
        debug!(%day, venues = venues.len(), "exclusion hop: categories");
        Ok(venues)
    }
}
