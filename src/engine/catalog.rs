use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::observability::EXCLUDED_VENUES;
use crate::store::{Store, StoreError};

use super::error::store_err;
use super::{Engine, EngineError};

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::invalid(field, format!("longer than {max} bytes")));
    }
    Ok(())
}

fn check_name(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::invalid(field, "must not be blank"));
    }
    check_len(field, value, MAX_NAME_LEN)
}

fn check_id(field: &'static str, id: i64) -> Result<(), EngineError> {
    if id <= 0 {
        return Err(EngineError::invalid(field, "must be positive"));
    }
    Ok(())
}

fn check_price(field: &'static str, value: f64) -> Result<(), EngineError> {
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::invalid(field, "must be a non-negative number"));
    }
    Ok(())
}

/// Catalog writes share one error mapping: taken ids are conflicts,
/// missing parents are not-found, everything else is infrastructure.
fn catalog_err(op: &'static str, id: i64) -> impl FnOnce(StoreError) -> EngineError {
    move |e| match e {
        StoreError::Duplicate { entity, key } => EngineError::AlreadyExists { entity, key },
        StoreError::MissingParent {
            parent, parent_id, ..
        } => EngineError::NotFound {
            entity: parent,
            id: parent_id,
        },
        other => store_err(op, format!("id {id}"))(other),
    }
}

impl<S: Store> Engine<S> {
    // ── Queries ──────────────────────────────────────────────

    /// One page of venues, minus those unavailable on `query.date`, each
    /// enriched with its city and gallery.
    pub async fn list_venues(&self, query: &VenueQuery) -> Result<VenuePage, EngineError> {
        let page = query.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);

        let exclude_ids = self.resolve_exclusions(query.date.as_ref()).await?;
        if query.date.is_some() {
            metrics::histogram!(EXCLUDED_VENUES).record(exclude_ids.len() as f64);
        }

        let filter = VenueFilter {
            exclude_ids,
            city_ids: query.city_id.into_iter().collect(),
            favourites_only: query.favourites_only,
            page: Some(PageRequest { page, limit }),
            ..Default::default()
        };
        let (venues, pagination) = self
            .store
            .find_venues(&filter)
            .await
            .map_err(store_err("find_venues", format!("page {page} limit {limit}")))?;

        Ok(VenuePage {
            venues: self.enrich(venues).await?,
            pagination: pagination.unwrap_or_default(),
        })
    }

    /// Attach city and gallery to each venue with one lookup apiece.
    async fn enrich(&self, venues: Vec<Venue>) -> Result<Vec<VenueListing>, EngineError> {
        if venues.is_empty() {
            return Ok(Vec::new());
        }
        let cities: HashMap<CityId, City> = self
            .store
            .find_cities()
            .await
            .map_err(store_err("find_cities", "venue enrichment"))?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let ids: Vec<VenueId> = venues.iter().map(|v| v.id).collect();
        let mut galleries = self
            .store
            .find_galleries_by_venue_ids(&ids)
            .await
            .map_err(store_err("find_galleries_by_venue_ids", format!("{} venues", ids.len())))?;

        Ok(venues
            .into_iter()
            .map(|venue| VenueListing {
                city: cities.get(&venue.city_id).cloned(),
                gallery: galleries.remove(&venue.id).unwrap_or_default(),
                venue,
            })
            .collect())
    }

    pub async fn list_cities(&self) -> Result<Vec<City>, EngineError> {
        self.store
            .find_cities()
            .await
            .map_err(store_err("find_cities", "all"))
    }

    async fn venue_by_id(&self, id: VenueId) -> Result<VenueListing, EngineError> {
        let filter = VenueFilter {
            id: Some(id),
            ..Default::default()
        };
        let (venues, _) = self
            .store
            .find_venues(&filter)
            .await
            .map_err(store_err("find_venues", format!("venue {id}")))?;
        self.enrich(venues)
            .await?
            .into_iter()
            .next()
            .ok_or(EngineError::NotFound { entity: "venue", id })
    }

    /// A venue with its categories and each category's packages.
    pub async fn venue_detail(&self, id: VenueId) -> Result<VenueDetail, EngineError> {
        let venue = self.venue_by_id(id).await?.venue;

        let categories = self
            .store
            .find_categories_by_venue_id(id)
            .await
            .map_err(store_err("find_categories_by_venue_id", format!("venue {id}")))?;
        let category_ids: Vec<CategoryId> = categories.iter().map(|c| c.id).collect();

        let mut by_category: HashMap<CategoryId, Vec<Package>> = HashMap::new();
        if !category_ids.is_empty() {
            let packages = self
                .store
                .find_packages_by_category_ids(&category_ids)
                .await
                .map_err(store_err(
                    "find_packages_by_category_ids",
                    format!("venue {id}"),
                ))?;
            for package in packages {
                by_category.entry(package.category_id).or_default().push(package);
            }
        }

        Ok(VenueDetail {
            id: venue.id,
            name: venue.name,
            description: venue.description,
            website: venue.website,
            phone: venue.phone,
            email: venue.email,
            instagram: venue.instagram,
            address: venue.address,
            logo: venue.logo,
            categories: categories
                .into_iter()
                .map(|c| CategoryDetail {
                    packages: by_category.remove(&c.id).unwrap_or_default(),
                    id: c.id,
                    description: c.description,
                })
                .collect(),
        })
    }

    /// A package with the name, phone and gallery of the venue that offers it.
    pub async fn package_detail(&self, id: PackageId) -> Result<PackageDetail, EngineError> {
        let package = self
            .store
            .find_package_by_id(id)
            .await
            .map_err(store_err("find_package_by_id", format!("package {id}")))?
            .ok_or(EngineError::NotFound { entity: "package", id })?;
        let category = self
            .store
            .find_categories_by_ids(&[package.category_id])
            .await
            .map_err(store_err(
                "find_categories_by_ids",
                format!("category {}", package.category_id),
            ))?
            .into_iter()
            .next()
            .ok_or(EngineError::NotFound {
                entity: "category",
                id: package.category_id,
            })?;
        let listing = self.venue_by_id(category.venue_id).await?;

        Ok(PackageDetail {
            id: package.id,
            name: package.name,
            thumbnail_url: package.thumbnail_url,
            price: package.price,
            capacity: package.capacity,
            description: package.description,
            venue_name: listing.venue.name,
            venue_phone: listing.venue.phone,
            gallery: listing.gallery,
        })
    }

    /// Venue count and a thumbnail per city that has venues, by city id.
    pub async fn nearby(&self) -> Result<Vec<NearbyCity>, EngineError> {
        let cities = self.list_cities().await?;
        if cities.is_empty() {
            return Ok(Vec::new());
        }
        let filter = VenueFilter {
            city_ids: cities.iter().map(|c| c.id).collect(),
            ..Default::default()
        };
        let (venues, _) = self
            .store
            .find_venues(&filter)
            .await
            .map_err(store_err("find_venues", format!("{} cities", cities.len())))?;

        // Venues arrive ordered by id, so the first one seen per city wins.
        let mut per_city: BTreeMap<CityId, (u32, String)> = BTreeMap::new();
        for venue in venues {
            per_city
                .entry(venue.city_id)
                .and_modify(|(count, _)| *count += 1)
                .or_insert((1, venue.thumbnail_url));
        }
        let names: HashMap<CityId, String> = cities.into_iter().map(|c| (c.id, c.name)).collect();
        Ok(per_city
            .into_iter()
            .filter_map(|(city_id, (total_venues, thumbnail_url))| {
                names.get(&city_id).map(|name| NearbyCity {
                    city_id,
                    city_name: name.clone(),
                    total_venues,
                    thumbnail_url,
                })
            })
            .collect())
    }

    // ── Administration ───────────────────────────────────────

    pub async fn add_city(&self, city: City) -> Result<(), EngineError> {
        check_id("id", city.id)?;
        check_name("name", &city.name)?;
        let id = city.id;
        self.store
            .insert_city(city)
            .await
            .map_err(catalog_err("insert_city", id))?;
        info!(id, "city added");
        Ok(())
    }

    pub async fn add_venue(&self, venue: Venue) -> Result<(), EngineError> {
        check_id("id", venue.id)?;
        check_name("name", &venue.name)?;
        check_price("min_price", venue.min_price)?;
        check_price("max_price", venue.max_price)?;
        if venue.min_price > venue.max_price {
            return Err(EngineError::invalid("min_price", "greater than max_price"));
        }
        if !(0.0..=5.0).contains(&venue.star) {
            return Err(EngineError::invalid("star", "must be between 0 and 5"));
        }
        check_len("description", &venue.description, MAX_TEXT_LEN)?;
        check_len("address", &venue.address, MAX_TEXT_LEN)?;
        for (field, url) in [
            ("thumbnail_url", &venue.thumbnail_url),
            ("website", &venue.website),
            ("instagram", &venue.instagram),
            ("logo", &venue.logo),
        ] {
            check_len(field, url, MAX_URL_LEN)?;
        }
        check_len("phone", &venue.phone, MAX_NAME_LEN)?;
        check_len("email", &venue.email, MAX_EMAIL_LEN)?;

        let id = venue.id;
        self.store
            .insert_venue(venue)
            .await
            .map_err(catalog_err("insert_venue", id))?;
        info!(id, "venue added");
        Ok(())
    }

    pub async fn add_category(&self, category: PackageCategory) -> Result<(), EngineError> {
        check_id("id", category.id)?;
        check_name("description", &category.description)?;
        let id = category.id;
        self.store
            .insert_category(category)
            .await
            .map_err(catalog_err("insert_category", id))?;
        info!(id, "category added");
        Ok(())
    }

    pub async fn add_package(&self, package: Package) -> Result<(), EngineError> {
        check_id("id", package.id)?;
        check_name("name", &package.name)?;
        check_price("price", package.price)?;
        check_len("thumbnail_url", &package.thumbnail_url, MAX_URL_LEN)?;
        check_len("description", &package.description, MAX_TEXT_LEN)?;
        let id = package.id;
        self.store
            .insert_package(package)
            .await
            .map_err(catalog_err("insert_package", id))?;
        info!(id, "package added");
        Ok(())
    }

    pub async fn add_gallery_image(&self, image: GalleryImage) -> Result<(), EngineError> {
        check_id("id", image.id)?;
        check_name("file_url", &image.file_url)?;
        check_len("file_url", &image.file_url, MAX_URL_LEN)?;
        let id = image.id;
        self.store
            .insert_gallery_image(image)
            .await
            .map_err(catalog_err("insert_gallery_image", id))?;
        info!(id, "gallery image added");
        Ok(())
    }
}
