use chrono::{DateTime, TimeZone};
use tracing::{info, warn};
use ulid::Ulid;

use crate::calendar::Day;
use crate::model::{Order, OrderId, PackageId, UserId};
use crate::observability::{ORDER_REJECTIONS_TOTAL, ORDERS_PLACED_TOTAL};
use crate::store::{Store, StoreError};

use super::error::store_err;
use super::{Engine, EngineError};

/// Step of [`Engine::place_order`] at which an attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStage {
    PackageCheck,
    ConflictCheck,
    Commit,
}

impl BookingStage {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStage::PackageCheck => "package_check",
            BookingStage::ConflictCheck => "conflict_check",
            BookingStage::Commit => "commit",
        }
    }
}

fn rejected(stage: BookingStage, err: EngineError) -> EngineError {
    let kind = err.kind();
    warn!(stage = stage.as_str(), kind = kind.as_str(), "order rejected: {err}");
    metrics::counter!(ORDER_REJECTIONS_TOTAL, "stage" => stage.as_str(), "kind" => kind.as_str())
        .increment(1);
    err
}

impl<S: Store> Engine<S> {
    /// Reserve `package_id` for the calendar day of `date`.
    ///
    /// The package must exist, and no order may already hold the package on
    /// that day. The store's unique index settles races between concurrent
    /// attempts: the loser gets the same conflict as a sequential duplicate.
    /// Store failures surface as infrastructure errors, never as conflicts.
    pub async fn place_order<Tz: TimeZone>(
        &self,
        package_id: PackageId,
        requester_id: UserId,
        date: &DateTime<Tz>,
    ) -> Result<OrderId, EngineError> {
        let package = self
            .store
            .find_package_by_id(package_id)
            .await
            .map_err(store_err("find_package_by_id", format!("package {package_id}")))
            .map_err(|e| rejected(BookingStage::PackageCheck, e))?;
        if package.is_none() {
            return Err(rejected(
                BookingStage::PackageCheck,
                EngineError::PackageNotFound {
                    package_id,
                    date: date.date_naive(),
                },
            ));
        }

        let day = Day::of(date);

        let existing = self
            .store
            .find_order_by_package_and_date(package_id, day)
            .await
            .map_err(store_err(
                "find_order_by_package_and_date",
                format!("package {package_id} on {day}"),
            ))
            .map_err(|e| rejected(BookingStage::ConflictCheck, e))?;
        if existing.is_some() {
            return Err(rejected(
                BookingStage::ConflictCheck,
                EngineError::DateUnavailable {
                    package_id,
                    date: day,
                },
            ));
        }

        let order = Order {
            id: Ulid::new(),
            package_id,
            user_id: requester_id,
            date: day,
        };
        let order_id = match self.store.create_order(order).await {
            Ok(id) => id,
            Err(StoreError::Duplicate { .. }) => {
                return Err(rejected(
                    BookingStage::Commit,
                    EngineError::DateUnavailable {
                        package_id,
                        date: day,
                    },
                ));
            }
            Err(e) => {
                let err = store_err("create_order", format!("package {package_id} on {day}"))(e);
                tracing::error!("{err}");
                return Err(rejected(BookingStage::Commit, err));
            }
        };

        metrics::counter!(ORDERS_PLACED_TOTAL).increment(1);
        info!(%order_id, package_id, requester_id, %day, "order placed");
        Ok(order_id)
    }
}
