use std::sync::Arc;

use tracing::info;

use crate::availability::AvailabilityChecker;
use crate::error::{EntityKind, ServiceError};
use crate::model::*;
use crate::store::IntervalStore;

/// Vehicle catalogue and telemetry. Location and status updates never touch
/// reservations.
pub struct VehicleRegistry {
    store: Arc<dyn IntervalStore>,
}

impl VehicleRegistry {
    pub fn new(store: Arc<dyn IntervalStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, vehicle: Vehicle) -> Result<Vehicle, ServiceError> {
        if vehicle.license_plate.trim().is_empty() {
            return Err(ServiceError::validation("license plate is required"));
        }
        self.store.upsert_vehicle(vehicle.clone()).await?;
        info!(vehicle = %vehicle.id, plate = %vehicle.license_plate, "vehicle registered");
        Ok(vehicle)
    }

    pub async fn get(&self, id: VehicleId) -> Result<Vehicle, ServiceError> {
        self.store
            .vehicle(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(EntityKind::Vehicle, id))
    }

    pub async fn list(&self) -> Result<Vec<Vehicle>, ServiceError> {
        Ok(self.store.list_vehicles().await?)
    }

    /// Vehicles with no active reservation in the way of `span`.
    pub async fn available(&self, checker: &AvailabilityChecker, span: Span) -> Result<Vec<Vehicle>, ServiceError> {
        checker.available_vehicles(span).await
    }

    pub async fn update_location(&self, id: VehicleId, location: GeoPoint) -> Result<(), ServiceError> {
        if !(-90.0..=90.0).contains(&location.latitude) || !(-180.0..=180.0).contains(&location.longitude) {
            return Err(ServiceError::validation("coordinates out of range"));
        }
        if !self.store.update_vehicle_location(id, location).await? {
            return Err(ServiceError::not_found(EntityKind::Vehicle, id));
        }
        Ok(())
    }

    pub async fn update_status(&self, id: VehicleId, status: VehicleStatus) -> Result<(), ServiceError> {
        if !self.store.update_vehicle_status(id, status).await? {
            return Err(ServiceError::not_found(EntityKind::Vehicle, id));
        }
        info!(vehicle = %id, ?status, "vehicle status changed");
        Ok(())
    }
}
