use std::sync::Arc;

use crate::availability::{Availability, AvailabilityChecker};
use crate::config::Config;
use crate::dispatch::{DispatchOutcome, Dispatcher, NotificationRequest};
use crate::error::ServiceError;
use crate::import::Importer;
use crate::mail::Mailer;
use crate::model::*;
use crate::payment::PaymentCoordinator;
use crate::request::*;
use crate::reservation::{Booking, ReservationManager};
use crate::store::Store;
use crate::vehicle::VehicleRegistry;

/// Every service wired to one shared store. Request handlers call these
/// methods and map `ServiceError::status_code` onto their responses.
pub struct Backend {
    pub store: Arc<Store>,
    pub reservations: Arc<ReservationManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub payments: PaymentCoordinator,
    pub vehicles: VehicleRegistry,
    pub characters: Importer,
}

impl Backend {
    pub fn new(config: &Config, store: Arc<Store>, mailer: Arc<dyn Mailer>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), mailer, config.dispatch));
        let reservations = Arc::new(ReservationManager::new(
            store.clone(),
            dispatcher.clone(),
            config.boundary,
            config.admission,
            config.update_policy,
        ));
        Self {
            payments: PaymentCoordinator::new(store.clone(), dispatcher.clone()),
            vehicles: VehicleRegistry::new(store.clone()),
            characters: Importer::new(store.clone()),
            store,
            reservations,
            dispatcher,
        }
    }

    pub fn checker(&self) -> &AvailabilityChecker {
        self.reservations.checker()
    }

    pub async fn create_reservation(&self, body: CreateReservationRequest) -> Result<Booking, ServiceError> {
        self.reservations.create(body.into_new_reservation()?).await
    }

    pub async fn update_reservation(
        &self,
        id: ReservationId,
        body: UpdateReservationRequest,
    ) -> Result<ReservationView, ServiceError> {
        let updated = self.reservations.update(id, body.into_changes()?).await?;
        Ok(ReservationView::from(&updated))
    }

    pub async fn check_availability(&self, body: &AvailabilityRequest) -> Result<Availability, ServiceError> {
        self.checker().is_available(body.vehicle_id, body.span()?).await
    }

    pub async fn notify(&self, body: NotificationBody) -> Result<DispatchOutcome, ServiceError> {
        self.dispatcher
            .dispatch(NotificationRequest::adhoc(body.user_id, body.message, body.email))
            .await
    }

    pub async fn remind_return(&self, body: NotificationBody) -> Result<DispatchOutcome, ServiceError> {
        self.dispatcher
            .dispatch(NotificationRequest::return_reminder(body.user_id, body.message, body.email))
            .await
    }

    pub async fn notify_both(&self, body: NotificationBody) -> Result<[DispatchOutcome; 2], ServiceError> {
        self.dispatcher
            .dispatch_both(body.user_id, &body.message, body.email)
            .await
    }

    pub async fn pay(
        &self,
        body: PaymentRequest,
        user_id: UserId,
        email: Option<String>,
    ) -> Result<(Invoice, DispatchOutcome), ServiceError> {
        self.payments
            .process_and_notify(body.into_payment(), user_id, email)
            .await
    }
}
