use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::*;

use super::{CharacterStore, NotificationLog, PaymentLedger, Store};

#[async_trait]
impl NotificationLog for Store {
    async fn append_notification(&self, notification: Notification) -> Result<(), StoreError> {
        self.persist_record(Event::NotificationAppended(notification)).await
    }

    async fn notifications_for(&self, user_id: UserId) -> Result<Vec<Notification>, StoreError> {
        Ok(self
            .notifications
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PaymentLedger for Store {
    async fn capture(&self, payment: &Payment) -> Result<(), StoreError> {
        self.persist_record(Event::PaymentCaptured(payment.clone())).await
    }
}

#[async_trait]
impl CharacterStore for Store {
    async fn save_character_if_absent(&self, character: Character) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        // Held across the check so two savers of the same id cannot both insert.
        let _serial = self.record_writes.lock().await;
        if self.characters.contains_key(&character.id) {
            return Ok(false);
        }
        let event = Event::CharacterSaved(character);
        self.journal_append(&event).await?;
        self.apply_record(&event);
        Ok(true)
    }

    async fn characters(
        &self,
        limit: usize,
        offset: usize,
        search: &str,
    ) -> Result<Vec<Character>, StoreError> {
        let needle = search.to_lowercase();
        let mut matches: Vec<Character> = self
            .characters
            .iter()
            .filter(|e| e.value().name.to_lowercase().contains(&needle))
            .map(|e| e.value().clone())
            .collect();
        matches.sort_by_key(|c| c.id);
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn character_count(&self) -> Result<usize, StoreError> {
        Ok(self.characters.len())
    }
}
