//! Mirror of an externally paginated character catalogue.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{ImportError, ServiceError};
use crate::limits::{DEFAULT_PAGE_LIMIT, MAX_IMPORT_PAGES, MAX_PAGE_LIMIT};
use crate::model::Character;
use crate::observability::CHARACTERS_IMPORTED_TOTAL;
use crate::store::CharacterStore;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CharacterPage {
    pub results: Vec<Character>,
    /// Cursor for the following page; `None` on the last one.
    pub next: Option<String>,
}

/// One page at a time from the upstream API. `None` asks for the first page.
#[async_trait]
pub trait CharacterSource: Send + Sync {
    async fn fetch(&self, cursor: Option<&str>) -> Result<CharacterPage, ImportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub pages: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub failed: usize,
}

/// Paginated listing parameters; missing or out-of-range values fall back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CharacterQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub search: Option<String>,
}

pub struct Importer {
    store: Arc<dyn CharacterStore>,
}

impl Importer {
    pub fn new(store: Arc<dyn CharacterStore>) -> Self {
        Self { store }
    }

    /// Walk every page. Each page's rows are saved concurrently and the
    /// whole page is awaited before the next fetch.
    pub async fn run(&self, source: &dyn CharacterSource) -> Result<ImportSummary, ImportError> {
        let mut summary = ImportSummary::default();
        let mut cursor: Option<String> = None;
        loop {
            if summary.pages == MAX_IMPORT_PAGES {
                return Err(ImportError::TooManyPages(summary.pages));
            }
            let page = source.fetch(cursor.as_deref()).await?;
            summary.pages += 1;

            let saves = page.results.into_iter().map(|character| {
                let store = self.store.clone();
                tokio::spawn(async move {
                    let id = character.id;
                    store.save_character_if_absent(character).await.map_err(|e| (id, e))
                })
            });
            for joined in join_all(saves).await {
                match joined {
                    Ok(Ok(true)) => summary.inserted += 1,
                    Ok(Ok(false)) => summary.already_present += 1,
                    Ok(Err((id, e))) => {
                        summary.failed += 1;
                        error!("failed to save character {id}: {e}");
                    }
                    Err(e) => {
                        summary.failed += 1;
                        error!("character save task failed: {e}");
                    }
                }
            }

            match page.next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        metrics::counter!(CHARACTERS_IMPORTED_TOTAL).increment(summary.inserted as u64);
        info!(
            pages = summary.pages,
            inserted = summary.inserted,
            already_present = summary.already_present,
            failed = summary.failed,
            "character import finished"
        );
        Ok(summary)
    }

    pub async fn list(&self, query: &CharacterQuery) -> Result<Vec<Character>, ServiceError> {
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);
        let offset = query.offset.unwrap_or(0);
        let search = query.search.as_deref().unwrap_or("");
        Ok(self.store.characters(limit, offset, search).await?)
    }
}
