//! # Product search
//!
//! Full-text search over product name, description and, on request, the seller's name.
//!
//! ## Backends
//!
//! - [`LocalSearch`]: in-process index, used by default and in tests
//! - [`MeiliSearch`]: Meilisearch when `MEILI_URL` is set
//!
//! ## Ranking
//!
//! Field weights are name 1.0, description 0.4, seller name 0.2. A query term matches a
//! field when one of the field's words starts with it, and the rank of a document is the
//! mean of the per-term scores. Meilisearch ranks by its own rules, so its hits are
//! given a rank that decreases with position.
//!
//! The catalog filters the hits afterwards (active only, price, condition, category),
//! so both backends return ids and ranks, never whole products.
//!
//! ## Commands
//!
//! Grab relevant keys.
//! ```sh
//! curl -H "Authorization: Bearer $(cat /run/secrets/MEILI_MASTER_KEY)" http://localhost:7700/keys
//! ```
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use meilisearch_sdk::{
    client::Client,
    settings::{MinWordSizeForTypos, Settings, TypoToleranceSettings},
};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, models::ProductId, store::Tables};

pub const PRODUCT_INDEX: &str = "products";
pub const PRODUCT_ID: &str = "id";
pub const PRODUCT_NAME: &str = "name";
pub const PRODUCT_DESCRIPTION: &str = "description";
pub const PRODUCT_SELLER: &str = "seller_name";

const NAME_WEIGHT: f64 = 1.0;
const DESCRIPTION_WEIGHT: f64 = 0.4;
const SELLER_WEIGHT: f64 = 0.2;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDoc {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub seller_name: String,
}

impl SearchDoc {
    pub fn from_tables(tables: &Tables, id: ProductId) -> Option<Self> {
        let product = tables.product(id)?;
        let seller_name = tables
            .user(product.seller)
            .map(|u| u.full_username.clone())
            .unwrap_or_default();

        Some(Self {
            id,
            name: product.name.clone(),
            description: product.description.clone(),
            seller_name,
        })
    }

    pub fn all(tables: &Tables) -> Vec<Self> {
        tables
            .products
            .keys()
            .filter_map(|id| Self::from_tables(tables, *id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub id: ProductId,
    pub rank: f64,
}

#[async_trait]
pub trait ProductSearch: Send + Sync {
    async fn upsert(&self, docs: Vec<SearchDoc>) -> Result<(), AppError>;
    async fn remove(&self, id: ProductId) -> Result<(), AppError>;
    /// Hits with rank > 0, best first.
    async fn search(&self, query: &str, include_seller: bool) -> Result<Vec<Hit>, AppError>;
}

fn words(text: &str) -> Vec<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn sort_hits(hits: &mut [Hit]) {
    hits.sort_by(|a, b| b.rank.total_cmp(&a.rank).then(a.id.cmp(&b.id)));
}

/// Ranks `docs` directly, for when no index can answer. Best first.
pub fn rank_docs(docs: &[SearchDoc], query: &str, include_seller: bool) -> Vec<Hit> {
    let terms = words(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<Hit> = docs
        .iter()
        .map(|doc| Hit {
            id: doc.id,
            rank: IndexedDoc::new(doc).rank(&terms, include_seller),
        })
        .filter(|hit| hit.rank > 0.0)
        .collect();
    sort_hits(&mut hits);

    hits
}

struct IndexedDoc {
    name: Vec<String>,
    description: Vec<String>,
    seller: Vec<String>,
}

impl IndexedDoc {
    fn new(doc: &SearchDoc) -> Self {
        Self {
            name: words(&doc.name),
            description: words(&doc.description),
            seller: words(&doc.seller_name),
        }
    }

    fn rank(&self, terms: &[String], include_seller: bool) -> f64 {
        let matches = |field: &[String], term: &str| field.iter().any(|w| w.starts_with(term));

        let total: f64 = terms
            .iter()
            .map(|term| {
                let mut score = 0.0;
                if matches(&self.name, term) {
                    score += NAME_WEIGHT;
                }
                if matches(&self.description, term) {
                    score += DESCRIPTION_WEIGHT;
                }
                if include_seller && matches(&self.seller, term) {
                    score += SELLER_WEIGHT;
                }
                score
            })
            .sum();

        total / terms.len() as f64
    }
}

#[derive(Default)]
pub struct LocalSearch {
    docs: RwLock<HashMap<ProductId, IndexedDoc>>,
}

impl LocalSearch {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductSearch for LocalSearch {
    async fn upsert(&self, docs: Vec<SearchDoc>) -> Result<(), AppError> {
        let mut index = self.docs.write();
        for doc in &docs {
            index.insert(doc.id, IndexedDoc::new(doc));
        }
        Ok(())
    }

    async fn remove(&self, id: ProductId) -> Result<(), AppError> {
        self.docs.write().remove(&id);
        Ok(())
    }

    async fn search(&self, query: &str, include_seller: bool) -> Result<Vec<Hit>, AppError> {
        let terms = words(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Hit> = self
            .docs
            .read()
            .iter()
            .map(|(id, doc)| Hit {
                id: *id,
                rank: doc.rank(&terms, include_seller),
            })
            .filter(|hit| hit.rank > 0.0)
            .collect();
        sort_hits(&mut hits);

        Ok(hits)
    }
}

fn meili_error(e: meilisearch_sdk::errors::Error) -> AppError {
    AppError::internal(format!("Meilisearch: {e}"))
}

pub struct MeiliSearch {
    client: Arc<Client>,
}

impl MeiliSearch {
    pub async fn init(meili_url: &str, meili_admin_key: Option<&str>) -> Result<Self, AppError> {
        let client = Arc::new(Client::new(meili_url, meili_admin_key).map_err(meili_error)?);

        client
            .index(PRODUCT_INDEX)
            .set_settings(&init_settings())
            .await
            .map_err(meili_error)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ProductSearch for MeiliSearch {
    async fn upsert(&self, docs: Vec<SearchDoc>) -> Result<(), AppError> {
        if docs.is_empty() {
            return Ok(());
        }

        let _result = self
            .client
            .index(PRODUCT_INDEX)
            .add_or_update(&docs, Some(PRODUCT_ID))
            .await
            .map_err(meili_error)?
            .wait_for_completion(&self.client, None, None)
            .await
            .map_err(meili_error)?;

        #[cfg(feature = "verbose")]
        tracing::info!("Meili task result: {:?}", _result);

        Ok(())
    }

    async fn remove(&self, id: ProductId) -> Result<(), AppError> {
        self.client
            .index(PRODUCT_INDEX)
            .delete_document(id)
            .await
            .map_err(meili_error)?
            .wait_for_completion(&self.client, None, None)
            .await
            .map_err(meili_error)?;

        Ok(())
    }

    async fn search(&self, query: &str, include_seller: bool) -> Result<Vec<Hit>, AppError> {
        let attributes: &[&str] = if include_seller {
            &[PRODUCT_NAME, PRODUCT_DESCRIPTION, PRODUCT_SELLER]
        } else {
            &[PRODUCT_NAME, PRODUCT_DESCRIPTION]
        };

        let index = self.client.index(PRODUCT_INDEX);
        let results = index
            .search()
            .with_query(query)
            .with_limit(1000)
            .with_attributes_to_search_on(attributes)
            .execute::<SearchDoc>()
            .await
            .map_err(meili_error)?;

        let total = results.hits.len().max(1) as f64;

        Ok(results
            .hits
            .into_iter()
            .enumerate()
            .map(|(position, hit)| Hit {
                id: hit.result.id,
                rank: (total - position as f64) / total,
            })
            .collect())
    }
}

fn init_settings() -> Settings {
    Settings::new()
        .with_ranking_rules([
            "words",
            "typo",
            "proximity",
            "attribute",
            "exactness",
            "sort",
        ])
        .with_searchable_attributes([PRODUCT_NAME, PRODUCT_DESCRIPTION, PRODUCT_SELLER])
        .with_typo_tolerance(TypoToleranceSettings {
            enabled: Some(true),
            disable_on_attributes: None,
            disable_on_words: None,
            min_word_size_for_typos: Some(MinWordSizeForTypos {
                one_typo: Some(5),
                two_typos: Some(9),
            }),
        })
}
