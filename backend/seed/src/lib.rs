//! # Seeding
//!
//! Builds the catalog snapshot the server boots from.
//!
//! ## Build
//! Input is one or more category fixture files, one product fixture file and optionally a user
//! fixture file, all in the `[{"model": ..., "pk": ..., "fields": {...}}]` dump format.
//!
//! 1. Categories from every file are merged by id. A later file wins on a repeated id.
//!
//! 2. Names are whitespace-normalized and capped at 150 characters. Slugs come from the fixture
//!    when present and free, otherwise from the name.
//!
//! 3. Product slugs are unique across the snapshot. Collisions get a random suffix.
//!
//! 4. Sellers come from the user fixtures. A product whose seller is missing gets a placeholder
//!    seller so the snapshot stays consistent.
//!
//! 5. The default shipping methods are attached and the snapshot is validated before it is written.
//!
//! ## Media
//! For every product without images, search Unsplash by the product name and keep the first
//! `per_product` results. Fewer results are repeated to fill the slots. The first image is
//! featured. Requests are spaced out to stay friendly with the API's rate limit.
//!
//! ## Notes
//! - Nothing here touches the server's runtime state. Restart the server to load a new snapshot.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Error, bail};
use catalog::{Snapshot, default_shipping_methods};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;

pub mod models;
pub mod utils;

use models::{CategoryFixture, PER_PAGE, ProductFixture, SearchResponse, UserFixture};
use utils::{category_record, media_from, placeholder_seller, product_record, read_fixtures, search_query, seller_record};

const REQUEST_SPACING: Duration = Duration::from_millis(500);

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub categories: usize,
    pub products: usize,
    pub sellers: usize,
    pub placeholder_sellers: usize,
}

pub fn build_snapshot(categories: &[PathBuf], products: &Path, users: Option<&Path>) -> Result<(Snapshot, BuildSummary), Error> {
    let mut category_files = Vec::with_capacity(categories.len());
    for path in categories {
        category_files.push(read_fixtures(path)?);
    }

    let product_fixtures: Vec<ProductFixture> = read_fixtures(products)?;
    let user_fixtures: Vec<UserFixture> = match users {
        Some(path) => read_fixtures(path)?,
        None => vec![],
    };

    assemble(category_files, product_fixtures, user_fixtures)
}

pub fn assemble(
    category_files: Vec<Vec<CategoryFixture>>,
    product_fixtures: Vec<ProductFixture>,
    user_fixtures: Vec<UserFixture>,
) -> Result<(Snapshot, BuildSummary), Error> {
    let mut categories = BTreeMap::new();
    for fixture in category_files.into_iter().flatten() {
        let record = category_record(fixture)?;
        categories.insert(record.id, record);
    }

    let mut category_slugs = HashSet::new();
    for category in categories.values() {
        if !category_slugs.insert(category.slug.as_str()) {
            bail!("duplicate category slug {}", category.slug);
        }
    }

    let mut slugs = HashSet::new();
    let mut products = Vec::with_capacity(product_fixtures.len());
    for fixture in product_fixtures {
        products.push(product_record(fixture, &mut slugs)?);
    }
    products.sort_by_key(|p| p.id);

    let mut sellers: HashMap<_, _> = user_fixtures
        .into_iter()
        .map(seller_record)
        .map(|s| (s.id, s))
        .collect();

    let mut placeholder_sellers = 0;
    for product in &products {
        if !sellers.contains_key(&product.seller) {
            #[cfg(feature = "verbose")]
            println!("Placeholder seller for product {}", product.id);

            sellers.insert(product.seller, placeholder_seller(product.seller));
            placeholder_sellers += 1;
        }
    }

    let mut sellers: Vec<_> = sellers.into_values().collect();
    sellers.sort_by(|a, b| a.email.cmp(&b.email));

    let snapshot = Snapshot {
        categories: categories.into_values().collect(),
        sellers,
        products,
        shipping_methods: default_shipping_methods(),
    };
    snapshot.validate()?;

    let summary = BuildSummary {
        categories: snapshot.categories.len(),
        products: snapshot.products.len(),
        sellers: snapshot.sellers.len(),
        placeholder_sellers,
    };

    Ok((snapshot, summary))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MediaSummary {
    pub created: usize,
    pub skipped: usize,
    pub no_results: usize,
    pub errors: usize,
}

async fn search_photos(client: &Client, endpoint: &str, access_key: &str, query: &str) -> Result<Vec<String>, Error> {
    let per_page = PER_PAGE.to_string();

    let response = client
        .get(endpoint)
        .query(&[
            ("query", query),
            ("per_page", per_page.as_str()),
            ("client_id", access_key),
        ])
        .send()
        .await?
        .error_for_status()?;

    let body: SearchResponse = response.json().await?;

    Ok(body.results.into_iter().map(|photo| photo.urls.regular).collect())
}

/// Attaches `per_product` images to every product that has none (or to all of them when
/// `replace` is set). Failures are counted, never fatal.
pub async fn attach_media(
    snapshot: &mut Snapshot,
    endpoint: &str,
    access_key: &str,
    per_product: usize,
    replace: bool,
) -> MediaSummary {
    let client = Client::new();
    let mut summary = MediaSummary::default();

    let pb = ProgressBar::new(snapshot.products.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=> "));
    }

    let mut first = true;
    for product in snapshot.products.iter_mut() {
        pb.inc(1);

        if !product.media.is_empty() && !replace {
            summary.skipped += 1;
            continue;
        }

        if !first {
            tokio::time::sleep(REQUEST_SPACING).await;
        }
        first = false;

        pb.set_message(format!("Searching {}", product.name));

        match search_photos(&client, endpoint, access_key, &search_query(&product.name)).await {
            Ok(urls) if urls.is_empty() => {
                pb.println(format!("No images found for {}", product.name));
                summary.no_results += 1;
            }
            Ok(urls) => {
                product.media = media_from(&urls, per_product);
                summary.created += product.media.len();
            }
            Err(e) => {
                pb.println(format!("Failed to fetch images for {}: {e}", product.name));
                summary.errors += 1;
            }
        }
    }

    pb.finish_with_message("Done");
    summary
}
