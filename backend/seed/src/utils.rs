use std::{collections::HashSet, fs, path::Path, sync::LazyLock};

use anyhow::{Context, Error, anyhow};
use catalog::{
    CategoryRecord, Condition, MediaRecord, ProductRecord, SellerRecord,
    slug::{sanitize, slugify, unique_slugify},
};
use regex::Regex;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::models::{CategoryFixture, Fixture, ProductFixture, UserFixture};

const NAME_MAX_LEN: usize = 150;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

pub fn read_fixtures<K, F>(path: &Path) -> Result<Vec<Fixture<K, F>>, Error>
where
    K: DeserializeOwned,
    F: DeserializeOwned,
{
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Display names keep their case, only whitespace is normalized.
pub fn clean_name(input: &str) -> String {
    let mut name = WHITESPACE.replace_all(input.trim(), " ").into_owned();

    if let Some((cut, _)) = name.char_indices().nth(NAME_MAX_LEN) {
        name.truncate(cut);
    }

    name
}

pub fn category_record(fixture: CategoryFixture) -> Result<CategoryRecord, Error> {
    let name = clean_name(&fixture.fields.name);
    if name.is_empty() {
        return Err(anyhow!("category {} has no name", fixture.pk));
    }

    let slug = fixture
        .fields
        .slug
        .map(|s| slugify(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(&name));

    Ok(CategoryRecord {
        id: fixture.pk,
        name,
        slug,
        parent: fixture.fields.parent,
    })
}

/// Keeps a fixture's slug when it is still free, otherwise derives a unique one.
pub fn product_record(fixture: ProductFixture, slugs: &mut HashSet<String>) -> Result<ProductRecord, Error> {
    let fields = fixture.fields;

    let name = clean_name(&fields.name);
    if name.is_empty() {
        return Err(anyhow!("product {} has no name", fixture.pk));
    }

    let condition = Condition::parse(&fields.condition)
        .ok_or_else(|| anyhow!("product {} has unknown condition {:?}", fixture.pk, fields.condition))?;

    let mut slug = fields
        .slug
        .map(|s| slugify(&s))
        .filter(|s| !s.is_empty() && !slugs.contains(s))
        .unwrap_or_else(|| unique_slugify(&name));
    while slugs.contains(&slug) {
        slug = unique_slugify(&name);
    }
    slugs.insert(slug.clone());

    Ok(ProductRecord {
        id: fixture.pk,
        seller: fields.seller,
        name,
        description: fields.description.trim().to_string(),
        slug,
        price: fields.price,
        stock: fields.stock,
        condition,
        is_active: fields.is_active,
        units_sold: fields.units_sold,
        category: fields.category,
        media: vec![],
        created_at: None,
    })
}

pub fn seller_record(fixture: UserFixture) -> SellerRecord {
    let fields = fixture.fields;
    let email = fields.email.trim().to_lowercase();

    let full_username = match clean_name(&fields.full_username) {
        name if name.is_empty() => email.split('@').next().unwrap_or_default().to_string(),
        name => name,
    };

    SellerRecord {
        id: fixture.pk,
        email,
        full_username,
        city: clean_name(&fields.city),
        phone_number: fields.phone_number.trim().to_string(),
    }
}

/// Stands in for a seller that products reference but no user fixture provides.
pub fn placeholder_seller(id: Uuid) -> SellerRecord {
    let short = &id.simple().to_string()[..8];

    SellerRecord {
        id,
        email: format!("seller-{short}@shop.local"),
        full_username: format!("Seller {short}"),
        city: String::new(),
        phone_number: String::new(),
    }
}

pub fn search_query(product_name: &str) -> String {
    sanitize(product_name)
}

/// Exactly `count` images, repeating what was found when there is too little.
/// The first one is featured.
pub fn media_from(urls: &[String], count: usize) -> Vec<MediaRecord> {
    urls.iter()
        .cycle()
        .take(if urls.is_empty() { 0 } else { count })
        .enumerate()
        .map(|(i, url)| MediaRecord {
            image: url.clone(),
            is_feature: i == 0,
        })
        .collect()
}
