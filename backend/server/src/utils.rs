use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CursorPage<T> {
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Rebuilds `path?query` with `key` set to `value` (or removed when `None`).
pub fn link(path: &str, raw_query: Option<&str>, key: &str, value: Option<String>) -> String {
    let prefix = format!("{key}=");
    let mut pairs: Vec<String> = raw_query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && *pair != key && !pair.starts_with(&prefix))
        .map(str::to_string)
        .collect();

    if let Some(value) = value {
        pairs.push(format!("{key}={value}"));
    }

    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", pairs.join("&"))
    }
}

/// Page size from the query, falling back to `default` and capped at `max`.
pub fn page_size(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.filter(|size| *size > 0).unwrap_or(default).min(max)
}

/// Page-number pagination. Page 1 of an empty list is valid, anything past the end is not.
pub fn paginate<T>(
    items: Vec<T>,
    page: Option<usize>,
    size: usize,
    path: &str,
    raw_query: Option<&str>,
) -> Result<Page<T>, AppError> {
    let count = items.len();
    let page = page.unwrap_or(1);
    let pages = count.div_ceil(size).max(1);

    if page == 0 || page > pages {
        return Err(AppError::not_found("Invalid page."));
    }

    let results: Vec<T> = items.into_iter().skip((page - 1) * size).take(size).collect();

    let next = (page < pages).then(|| link(path, raw_query, "page", Some((page + 1).to_string())));
    let previous = (page > 1).then(|| {
        let value = (page > 2).then(|| (page - 1).to_string());
        link(path, raw_query, "page", value)
    });

    Ok(Page {
        count,
        next,
        previous,
        results,
    })
}

/// Limit/offset pagination.
pub fn limit_offset<T>(
    items: Vec<T>,
    limit: usize,
    offset: usize,
    path: &str,
    raw_query: Option<&str>,
) -> Page<T> {
    let count = items.len();
    let results: Vec<T> = items.into_iter().skip(offset).take(limit).collect();

    let with_offset = |offset: usize| {
        let query = link("", raw_query, "limit", Some(limit.to_string()));
        let query = query.trim_start_matches('?');
        link(path, Some(query), "offset", (offset > 0).then(|| offset.to_string()))
    };

    Page {
        count,
        next: (offset + limit < count).then(|| with_offset(offset + limit)),
        previous: (offset > 0).then(|| with_offset(offset.saturating_sub(limit))),
        results,
    }
}

/// Cursor pagination over an already ordered list. The cursor is the id of the last item
/// on the previous page; an unknown cursor starts from the top.
pub fn cursor_page<T>(
    items: Vec<T>,
    id: impl Fn(&T) -> Uuid,
    cursor: Option<Uuid>,
    size: usize,
    path: &str,
    raw_query: Option<&str>,
) -> CursorPage<T> {
    let start = cursor
        .and_then(|cursor| items.iter().position(|item| id(item) == cursor))
        .map_or(0, |index| index + 1);

    let next = (start + size < items.len()).then(|| {
        let last = id(&items[start + size - 1]);
        link(path, raw_query, "cursor", Some(last.to_string()))
    });

    let previous = (start > 0).then(|| {
        let value = (start > size).then(|| id(&items[start - size - 1]).to_string());
        link(path, raw_query, "cursor", value)
    });

    let results = items.into_iter().skip(start).take(size).collect();

    CursorPage {
        next,
        previous,
        results,
    }
}
