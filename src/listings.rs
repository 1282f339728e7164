use tracing::{error, info, warn};

use crate::dom::{DocumentQuery, HtmlDocument, Role, SelectorSet};
use crate::fetch::PageSource;

/// Path of an href; scheme and host of absolute (or `//host/...`) links are dropped, as are
/// query and fragment
fn href_path(href: &str) -> &str {
    let href = href.trim();
    let href = href.split(&['?', '#'][..]).next().unwrap_or(href);
    let host_and_path = match href.split_once("://") {
        Some((_, rest)) => rest,
        None => match href.strip_prefix("//") {
            Some(rest) => rest,
            None => return href,
        },
    };
    host_and_path
        .find('/')
        .map(|i| &host_and_path[i..])
        .unwrap_or("")
}

/// Listing id from an href like `/autos/1234567-toyota-camry`: path segment 2, up to the first `-`
pub fn listing_id_from_href(href: &str) -> Option<String> {
    let segment = href_path(href).split('/').nth(2)?;
    let id = segment.split('-').next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

pub struct Paginator<'a, S: PageSource> {
    source: &'a S,
    selectors: &'a SelectorSet,
    base_url: &'a str,
}

impl<'a, S: PageSource> Paginator<'a, S> {
    pub fn new(source: &'a S, selectors: &'a SelectorSet, base_url: &'a str) -> Self {
        Self {
            source,
            selectors,
            base_url: base_url.trim_end_matches('/'),
        }
    }

    pub fn page_url(&self, page: u32) -> String {
        format!("{}?page={}", self.base_url, page)
    }

    pub fn listing_url(&self, listing_id: &str) -> String {
        format!("{}/{}", self.base_url, listing_id)
    }

    /// Number of result pages; 0 means the total is unknown and the run must stop
    pub fn total_pages(&self) -> u32 {
        let html = match self.source.fetch(self.base_url) {
            Ok(html) => html,
            Err(e) => {
                error!(error = %e, "Could not fetch index page");
                return 0;
            }
        };

        let doc = HtmlDocument::parse(&html, self.selectors);
        if !doc.exists(Role::Pagination) {
            return 1;
        }

        let entries = doc.nested_texts(Role::Pagination, Role::PaginationEntry);
        // The last entry is the "next" arrow; the one before it is the last page
        let Some(last_page) = entries.len().checked_sub(2).map(|i| &entries[i]) else {
            error!(entries = entries.len(), "Could not determine total pages");
            return 0;
        };
        match last_page.trim().parse::<u32>() {
            Ok(n) => n,
            Err(_) => {
                error!(value = %last_page, "Could not determine total pages");
                0
            }
        }
    }

    pub fn listing_ids(&self, page: u32) -> Vec<String> {
        let url = self.page_url(page);
        let html = match self.source.fetch(&url) {
            Ok(html) => html,
            Err(e) => {
                warn!(page, error = %e, "No listings retrieved for page");
                return Vec::new();
            }
        };

        let doc = HtmlDocument::parse(&html, self.selectors);
        let hrefs = doc.attr_all(Role::ListingLink, "href");
        info!(page, links = hrefs.len(), "Found product links");

        hrefs
            .iter()
            .filter_map(|href| {
                let id = listing_id_from_href(href);
                if id.is_none() {
                    error!(href = %href, "Could not parse listing ID from href");
                }
                id
            })
            .collect()
    }
}
