//! Role-based queries over a parsed listing or index page
//!
//! The extractor and pagination resolver only see [`DocumentQuery`]; which
//! CSS selector backs each [`Role`] comes from the configuration.

use scraper::{ElementRef, Html, Selector};

use crate::config::Selectors;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Title,
    Price,
    Description,
    PropertyItem,
    PropertyName,
    PropertyValue,
    ListingLink,
    Pagination,
    PaginationEntry,
    DealerContact,
    PrivateOwner,
    Photo,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Title => "title",
            Role::Price => "price",
            Role::Description => "description",
            Role::PropertyItem => "property_item",
            Role::PropertyName => "property_name",
            Role::PropertyValue => "property_value",
            Role::ListingLink => "listing_link",
            Role::Pagination => "pagination",
            Role::PaginationEntry => "pagination_entry",
            Role::DealerContact => "dealer_contact",
            Role::PrivateOwner => "private_owner",
            Role::Photo => "photo",
        }
    }
}

pub trait DocumentQuery {
    /// Normalized text of the first element playing `role`
    fn first_text(&self, role: Role) -> Option<String>;

    fn exists(&self, role: Role) -> bool;

    /// `attr` of every element playing `role`, in document order
    fn attr_all(&self, role: Role, attr: &str) -> Vec<String>;

    /// One entry per `container` element: text of its first `part` descendant
    fn nested_text(&self, container: Role, part: Role) -> Vec<Option<String>>;

    /// Texts of every `part` inside the first `container` element
    fn nested_texts(&self, container: Role, part: Role) -> Vec<String>;
}

/// Selectors compiled once per run
#[derive(Debug)]
pub struct SelectorSet {
    listing_link: Selector,
    pagination: Selector,
    pagination_entry: Selector,
    title: Selector,
    price: Selector,
    description: Selector,
    property_item: Selector,
    property_name: Selector,
    property_value: Selector,
    dealer_contact: Selector,
    private_owner: Selector,
    photo: Selector,
}

fn compile(role: Role, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::Selector {
        role: role.as_str(),
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

impl SelectorSet {
    pub fn compile(selectors: &Selectors) -> Result<Self, ConfigError> {
        Ok(Self {
            listing_link: compile(Role::ListingLink, &selectors.listing_link)?,
            pagination: compile(Role::Pagination, &selectors.pagination)?,
            pagination_entry: compile(Role::PaginationEntry, &selectors.pagination_entry)?,
            title: compile(Role::Title, &selectors.title)?,
            price: compile(Role::Price, &selectors.price)?,
            description: compile(Role::Description, &selectors.description)?,
            property_item: compile(Role::PropertyItem, &selectors.property_item)?,
            property_name: compile(Role::PropertyName, &selectors.property_name)?,
            property_value: compile(Role::PropertyValue, &selectors.property_value)?,
            dealer_contact: compile(Role::DealerContact, &selectors.dealer_contact)?,
            private_owner: compile(Role::PrivateOwner, &selectors.private_owner)?,
            photo: compile(Role::Photo, &selectors.photo)?,
        })
    }

    pub fn get(&self, role: Role) -> &Selector {
        match role {
            Role::Title => &self.title,
            Role::Price => &self.price,
            Role::Description => &self.description,
            Role::PropertyItem => &self.property_item,
            Role::PropertyName => &self.property_name,
            Role::PropertyValue => &self.property_value,
            Role::ListingLink => &self.listing_link,
            Role::Pagination => &self.pagination,
            Role::PaginationEntry => &self.pagination_entry,
            Role::DealerContact => &self.dealer_contact,
            Role::PrivateOwner => &self.private_owner,
            Role::Photo => &self.photo,
        }
    }
}

/// Join text nodes with spaces and collapse whitespace runs
pub fn normalize_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut cleaned = String::new();
    let mut prev_was_space = false;
    for c in parts.flat_map(|p| p.chars().chain(std::iter::once(' '))) {
        if c.is_whitespace() {
            if !prev_was_space && !cleaned.is_empty() {
                cleaned.push(' ');
                prev_was_space = true;
            }
        } else {
            cleaned.push(c);
            prev_was_space = false;
        }
    }
    cleaned.trim_end().to_string()
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_text(element.text())
}

pub struct HtmlDocument<'s> {
    html: Html,
    selectors: &'s SelectorSet,
}

impl<'s> HtmlDocument<'s> {
    pub fn parse(text: &str, selectors: &'s SelectorSet) -> Self {
        Self {
            html: Html::parse_document(text),
            selectors,
        }
    }
}

impl DocumentQuery for HtmlDocument<'_> {
    fn first_text(&self, role: Role) -> Option<String> {
        self.html
            .select(self.selectors.get(role))
            .next()
            .map(element_text)
    }

    fn exists(&self, role: Role) -> bool {
        self.html.select(self.selectors.get(role)).next().is_some()
    }

    fn attr_all(&self, role: Role, attr: &str) -> Vec<String> {
        self.html
            .select(self.selectors.get(role))
            .filter_map(|el| el.value().attr(attr))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }

    fn nested_text(&self, container: Role, part: Role) -> Vec<Option<String>> {
        let part_selector = self.selectors.get(part);
        self.html
            .select(self.selectors.get(container))
            .map(|el| el.select(part_selector).next().map(element_text))
            .collect()
    }

    fn nested_texts(&self, container: Role, part: Role) -> Vec<String> {
        let Some(first) = self.html.select(self.selectors.get(container)).next() else {
            return Vec::new();
        };
        first
            .select(self.selectors.get(part))
            .map(element_text)
            .collect()
    }
}
