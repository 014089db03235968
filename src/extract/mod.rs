pub mod rules;

pub use rules::{CursorKind, TemplateId};

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::fetch::RawPage;
use crate::normalize::{clean_text, normalize_amount, normalize_date};
use crate::record::{AwardRecord, ExtractionOutcome, Field, FieldWarning, RawFields};
use rules::SelectorRule;

/// One parsed listing page: located item fields plus pagination signals.
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    /// Absolute next-page link, when the template declares one.
    pub next_link: Option<String>,
    /// True when the template's explicit "no more results" marker is present.
    pub end_marker: bool,
    /// Total result count advertised by the source, progress hint only.
    pub total_hint: Option<usize>,
}

/// One item's worth of located raw fields, ready for the normalizer.
pub struct ListingItem {
    pub fields: RawFields,
    pub warnings: Vec<FieldWarning>,
    /// Absolute detail-page URL, when the template requires one.
    pub detail_url: Option<String>,
    pub listing_url: String,
    pub fetched_at: DateTime<Utc>,
}

// Template selectors are compile-time constants; a parse failure here is a
// programmer error, reported immediately.
fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("invalid template selector")
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Walk one field's fallback chain within `scope`, first match wins. Multiple
/// matches for a selector are structure drift: take the first and warn.
fn locate(
    scope: ElementRef,
    rule: &SelectorRule,
    fields: &mut RawFields,
    warnings: &mut Vec<FieldWarning>,
) {
    if fields.get(rule.field).is_some() {
        return;
    }
    for (css, attr) in rule.chain {
        let selector = sel(css);
        let mut matches = scope.select(&selector);
        let Some(first) = matches.next() else {
            continue;
        };
        if matches.next().is_some() {
            warnings.push(FieldWarning::new(
                rule.field,
                format!("selector {:?} matched multiple nodes", css),
            ));
        }
        let value = match attr {
            Some(name) => first.value().attr(name).map(str::to_string),
            None => Some(element_text(first)),
        };
        if let Some(v) = value {
            let v = v.trim();
            if !v.is_empty() {
                fields.set(rule.field, v.to_string());
                return;
            }
        }
    }
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    url::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// Parse a listing page into per-item raw fields and pagination signals.
pub fn parse_listing(page: &RawPage, template: TemplateId) -> ListingPage {
    let rules = template.rules();
    let doc = Html::parse_document(&page.body);
    let item_selector = sel(rules.item_selector);

    let mut items = Vec::new();
    for el in doc.select(&item_selector) {
        let mut fields = RawFields::default();
        let mut warnings = Vec::new();
        for rule in rules.listing {
            locate(el, rule, &mut fields, &mut warnings);
        }
        let detail_url = rules.detail_link.and_then(|(css, attr)| {
            el.select(&sel(css))
                .next()
                .and_then(|a| a.value().attr(attr))
                .and_then(|href| absolutize(&page.url, href))
        });
        items.push(ListingItem {
            fields,
            warnings,
            detail_url,
            listing_url: page.url.clone(),
            fetched_at: page.fetched_at,
        });
    }

    let next_link = rules.next_link.and_then(|css| {
        doc.select(&sel(css))
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| absolutize(&page.url, href))
    });
    let end_marker = rules
        .end_marker
        .map(|css| doc.select(&sel(css)).next().is_some())
        .unwrap_or(false);
    let total_hint = rules
        .results_count
        .and_then(|css| doc.select(&sel(css)).next())
        .map(element_text)
        .and_then(|text| {
            let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        });

    ListingPage {
        items,
        next_link,
        end_marker,
        total_hint,
    }
}

/// Fill still-missing fields from a per-item detail page.
pub fn apply_detail(
    page: &RawPage,
    template: TemplateId,
    fields: &mut RawFields,
    warnings: &mut Vec<FieldWarning>,
) {
    let doc = Html::parse_document(&page.body);
    let root = doc.root_element();
    for rule in template.rules().detail {
        locate(root, rule, fields, warnings);
    }
}

/// Route located fields through the normalizer and resolve identity.
///
/// Absent and unparseable fields become warnings on the record; only an
/// unresolvable identity fails the item.
pub fn finalize(
    template: TemplateId,
    fields: RawFields,
    mut warnings: Vec<FieldWarning>,
    source_url: String,
    fetched_at: DateTime<Utc>,
) -> ExtractionOutcome {
    let rules = template.rules();
    for rule in rules.listing.iter().chain(rules.detail) {
        if fields.get(rule.field).is_none() {
            warnings.push(FieldWarning::new(rule.field, "field not found in page"));
        }
    }

    let title = fields
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty());
    let recipient = fields
        .recipient
        .as_deref()
        .map(clean_text)
        .filter(|r| !r.is_empty());
    let amount = fields.amount.as_deref().and_then(|raw| {
        normalize_amount(raw)
            .map_err(|msg| warnings.push(FieldWarning::new(Field::Amount, msg)))
            .ok()
    });
    let date_announced = fields.date_announced.as_deref().and_then(|raw| {
        normalize_date(raw)
            .map_err(|msg| warnings.push(FieldWarning::new(Field::DateAnnounced, msg)))
            .ok()
    });

    let award_id = match resolve_identity(&fields, rules.id_strip_prefix, title.as_deref()) {
        Some(id) => id,
        None => return ExtractionOutcome::Failure("no identity".to_string()),
    };

    let record = AwardRecord {
        award_id,
        title,
        recipient,
        amount,
        date_announced,
        source: rules.source.to_string(),
        source_url,
        extracted_at: fetched_at,
    };

    if warnings.is_empty() {
        ExtractionOutcome::Success(record)
    } else {
        ExtractionOutcome::PartialFailure(record, warnings)
    }
}

/// Extract a single standalone document (a detail page, or the one item a
/// page holds) with both the listing and detail rule sets in scope.
pub fn extract(page: &RawPage, template: TemplateId) -> ExtractionOutcome {
    let rules = template.rules();
    let mut fields = RawFields::default();
    let mut warnings = Vec::new();
    {
        let doc = Html::parse_document(&page.body);
        let root = doc.root_element();
        for rule in rules.listing.iter().chain(rules.detail) {
            locate(root, rule, &mut fields, &mut warnings);
        }
    }
    finalize(template, fields, warnings, page.url.clone(), page.fetched_at)
}

/// Stable identity: the source id when present, otherwise an FNV-1a hash of
/// title + raw date. No title means no derivable identity.
fn resolve_identity(
    fields: &RawFields,
    strip_prefix: Option<&str>,
    clean_title: Option<&str>,
) -> Option<String> {
    if let Some(raw) = fields.award_id.as_deref() {
        let mut id = raw.trim();
        if let Some(prefix) = strip_prefix {
            id = id.strip_prefix(prefix).unwrap_or(id).trim();
        }
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    let title = clean_title?;
    let date = fields.date_announced.as_deref().unwrap_or("");
    let digest = fnv1a64(format!("{}|{}", title, date).as_bytes());
    Some(format!("d-{:016x}", digest))
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
