use clap::ValueEnum;

use crate::record::Field;

/// Cursor shape a template's listing endpoint paginates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// 1-based page number query parameter.
    PageNumber,
    /// 0-based item offset query parameter.
    Offset,
    /// Everything on one bulk page.
    Single,
}

/// Ordered fallback chain for one field: (selector, attribute) pairs tried in
/// order, first match wins. `None` attribute means the element's text.
pub struct SelectorRule {
    pub field: Field,
    pub chain: &'static [(&'static str, Option<&'static str>)],
}

/// Structural assumptions for one source's page shape. A closed set of these
/// keeps the extractor contract uniform without open-ended dispatch.
pub struct TemplateRules {
    pub source: &'static str,
    pub item_selector: &'static str,
    pub listing: &'static [SelectorRule],
    /// Field rules applied to a per-item detail page. Empty when the listing
    /// is self-contained.
    pub detail: &'static [SelectorRule],
    /// Selector + attribute locating the detail-page link inside an item.
    pub detail_link: Option<(&'static str, &'static str)>,
    /// Prefix stripped off the raw identity value (e.g. "grant-").
    pub id_strip_prefix: Option<&'static str>,
    pub cursor: CursorKind,
    /// Selector for an explicit next-page link; when declared, its absence on
    /// a listing page signals the end of results.
    pub next_link: Option<&'static str>,
    /// Explicit "no more results" marker.
    pub end_marker: Option<&'static str>,
    /// Node holding the total result count, a progress hint only.
    pub results_count: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TemplateId {
    /// `ul.data-list` listing with per-item header/details blocks and a
    /// page-number cursor.
    DataList,
    /// Single bulk `table#grants-table` page, one row per grant.
    GrantsTable,
    /// Card listing with per-grant detail pages carrying the amount, offset
    /// cursor with an optional rel=next link.
    CardGrid,
}

static DATA_LIST: TemplateRules = TemplateRules {
    source: "data_list",
    item_selector: "ul.data-list > li",
    listing: &[
        SelectorRule {
            field: Field::AwardId,
            chain: &[
                ("div.details", Some("data-accordion-group")),
                ("div.details", Some("data-accordian-group")),
            ],
        },
        SelectorRule {
            field: Field::Title,
            chain: &[
                ("div.details div.brief-description", None),
                ("div.brief-description", None),
            ],
        },
        SelectorRule {
            field: Field::Recipient,
            chain: &[("header div.grantee", None), ("div.grantee", None)],
        },
        SelectorRule {
            field: Field::Amount,
            chain: &[("header div.amount", None), ("div.amount", None)],
        },
        SelectorRule {
            field: Field::DateAnnounced,
            chain: &[("header div.year", None), ("div.year", None)],
        },
    ],
    detail: &[],
    detail_link: None,
    id_strip_prefix: Some("grant-"),
    cursor: CursorKind::PageNumber,
    next_link: None,
    end_marker: None,
    results_count: Some("td.results-count"),
};

static GRANTS_TABLE: TemplateRules = TemplateRules {
    source: "grants_table",
    item_selector: "table#grants-table tbody tr",
    listing: &[
        SelectorRule {
            field: Field::AwardId,
            chain: &[("td.grant-id", None), ("td:nth-child(1)", None)],
        },
        SelectorRule {
            field: Field::Title,
            chain: &[("td.title", None), ("td:nth-child(2)", None)],
        },
        SelectorRule {
            field: Field::Recipient,
            chain: &[("td.grantee", None), ("td:nth-child(3)", None)],
        },
        SelectorRule {
            field: Field::Amount,
            chain: &[("td.amount", None), ("td:nth-child(4)", None)],
        },
        SelectorRule {
            field: Field::DateAnnounced,
            chain: &[("td.year", None), ("td:nth-child(5)", None)],
        },
    ],
    detail: &[],
    detail_link: None,
    id_strip_prefix: None,
    cursor: CursorKind::Single,
    next_link: None,
    end_marker: None,
    results_count: None,
};

static CARD_GRID: TemplateRules = TemplateRules {
    source: "card_grid",
    item_selector: "li.grant-card, div.grant-card",
    listing: &[
        SelectorRule {
            field: Field::AwardId,
            chain: &[
                ("a[data-grant-id]", Some("data-grant-id")),
                ("[data-grant-id]", Some("data-grant-id")),
            ],
        },
        SelectorRule {
            field: Field::Title,
            chain: &[("h3.grant-title", None), ("h3", None)],
        },
        SelectorRule {
            field: Field::Recipient,
            chain: &[("div.grantee", None), ("p.grantee", None)],
        },
        SelectorRule {
            field: Field::DateAnnounced,
            chain: &[("time", Some("datetime")), ("div.date-awarded", None)],
        },
    ],
    detail: &[SelectorRule {
        field: Field::Amount,
        chain: &[("div.award-amount", None), ("dd.amount", None)],
    }],
    detail_link: Some(("a.card-link, h3 a", "href")),
    id_strip_prefix: None,
    cursor: CursorKind::Offset,
    next_link: Some("a[rel=next]"),
    end_marker: Some("div.no-more-results, p.no-results"),
    results_count: None,
};

impl TemplateId {
    pub fn rules(&self) -> &'static TemplateRules {
        match self {
            TemplateId::DataList => &DATA_LIST,
            TemplateId::GrantsTable => &GRANTS_TABLE,
            TemplateId::CardGrid => &CARD_GRID,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.rules().source
    }
}
