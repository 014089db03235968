use std::fmt;

use tracing::debug;

use crate::extract::{self, CursorKind, ListingItem, TemplateId};
use crate::fetch::{Fetch, FetchError};

/// Opaque pagination state. Source-specific: a page number, an item offset,
/// or a next-link lifted off the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Page(u32),
    Offset(u32),
    Next(String),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Page(n) => write!(f, "page {}", n),
            Cursor::Offset(o) => write!(f, "offset {}", o),
            Cursor::Next(url) => write!(f, "next {}", url),
        }
    }
}

pub enum PageResult {
    Page {
        items: Vec<ListingItem>,
        total_hint: Option<usize>,
    },
    End,
    FetchError(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    HasPage,
    Exhausted,
    Errored,
}

/// Sequential listing-page retrieval. Does not retry (that belongs to the
/// transport collaborator) and stays resumable from its last good cursor
/// after a fetch error.
pub struct Paginator {
    template: TemplateId,
    base_url: String,
    page_size: u32,
    cursor: Cursor,
    state: State,
}

impl Paginator {
    pub fn new(template: TemplateId, base_url: impl Into<String>, page_size: u32) -> Self {
        let cursor = match template.rules().cursor {
            CursorKind::PageNumber | CursorKind::Single => Cursor::Page(1),
            CursorKind::Offset => Cursor::Offset(0),
        };
        Paginator {
            template,
            base_url: base_url.into(),
            page_size,
            cursor,
            state: State::Idle,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }

    fn page_url(&self) -> String {
        match (&self.cursor, self.template.rules().cursor) {
            (Cursor::Next(url), _) => url.clone(),
            (_, CursorKind::Single) => self.base_url.clone(),
            (Cursor::Page(n), _) => with_query(&self.base_url, &[("limit", self.page_size), ("page", *n)]),
            (Cursor::Offset(o), _) => {
                with_query(&self.base_url, &[("limit", self.page_size), ("offset", *o)])
            }
        }
    }

    /// Fetch and parse the listing page at the current cursor.
    ///
    /// Exhaustion is signalled by an empty item list, the template's explicit
    /// end marker, or (for link-paginated sources) a missing next link --
    /// whichever the source shows first. After exhaustion every further call
    /// returns `End`; no cursor is ever visited twice.
    pub async fn next_page<F: Fetch>(&mut self, fetcher: &F) -> PageResult {
        if self.state == State::Exhausted {
            return PageResult::End;
        }

        let url = self.page_url();
        debug!(%url, cursor = %self.cursor, "fetching listing page");
        let page = match fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(e) => {
                self.state = State::Errored;
                return PageResult::FetchError(e);
            }
        };

        let listing = extract::parse_listing(&page, self.template);
        if listing.items.is_empty() {
            self.state = State::Exhausted;
            return PageResult::End;
        }

        let rules = self.template.rules();
        let no_further = match rules.cursor {
            CursorKind::Single => true,
            _ => listing.end_marker || (rules.next_link.is_some() && listing.next_link.is_none()),
        };

        if no_further {
            self.state = State::Exhausted;
        } else {
            self.cursor = match (&self.cursor, listing.next_link) {
                (_, Some(next)) => Cursor::Next(next),
                (Cursor::Page(n), None) => Cursor::Page(n + 1),
                (Cursor::Offset(o), None) => Cursor::Offset(o + self.page_size),
                // A Next cursor only exists for templates that declare a
                // next-link rule, and its absence exhausted us above.
                (Cursor::Next(_), None) => unreachable!("next cursor without next link"),
            };
            self.state = State::HasPage;
        }

        PageResult::Page {
            items: listing.items,
            total_hint: listing.total_hint,
        }
    }

    /// Advance past a failed page without its content. Only possible when the
    /// next cursor is computable (page-number and offset sources).
    pub fn skip_page(&mut self) -> bool {
        if self.state == State::Exhausted {
            return false;
        }
        match self.template.rules().cursor {
            CursorKind::PageNumber => {
                if let Cursor::Page(n) = self.cursor {
                    self.cursor = Cursor::Page(n + 1);
                    self.state = State::Idle;
                    return true;
                }
                false
            }
            CursorKind::Offset => {
                if let Cursor::Offset(o) = self.cursor {
                    self.cursor = Cursor::Offset(o + self.page_size);
                    self.state = State::Idle;
                    return true;
                }
                false
            }
            CursorKind::Single => false,
        }
    }
}

fn with_query(base: &str, params: &[(&str, u32)]) -> String {
    let mut url = String::from(base);
    let mut separator = if base.contains('?') { '&' } else { '?' };
    for (key, value) in params {
        url.push(separator);
        url.push_str(key);
        url.push('=');
        url.push_str(&value.to_string());
        separator = '&';
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[tokio::test]
    async fn page_number_source_terminates() {
        let base = "https://grants.example.org/grants-database";
        let fetcher = StaticFetcher::new(&[
            (
                "https://grants.example.org/grants-database?limit=3&page=1",
                fixture("data_list_page1"),
            ),
            (
                "https://grants.example.org/grants-database?limit=3&page=2",
                fixture("data_list_page2"),
            ),
            (
                "https://grants.example.org/grants-database?limit=3&page=3",
                fixture("data_list_empty"),
            ),
        ]);

        let mut paginator = Paginator::new(TemplateId::DataList, base, 3);

        let mut seen_cursors = Vec::new();
        seen_cursors.push(paginator.cursor().clone());
        match paginator.next_page(&fetcher).await {
            PageResult::Page { items, total_hint } => {
                assert_eq!(items.len(), 3);
                assert_eq!(total_hint, Some(5));
            }
            _ => panic!("expected first page"),
        }
        assert!(!seen_cursors.contains(paginator.cursor()));
        seen_cursors.push(paginator.cursor().clone());

        match paginator.next_page(&fetcher).await {
            PageResult::Page { items, .. } => assert_eq!(items.len(), 2),
            _ => panic!("expected second page"),
        }
        assert!(!seen_cursors.contains(paginator.cursor()));

        assert!(matches!(paginator.next_page(&fetcher).await, PageResult::End));
        assert!(paginator.is_exhausted());
        // End is sticky
        assert!(matches!(paginator.next_page(&fetcher).await, PageResult::End));
    }

    #[tokio::test]
    async fn single_page_source_ends_after_one() {
        let base = "https://grants.example.org/grant-database";
        let fetcher = StaticFetcher::new(&[(base, fixture("grants_table"))]);
        let mut paginator = Paginator::new(TemplateId::GrantsTable, base, 500);

        match paginator.next_page(&fetcher).await {
            PageResult::Page { items, .. } => assert_eq!(items.len(), 2),
            _ => panic!("expected bulk page"),
        }
        assert!(matches!(paginator.next_page(&fetcher).await, PageResult::End));
    }

    #[tokio::test]
    async fn next_link_cursor_followed_until_marker() {
        let base = "https://grants.example.org/grants";
        let fetcher = StaticFetcher::new(&[
            (
                "https://grants.example.org/grants?limit=2&offset=0",
                fixture("card_grid_page1"),
            ),
            (
                "https://grants.example.org/grants?limit=2&offset=2",
                fixture("card_grid_page2"),
            ),
        ]);
        let mut paginator = Paginator::new(TemplateId::CardGrid, base, 2);

        match paginator.next_page(&fetcher).await {
            PageResult::Page { items, .. } => assert_eq!(items.len(), 2),
            _ => panic!("expected first page"),
        }
        // Page 1's rel=next link became the cursor
        assert!(matches!(paginator.cursor(), Cursor::Next(_)));

        match paginator.next_page(&fetcher).await {
            PageResult::Page { items, .. } => assert_eq!(items.len(), 1),
            _ => panic!("expected second page"),
        }
        assert!(matches!(paginator.next_page(&fetcher).await, PageResult::End));
    }

    #[tokio::test]
    async fn fetch_error_leaves_cursor_resumable() {
        let base = "https://grants.example.org/grants-database";
        let fetcher = StaticFetcher::new(&[]);
        let mut paginator = Paginator::new(TemplateId::DataList, base, 3);

        let before = paginator.cursor().clone();
        assert!(matches!(
            paginator.next_page(&fetcher).await,
            PageResult::FetchError(_)
        ));
        assert_eq!(paginator.cursor(), &before);

        // The caller may retry the same cursor...
        assert!(matches!(
            paginator.next_page(&fetcher).await,
            PageResult::FetchError(_)
        ));
        assert_eq!(paginator.cursor(), &before);

        // ...or skip ahead when the cursor is computable.
        assert!(paginator.skip_page());
        assert_eq!(paginator.cursor(), &Cursor::Page(2));
    }
}
