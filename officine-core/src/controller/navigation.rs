//! Navigation address and the indicators that follow it.
//!
//! [`Location`] stands in for the address bar: assigning a different route
//! emits a [`NavigationEvent`] that the router's event loop consumes.
//! [`NavigationIndicator`]s are told about every loaded route.

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::dom::{Document, NodeId, Selector, markup};
use crate::keys::Route;

/// Attribute marking in-app navigation links.
pub const ROUTE_LINK_ATTR: &str = "data-route";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    HashChanged(Option<Route>),
}

#[derive(Debug)]
pub struct Location {
    current: RwLock<Option<Route>>,
    events: mpsc::UnboundedSender<NavigationEvent>,
}

impl Location {
    pub fn new(initial: Option<Route>) -> (Self, mpsc::UnboundedReceiver<NavigationEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let location: Location = Self {
            current: RwLock::new(initial),
            events,
        };
        (location, rx)
    }

    pub fn current(&self) -> Option<Route> {
        self.current.read().clone()
    }

    /// Sets the address to `route`. Emits a change event and returns `true`
    /// only when the address actually changed.
    pub fn assign(&self, route: Route) -> bool {
        self.replace(Some(route))
    }

    /// Sets the address from its fragment form (`#views/a.html`); an empty
    /// fragment clears it.
    pub fn set_fragment(&self, fragment: &str) -> bool {
        self.replace(Route::from_fragment(fragment))
    }

    fn replace(&self, next: Option<Route>) -> bool {
        {
            let mut current = self.current.write();
            if *current == next {
                return false;
            }
            current.clone_from(&next);
        }
        trace!("location -> {next:?}");
        if self.events.send(NavigationEvent::HashChanged(next)).is_err() {
            debug!("Location changed with no router listening");
        }
        true
    }
}

/// Receives every successfully loaded route.
pub trait NavigationIndicator: Send + Sync {
    fn update(&self, document: &Document, route: &Route);
}

/// Sets `aria-current="true"` on the `a[data-route]` pointing at the route
/// and clears it everywhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveLinks;

impl NavigationIndicator for ActiveLinks {
    fn update(&self, document: &Document, route: &Route) {
        let links: Vec<NodeId> = document.query_all(
            document.root(),
            &Selector::tag("a").with_attr(ROUTE_LINK_ATTR),
        );
        if links.is_empty() {
            return;
        }

        let href: String = route.to_fragment();
        let mut active: Option<NodeId> = None;
        for link in links {
            // removal on a live handle cannot fail
            let _ = document.remove_attr(link, "aria-current");
            if active.is_none() && document.attr(link, "href").as_deref() == Some(href.as_str()) {
                active = Some(link);
            }
        }
        if let Some(link) = active {
            let _ = document.set_attr(link, "aria-current", "true");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub label: String,
    /// `None` for the current page.
    pub href: Option<String>,
}

/// Breadcrumb trail rendered into `#breadcrumb .fr-breadcrumb__list`. The
/// list's first item (the home link) is kept.
#[derive(Debug, Clone, Default)]
pub struct Breadcrumb;

impl Breadcrumb {
    pub const CONTAINER_ID: &'static str = "breadcrumb";
    pub const LIST_CLASS: &'static str = "fr-breadcrumb__list";

    /// `views/a/b/c.html` gives `A`, `B` and `C`; `A` links to
    /// `#views/a/a.html`, `B` to `#views/a/b/b.html`, `C` is current.
    pub fn trail(route: &str) -> Vec<Crumb> {
        let path: &str = route.strip_prefix("views/").unwrap_or(route);
        let path: &str = path.strip_suffix(".html").unwrap_or(path);
        if path.is_empty() {
            return Vec::new();
        }

        let segments: Vec<&str> = path.split('/').collect();
        let last: usize = segments.len() - 1;
        let mut cumulative: String = String::from("views");

        segments
            .iter()
            .enumerate()
            .map(|(idx, segment)| {
                cumulative.push('/');
                cumulative.push_str(segment);
                Crumb {
                    label: capitalize(segment),
                    href: (idx < last).then(|| format!("#{cumulative}/{segment}.html")),
                }
            })
            .collect()
    }

    fn render(crumb: &Crumb) -> String {
        let label = markup::escape_text(&crumb.label);
        match &crumb.href {
            Some(href) => format!(
                r#"<li><a class="fr-breadcrumb__link" href="{}">{label}</a></li>"#,
                markup::escape_attr(href)
            ),
            None => format!(r#"<li><a class="fr-breadcrumb__link" aria-current="page">{label}</a></li>"#),
        }
    }
}

impl NavigationIndicator for Breadcrumb {
    fn update(&self, document: &Document, route: &Route) {
        let Some(container) = document.get_element_by_id(Self::CONTAINER_ID) else {
            return;
        };
        let Some(list) = document.query_first(container, &Selector::class(Self::LIST_CLASS)) else {
            return;
        };

        let items: Vec<NodeId> = document
            .children(list)
            .into_iter()
            .filter(|&child| document.tag_name(child).as_deref() == Some("li"))
            .collect();
        for item in items.into_iter().skip(1) {
            let _ = document.replace_with_html(item, "");
        }

        let html: String = Self::trail(route.as_str()).iter().map(Self::render).collect();
        if !html.is_empty() {
            if let Err(e) = document.append_html(list, &html) {
                debug!("Breadcrumb not rendered: {e}");
            }
        }
    }
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
