//! Minimal element matcher: tag, id, class and attribute conditions, all
//! required.

use std::fmt;

use compact_str::CompactString;
use smallvec::SmallVec;

use super::node::ElementData;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    tag: Option<CompactString>,
    id: Option<String>,
    classes: SmallVec<[CompactString; 1]>,
    attrs: SmallVec<[(CompactString, Option<String>); 2]>,
}

impl Selector {
    /// Matches every element.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tag(tag: &str) -> Self {
        Self::any().with_tag(tag)
    }

    pub fn id(id: &str) -> Self {
        Self::any().with_id(id)
    }

    /// `.name`
    pub fn class(name: &str) -> Self {
        Self::any().with_class(name)
    }

    /// `[name]`
    pub fn attr(name: &str) -> Self {
        Self::any().with_attr(name)
    }

    /// `[name="value"]`
    pub fn attr_eq(name: &str, value: &str) -> Self {
        Self::any().with_attr_eq(name, value)
    }

    #[must_use]
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(CompactString::new(tag.to_ascii_lowercase()));
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn with_class(mut self, name: &str) -> Self {
        self.classes.push(CompactString::new(name));
        self
    }

    #[must_use]
    pub fn with_attr(mut self, name: &str) -> Self {
        self.attrs
            .push((CompactString::new(name.to_ascii_lowercase()), None));
        self
    }

    #[must_use]
    pub fn with_attr_eq(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((
            CompactString::new(name.to_ascii_lowercase()),
            Some(value.to_string()),
        ));
        self
    }

    pub fn matches(&self, element: &ElementData) -> bool {
        if let Some(tag) = &self.tag {
            if element.tag != *tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.id() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let present: &str = element.attr("class").unwrap_or_default();
            if !self
                .classes
                .iter()
                .all(|wanted| present.split_ascii_whitespace().any(|c| c == wanted.as_str()))
            {
                return false;
            }
        }
        self.attrs.iter().all(|(name, expected)| match expected {
            Some(value) => element.attr(name) == Some(value.as_str()),
            None => element.has_attr(name),
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            f.write_str(tag)?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        for (name, value) in &self.attrs {
            match value {
                Some(value) => write!(f, "[{name}=\"{value}\"]")?,
                None => write!(f, "[{name}]")?,
            }
        }
        if self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
        {
            f.write_str("*")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(href: &str) -> ElementData {
        let mut el = ElementData::new("A");
        el.attrs.insert("data-route".into(), String::new());
        el.attrs.insert("href".into(), href.to_string());
        el
    }

    #[test]
    fn test_conjunction_of_conditions() {
        let el = link("#views/a.html");
        assert!(Selector::tag("a").with_attr("data-route").matches(&el));
        assert!(
            Selector::tag("a")
                .with_attr("data-route")
                .with_attr_eq("href", "#views/a.html")
                .matches(&el)
        );
        assert!(!Selector::tag("a").with_attr_eq("href", "#views/b.html").matches(&el));
        assert!(!Selector::tag("form").matches(&el));
        assert!(Selector::any().matches(&el));
    }

    #[test]
    fn test_class_tokens() {
        let mut el = ElementData::new("ol");
        el.attrs.insert("class".into(), "fr-breadcrumb__list  wide".to_string());
        assert!(Selector::class("fr-breadcrumb__list").matches(&el));
        assert!(Selector::class("wide").with_class("fr-breadcrumb__list").matches(&el));
        assert!(!Selector::class("fr-breadcrumb").matches(&el));
        assert_eq!(Selector::tag("ol").with_class("x").to_string(), "ol.x");
    }

    #[test]
    fn test_display_is_css_like() {
        let sel = Selector::tag("a").with_attr("data-route").with_attr_eq("href", "#x");
        assert_eq!(sel.to_string(), r##"a[data-route][href="#x"]"##);
        assert_eq!(Selector::any().to_string(), "*");
    }
}
