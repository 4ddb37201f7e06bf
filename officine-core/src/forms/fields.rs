//! Field extraction and built-in constraint checks for `<form>` elements.

use std::fmt;

use compact_str::CompactString;
use regex::Regex;
use tracing::debug;

use super::validators::EMAIL_PATTERN;
use crate::dom::{Document, ElementData, NodeId, Selector};

/// Submitted values in document order. A name may repeat (checkbox groups,
/// multi-selects).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    entries: Vec<(CompactString, String)>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<CompactString>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value submitted under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<CompactString>, V: Into<String>> FromIterator<(K, V)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    ValueMissing,
    BadInput,
    RangeUnderflow,
    RangeOverflow,
    TypeMismatch,
    PatternMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: CompactString,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.field, self.kind)
    }
}

/// Result of [`check_validity`]; valid when no control is in violation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validity {
    pub violations: Vec<Violation>,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

const NON_DATA_INPUTS: [&str; 5] = ["submit", "button", "reset", "image", "file"];

/// A form-associated control under a form.
struct Control {
    node: NodeId,
    element: ElementData,
    /// Lowercased `type` for inputs, the tag otherwise.
    kind: CompactString,
}

impl Control {
    fn new(node: NodeId, element: ElementData) -> Self {
        let kind: CompactString = if element.tag == "input" {
            element
                .attr("type")
                .map_or(CompactString::const_new("text"), |t| t.trim().to_ascii_lowercase().into())
        } else {
            element.tag.clone()
        };
        Self { node, element, kind }
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> Option<&str> {
        self.element.attr("name").filter(|n| !n.is_empty())
    }

    fn is_checkable(&self) -> bool {
        self.element.tag == "input" && matches!(self.kind(), "checkbox" | "radio")
    }

    fn is_checked(&self) -> bool {
        self.element.has_attr("checked")
    }
}

fn controls(document: &Document, form: NodeId) -> Vec<Control> {
    document
        .query_all(form, &Selector::any())
        .into_iter()
        .filter_map(|node| {
            let element: ElementData = document.element(node)?;
            if element.has_attr("disabled") {
                return None;
            }
            let control: Control = Control::new(node, element);
            let submittable: bool = match control.element.tag.as_str() {
                "input" => !NON_DATA_INPUTS.contains(&control.kind()),
                "select" | "textarea" => true,
                _ => false,
            };
            submittable.then_some(control)
        })
        .collect()
}

fn control_value(document: &Document, control: &Control) -> Option<String> {
    match control.element.tag.as_str() {
        "textarea" => Some(document.text_content(control.node)),
        "select" => {
            let options: Vec<NodeId> = document.query_all(control.node, &Selector::tag("option"));
            let chosen: NodeId = options
                .iter()
                .copied()
                .find(|&o| document.has_attr(o, "selected"))
                .or_else(|| options.first().copied())?;
            Some(
                document
                    .attr(chosen, "value")
                    .unwrap_or_else(|| document.text_content(chosen).trim().to_string()),
            )
        }
        _ if control.is_checkable() => control
            .is_checked()
            .then(|| control.element.attr("value").unwrap_or("on").to_string()),
        _ => Some(control.element.attr("value").unwrap_or_default().to_string()),
    }
}

/// Collects the values a browser would submit for `form`: named, enabled
/// controls in document order, checkboxes and radios only when checked.
pub fn extract(document: &Document, form: NodeId) -> FormFields {
    let mut fields: FormFields = FormFields::new();
    for control in controls(document, form) {
        let Some(name) = control.name() else { continue };
        if let Some(value) = control_value(document, &control) {
            fields.append(name, value);
        }
    }
    debug!("Extracted {} field(s) from {form}", fields.len());
    fields
}

/// Built-in constraint validation: `required`, numeric `min`/`max`, e-mail
/// shape and `pattern`.
pub fn check_validity(document: &Document, form: NodeId) -> Validity {
    let all: Vec<Control> = controls(document, form);
    let mut violations: Vec<Violation> = Vec::new();

    for control in &all {
        let field: CompactString = control
            .name()
            .map(CompactString::new)
            .or_else(|| control.element.id().map(CompactString::new))
            .unwrap_or_else(|| CompactString::new(control.kind()));
        let mut flag = |kind: ViolationKind| {
            violations.push(Violation {
                field: field.clone(),
                kind,
            });
        };

        let required: bool = control.element.has_attr("required");
        if control.is_checkable() {
            let satisfied: bool = if control.kind() == "radio" {
                all.iter()
                    .any(|c| c.kind() == "radio" && c.name() == control.name() && c.is_checked())
            } else {
                control.is_checked()
            };
            if required && !satisfied {
                flag(ViolationKind::ValueMissing);
            }
            continue;
        }

        let value: String = control_value(document, control).unwrap_or_default();
        if value.is_empty() {
            if required {
                flag(ViolationKind::ValueMissing);
            }
            continue;
        }

        match control.kind() {
            "number" | "range" => match value.trim().parse::<f64>() {
                Ok(number) => {
                    let bound = |name: &str| {
                        control
                            .element
                            .attr(name)
                            .and_then(|b| b.trim().parse::<f64>().ok())
                    };
                    if bound("min").is_some_and(|min| number < min) {
                        flag(ViolationKind::RangeUnderflow);
                    }
                    if bound("max").is_some_and(|max| number > max) {
                        flag(ViolationKind::RangeOverflow);
                    }
                }
                Err(_) => flag(ViolationKind::BadInput),
            },
            "email" if !EMAIL_PATTERN.is_match(&value) => flag(ViolationKind::TypeMismatch),
            _ => {}
        }

        if let Some(pattern) = control.element.attr("pattern") {
            match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(re) if !re.is_match(&value) => flag(ViolationKind::PatternMismatch),
                Ok(_) => {}
                Err(e) => debug!("Ignoring invalid pattern on {field}: {e}"),
            }
        }
    }

    Validity { violations }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(markup: &str) -> (Document, NodeId) {
        let doc = Document::parse(markup);
        let form = doc.query_first(doc.root(), &Selector::tag("form")).unwrap();
        (doc, form)
    }

    #[test]
    fn test_extract_follows_submission_rules() {
        let (doc, node) = form(
            r#"<form id="f">
                <input name="qty" value="3">
                <input name="off" value="x" disabled>
                <input type="checkbox" name="opt" value="a" checked>
                <input type="checkbox" name="opt" value="b">
                <input type="checkbox" name="flag" checked>
                <select name="unit"><option value="mg">mg</option><option value="g" selected>g</option></select>
                <textarea name="note">hello</textarea>
                <input type="submit" name="go" value="Go">
                <input value="anonymous">
            </form>"#,
        );

        let fields = extract(&doc, node);
        let pairs: Vec<_> = fields.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("qty", "3"),
                ("opt", "a"),
                ("flag", "on"),
                ("unit", "g"),
                ("note", "hello"),
            ]
        );
        assert_eq!(fields.get_all("opt"), vec!["a"]);
        assert!(!fields.contains("off"));
    }

    #[test]
    fn test_required_and_ranges() {
        let (doc, node) = form(
            r#"<form>
                <input name="name" required>
                <input type="number" name="age" min="0" max="120" value="130">
                <input type="number" name="dose" value="abc">
                <input type="email" name="mail" value="not-an-address">
                <input name="code" pattern="[0-9]{3}" value="12">
            </form>"#,
        );

        let validity = check_validity(&doc, node);
        let kinds: Vec<_> = validity.violations.iter().map(|v| (v.field.as_str(), v.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("name", ViolationKind::ValueMissing),
                ("age", ViolationKind::RangeOverflow),
                ("dose", ViolationKind::BadInput),
                ("mail", ViolationKind::TypeMismatch),
                ("code", ViolationKind::PatternMismatch),
            ]
        );
    }

    #[test]
    fn test_required_radio_group_is_satisfied_by_any_member() {
        let (doc, node) = form(
            r#"<form>
                <input type="radio" name="sex" value="f" required>
                <input type="radio" name="sex" value="m" checked>
            </form>"#,
        );
        assert!(check_validity(&doc, node).is_valid());
    }

    #[test]
    fn test_input_type_is_case_insensitive() {
        let (doc, node) = form(
            r#"<form>
                <input type="Checkbox" name="opt">
                <input type="CHECKBOX" name="kept" value="k" checked>
                <input type="Submit" name="go" value="Go">
                <input type="Number" name="n" value="abc">
            </form>"#,
        );
        let fields = extract(&doc, node);
        assert!(!fields.contains("opt"));
        assert_eq!(fields.get("kept"), Some("k"));
        assert!(!fields.contains("go"));

        let opt = doc.query_first(node, &Selector::attr_eq("name", "opt")).unwrap();
        doc.set_attr(opt, "checked", "").unwrap();
        assert_eq!(extract(&doc, node).get("opt"), Some("on"));

        let validity = check_validity(&doc, node);
        assert_eq!(validity.violations.len(), 1);
        assert_eq!(validity.violations[0].kind, ViolationKind::BadInput);
    }

    #[test]
    fn test_disabled_required_control_is_skipped() {
        let (doc, node) = form(r#"<form><input name="x" required disabled></form>"#);
        assert!(check_validity(&doc, node).is_valid());
    }
}
