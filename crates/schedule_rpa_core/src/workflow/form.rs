//! crates/schedule_rpa_core/src/workflow/form.rs
//!
//! Text heuristics used when filling vendor forms and when locating an existing
//! reservation by its label. These are deliberately permissive; see DESIGN.md
//! for the known ambiguities (duplicate name+phone, multi-word surnames).

use crate::ports::ElementRecord;

/// Splits a full name at the first whitespace into `(last, first)`.
/// Full-width spaces count as whitespace.
pub fn split_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((last, first)) => (last.to_string(), first.trim_start().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Removes every whitespace character.
pub fn normalize_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Keeps digits only; full-width digits are folded to ASCII.
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter_map(|c| match c {
            '0'..='9' => Some(c),
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
            _ => None,
        })
        .collect()
}

/// True when the label contains both the normalized name and the normalized phone.
pub fn label_matches(label: &str, customer_name: &str, customer_phone: &str) -> bool {
    let name = normalize_name(customer_name);
    let phone = normalize_phone(customer_phone);
    normalize_name(label).contains(&name) && normalize_phone(label).contains(&phone)
}

/// First element, in DOM order, whose label matches name and phone.
pub fn find_reservation<'a>(
    elements: &'a [ElementRecord],
    customer_name: &str,
    customer_phone: &str,
) -> Option<&'a ElementRecord> {
    elements
        .iter()
        .find(|e| label_matches(&e.text, customer_name, customer_phone))
}

/// The memo written to the vendor: menu label first, then free text.
pub fn compose_notes(menu_label: Option<&str>, notes: Option<&str>) -> String {
    [menu_label, notes]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
    pub value: String,
    pub label: String,
}

impl MenuOption {
    pub fn from_element(element: &ElementRecord) -> Option<Self> {
        let value = element.attr("value")?.trim();
        if value.is_empty() {
            return None;
        }
        let label = element
            .attr("title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| element.text.trim());
        Some(Self {
            value: value.to_string(),
            label: label.to_string(),
        })
    }
}

/// Exact value match first, then a label prefix match.
pub fn resolve_menu<'a>(options: &'a [MenuOption], requested: &str) -> Option<&'a MenuOption> {
    let requested = requested.trim();
    if requested.is_empty() {
        return None;
    }
    options
        .iter()
        .find(|o| o.value == requested)
        .or_else(|| options.iter().find(|o| o.label.starts_with(requested)))
}
