//! Rendering of update, condition, and filter requests into DynamoDB
//! expression syntax.
//!
//! Attribute names always go through `#name` placeholders because `status`
//! is a reserved word. Only names that appear in the rendered text are
//! registered; DynamoDB rejects requests that declare unused placeholders.

use std::collections::HashMap;

use super::store::{Condition, Filter};

/// Expression text plus the placeholder maps it refers to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Placeholders {
    pub names: HashMap<String, String>,
    pub values: HashMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an attribute name and returns its `#` placeholder.
    pub fn name(&mut self, attribute: &str) -> String {
        let placeholder = format!("#{}", sanitize(attribute));
        self.names
            .entry(placeholder.clone())
            .or_insert_with(|| attribute.to_string());
        placeholder
    }

    /// Registers a value and returns its `:` placeholder. A second, different
    /// value for the same attribute gets a numbered placeholder.
    pub fn value(&mut self, attribute: &str, value: &str) -> String {
        let base = format!(":{}", sanitize(attribute));
        let mut placeholder = base.clone();
        let mut n = 1;
        while let Some(existing) = self.values.get(&placeholder) {
            if existing == value {
                return placeholder;
            }
            placeholder = format!("{}{}", base, n);
            n += 1;
        }
        self.values.insert(placeholder.clone(), value.to_string());
        placeholder
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.values.is_empty()
    }
}

fn sanitize(attribute: &str) -> String {
    attribute
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `SET #a = :a, #b = :b`
pub fn update_expression(placeholders: &mut Placeholders, set: &[(String, String)]) -> String {
    let assignments: Vec<String> = set
        .iter()
        .map(|(attribute, value)| {
            let name = placeholders.name(attribute);
            let value = placeholders.value(attribute, value);
            format!("{} = {}", name, value)
        })
        .collect();
    format!("SET {}", assignments.join(", "))
}

/// Conditions joined with `AND`; `None` when there are none.
pub fn condition_expression(
    placeholders: &mut Placeholders,
    conditions: &[Condition],
) -> Option<String> {
    if conditions.is_empty() {
        return None;
    }
    let parts: Vec<String> = conditions
        .iter()
        .map(|condition| {
            let name = placeholders.name(condition.attribute());
            match condition {
                Condition::AttributeExists(_) => format!("attribute_exists({})", name),
                Condition::AttributeNotExists(_) => format!("attribute_not_exists({})", name),
            }
        })
        .collect();
    Some(parts.join(" AND "))
}

/// `#a = :a` key condition for an index query.
pub fn key_condition_expression(
    placeholders: &mut Placeholders,
    attribute: &str,
    value: &str,
) -> String {
    let name = placeholders.name(attribute);
    let value = placeholders.value(attribute, value);
    format!("{} = {}", name, value)
}

pub fn filter_expression(placeholders: &mut Placeholders, filter: &Filter) -> String {
    key_condition_expression(placeholders, &filter.attribute, &filter.value)
}
