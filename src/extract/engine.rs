use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::extract::schema::{FieldSelector, FieldType, SelectorSchema};
use crate::extract::value::Value;

/// Run a selector schema against a parsed document.
///
/// Pure and deterministic: the same document and schema always produce the
/// same value. Zero matches are data, not errors: non-container fields come
/// back as `Null`, containers as an empty list.
pub fn extract(document: &Html, schema: &SelectorSchema) -> Value {
    Value::Map(evaluate_fields(document.root_element(), &schema.fields))
}

fn evaluate_fields(scope: ElementRef, fields: &[FieldSelector]) -> Vec<(String, Value)> {
    fields
        .iter()
        .map(|field| (field.name.clone(), evaluate_field(scope, field)))
        .collect()
}

fn evaluate_field(scope: ElementRef, field: &FieldSelector) -> Value {
    let selector = match Selector::parse(&field.query) {
        Ok(selector) => selector,
        // Validation rejects these at load time; an unparseable query at this
        // point still yields absence rather than poisoning sibling fields.
        Err(_) => return empty_value(field.field_type),
    };

    match field.field_type {
        FieldType::Text => scope
            .select(&selector)
            .next()
            .map(|el| Value::Text(element_text(el)))
            .unwrap_or(Value::Null),
        FieldType::Link | FieldType::Image => scope
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(field.effective_attribute()))
            .map(|attr| Value::Text(attr.trim().to_string()))
            .unwrap_or(Value::Null),
        FieldType::Table | FieldType::List => {
            let items: Vec<Value> = scope
                .select(&selector)
                .map(|el| Value::Text(element_text(el)))
                .collect();
            if items.is_empty() {
                Value::Null
            } else {
                Value::List(items)
            }
        }
        FieldType::Container => Value::List(
            scope
                .select(&selector)
                .map(|el| Value::Map(evaluate_fields(el, &field.children)))
                .collect(),
        ),
    }
}

fn empty_value(field_type: FieldType) -> Value {
    match field_type {
        FieldType::Container => Value::List(vec![]),
        _ => Value::Null,
    }
}

/// Whitespace-normalized text content of an element
fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fallback extraction used when a crawl carries no schema and the schema
/// store has nothing for the hostname: page title, h1 texts, best-effort
/// prices, image sources, link targets and the description/keywords metas.
pub fn extract_default(document: &Html) -> Value {
    let root = document.root_element();

    let title = select_first_text(root, "title");
    let h1_tags = select_all_text(root, "h1");
    let prices = extract_prices(root);
    let images = select_all_attr(root, "img", "src");
    let links = select_all_attr(root, "a", "href");
    let description = select_first_attr(root, "meta[name=\"description\"]", "content");
    let keywords = select_first_attr(root, "meta[name=\"keywords\"]", "content");

    Value::Map(vec![
        ("title".to_string(), title),
        ("h1Tags".to_string(), Value::List(h1_tags)),
        ("prices".to_string(), Value::List(prices)),
        ("images".to_string(), Value::List(images)),
        ("links".to_string(), Value::List(links)),
        ("description".to_string(), description),
        ("keywords".to_string(), keywords),
    ])
}

fn select_first_text(root: ElementRef, query: &str) -> Value {
    let selector = Selector::parse(query).expect("static selector");
    root.select(&selector)
        .next()
        .map(|el| Value::Text(element_text(el)))
        .unwrap_or(Value::Null)
}

fn select_all_text(root: ElementRef, query: &str) -> Vec<Value> {
    let selector = Selector::parse(query).expect("static selector");
    root.select(&selector).map(|el| Value::Text(element_text(el))).collect()
}

fn select_first_attr(root: ElementRef, query: &str, attr: &str) -> Value {
    let selector = Selector::parse(query).expect("static selector");
    root.select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| Value::Text(v.trim().to_string()))
        .unwrap_or(Value::Null)
}

fn select_all_attr(root: ElementRef, query: &str, attr: &str) -> Vec<Value> {
    let selector = Selector::parse(query).expect("static selector");
    root.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(|v| Value::Text(v.trim().to_string()))
        .collect()
}

/// Scan elements whose class mentions "price" for dollar amounts, keeping
/// first-seen order and dropping duplicates
fn extract_prices(root: ElementRef) -> Vec<Value> {
    let selector = Selector::parse("[class*=\"price\"]").expect("static selector");
    let pattern = Regex::new(r"\$\d+(\.\d+)?").expect("static regex");

    let mut seen = std::collections::HashSet::new();
    let mut prices = Vec::new();

    for el in root.select(&selector) {
        let text = element_text(el);
        for found in pattern.find_iter(&text) {
            let price = found.as_str().to_string();
            if seen.insert(price.clone()) {
                prices.push(Value::Text(price));
            }
        }
    }

    prices
}
