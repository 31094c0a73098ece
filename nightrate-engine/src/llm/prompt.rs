//! Prompt construction for the calendar adjustment call

use chrono::{Datelike, NaiveDate};
use serde_json::json;

use crate::llm::sanitizer::{sanitize_address, sanitize_amenities, sanitize_city, sanitize_text};
use crate::llm::ChatMessage;
use crate::models::Property;

const SYSTEM_PROMPT: &str = "You are a revenue manager for short-term rentals. \
Use current web information about the destination (events, holidays, demand) to \
suggest one nightly price per requested date. Stay within the given floor and \
ceiling. Answer with a single JSON object and nothing else, shaped as \
{\"audit_metadata\": {\"market_sentiment\": string, \"property_grade\": string, \
\"top_demand_drivers\": [string]}, \"calendar\": [{\"date\": \"YYYY-MM-DD\", \
\"weekday\": string, \"final_suggested_price\": positive integer, \
\"price_breakdown\": {\"base\": number, \"premium\": boolean, ...}, \
\"reasoning\": string}]}. The calendar must contain exactly the requested dates.";

/// Everything the prompt is built from
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub property: &'a Property,
    pub today: NaiveDate,
    pub dates: &'a [NaiveDate],
    /// Deterministic baseline of the first night, the anchor the model adjusts from
    pub pivot_baseline: f64,
}

pub fn build_messages(input: &PromptInput<'_>) -> Vec<ChatMessage> {
    let property = input.property;
    let (start, end) = match (input.dates.first(), input.dates.last()) {
        (Some(start), Some(end)) => (*start, *end),
        _ => (input.today, input.today),
    };

    // Only the closed enums and numbers pass through unsanitized
    let profile = json!({
        "city": sanitize_city(&property.location.city),
        "country": sanitize_text(&property.location.country, 60),
        "address": property.address.as_deref().map(sanitize_address),
        "property_type": property.property_type.as_str(),
        "capacity": property.capacity,
        "surface_m2": property.surface_m2,
        "amenities": sanitize_amenities(&property.amenities),
        "strategy": property.strategy.as_str(),
        "envelope": {
            "floor": property.envelope.floor,
            "base": property.envelope.base,
            "ceiling": property.envelope.ceiling,
        },
        "rules": {
            "min_stay": property.rules.min_stay,
            "max_stay": property.rules.max_stay,
            "weekly_discount_pct": property.rules.weekly_discount_pct,
            "monthly_discount_pct": property.rules.monthly_discount_pct,
            "weekend_markup_pct": property.rules.weekend_markup_pct,
        },
    });

    let user = format!(
        "Today is {today} ({weekday}).\n\
         Property profile:\n{profile}\n\
         Deterministic baseline for {start}: {pivot:.0}. Use it as the pivot and \
         explain deviations from it.\n\
         Price every night from {start} to {end} inclusive ({count} dates).",
        today = input.today,
        weekday = input.today.weekday(),
        profile = profile,
        start = start,
        end = end,
        pivot = input.pivot_baseline,
        count = input.dates.len(),
    );

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}
