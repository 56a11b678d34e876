//! Intent classification
//!
//! Maps an utterance plus conversation context to ranked [`Intent`]s. Every
//! intent at or above the confidence floor is returned so the routing engine
//! can fan out to several domains.

use crate::{
    llm::{ChatMessage, GenerationParams, ModelProvider},
    memory::ConversationContext,
    types::{Domain, Intent, Result, Slots, Utterance},
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Default minimum confidence for an intent to be returned.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.4;

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Intents in descending confidence, all at or above the floor.
    async fn classify(
        &self,
        utterance: &Utterance,
        context: &ConversationContext,
    ) -> Result<Vec<Intent>>;
}

/// Keyword weights per domain. Multi-word entries match as phrases.
const KEYWORDS: &[(Domain, &[(&str, f32)])] = &[
    (
        Domain::Query,
        &[
            ("show", 1.0),
            ("list", 1.0),
            ("find", 1.0),
            ("lookup", 1.0),
            ("look up", 1.0),
            ("search", 1.0),
            ("inventory", 1.0),
            ("stock", 1.0),
            ("balance", 0.75),
            ("status", 0.75),
            ("details", 0.75),
            ("how many", 1.0),
            ("get", 0.5),
        ],
    ),
    (
        Domain::Action,
        &[
            ("create", 1.0),
            ("update", 1.0),
            ("delete", 1.0),
            ("approve", 1.0),
            ("reject", 1.0),
            ("assign", 1.0),
            ("submit", 1.0),
            ("modify", 1.0),
            ("change", 0.75),
            ("add", 0.75),
            ("remove", 0.75),
            ("cancel", 0.75),
            ("export", 0.75),
            ("import", 0.75),
            ("reorder", 1.0),
        ],
    ),
    (
        Domain::Analytics,
        &[
            ("analyze", 1.0),
            ("analyse", 1.0),
            ("analysis", 1.0),
            ("trend", 1.0),
            ("trends", 1.0),
            ("forecast", 1.0),
            ("compare", 1.0),
            ("comparison", 1.0),
            ("metrics", 1.0),
            ("kpi", 1.0),
            ("insights", 1.0),
            ("report", 0.75),
            ("performance", 0.75),
            ("growth", 0.75),
        ],
    ),
    (
        Domain::Scheduler,
        &[
            ("schedule", 1.0),
            ("reschedule", 1.0),
            ("meeting", 1.0),
            ("calendar", 1.0),
            ("remind", 1.0),
            ("reminder", 1.0),
            ("appointment", 1.0),
            ("book", 0.75),
            ("recurring", 0.75),
        ],
    ),
    (
        Domain::Compliance,
        &[
            ("compliance", 1.0),
            ("compliant", 1.0),
            ("audit", 1.0),
            ("regulation", 1.0),
            ("regulatory", 1.0),
            ("violation", 1.0),
            ("gdpr", 1.0),
            ("sox", 1.0),
            ("policy", 0.75),
        ],
    ),
    (
        Domain::Help,
        &[
            ("help", 1.0),
            ("how do i", 1.0),
            ("how to", 1.0),
            ("explain", 1.0),
            ("guide", 0.75),
            ("tutorial", 0.75),
            ("what is", 0.5),
        ],
    ),
];

/// Action words and the canonical verb recorded in the `action` slot.
const ACTION_VERBS: &[(&str, &str)] = &[
    ("create", "create"),
    ("add", "create"),
    ("new", "create"),
    ("register", "create"),
    ("insert", "create"),
    ("reorder", "create"),
    ("update", "update"),
    ("edit", "update"),
    ("modify", "update"),
    ("change", "update"),
    ("correct", "update"),
    ("delete", "delete"),
    ("remove", "delete"),
    ("cancel", "delete"),
    ("terminate", "delete"),
    ("approve", "approve"),
    ("accept", "approve"),
    ("authorize", "approve"),
    ("submit", "approve"),
    ("reject", "reject"),
    ("decline", "reject"),
    ("deny", "reject"),
    ("refuse", "reject"),
    ("assign", "assign"),
    ("delegate", "assign"),
    ("transfer", "assign"),
    ("schedule", "schedule"),
    ("reschedule", "schedule"),
    ("book", "schedule"),
    ("notify", "notify"),
    ("alert", "notify"),
    ("inform", "notify"),
    ("export", "export"),
    ("import", "import"),
];

/// Business entity words and the canonical name recorded in the `entity` slot.
const ENTITIES: &[(&str, &str)] = &[
    ("purchase order", "purchase_order"),
    ("employee", "employee"),
    ("staff", "employee"),
    ("invoice", "invoice"),
    ("bill", "invoice"),
    ("customer", "customer"),
    ("client", "customer"),
    ("vendor", "vendor"),
    ("supplier", "supplier"),
    ("product", "product"),
    ("item", "product"),
    ("order", "order"),
    ("meeting", "meeting"),
    ("expense", "expense"),
    ("payment", "payment"),
    ("report", "report"),
];

/// Reordering stock raises a purchase order unless another entity is named.
const REORDER_ENTITY: &str = "purchase_order";

static SKU_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bsku[- ]?(\d+)\b").expect("valid sku pattern"));
static EMPLOYEE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bemp[- ]?(\d+)\b").expect("valid employee pattern"));
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("valid date pattern"));
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})*(?:\.\d+)?|\d+(?:\.\d+)?)").expect("valid amount pattern")
});
static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:last|this|next) (?:week|month|quarter|year)|q[1-4]|today|tomorrow)\b")
        .expect("valid period pattern")
});

/// Normalize to lowercase words separated by single spaces, padded on both ends.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

/// Pull structured parameters out of free text. Missing slots are simply absent.
pub fn extract_slots(text: &str) -> Slots {
    let mut slots = Slots::new();
    if let Some(c) = SKU_RE.captures(text) {
        slots.insert("sku".into(), format!("SKU-{}", &c[1]));
    }
    if let Some(c) = EMPLOYEE_RE.captures(text) {
        slots.insert("employee_id".into(), format!("EMP-{}", &c[1]));
    }
    if let Some(c) = DATE_RE.captures(text) {
        slots.insert("date".into(), c[1].to_string());
    }
    if let Some(c) = AMOUNT_RE.captures(text) {
        slots.insert("amount".into(), c[1].replace(',', ""));
    }
    if let Some(c) = PERIOD_RE.captures(text) {
        slots.insert("period".into(), c[1].to_lowercase());
    }

    let normalized = normalize(text);
    let verb = first_match(&normalized, ACTION_VERBS);
    if let Some((_, action)) = verb {
        slots.insert("action".into(), action.to_string());
    }
    match first_match(&normalized, ENTITIES) {
        Some((_, entity)) => {
            slots.insert("entity".into(), entity.to_string());
        }
        None if matches!(verb, Some(("reorder", _))) => {
            slots.insert("entity".into(), REORDER_ENTITY.to_string());
        }
        None => {}
    }
    slots
}

/// The table entry whose word appears earliest in `normalized`.
fn first_match(normalized: &str, table: &[(&'static str, &'static str)]) -> Option<(&'static str, &'static str)> {
    table
        .iter()
        .filter_map(|(word, canonical)| {
            normalized
                .find(&format!(" {} ", word))
                .map(|at| (at, *word, *canonical))
        })
        .min_by_key(|(at, _, _)| *at)
        .map(|(_, word, canonical)| (word, canonical))
}

/// Remembered slots overlaid with the ones extracted from this utterance.
fn follow_up_slots(context: &ConversationContext, extracted: &Slots) -> Slots {
    let mut slots = context.remembered_slots();
    slots.extend(extracted.clone());
    slots
}

/// Deterministic lexical classifier.
///
/// Each domain's score is the sum of matched keyword weights; confidence is
/// `score / (score + saturation)`. Extracted identifiers add a small bonus
/// to the domain that looks them up. Ties keep [`Domain`] order.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    floor: f32,
    saturation: f32,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_FLOOR)
    }
}

impl KeywordClassifier {
    pub fn new(floor: f32) -> Self {
        Self {
            floor: floor.clamp(0.0, 1.0),
            saturation: 1.0,
        }
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    fn scores(normalized: &str, slots: &Slots) -> BTreeMap<Domain, f32> {
        let mut scores = BTreeMap::new();
        for (domain, keywords) in KEYWORDS {
            let score: f32 = keywords
                .iter()
                .filter(|(kw, _)| normalized.contains(&format!(" {} ", kw)))
                .map(|(_, w)| w)
                .sum();
            if score > 0.0 {
                scores.insert(*domain, score);
            }
        }
        if slots.contains_key("sku") || slots.contains_key("employee_id") {
            if let Some(q) = scores.get_mut(&Domain::Query) {
                *q += 0.5;
            }
        }
        scores
    }

    fn keyword_intents(&self, normalized: &str, extracted: &Slots) -> Vec<Intent> {
        Self::scores(normalized, extracted)
            .into_iter()
            .map(|(domain, score)| Intent::new(domain, score / (score + self.saturation)))
            .filter(|i| i.confidence >= self.floor)
            .collect()
    }

    /// True when `text` names no domain and only adds parameters to the
    /// previous turn's route. Only follow-ups inherit remembered slots.
    pub fn is_follow_up(&self, text: &str, context: &ConversationContext) -> bool {
        let extracted = extract_slots(text);
        !extracted.is_empty()
            && !context.last_routed_domains().is_empty()
            && self.keyword_intents(&normalize(text), &extracted).is_empty()
    }

    /// Synchronous classification, shared with the model-backed classifier.
    pub fn classify_text(&self, text: &str, context: &ConversationContext) -> Vec<Intent> {
        let extracted = extract_slots(text);

        let mut intents: Vec<Intent> = self
            .keyword_intents(&normalize(text), &extracted)
            .into_iter()
            .map(|i| i.with_slots(extracted.clone()))
            .collect();

        if intents.is_empty() {
            let previous = context.last_routed_domains();
            if !extracted.is_empty() && !previous.is_empty() {
                debug!(?previous, "no keyword match, continuing previous route");
                let slots = follow_up_slots(context, &extracted);
                intents = previous
                    .iter()
                    .map(|d| Intent::new(*d, self.floor).with_slots(slots.clone()))
                    .collect();
            } else {
                intents.push(Intent::new(Domain::Help, self.floor).with_slots(extracted));
            }
        }

        sort_intents(&mut intents);
        intents
    }
}

/// Descending confidence, ties in [`Domain`] order.
fn sort_intents(intents: &mut [Intent]) {
    intents.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.domain.cmp(&b.domain))
    });
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(
        &self,
        utterance: &Utterance,
        context: &ConversationContext,
    ) -> Result<Vec<Intent>> {
        Ok(self.classify_text(&utterance.text, context))
    }
}

#[derive(Debug, Deserialize)]
struct ModelIntents {
    intents: Vec<ModelIntent>,
}

#[derive(Debug, Deserialize)]
struct ModelIntent {
    domain: String,
    confidence: f32,
}

/// Classifier that asks the model for scored domains.
///
/// Slots always come from the deterministic extractor. Provider errors and
/// unparseable output fall back to the keyword classifier.
pub struct ModelIntentClassifier {
    provider: Arc<dyn ModelProvider>,
    model: String,
    fallback: KeywordClassifier,
}

impl ModelIntentClassifier {
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>, floor: f32) -> Self {
        Self {
            provider,
            model: model.into(),
            fallback: KeywordClassifier::new(floor),
        }
    }

    fn system_prompt() -> &'static str {
        r#"You classify requests for an ERP copilot into capability domains.

Domains:
- query: look up records, inventory, balances, statuses
- action: create, update, delete, approve or reject records
- analytics: trends, forecasts, comparisons, KPIs, reports
- scheduler: meetings, reminders, calendar bookings, recurring jobs
- compliance: audits, policy and regulatory checks
- help: how-to questions and product guidance

Respond with ONLY a JSON object:
{"intents": [{"domain": "<domain>", "confidence": <0.0-1.0>}]}
List every domain the request needs."#
    }

    /// Parse model output into scored domains.
    ///
    /// Accepts a bare JSON object or one wrapped in prose or code fences.
    /// Unknown domains are dropped. Returns `None` when nothing usable remains.
    pub fn parse_intents(output: &str) -> Option<Vec<(Domain, f32)>> {
        let start = output.find('{')?;
        let end = output.rfind('}')?;
        if end < start {
            return None;
        }
        let parsed: ModelIntents = serde_json::from_str(&output[start..=end]).ok()?;

        let mut best: BTreeMap<Domain, f32> = BTreeMap::new();
        for intent in parsed.intents {
            if let Ok(domain) = intent.domain.parse::<Domain>() {
                let c = intent.confidence.clamp(0.0, 1.0);
                let entry = best.entry(domain).or_insert(c);
                *entry = entry.max(c);
            }
        }
        (!best.is_empty()).then(|| best.into_iter().collect())
    }
}

#[async_trait]
impl IntentClassifier for ModelIntentClassifier {
    async fn classify(
        &self,
        utterance: &Utterance,
        context: &ConversationContext,
    ) -> Result<Vec<Intent>> {
        let messages = [
            ChatMessage::system(Self::system_prompt()),
            ChatMessage::user(utterance.text.clone()),
        ];
        let params = GenerationParams::default().with_temperature(0.0);

        let output = match self.provider.generate(&messages, &self.model, &params).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "model classification failed, using keyword classifier");
                return Ok(self.fallback.classify_text(&utterance.text, context));
            }
        };

        let Some(scored) = Self::parse_intents(&output) else {
            debug!(%output, "unparseable classifier output, using keyword classifier");
            return Ok(self.fallback.classify_text(&utterance.text, context));
        };

        let extracted = extract_slots(&utterance.text);
        let slots = if self.fallback.is_follow_up(&utterance.text, context) {
            follow_up_slots(context, &extracted)
        } else {
            extracted
        };

        let mut intents: Vec<Intent> = scored
            .into_iter()
            .filter(|(_, c)| *c >= self.fallback.floor())
            .map(|(d, c)| Intent::new(d, c).with_slots(slots.clone()))
            .collect();

        if intents.is_empty() {
            return Ok(self.fallback.classify_text(&utterance.text, context));
        }
        sort_intents(&mut intents);
        Ok(intents)
    }
}
