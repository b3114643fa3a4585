//! Query classification and expansion.
//!
//! [`LlmExpander`] asks the generation collaborator for a structured
//! expansion and degrades to query-only behaviour on any failure.
//! [`RuleBasedExpander`] is the deterministic alternative used when
//! generation is disabled and in tests. Both merge concept terms from the
//! static [`SynonymTable`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use docqa_core::text::{contains_phrase, folded_content_tokens, folded_tokens, normalize, tokenize};
use docqa_core::{
    CorpusStats, Expander, ExpansionConfig, ExpansionSource, Generator, Query, QueryExpansion,
    QueryType, RagError, Result,
};

use crate::score::NEGATION_MARKERS;

/// Built-in domain synonyms for insurance and policy documents.
const BUILTIN_SYNONYMS: &[(&str, &[&str])] = &[
    ("ayush", &["ayurveda", "unani", "siddha", "homeopathy"]),
    ("claim", &["reimbursement", "cashless settlement"]),
    ("co payment", &["copay", "co pay"]),
    ("deductible", &["excess"]),
    ("exclusion", &["excluded", "not covered", "exception"]),
    ("grace period", &["premium due date"]),
    ("hospitalization", &["hospitalisation", "inpatient care", "admission"]),
    ("maternity", &["pregnancy", "childbirth", "delivery"]),
    ("new born baby", &["newborn", "infant", "neonate"]),
    ("policy period", &["policy term", "period of insurance"]),
    ("pre existing disease", &["ped", "pre existing condition"]),
    ("room rent", &["room charges", "accommodation charges"]),
    ("sum insured", &["si", "coverage amount", "limit of cover"]),
    ("surgery", &["surgical procedure", "operation"]),
    ("waiting period", &["cooling period", "moratorium"]),
];

/// Words that mark a question about what a policy pays for.
const COVERAGE_CUES: &[&str] = &[
    "benefit", "cover", "covered", "coverage", "eligible", "eligibility", "payable",
    "reimbursed",
];

/// Words that mark a request for a definition.
const DEFINITION_CUES: &[&str] = &["define", "defined", "definition", "meaning", "mean", "means"];

/// Words that mark a question about exclusions, beside the negation markers.
const EXCLUSION_CUES: &[&str] = &["exclude", "excluded", "excludes", "exclusion", "exclusions"];

const EXPANSION_PROMPT: &str = r#"Analyse the following question about an insurance or policy document.

Question: {question}

Return a JSON object with exactly these fields:
- "query_type": one of "definition", "exclusion", "coverage", "general"
- "variants": 4 to 8 alternative phrasings of the full question
- "concepts": 8 to 12 key terms, synonyms and abbreviations used in policy documents
- "hypothetical_answers": 2 to 3 short passages written the way the answer would appear in the policy wording
- "context_hints": 4 to 6 likely section titles where the answer is found

Respond with the JSON object only."#;

/// Static term → alternate phrasings table, normalised and read-only.
#[derive(Debug, Clone)]
pub struct SynonymTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SynonymTable {
    /// The built-in insurance table.
    pub fn builtin() -> Self {
        Self::from_entries(
            BUILTIN_SYNONYMS
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect())),
        )
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        let mut table = Self {
            entries: BTreeMap::new(),
        };
        table.merge(entries);
        table
    }

    /// The built-in table with configured entries replacing or adding terms.
    pub fn from_config(config: &ExpansionConfig) -> Self {
        let mut table = Self::builtin();
        table.merge(config.synonyms.clone());
        table
    }

    fn merge(&mut self, entries: impl IntoIterator<Item = (String, Vec<String>)>) {
        for (term, alternates) in entries {
            let term = normalize(&term);
            if term.is_empty() {
                continue;
            }
            let alternates = alternates
                .iter()
                .map(|a| normalize(a))
                .filter(|a| !a.is_empty() && *a != term)
                .collect();
            self.entries.insert(term, alternates);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose term or any alternate occurs in the text, as
    /// `(term, alternates)` in table order.
    pub fn matches(&self, text: &str) -> Vec<(&str, &[String])> {
        let tokens = folded_tokens(text);
        self.entries
            .iter()
            .filter(|(term, alternates)| {
                std::iter::once(*term)
                    .chain(alternates.iter())
                    .any(|phrase| contains_phrase(&tokens, &folded_tokens(phrase)))
            })
            .map(|(term, alternates)| (term.as_str(), alternates.as_slice()))
            .collect()
    }

    /// Concept terms for a question: every matched entry with its alternates.
    ///
    /// When corpus statistics are available, terms with a content token
    /// that never occurs in the corpus are dropped. Tokens are plural-folded
    /// as in [`SynonymTable::matches`].
    pub fn concepts(&self, text: &str, stats: &dyn CorpusStats) -> Vec<String> {
        let known = |phrase: &str| {
            let tokens = folded_content_tokens(phrase);
            !tokens.is_empty()
                && (stats.corpus_size() == 0
                    || tokens.iter().all(|t| stats.document_frequency(t) > 0))
        };

        let mut concepts = Vec::new();
        for (term, alternates) in self.matches(text) {
            for phrase in std::iter::once(term).chain(alternates.iter().map(String::as_str)) {
                if known(phrase) {
                    concepts.push(phrase.to_string());
                }
            }
        }
        dedup_normalized(concepts, usize::MAX)
    }
}

/// Deterministic intent classification.
///
/// Exclusion cues win over coverage cues, which win over definition cues.
pub fn classify(text: &str) -> QueryType {
    let tokens = tokenize(text);
    let has_any = |cues: &[&str]| tokens.iter().any(|t| cues.contains(&t.as_str()));

    let negated = NEGATION_MARKERS
        .iter()
        .any(|m| contains_phrase(&tokens, &tokenize(m)));
    if negated || has_any(EXCLUSION_CUES) {
        return QueryType::Exclusion;
    }
    if has_any(COVERAGE_CUES) {
        return QueryType::Coverage;
    }

    let asks_what = tokens.len() >= 2
        && tokens[0] == "what"
        && (tokens[1] == "is" || tokens[1] == "are" || tokens[1] == "does");
    if asks_what || has_any(DEFINITION_CUES) {
        return QueryType::Definition;
    }
    QueryType::General
}

fn section_hints(query_type: QueryType) -> Vec<String> {
    let hints: &[&str] = match query_type {
        QueryType::Definition => &["definitions", "interpretation"],
        QueryType::Exclusion => &["exclusions", "what is not covered", "general exclusions"],
        QueryType::Coverage => &["coverage", "benefits", "scope of cover"],
        QueryType::General => &[],
    };
    hints.iter().map(|h| h.to_string()).collect()
}

/// Trim, drop empties and normalised duplicates, keep at most `max`.
fn dedup_normalized(items: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| {
            let key = normalize(s);
            !key.is_empty() && seen.insert(key)
        })
        .take(max)
        .collect()
}

/// Append synonym concepts after the existing ones, respecting the cap.
fn merge_concepts(expansion: &mut QueryExpansion, extra: Vec<String>, max: usize) {
    let mut all = std::mem::take(&mut expansion.concepts);
    all.extend(extra);
    expansion.concepts = dedup_normalized(all, max);
}

/// Start of the first token-aligned occurrence of `phrase`.
fn find_phrase(haystack: &[String], phrase: &[String]) -> Option<usize> {
    if phrase.is_empty() || phrase.len() > haystack.len() {
        return None;
    }
    haystack.windows(phrase.len()).position(|w| w == phrase)
}

/// Rule-based expander: keyword classifier plus synonym substitution.
pub struct RuleBasedExpander {
    synonyms: Arc<SynonymTable>,
    config: ExpansionConfig,
}

impl RuleBasedExpander {
    pub fn new(synonyms: Arc<SynonymTable>, config: ExpansionConfig) -> Self {
        Self { synonyms, config }
    }

    /// Variants obtained by swapping a matched phrase for the entry's other
    /// phrasings.
    ///
    /// The phrase is located in plural-folded tokens, the same form
    /// [`SynonymTable::matches`] uses, so a question naming an alternate
    /// ("newborn") or a plural ("waiting periods") is rephrased too.
    fn variants(&self, text: &str) -> Vec<String> {
        let tokens = tokenize(text);
        let folded = folded_tokens(text);
        let original = tokens.join(" ");
        let mut variants = Vec::new();

        for (term, alternates) in self.synonyms.matches(text) {
            let phrasings: Vec<&str> = std::iter::once(term)
                .chain(alternates.iter().map(String::as_str))
                .collect();

            for (i, phrase) in phrasings.iter().enumerate() {
                let phrase_tokens = folded_tokens(phrase);
                let Some(pos) = find_phrase(&folded, &phrase_tokens) else {
                    continue;
                };

                for (j, replacement) in phrasings.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let mut swapped = tokens[..pos].to_vec();
                    swapped.extend(tokenize(replacement));
                    swapped.extend_from_slice(&tokens[pos + phrase_tokens.len()..]);
                    variants.push(swapped.join(" "));
                }
            }
        }

        variants.retain(|v| *v != original);
        dedup_normalized(variants, self.config.max_variants)
    }
}

#[async_trait]
impl Expander for RuleBasedExpander {
    async fn expand(&self, query: &Query, stats: &dyn CorpusStats) -> QueryExpansion {
        if query.is_blank() {
            return QueryExpansion::degraded();
        }

        let query_type = classify(&query.text);
        let mut context_hints = section_hints(query_type);
        context_hints.truncate(self.config.max_context_hints);

        let expansion = QueryExpansion {
            query_type,
            variants: self.variants(&query.text),
            concepts: dedup_normalized(
                self.synonyms.concepts(&query.text, stats),
                self.config.max_concepts,
            ),
            hypothetical_answers: Vec::new(),
            context_hints,
            source: ExpansionSource::RuleBased,
        };

        debug!(
            "Rule-based expansion: type={} variants={} concepts={}",
            expansion.query_type,
            expansion.variants.len(),
            expansion.concepts.len()
        );
        expansion
    }
}

/// Shape of the generation output.
#[derive(Debug, Deserialize)]
struct RawExpansion {
    query_type: String,
    #[serde(default)]
    variants: Vec<String>,
    #[serde(default)]
    concepts: Vec<String>,
    #[serde(default, alias = "hypotheticals")]
    hypothetical_answers: Vec<String>,
    #[serde(default)]
    context_hints: Vec<String>,
}

/// Parse generation output into an expansion.
///
/// The JSON object may be wrapped in prose or a code fence; everything
/// between the first `{` and the last `}` is parsed.
pub fn parse_expansion(raw: &str, query: &str, config: &ExpansionConfig) -> Result<QueryExpansion> {
    let (start, end) = match (raw.find('{'), raw.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(RagError::malformed_expansion("no JSON object in output")),
    };

    let parsed: RawExpansion = serde_json::from_str(&raw[start..=end])
        .map_err(|e| RagError::malformed_expansion(e.to_string()))?;

    let query_type = parsed
        .query_type
        .parse::<QueryType>()
        .map_err(|_| RagError::malformed_expansion(format!("query_type {:?}", parsed.query_type)))?;

    let original = normalize(query);
    let mut variants = parsed.variants;
    variants.retain(|v| normalize(v) != original);

    Ok(QueryExpansion {
        query_type,
        variants: dedup_normalized(variants, config.max_variants),
        concepts: dedup_normalized(parsed.concepts, config.max_concepts),
        hypothetical_answers: dedup_normalized(parsed.hypothetical_answers, config.max_hypothetical),
        context_hints: dedup_normalized(parsed.context_hints, config.max_context_hints),
        source: ExpansionSource::Generated,
    })
}

/// Generation-backed expander.
pub struct LlmExpander {
    generator: Arc<dyn Generator>,
    synonyms: Arc<SynonymTable>,
    config: ExpansionConfig,
}

impl LlmExpander {
    pub fn new(
        generator: Arc<dyn Generator>,
        synonyms: Arc<SynonymTable>,
        config: ExpansionConfig,
    ) -> Self {
        Self {
            generator,
            synonyms,
            config,
        }
    }

    fn prompt(&self, query: &Query) -> String {
        EXPANSION_PROMPT.replace("{question}", query.text.trim())
    }

    async fn try_expand(&self, query: &Query) -> Result<QueryExpansion> {
        let prompt = self.prompt(query);
        let raw = tokio::time::timeout(self.config.timeout(), self.generator.generate(&prompt))
            .await
            .map_err(|_| RagError::timeout("query expansion", self.config.timeout_ms))??;

        parse_expansion(&raw, &query.text, &self.config)
    }
}

#[async_trait]
impl Expander for LlmExpander {
    async fn expand(&self, query: &Query, stats: &dyn CorpusStats) -> QueryExpansion {
        if query.is_blank() {
            return QueryExpansion::degraded();
        }

        let mut expansion = match self.try_expand(query).await {
            Ok(expansion) => expansion,
            Err(e) if e.is_recoverable() => {
                warn!("Query expansion degraded [{}]: {}", e.error_code(), e);
                QueryExpansion::degraded()
            }
            Err(e) => {
                error!("Query expansion failed unexpectedly [{}]: {}", e.error_code(), e);
                QueryExpansion::degraded()
            }
        };

        let synonyms = self.synonyms.concepts(&query.text, stats);
        merge_concepts(&mut expansion, synonyms, self.config.max_concepts);

        debug!(
            "Expansion: type={} source={:?} variants={} concepts={} hypothetical={} hints={}",
            expansion.query_type,
            expansion.source,
            expansion.variants.len(),
            expansion.concepts.len(),
            expansion.hypothetical_answers.len(),
            expansion.context_hints.len()
        );
        expansion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::PoolStats;
    use docqa_core::NoCorpusStats;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Scripted {
        reply: Result<String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(RagError::generation("HTTP 503")),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(RagError::generation(e.to_string())),
            }
        }
    }

    const GOOD_REPLY: &str = r#"Here you go:
```json
{
  "query_type": "definition",
  "variants": ["Define newborn baby", "Who counts as a new born baby?", "what is a newborn baby",
               "Define newborn baby"],
  "concepts": ["newborn", "infant", "90 days"],
  "hypothetical_answers": ["New Born Baby means a baby born during the Policy Period aged up to 90 days."],
  "context_hints": ["Definitions"]
}
```"#;

    fn llm(generator: Scripted) -> LlmExpander {
        LlmExpander::new(
            Arc::new(generator),
            Arc::new(SynonymTable::builtin()),
            ExpansionConfig::default(),
        )
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("What medical procedures are excluded?"), QueryType::Exclusion);
        assert_eq!(classify("Which treatments are not covered?"), QueryType::Exclusion);
        assert_eq!(classify("What is covered for a newborn baby?"), QueryType::Coverage);
        assert_eq!(classify("What is a newborn baby according to the policy?"), QueryType::Definition);
        assert_eq!(classify("Meaning of sum insured"), QueryType::Definition);
        assert_eq!(classify("How do I file a claim?"), QueryType::General);
    }

    #[test]
    fn test_synonym_matches_fold_plurals() {
        let table = SynonymTable::builtin();
        let terms: Vec<&str> = table
            .matches("Are there waiting periods for newborns?")
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(terms, vec!["new born baby", "waiting period"]);
    }

    #[test]
    fn test_config_synonyms_merge() {
        let mut config = ExpansionConfig::default();
        config
            .synonyms
            .insert("Room Rent".to_string(), vec!["boarding".to_string()]);
        config
            .synonyms
            .insert("OPD".to_string(), vec!["outpatient".to_string()]);

        let table = SynonymTable::from_config(&config);
        assert_eq!(table.len(), BUILTIN_SYNONYMS.len() + 1);
        assert_eq!(table.concepts("room rent limits", &NoCorpusStats), vec!["room rent", "boarding"]);
        assert_eq!(table.concepts("opd cover", &NoCorpusStats), vec!["opd", "outpatient"]);
    }

    #[test]
    fn test_concepts_filtered_by_corpus() {
        struct Only(&'static [&'static str]);
        impl CorpusStats for Only {
            fn corpus_size(&self) -> usize {
                10
            }
            fn document_frequency(&self, term: &str) -> usize {
                usize::from(self.0.contains(&term))
            }
        }

        let table = SynonymTable::builtin();
        let concepts = table.concepts("maternity", &Only(&["maternity", "delivery"]));
        assert_eq!(concepts, vec!["maternity", "delivery"]);
    }

    #[test]
    fn test_concepts_match_plural_corpus_wording() {
        let stats = PoolStats::from_texts(["Waiting periods of 24 months apply to maternity."]);
        let table = SynonymTable::builtin();

        let concepts = table.concepts("What is the waiting period for maternity?", &stats);
        assert_eq!(concepts, vec!["maternity", "waiting period"]);
    }

    #[test]
    fn test_variants_from_alternate_and_plural() {
        let expander = RuleBasedExpander::new(
            Arc::new(SynonymTable::builtin()),
            ExpansionConfig::default(),
        );

        assert_eq!(
            expander.variants("Is a newborn covered?"),
            vec![
                "is a new born baby covered",
                "is a infant covered",
                "is a neonate covered"
            ]
        );

        let plural = expander.variants("waiting periods for maternity");
        assert!(plural.contains(&"cooling period for maternity".to_string()));
        assert!(plural.contains(&"waiting periods for pregnancy".to_string()));
    }

    #[test]
    fn test_parse_expansion() {
        let config = ExpansionConfig::default();
        let e = parse_expansion(GOOD_REPLY, "What is a newborn baby?", &config).unwrap();

        assert_eq!(e.query_type, QueryType::Definition);
        assert_eq!(e.source, ExpansionSource::Generated);
        // the duplicate and the restated question are dropped
        assert_eq!(e.variants.len(), 2);
        assert_eq!(e.hypothetical_answers.len(), 1);
        assert_eq!(e.context_hints, vec!["Definitions"]);
    }

    #[test]
    fn test_parse_expansion_clamps_counts() {
        let config = ExpansionConfig {
            max_variants: 2,
            ..Default::default()
        };
        let raw = r#"{"query_type":"general","variants":["a b","c d","e f","g h"]}"#;
        let e = parse_expansion(raw, "q", &config).unwrap();
        assert_eq!(e.variants, vec!["a b", "c d"]);
        assert!(e.concepts.is_empty());
    }

    #[test]
    fn test_parse_expansion_rejects_malformed() {
        let config = ExpansionConfig::default();
        for raw in [
            "no json here",
            r#"{"variants": ["x"]}"#,
            r#"{"query_type": "eligibility"}"#,
            r#"{"query_type": "general", "variants": "not a list"}"#,
            "} backwards {",
        ] {
            let err = parse_expansion(raw, "q", &config).err().unwrap();
            assert_eq!(err.error_code(), "MALFORMED_EXPANSION", "{}", raw);
        }
    }

    #[tokio::test]
    async fn test_llm_expander_success() {
        let expander = llm(Scripted::ok(GOOD_REPLY));
        let e = expander
            .expand(&Query::new("What is a newborn baby?"), &NoCorpusStats)
            .await;

        assert_eq!(e.query_type, QueryType::Definition);
        assert!(e.concepts.contains(&"infant".to_string()));
        // synonym table adds terms the model did not list
        assert!(e.concepts.contains(&"neonate".to_string()));
        assert!(e.concepts.len() <= ExpansionConfig::default().max_concepts);
    }

    #[tokio::test]
    async fn test_llm_expander_degrades_on_error() {
        let expander = llm(Scripted::failing());
        let e = expander
            .expand(&Query::new("What is the maternity waiting period?"), &NoCorpusStats)
            .await;

        assert!(e.is_degraded());
        assert_eq!(e.query_type, QueryType::General);
        assert!(e.variants.is_empty());
        assert!(e.hypothetical_answers.is_empty());
        assert!(e.context_hints.is_empty());
        assert!(e.concepts.contains(&"maternity".to_string()));
    }

    #[tokio::test]
    async fn test_llm_expander_degrades_on_garbage() {
        let expander = llm(Scripted::ok("I cannot help with that."));
        let e = expander.expand(&Query::new("room rent"), &NoCorpusStats).await;
        assert!(e.is_degraded());
    }

    #[tokio::test]
    async fn test_llm_expander_times_out() {
        let mut generator = Scripted::ok(GOOD_REPLY);
        generator.delay = Duration::from_millis(200);
        let expander = LlmExpander::new(
            Arc::new(generator),
            Arc::new(SynonymTable::builtin()),
            ExpansionConfig {
                timeout_ms: 10,
                ..Default::default()
            },
        );

        let e = expander.expand(&Query::new("newborn"), &NoCorpusStats).await;
        assert!(e.is_degraded());
    }

    #[tokio::test]
    async fn test_blank_query_skips_generation() {
        let generator = Arc::new(Scripted::ok(GOOD_REPLY));
        let expander = LlmExpander::new(
            generator.clone(),
            Arc::new(SynonymTable::builtin()),
            ExpansionConfig::default(),
        );

        let e = expander.expand(&Query::new("  "), &NoCorpusStats).await;
        assert!(e.is_degraded());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rule_based_expander() {
        let expander = RuleBasedExpander::new(
            Arc::new(SynonymTable::builtin()),
            ExpansionConfig::default(),
        );
        let e = expander
            .expand(&Query::new("Is maternity covered?"), &NoCorpusStats)
            .await;

        assert_eq!(e.query_type, QueryType::Coverage);
        assert_eq!(e.source, ExpansionSource::RuleBased);
        assert_eq!(
            e.variants,
            vec!["is pregnancy covered", "is childbirth covered", "is delivery covered"]
        );
        assert!(e.hypothetical_answers.is_empty());
        assert_eq!(e.context_hints[0], "coverage");
        assert_eq!(e.concepts[0], "maternity");
    }
}
