//! Post-fusion boosting and pruning

use super::fusion::{sort_results, FusedResult};
use super::FusionStrategy;
use crate::config::{BoostingConfig, ScoreFloor};
use crate::corpus::Corpus;
use crate::error::Result;
use crate::patterns::BoostRuleSet;

/// Applies the boost rule table, then drops fragments and low scorers
///
/// The boost factor is always recomputed from the unboosted `fused_score`,
/// so running the booster over its own output changes nothing. It never
/// adds a chunk and its output is sorted by final score.
#[derive(Debug, Clone)]
pub struct QualityBooster {
    rules: BoostRuleSet,
    min_score: ScoreFloor,
    min_content_chars: usize,
}

impl QualityBooster {
    pub fn new(rules: BoostRuleSet, min_score: ScoreFloor, min_content_chars: usize) -> Self {
        Self {
            rules,
            min_score,
            min_content_chars,
        }
    }

    /// Compile from configuration; a rules file takes precedence over inline rules
    pub fn from_config(config: &BoostingConfig) -> Result<Self> {
        let rules = match &config.rules_file {
            Some(path) => BoostRuleSet::from_config_file(path)?,
            None => BoostRuleSet::from_configs(&config.rules)?,
        };
        tracing::debug!("Loaded {} boost rules", rules.len());
        Ok(Self::new(rules, config.min_score, config.min_content_chars))
    }

    pub fn rules(&self) -> &BoostRuleSet {
        &self.rules
    }

    pub fn apply(
        &self,
        query: &str,
        results: Vec<FusedResult>,
        strategy: FusionStrategy,
        corpus: &Corpus,
    ) -> Vec<FusedResult> {
        let floor = self.min_score.for_strategy(strategy);
        let active: Vec<_> = self.rules.for_query(query).collect();
        let before = results.len();

        let mut kept: Vec<FusedResult> = results
            .into_iter()
            .filter_map(|mut result| {
                let chunk = corpus.get(&result.chunk_id)?;
                if chunk.text.trim().chars().count() < self.min_content_chars {
                    return None;
                }

                let mut factor = 1.0f32;
                let mut fired = Vec::new();
                for rule in &active {
                    if rule.matches(&chunk.text) {
                        factor *= rule.multiplier;
                        fired.push(rule.name.clone());
                    }
                }

                result.boost_applied = factor;
                result.boost_rules = fired;
                result.score = result.fused_score * factor;
                (result.score >= floor).then_some(result)
            })
            .collect();

        sort_results(&mut kept);

        if kept.len() < before {
            tracing::debug!(
                "Booster dropped {} of {} fused results (floor {})",
                before - kept.len(),
                before,
                floor
            );
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, ChunkMetadata};
    use crate::patterns::BoostRuleConfig;
    use crate::retrieval::fusion::fuse;
    use crate::retrieval::{FusionConfig, RetrievalMethod, ScoredCandidate};
    use std::collections::BTreeMap;

    fn corpus() -> Corpus {
        Corpus::new(vec![
            Chunk::new(
                "amount",
                "La escala de viáticos fija S/ 320.00 soles para funcionarios",
                ChunkMetadata::default(),
            ),
            Chunk::new(
                "clause",
                "Conforme al artículo 7 de la directiva de comisiones",
                ChunkMetadata::default(),
            ),
            Chunk::new("short", "Viáticos", ChunkMetadata::default()),
        ])
        .unwrap()
    }

    fn fused() -> Vec<FusedResult> {
        let mut map = BTreeMap::new();
        map.insert(
            RetrievalMethod::LexicalProb,
            vec![
                ScoredCandidate::new("clause", 5.0, RetrievalMethod::LexicalProb),
                ScoredCandidate::new("amount", 4.8, RetrievalMethod::LexicalProb),
                ScoredCandidate::new("short", 1.0, RetrievalMethod::LexicalProb),
            ],
        );
        fuse(
            &map,
            &FusionConfig::default().with_weights(crate::retrieval::FusionWeights::single(
                RetrievalMethod::LexicalProb,
            )),
        )
    }

    fn booster() -> QualityBooster {
        QualityBooster::new(
            BoostRuleSet::from_configs(&BoostRuleConfig::defaults()).unwrap(),
            ScoreFloor::default(),
            20,
        )
    }

    #[test]
    fn test_monetary_rule_fires_for_amount_queries() {
        let corpus = corpus();
        let boosted = booster().apply(
            "¿Cuál es el monto máximo para viáticos?",
            fused(),
            FusionStrategy::Weighted,
            &corpus,
        );

        assert_eq!(boosted[0].chunk_id, "amount");
        assert!(boosted[0].boost_applied > 1.0);
        assert_eq!(boosted[0].boost_rules, vec!["monetary_amount".to_string()]);
        assert!(boosted[0].score > boosted[0].fused_score);

        let clause = boosted.iter().find(|r| r.chunk_id == "clause").unwrap();
        assert_eq!(clause.boost_rules, vec!["regulatory_clause".to_string()]);
    }

    #[test]
    fn test_query_pattern_gates_rule() {
        let corpus = corpus();
        let boosted = booster().apply(
            "¿Quién autoriza la comisión?",
            fused(),
            FusionStrategy::Weighted,
            &corpus,
        );
        let amount = boosted.iter().find(|r| r.chunk_id == "amount").unwrap();
        assert_eq!(amount.boost_applied, 1.0);
        assert!(amount.boost_rules.is_empty());
    }

    #[test]
    fn test_fragments_and_floor_removed() {
        let corpus = corpus();
        let boosted = booster().apply("viáticos", fused(), FusionStrategy::Weighted, &corpus);
        assert!(boosted.iter().all(|r| r.chunk_id != "short"));

        let strict = QualityBooster::new(
            BoostRuleSet::default(),
            ScoreFloor {
                weighted: 0.99,
                rrf: 0.0,
            },
            0,
        );
        let kept = strict.apply("viáticos", fused(), FusionStrategy::Weighted, &corpus);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk_id, "clause");
    }

    #[test]
    fn test_second_pass_is_noop() {
        let corpus = corpus();
        let booster = booster();
        let query = "monto de viáticos según artículo 7";

        let once = booster.apply(query, fused(), FusionStrategy::Weighted, &corpus);
        let twice = booster.apply(query, once.clone(), FusionStrategy::Weighted, &corpus);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_never_adds_chunks() {
        let corpus = corpus();
        let input: Vec<FusedResult> = fused().into_iter().take(1).collect();
        let output = booster().apply("monto", input.clone(), FusionStrategy::Weighted, &corpus);
        assert!(output.len() <= input.len());
        assert!(output
            .iter()
            .all(|r| input.iter().any(|i| i.chunk_id == r.chunk_id)));
    }
}
