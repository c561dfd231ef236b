//! Multi-agent negotiation.
//!
//! When two or more reports disagree, a bounded debate resolves it: each
//! round every participant observes the others' positions and maintains,
//! refines, concedes or challenges. Consensus requires convergent
//! positions with sufficient mean confidence; exhaustion falls back to
//! the highest-confidence position with dissent preserved verbatim.

use crate::push::UserBus;
use crate::tools::schema_of;
use careerflow_common::{
    AgentReport, ChatMessage, CompletionRequest, EventKind, LlmConfig, LlmProvider,
    NegotiationConfig,
};
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const POSITIVE_KEYWORDS: &[&str] = &[
    "excellent", "strong", "great", "perfect", "ideal", "recommended", "top", "best",
];
const NEGATIVE_KEYWORDS: &[&str] = &[
    "poor", "weak", "bad", "avoid", "risky", "unlikely", "mismatch", "low",
];
const SENTIMENT_THRESHOLD: usize = 3;

#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub reached: bool,
    pub position: String,
    pub confidence: f64,
    pub dissenting_views: Vec<String>,
    pub rounds_taken: u32,
}

#[derive(Debug, Clone)]
struct AgentPosition {
    agent: String,
    stance: String,
    position: String,
    confidence: f64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct PositionOutput {
    /// maintain | refine | concede | challenge
    stance: String,
    position: String,
    confidence: f64,
}

pub struct Negotiator {
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
    config: NegotiationConfig,
}

impl Negotiator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        llm: LlmConfig,
        config: NegotiationConfig,
    ) -> Self {
        Self {
            provider,
            llm,
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Scan reports pairwise for semantic disagreement: confidence spread
    /// above the configured threshold, or opposed sentiment in the
    /// structured summaries. Returns the participating agents.
    pub fn detect_divergence(&self, reports: &[AgentReport]) -> Option<Vec<String>> {
        for i in 0..reports.len() {
            for j in (i + 1)..reports.len() {
                let a = &reports[i];
                let b = &reports[j];
                if a.agent == b.agent {
                    continue;
                }

                let spread = (a.confidence - b.confidence).abs();
                if spread > self.config.confidence_spread {
                    debug!(a = %a.agent, b = %b.agent, spread, "confidence divergence detected");
                    return Some(vec![a.agent.clone(), b.agent.clone()]);
                }

                if opposed_sentiment(&a.summary, &b.summary) {
                    debug!(a = %a.agent, b = %b.agent, "sentiment contradiction detected");
                    return Some(vec![a.agent.clone(), b.agent.clone()]);
                }
            }
        }
        None
    }

    /// Run the debate across `participants`, streaming each round.
    #[instrument(skip_all, fields(participants = participants.len()))]
    pub async fn run(
        &self,
        reports: &[AgentReport],
        participants: &[String],
        bus: &UserBus,
        cancel: &CancellationToken,
    ) -> ConsensusResult {
        let mut positions: Vec<AgentPosition> = participants
            .iter()
            .filter_map(|name| {
                reports.iter().rev().find(|r| &r.agent == name).map(|r| AgentPosition {
                    agent: r.agent.clone(),
                    stance: "maintain".to_string(),
                    position: truncate(&r.summary, 500),
                    confidence: r.confidence,
                })
            })
            .collect();

        if positions.len() < 2 {
            let result = self.resolve(&positions, false, 0);
            emit_result(bus, &result);
            return result;
        }

        let mut rounds_taken = 0;
        for round in 1..=self.config.max_rounds {
            if cancel.is_cancelled() {
                break;
            }
            rounds_taken = round;

            let queries = positions.iter().map(|own| {
                let others: Vec<AgentPosition> = positions
                    .iter()
                    .filter(|p| p.agent != own.agent)
                    .cloned()
                    .collect();
                self.query_position(own.clone(), others, round)
            });
            positions = join_all(queries).await;

            for position in &positions {
                bus.emit(EventKind::NegotiationRound {
                    round,
                    agent: position.agent.clone(),
                    stance: position.stance.clone(),
                    position: position.position.clone(),
                    confidence: position.confidence,
                });
            }

            if let Some(result) = self.check_consensus(&positions, round) {
                emit_result(bus, &result);
                return result;
            }
        }

        let result = self.resolve(&positions, false, rounds_taken);
        emit_result(bus, &result);
        result
    }

    async fn query_position(
        &self,
        own: AgentPosition,
        others: Vec<AgentPosition>,
        round: u32,
    ) -> AgentPosition {
        let others_block = others
            .iter()
            .map(|p| {
                format!(
                    "- {} [{}] (confidence {:.2}): {}",
                    p.agent, p.stance, p.confidence, p.position
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let system = "You are one agent in a structured debate between career \
                      assistant agents. Respond with JSON only: {stance: \
                      \"maintain\"|\"refine\"|\"concede\"|\"challenge\", position, confidence}.";
        let user = format!(
            "You are the {agent} agent. Round {round} of {max}.\n\n\
             Your current position (confidence {conf:.2}):\n{position}\n\n\
             The other agents' positions:\n{others_block}\n\n\
             Maintain your position, refine it, concede to a stronger one, or \
             challenge a position you believe is wrong.",
            agent = own.agent,
            round = round,
            max = self.config.max_rounds,
            conf = own.confidence,
            position = own.position,
        );

        let request = CompletionRequest::new(
            self.llm.eval_model().to_string(),
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .with_max_tokens(300)
        .with_temperature(0.3);

        let parsed: Option<PositionOutput> = self
            .provider
            .complete_structured(request, schema_of::<PositionOutput>())
            .await
            .ok()
            .and_then(|raw| serde_json::from_value(raw).ok());

        match parsed {
            Some(output) if is_valid_stance(&output.stance) => AgentPosition {
                agent: own.agent,
                stance: output.stance,
                position: truncate(&output.position, 500),
                confidence: output.confidence.clamp(0.0, 1.0),
            },
            // Provider trouble leaves the previous position standing.
            _ => own,
        }
    }

    fn check_consensus(&self, positions: &[AgentPosition], round: u32) -> Option<ConsensusResult> {
        let conceding: Vec<&AgentPosition> =
            positions.iter().filter(|p| p.stance == "concede").collect();
        let standing: Vec<&AgentPosition> =
            positions.iter().filter(|p| p.stance != "concede").collect();

        // All but one concede: the standing position wins outright.
        if !conceding.is_empty() && standing.len() <= 1 {
            let winner = standing
                .first()
                .copied()
                .or_else(|| conceding.iter().copied().max_by(compare_confidence))?;
            return Some(ConsensusResult {
                reached: true,
                position: winner.position.clone(),
                confidence: winner.confidence,
                dissenting_views: Vec::new(),
                rounds_taken: round,
            });
        }

        // Confidence convergence with a sufficiently confident mean.
        let confidences: Vec<f64> = positions.iter().map(|p| p.confidence).collect();
        let max = confidences.iter().cloned().fold(f64::MIN, f64::max);
        let min = confidences.iter().cloned().fold(f64::MAX, f64::min);
        let mean = confidences.iter().sum::<f64>() / confidences.len().max(1) as f64;
        let challenged = positions.iter().any(|p| p.stance == "challenge");

        if !challenged && (max - min) <= self.config.convergence_window
            && mean >= self.config.consensus_threshold
        {
            let winner = positions.iter().max_by(|a, b| compare_confidence(&a, &b))?;
            return Some(ConsensusResult {
                reached: true,
                position: winner.position.clone(),
                confidence: mean,
                dissenting_views: Vec::new(),
                rounds_taken: round,
            });
        }

        None
    }

    /// Highest confidence wins; everything else is preserved as dissent.
    fn resolve(
        &self,
        positions: &[AgentPosition],
        reached: bool,
        rounds_taken: u32,
    ) -> ConsensusResult {
        let Some(winner) = positions.iter().max_by(|a, b| compare_confidence(&a, &b)) else {
            return ConsensusResult {
                reached: false,
                position: "No positions recorded".to_string(),
                confidence: 0.5,
                dissenting_views: Vec::new(),
                rounds_taken,
            };
        };

        let dissenting_views = positions
            .iter()
            .filter(|p| p.agent != winner.agent)
            .map(|p| format!("{}: {}", p.agent, truncate(&p.position, 200)))
            .collect();

        ConsensusResult {
            reached,
            position: winner.position.clone(),
            confidence: winner.confidence,
            dissenting_views,
            rounds_taken,
        }
    }
}

fn emit_result(bus: &UserBus, result: &ConsensusResult) {
    bus.emit(EventKind::NegotiationResult {
        consensus: result.reached,
        position: result.position.clone(),
        confidence: result.confidence,
        dissenting_views: result.dissenting_views.clone(),
        rounds_taken: result.rounds_taken,
    });
}

fn is_valid_stance(stance: &str) -> bool {
    matches!(stance, "maintain" | "refine" | "concede" | "challenge")
}

fn opposed_sentiment(a: &str, b: &str) -> bool {
    let score = |text: &str| {
        let lowered = text.to_lowercase();
        let pos = POSITIVE_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(**kw))
            .count();
        let neg = NEGATIVE_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(**kw))
            .count();
        (pos, neg)
    };
    let (pos_a, neg_a) = score(a);
    let (pos_b, neg_b) = score(b);

    (pos_a >= SENTIMENT_THRESHOLD && neg_b >= SENTIMENT_THRESHOLD)
        || (neg_a >= SENTIMENT_THRESHOLD && pos_b >= SENTIMENT_THRESHOLD)
}

fn compare_confidence(a: &&AgentPosition, b: &&AgentPosition) -> std::cmp::Ordering {
    a.confidence
        .partial_cmp(&b.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(agent: &str, summary: &str, confidence: f64) -> AgentReport {
        AgentReport {
            agent: agent.to_string(),
            summary: summary.to_string(),
            content: json!({}),
            confidence,
            rationale: String::new(),
        }
    }

    fn negotiator() -> Negotiator {
        struct Unused;

        #[async_trait::async_trait]
        impl LlmProvider for Unused {
            async fn complete_structured(
                &self,
                _request: CompletionRequest,
                _schema: serde_json::Value,
            ) -> Result<serde_json::Value, careerflow_common::LlmError> {
                Err(careerflow_common::LlmError::Unavailable("unused".into()))
            }

            async fn complete_stream(
                &self,
                _request: CompletionRequest,
            ) -> Result<careerflow_common::llm::TokenStream, careerflow_common::LlmError> {
                Err(careerflow_common::LlmError::Unavailable("unused".into()))
            }
        }

        Negotiator::new(
            Arc::new(Unused),
            LlmConfig::default(),
            NegotiationConfig::default(),
        )
    }

    #[test]
    fn wide_confidence_spread_diverges() {
        let negotiator = negotiator();
        let reports = vec![
            report("scout", "found roles", 0.9),
            report("match", "analysis", 0.3),
        ];
        let participants = negotiator.detect_divergence(&reports).unwrap();
        assert_eq!(participants, vec!["scout", "match"]);
    }

    #[test]
    fn opposed_sentiment_diverges() {
        let negotiator = negotiator();
        let reports = vec![
            report(
                "scout",
                "excellent strong ideal company, recommended and best in class",
                0.7,
            ),
            report("match", "poor fit, weak overlap, risky and unlikely to pass", 0.7),
        ];
        assert!(negotiator.detect_divergence(&reports).is_some());
    }

    #[test]
    fn close_agreement_does_not_diverge() {
        let negotiator = negotiator();
        let reports = vec![
            report("scout", "solid findings", 0.8),
            report("match", "compatible analysis", 0.75),
        ];
        assert!(negotiator.detect_divergence(&reports).is_none());
    }

    #[test]
    fn convergent_confident_round_is_consensus() {
        let negotiator = negotiator();
        let positions = vec![
            AgentPosition {
                agent: "scout".into(),
                stance: "maintain".into(),
                position: "take the role".into(),
                confidence: 0.8,
            },
            AgentPosition {
                agent: "match".into(),
                stance: "refine".into(),
                position: "take the role, negotiate comp".into(),
                confidence: 0.85,
            },
        ];
        let result = negotiator.check_consensus(&positions, 2).unwrap();
        assert!(result.reached);
        assert_eq!(result.rounds_taken, 2);
    }

    #[test]
    fn challenge_blocks_consensus() {
        let negotiator = negotiator();
        let positions = vec![
            AgentPosition {
                agent: "scout".into(),
                stance: "challenge".into(),
                position: "wrong company".into(),
                confidence: 0.8,
            },
            AgentPosition {
                agent: "match".into(),
                stance: "maintain".into(),
                position: "right company".into(),
                confidence: 0.82,
            },
        ];
        assert!(negotiator.check_consensus(&positions, 1).is_none());
    }

    #[test]
    fn exhaustion_preserves_dissent() {
        let negotiator = negotiator();
        let positions = vec![
            AgentPosition {
                agent: "scout".into(),
                stance: "maintain".into(),
                position: "apply now".into(),
                confidence: 0.9,
            },
            AgentPosition {
                agent: "match".into(),
                stance: "challenge".into(),
                position: "wait for a better fit".into(),
                confidence: 0.6,
            },
        ];
        let result = negotiator.resolve(&positions, false, 3);
        assert!(!result.reached);
        assert_eq!(result.position, "apply now");
        assert_eq!(result.dissenting_views.len(), 1);
        assert!(result.dissenting_views[0].contains("match"));
    }
}
