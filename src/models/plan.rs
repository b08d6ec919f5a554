use serde::{Deserialize, Serialize};
use schemars::JsonSchema;

use super::paper::{PaperMetadata, SourceTag};

/// LM response shape for the planner's flat-keyword-list branch (§4.5.1,
/// taken when the query is too short to warrant a chain-of-thought plan).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlatKeywordList {
    pub keywords: Vec<String>,
}

/// A single planner-produced retrieval target.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubQuestion {
    pub question: String,
    pub keywords: Vec<String>,
    pub preferred_source: SourceTag,
    /// 1-based priority among this plan's sub-questions; lower runs first.
    pub priority: u32,
    pub estimated_papers: u32,
}

/// Chain-of-thought research plan requested from the LM when the query is
/// substantial enough to warrant decomposition (§4.5.1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResearchPlan {
    pub reasoning: String,
    pub sub_questions: Vec<SubQuestion>,
}

impl ResearchPlan {
    /// Flatten all sub-question keywords, preserving first-occurrence order,
    /// truncated to `k`. Grounded in the planner's keyword-flattening rule.
    pub fn flatten_keywords(&self, k: usize) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for sq in &self.sub_questions {
            for kw in &sq.keywords {
                if seen.insert(kw.to_lowercase()) {
                    out.push(kw.clone());
                    if out.len() >= k {
                        return out;
                    }
                }
            }
        }
        out
    }

    /// Sub-questions sorted by ascending priority, stable on ties.
    pub fn by_priority(&self) -> Vec<&SubQuestion> {
        let mut refs: Vec<&SubQuestion> = self.sub_questions.iter().collect();
        refs.sort_by_key(|sq| sq.priority);
        refs
    }
}

/// Keyword-matching rule shared by the extractor's reservation pass
/// (§4.5.3 step 1) and the writer's context reordering (§4.5.4): count of
/// distinct lowercased keywords occurring in the lowercased title. Ties are
/// broken by input order; a zero-score match returns `None` so the caller
/// can fall back to "first unreserved paper".
fn best_match<'a>(papers: &[&'a PaperMetadata], keywords: &[String]) -> Option<usize> {
    let lowered_keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let mut best_idx: Option<usize> = None;
    let mut best_score = 0usize;
    for (idx, paper) in papers.iter().enumerate() {
        let title = paper.title.to_lowercase();
        let score = lowered_keywords
            .iter()
            .filter(|kw| !kw.is_empty() && title.contains(kw.as_str()))
            .count();
        if score > best_score || (best_idx.is_none() && score > 0) {
            best_score = score;
            best_idx = Some(idx);
        }
    }
    best_idx
}

/// Reorders `papers` so that, in ascending sub-question priority order, each
/// sub-question reserves its best-title-matching unreserved paper first;
/// any papers left over follow in their original arrival order (§4.5.3
/// step 1, reused verbatim by the writer per §4.5.4).
pub fn prioritize_by_subquestions(papers: &[PaperMetadata], plan: &ResearchPlan) -> Vec<PaperMetadata> {
    let mut remaining: Vec<&PaperMetadata> = papers.iter().collect();
    let mut reserved: Vec<PaperMetadata> = Vec::new();

    for sq in plan.by_priority() {
        if remaining.is_empty() {
            break;
        }
        let pick_idx = best_match(&remaining, &sq.keywords).unwrap_or(0);
        reserved.push(remaining.remove(pick_idx).clone());
    }

    reserved.extend(remaining.into_iter().cloned());
    reserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceTag;

    fn plan() -> ResearchPlan {
        ResearchPlan {
            reasoning: "r".into(),
            sub_questions: vec![
                SubQuestion {
                    question: "q1".into(),
                    keywords: vec!["attention".into()],
                    preferred_source: SourceTag::Arxiv,
                    priority: 1,
                    estimated_papers: 5,
                },
                SubQuestion {
                    question: "q2".into(),
                    keywords: vec!["transformer".into()],
                    preferred_source: SourceTag::Arxiv,
                    priority: 2,
                    estimated_papers: 5,
                },
            ],
        }
    }

    #[test]
    fn reserves_best_match_per_subquestion_in_priority_order() {
        let papers = vec![
            PaperMetadata::new("p1", "A Survey of Transformer Architectures", SourceTag::Arxiv),
            PaperMetadata::new("p2", "Attention Is All You Need", SourceTag::Arxiv),
            PaperMetadata::new("p3", "Unrelated Paper", SourceTag::Arxiv),
        ];
        let ordered = prioritize_by_subquestions(&papers, &plan());
        assert_eq!(ordered[0].paper_id, "p2"); // matches sub-question 1 ("attention")
        assert_eq!(ordered[1].paper_id, "p1"); // matches sub-question 2 ("transformer")
        assert_eq!(ordered[2].paper_id, "p3"); // leftover, arrival order
    }

    #[test]
    fn zero_score_falls_back_to_first_unreserved() {
        let papers = vec![
            PaperMetadata::new("p1", "Nothing Relevant", SourceTag::Arxiv),
            PaperMetadata::new("p2", "Also Nothing", SourceTag::Arxiv),
        ];
        let single_sq_plan = ResearchPlan {
            reasoning: "r".into(),
            sub_questions: vec![SubQuestion {
                question: "q".into(),
                keywords: vec!["zzz".into()],
                preferred_source: SourceTag::Arxiv,
                priority: 1,
                estimated_papers: 1,
            }],
        };
        let ordered = prioritize_by_subquestions(&papers, &single_sq_plan);
        assert_eq!(ordered[0].paper_id, "p1");
    }

    #[test]
    fn flatten_keywords_preserves_first_occurrence_order_and_truncates() {
        let p = ResearchPlan {
            reasoning: "r".into(),
            sub_questions: vec![
                SubQuestion {
                    question: "q1".into(),
                    keywords: vec!["a".into(), "b".into()],
                    preferred_source: SourceTag::Arxiv,
                    priority: 1,
                    estimated_papers: 1,
                },
                SubQuestion {
                    question: "q2".into(),
                    keywords: vec!["b".into(), "c".into(), "d".into()],
                    preferred_source: SourceTag::Arxiv,
                    priority: 2,
                    estimated_papers: 1,
                },
            ],
        };
        assert_eq!(p.flatten_keywords(3), vec!["a", "b", "c"]);
    }
}
