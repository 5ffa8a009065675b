//! Grading learner answers with the generation service

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::generation::{GenerationRequest, Generator};

/// Scores below this are incorrect and trigger reference-answer enrichment
pub const PASSING_SCORE: u8 = 60;

const FALLBACK_FEEDBACK_CHARS: usize = 200;

const POSITIVE_WORDS: &[&str] = &["correct", "right", "exactly", "perfect", "yes", "true"];
const NEGATIVE_WORDS: &[&str] = &["incorrect", "wrong", "error", "no", "false", "mistaken"];

/// Everything needed to grade one answer
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerInput {
    pub subject: String,
    pub question: String,
    pub reference_answer: String,
    pub user_answer: String,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub learner_name: Option<String>,
}

/// Verdict on a learner's answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub is_correct: bool,
    /// 0 to 100
    pub score: u8,
    pub feedback: String,
    pub suggestions: String,
    pub positives: String,
}

impl Evaluation {
    pub fn needs_enrichment(&self) -> bool {
        self.score < PASSING_SCORE
    }
}

#[derive(Deserialize)]
struct RawEvaluation {
    is_correct: bool,
    score: f64,
    feedback: String,
    suggestions: String,
    #[serde(default)]
    positives: String,
}

/// Parse a model reply into an evaluation.
///
/// The JSON object is taken from the first `{` to the last `}` so that stray
/// prose around it is ignored.
pub fn parse_evaluation(reply: &str) -> Option<Evaluation> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }

    let raw: RawEvaluation = serde_json::from_str(&reply[start..=end]).ok()?;
    if raw.feedback.trim().is_empty() || raw.suggestions.trim().is_empty() {
        return None;
    }

    Some(Evaluation {
        is_correct: raw.is_correct,
        score: raw.score.round().clamp(0.0, 100.0) as u8,
        feedback: raw.feedback,
        suggestions: raw.suggestions,
        positives: raw.positives,
    })
}

/// Keyword-based verdict used when the model reply is unusable
pub fn fallback_evaluation(text: &str) -> Evaluation {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let has_any = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));

    let positive = has_any(POSITIVE_WORDS);
    let negative = has_any(NEGATIVE_WORDS);

    let (is_correct, score) = if negative {
        (false, 25)
    } else if positive {
        (true, 75)
    } else {
        (false, 50)
    };

    let feedback: String = text.chars().take(FALLBACK_FEEDBACK_CHARS).collect();

    Evaluation {
        is_correct,
        score,
        feedback: if feedback.trim().is_empty() {
            "Answer evaluated.".to_string()
        } else {
            feedback
        },
        suggestions: "Review the core concepts and practice similar exercises.".to_string(),
        positives: if is_correct {
            "You show a good grasp of the topic.".to_string()
        } else {
            "Keep trying, every mistake is a chance to learn.".to_string()
        },
    }
}

/// Whether a subject is a vocabulary pool rather than a technical one
pub fn is_vocabulary_subject(subject: &str) -> bool {
    let subject = subject.to_lowercase();
    subject.contains("vocab") || subject.contains("english")
}

/// Grades answers and improves reference answers
pub struct AnswerEvaluator {
    generator: Arc<dyn Generator>,
}

impl AnswerEvaluator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Grade an answer. Never fails; degrades to the keyword heuristic.
    pub async fn evaluate(&self, input: &AnswerInput) -> Evaluation {
        let request = GenerationRequest::new(evaluation_prompt(input))
            .with_temperature(0.3)
            .with_max_tokens(1024)
            .json();

        match self.generator.generate(request).await {
            Ok(reply) => parse_evaluation(&reply).unwrap_or_else(|| {
                warn!(subject = %input.subject, "unparseable evaluation reply, using fallback");
                fallback_evaluation(&reply)
            }),
            Err(e) => {
                warn!(subject = %input.subject, error = %e, "evaluation failed, using fallback");
                fallback_evaluation(&input.user_answer)
            }
        }
    }

    /// Ask the model to enrich a reference answer. Returns the original on failure.
    pub async fn enrich_reference(&self, answer: &str, question: &str, subject: &str) -> String {
        let vocabulary = is_vocabulary_subject(subject);
        let request = GenerationRequest::new(enrichment_prompt(answer, question, subject, vocabulary))
            .with_temperature(0.3)
            .with_max_tokens(if vocabulary { 600 } else { 500 });

        match self.generator.generate(request).await {
            Ok(reply) if !reply.trim().is_empty() => {
                debug!(%subject, "reference answer enriched");
                reply.trim().to_string()
            }
            Ok(_) => answer.to_string(),
            Err(e) => {
                warn!(%subject, error = %e, "failed to enrich reference answer");
                answer.to_string()
            }
        }
    }
}

fn evaluation_prompt(input: &AnswerInput) -> String {
    let mut extras = String::new();
    if let Some(example) = &input.example {
        extras.push_str(&format!("\nREFERENCE EXAMPLE: {}", example));
    }
    if let Some(usage) = &input.usage {
        extras.push_str(&format!("\nUSAGE: {}", usage));
    }
    if let Some(category) = &input.category {
        extras.push_str(&format!("\nCATEGORY: {}", category));
    }
    let name = input
        .learner_name
        .as_deref()
        .map(|n| format!(" Address the learner by name: {}.", n))
        .unwrap_or_default();

    format!(
        r#"You are an expert {subject} teacher who grades fairly and constructively.
Judge what the learner does know, not what is missing. Conceptual understanding
is worth more than perfect detail.{name}

QUESTION: {question}
REFERENCE ANSWER: {reference}
LEARNER ANSWER: {answer}{extras}

Scoring bands:
- 85-100 excellent, 70-84 good, 60-69 acceptable: is_correct = true
- 30-59 partial, 10-29 insufficient, 0-9 no valid answer: is_correct = false
- A request for help ("I don't know", "explain", "show me code") scores 10-20,
  is_correct = false, and the feedback explains the concept with an example
  (working, commented code for programming topics).
If the learner clearly grasps the main concept, the minimum score is 55.

Use plain text without markdown markers in the feedback.

Reply with exactly this JSON object:
{{"is_correct": true/false, "score": 0-100, "feedback": "...", "suggestions": "...", "positives": "..."}}"#,
        subject = input.subject.to_uppercase(),
        name = name,
        question = input.question,
        reference = input.reference_answer,
        answer = input.user_answer,
        extras = extras,
    )
}

fn enrichment_prompt(answer: &str, question: &str, subject: &str, vocabulary: bool) -> String {
    let (question_line, guidance) = if vocabulary {
        (
            format!("What does {} mean?", question),
            "State the meaning first, add context that helps it stick, and include at least one \
             example sentence with its translation.",
        )
    } else {
        (
            question.to_string(),
            "Keep everything the original says. Reorganize from general to specific, and add a \
             short practical example only where it helps understanding.",
        )
    };

    format!(
        "You are an expert {subject} teacher. Improve the reference answer below only if it can \
         be made clearer or more complete; if it is already good, return it unchanged.\n\
         {guidance}\nUse plain text without markdown markers.\n\n\
         ORIGINAL ANSWER:\n{answer}\n\nQUESTION:\n{question_line}\n\n\
         Return only the answer text.",
        subject = subject.to_uppercase(),
        guidance = guidance,
        answer = answer,
        question_line = question_line,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;

    struct Canned(Option<String>);

    #[async_trait]
    impl Generator for Canned {
        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            self.0.clone().ok_or_else(|| Error::generation("down"))
        }
    }

    fn input() -> AnswerInput {
        AnswerInput {
            subject: "java".into(),
            question: "What is inheritance?".into(),
            reference_answer: "A class acquiring members of another".into(),
            user_answer: "one class reuses another's methods".into(),
            example: None,
            usage: None,
            category: Some("OOP".into()),
            learner_name: None,
        }
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let reply = r#"Sure! {"is_correct": true, "score": 72.4, "feedback": "Good", "suggestions": "Mention overriding"} Hope it helps"#;
        let eval = parse_evaluation(reply).unwrap();
        assert!(eval.is_correct);
        assert_eq!(eval.score, 72);
        assert_eq!(eval.positives, "");
    }

    #[test]
    fn rejects_incomplete_json() {
        assert!(parse_evaluation(r#"{"is_correct": true, "score": 90, "feedback": "ok"}"#).is_none());
        assert!(parse_evaluation("no json here").is_none());
        assert!(parse_evaluation("} backwards {").is_none());
    }

    #[test]
    fn fallback_keyword_rules() {
        assert_eq!(fallback_evaluation("That is correct").score, 75);
        assert!(fallback_evaluation("That is correct").is_correct);
        assert_eq!(fallback_evaluation("Incorrect, sorry").score, 25);
        assert_eq!(fallback_evaluation("correct but also wrong").score, 25);
        assert_eq!(fallback_evaluation("hmm").score, 50);
        // "no" only counts as a whole word
        assert_eq!(fallback_evaluation("nothing notable, right").score, 75);
    }

    #[test]
    fn fallback_feedback_is_truncated() {
        let long = "a".repeat(500);
        assert_eq!(fallback_evaluation(&long).feedback.len(), 200);
    }

    #[test]
    fn vocabulary_subjects() {
        assert!(is_vocabulary_subject("vocabulary_english"));
        assert!(!is_vocabulary_subject("angular"));
    }

    #[tokio::test]
    async fn evaluation_degrades_on_generation_failure() {
        let evaluator = AnswerEvaluator::new(Arc::new(Canned(None)));
        let eval = evaluator.evaluate(&input()).await;
        assert_eq!(eval.score, 50);
        assert!(eval.needs_enrichment());
    }

    #[tokio::test]
    async fn evaluation_uses_model_verdict() {
        let reply = r#"{"is_correct": false, "score": 40, "feedback": "Partly", "suggestions": "Revise", "positives": "Effort"}"#;
        let evaluator = AnswerEvaluator::new(Arc::new(Canned(Some(reply.into()))));
        let eval = evaluator.evaluate(&input()).await;
        assert_eq!(eval.score, 40);
        assert_eq!(eval.positives, "Effort");
    }

    #[test]
    fn enrichment_keeps_original_on_failure() {
        let evaluator = AnswerEvaluator::new(Arc::new(Canned(None)));
        let answer = tokio_test::block_on(evaluator.enrich_reference("orig", "q", "java"));
        assert_eq!(answer, "orig");
    }

    #[test]
    fn enrichment_trims_reply() {
        let evaluator = AnswerEvaluator::new(Arc::new(Canned(Some("  better  ".into()))));
        let answer =
            tokio_test::block_on(evaluator.enrich_reference("orig", "debugging", "vocabulary_english"));
        assert_eq!(answer, "better");
    }
}
