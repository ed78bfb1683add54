//! Anti-spam challenges for unauthenticated registration.
//!
//! A closed set of question/answer pairs from configuration. Each question
//! is hashed to a stable opaque token; registration must echo the token
//! with an answer fully matching the configured pattern.

use md5::Digest;
use rand::Rng;
use regex::Regex;
use serde_json::{json, Value};

use crate::config::AntiSpamConfig;
use crate::errors::{ApiError, Result};

struct Question {
    question: String,
    answer: Regex,
    token: String,
}

impl Question {
    fn new(question: &str, answer: &str) -> Result<Self> {
        let mut hasher = md5::Md5::new();
        hasher.update(question.as_bytes());
        let token = format!("{:x}", hasher.finalize());
        Ok(Self {
            question: question.to_string(),
            answer: Regex::new(&format!("^(?:{})$", answer))
                .map_err(|e| ApiError::Config(format!("invalid anti-spam answer pattern: {}", e)))?,
            token,
        })
    }

    fn verify(&self, answer: &str) -> bool {
        self.answer.is_match(answer)
    }
}

pub struct AntiSpam {
    questions: Vec<Question>,
}

impl AntiSpam {
    pub fn new(config: &AntiSpamConfig) -> Result<Self> {
        if config.questions.is_empty() {
            return Err(ApiError::Config("auth.antiSpam.questions is empty".into()));
        }
        let questions = config
            .questions
            .iter()
            .map(|q| Question::new(&q.question, &q.answer))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { questions })
    }

    /// One random `{token, question}` challenge.
    pub fn challenge(&self) -> Value {
        let index = rand::thread_rng().gen_range(0..self.questions.len());
        let question = &self.questions[index];
        json!({
            "token": question.token,
            "question": question.question,
        })
    }

    /// Rejects submissions whose token is unknown or whose answer fails
    /// the full pattern match.
    pub fn verify_answer(&self, token: Option<&str>, answer: Option<&str>) -> Result<()> {
        let question = token
            .and_then(|t| self.questions.iter().find(|q| q.token == t))
            .ok_or(ApiError::Forbidden)?;
        if !question.verify(answer.unwrap_or_default()) {
            return Err(ApiError::Forbidden);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuestionConfig;

    fn anti_spam() -> AntiSpam {
        AntiSpam::new(&AntiSpamConfig {
            questions: vec![
                QuestionConfig {
                    question: "2+2?".into(),
                    answer: "4|four".into(),
                },
                QuestionConfig {
                    question: "Color of the sky?".into(),
                    answer: "[Bb]lue".into(),
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_challenge_shape() {
        let spam = anti_spam();
        let challenge = spam.challenge();
        assert!(challenge["token"].is_string());
        assert!(challenge["question"].is_string());
    }

    #[test]
    fn test_token_is_stable() {
        let spam = anti_spam();
        // md5("2+2?") as lowercase hex
        let token = spam.questions[0].token.clone();
        assert_eq!(token.len(), 32);
        let again = AntiSpam::new(&AntiSpamConfig {
            questions: vec![QuestionConfig {
                question: "2+2?".into(),
                answer: "4".into(),
            }],
        })
        .unwrap();
        assert_eq!(again.questions[0].token, token);
    }

    #[test]
    fn test_verify_answer() {
        let spam = anti_spam();
        let token = spam.questions[0].token.clone();
        assert!(spam.verify_answer(Some(&token), Some("4")).is_ok());
        assert!(spam.verify_answer(Some(&token), Some("four")).is_ok());
        assert!(spam.verify_answer(Some(&token), Some("5")).is_err());
        // full match, not a substring match
        assert!(spam.verify_answer(Some(&token), Some("44")).is_err());
        assert!(spam.verify_answer(Some("bogus"), Some("4")).is_err());
        assert!(spam.verify_answer(None, Some("4")).is_err());
    }

    #[test]
    fn test_empty_questions_rejected() {
        assert!(AntiSpam::new(&AntiSpamConfig { questions: vec![] }).is_err());
    }
}
