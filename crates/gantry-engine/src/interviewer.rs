//! Human-in-the-loop answer sources for wait nodes.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use gantry_types::{GantryError, Result};

/// A question posed to a human, with the answer options derived from the
/// wait node's outgoing edges.
#[derive(Debug, Clone)]
pub struct Question {
    pub node_id: String,
    pub text: String,
    pub options: Vec<String>,
}

#[async_trait]
pub trait Interviewer: Send + Sync {
    /// Return the chosen option (or free text when no option matches).
    async fn ask(&self, question: &Question) -> Result<String>;
}

/// Reads answers from stdin. A bare number picks the corresponding option;
/// anything else is taken verbatim; an empty line picks the first option.
pub struct ConsoleInterviewer;

#[async_trait]
impl Interviewer for ConsoleInterviewer {
    async fn ask(&self, question: &Question) -> Result<String> {
        let question = question.clone();
        let answer = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut out = std::io::stdout();
            writeln!(out, "\n[{}] {}", question.node_id, question.text)?;
            for (i, option) in question.options.iter().enumerate() {
                writeln!(out, "  {}. {}", i + 1, option)?;
            }
            write!(out, "> ")?;
            out.flush()?;

            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            let line = line.trim();

            if line.is_empty() {
                return Ok(question
                    .options
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "Continue".to_string()));
            }
            if let Ok(choice) = line.parse::<usize>() {
                if choice >= 1 && choice <= question.options.len() {
                    return Ok(question.options[choice - 1].clone());
                }
            }
            Ok(line.to_string())
        })
        .await
        .map_err(|e| GantryError::Other(format!("interviewer task failed: {e}")))??;
        Ok(answer)
    }
}

/// Always picks the first option without prompting. Used by `--auto-approve`.
pub struct AutoApproveInterviewer;

#[async_trait]
impl Interviewer for AutoApproveInterviewer {
    async fn ask(&self, question: &Question) -> Result<String> {
        Ok(question
            .options
            .first()
            .cloned()
            .unwrap_or_else(|| "Continue".to_string()))
    }
}

/// Replays a scripted list of answers; errors when the script runs out.
pub struct RecordingInterviewer {
    answers: Mutex<VecDeque<String>>,
    pub asked: Mutex<Vec<Question>>,
}

impl RecordingInterviewer {
    pub fn new(answers: Vec<&str>) -> Self {
        RecordingInterviewer {
            answers: Mutex::new(answers.into_iter().map(String::from).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Interviewer for RecordingInterviewer {
    async fn ask(&self, question: &Question) -> Result<String> {
        self.asked
            .lock()
            .map_err(|_| GantryError::Other("interviewer lock poisoned".to_string()))?
            .push(question.clone());
        self.answers
            .lock()
            .map_err(|_| GantryError::Other("interviewer lock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| {
                GantryError::Other(format!(
                    "no scripted answer left for node '{}'",
                    question.node_id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: &[&str]) -> Question {
        Question {
            node_id: "gate".to_string(),
            text: "Proceed?".to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn auto_approve_picks_first_option() {
        let answer = AutoApproveInterviewer.ask(&question(&["Ship it", "Hold"])).await.unwrap();
        assert_eq!(answer, "Ship it");
    }

    #[tokio::test]
    async fn auto_approve_defaults_to_continue() {
        let answer = AutoApproveInterviewer.ask(&question(&[])).await.unwrap();
        assert_eq!(answer, "Continue");
    }

    #[tokio::test]
    async fn recording_replays_in_order_then_errors() {
        let interviewer = RecordingInterviewer::new(vec!["Hold", "Ship it"]);
        let q = question(&["Ship it", "Hold"]);
        assert_eq!(interviewer.ask(&q).await.unwrap(), "Hold");
        assert_eq!(interviewer.ask(&q).await.unwrap(), "Ship it");
        assert!(interviewer.ask(&q).await.is_err());
        assert_eq!(interviewer.asked.lock().unwrap().len(), 3);
    }
}
