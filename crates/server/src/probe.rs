//! Built-in navigation probe.
//!
//! A deliberately small [`TaskAgent`]: open the first URL named in the task,
//! observe the resulting page, report success with a snapshot excerpt. It
//! keeps the server usable end to end without an external planner attached.

use async_trait::async_trait;
use serde_json::json;
use walletflow::{ActionCall, AgentOutcome, AgentStep, Observation, StepValue, TaskAgent};

const SUMMARY_LIMIT: usize = 400;

pub struct NavigateProbeAgent;

#[async_trait]
impl TaskAgent for NavigateProbeAgent {
    async fn next_step(&self, observation: Observation<'_>) -> anyhow::Result<AgentStep> {
        if observation.step_index == 0 {
            if let Some(url) = first_url(observation.task) {
                return Ok(AgentStep {
                    action: Some(ActionCall {
                        name: "navigate".to_string(),
                        args: json!({"url": url}),
                    }),
                    output: StepValue::Map(vec![(
                        "next_goal".to_string(),
                        StepValue::Text(format!("open {url}")),
                    )]),
                    done: None,
                });
            }
            return Ok(AgentStep {
                action: None,
                output: StepValue::Text("task names no URL".to_string()),
                done: Some(AgentOutcome {
                    success: false,
                    summary: "task names no URL to probe".to_string(),
                }),
            });
        }

        let summary: String = observation.snapshot.chars().take(SUMMARY_LIMIT).collect();
        Ok(AgentStep {
            action: None,
            output: StepValue::Map(vec![(
                "evaluation".to_string(),
                StepValue::Text("page observed".to_string()),
            )]),
            done: Some(AgentOutcome {
                success: true,
                summary,
            }),
        })
    }
}

fn first_url(task: &str) -> Option<&str> {
    task.split_whitespace()
        .find(|word| word.starts_with("http://") || word.starts_with("https://"))
        .map(|word| word.trim_end_matches(['.', ',', ')']))
}
