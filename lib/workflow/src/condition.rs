//! Condition steps.
//!
//! Evaluates the step's expression over the data and records the boolean
//! under `conditionResult`. The expression is data, never code; see
//! [`crate::expression`].

use crate::data::DataBag;
use crate::error::HandlerError;
use crate::handler::{StepContext, StepHandler};
use crate::step::StepConfig;
use async_trait::async_trait;
use tracing::debug;

/// Data key holding the result of the most recent condition step.
pub const CONDITION_RESULT_KEY: &str = "conditionResult";

/// Step handler for `condition` steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionStepHandler;

#[async_trait]
impl StepHandler for ConditionStepHandler {
    async fn execute(&self, ctx: &StepContext<'_>, data: DataBag) -> Result<DataBag, HandlerError> {
        let StepConfig::Condition(config) = &ctx.step.config else {
            return Err(HandlerError::InvalidConfig {
                reason: "condition handler received a non-condition step".to_string(),
            });
        };

        let result = config.condition.evaluate(&data);
        debug!(step_id = %ctx.step.id, condition = %config.condition, result, "condition evaluated");
        Ok(data.with(CONDITION_RESULT_KEY, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expr;
    use crate::step::WorkflowStep;
    use caseflow_core::{InstanceId, WorkflowId};
    use serde_json::json;

    async fn evaluate(condition: &str, data: DataBag) -> DataBag {
        let step = WorkflowStep::condition("check", "Check", Expr::parse(condition).unwrap());
        let ctx = StepContext {
            instance_id: InstanceId::new(),
            workflow_id: WorkflowId::new(),
            step: &step,
        };
        ConditionStepHandler.execute(&ctx, data).await.expect("evaluates")
    }

    #[tokio::test]
    async fn records_true_and_false() {
        let high = evaluate("x > 5", DataBag::new().with("x", 10)).await;
        assert_eq!(high.get(CONDITION_RESULT_KEY), Some(&json!(true)));

        let low = evaluate("x > 5", DataBag::new().with("x", 1)).await;
        assert_eq!(low.get(CONDITION_RESULT_KEY), Some(&json!(false)));
    }

    #[tokio::test]
    async fn missing_field_is_false_not_error() {
        let output = evaluate("priority == \"urgent\"", DataBag::new()).await;
        assert_eq!(output.get(CONDITION_RESULT_KEY), Some(&json!(false)));
    }

    #[tokio::test]
    async fn keeps_existing_data() {
        let output = evaluate("true", DataBag::new().with("ticketId", "T1")).await;
        assert_eq!(output.get_str("ticketId"), Some("T1"));
    }
}
