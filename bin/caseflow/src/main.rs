//! Runs one ticket through the customer support workflow.

mod config;

use caseflow_ai::{KeywordTextService, Message};
use caseflow_analytics::TracingAnalytics;
use caseflow_core::UserId;
use caseflow_security::InMemorySecurity;
use caseflow_support::{CustomerSupportWorkflow, SupportServices, Ticket};
use caseflow_workflow::{ApprovalDecision, EngineEvent, EventKind, WorkflowEngine};
use crate::config::AppConfig;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().expect("failed to load configuration");
    tracing::info!(engine = ?config.engine, "Loaded configuration");

    tracing::warn!("Transcripts are obfuscated with InsecureDevCipher, not encrypted");
    let services = SupportServices::new(
        Arc::new(KeywordTextService::new()),
        Arc::new(InMemorySecurity::new()),
        Arc::new(TracingAnalytics),
        UserId::new(),
    );
    let engine = services
        .install(WorkflowEngine::builder().config(config.engine.clone()))
        .build();
    let support = CustomerSupportWorkflow::register(engine.clone(), &services)
        .expect("failed to register support workflow");

    engine.events().on(EventKind::StepCompleted, |event| {
        if let EngineEvent::StepCompleted { step_id, .. } = event {
            tracing::info!(%step_id, "step completed");
        }
    });

    if config.demo.auto_approve {
        let engine = engine.clone();
        let approver = config.demo.approver.clone();
        let mut events = engine.events().subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::ApprovalRequested {
                        instance_id,
                        step_id,
                        ..
                    }) => {
                        let decision = ApprovalDecision::approve(approver.as_str()).with_comment("auto-approved");
                        if let Err(e) = engine.resolve_approval(instance_id, &step_id, decision) {
                            tracing::warn!(error = %e, "Failed to auto-approve");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auto-approver fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let ticket = Ticket::new(config.demo.ticket_id.as_str(), config.demo.subject.as_str())
        .with_message(Message::customer(config.demo.message.as_str()))
        .with_priority(config.demo.priority);
    let instance_id = support.open_ticket(&ticket).expect("failed to open ticket");

    let snapshot = tokio::select! {
        snapshot = engine.wait_for_instance(instance_id) => snapshot,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling ticket");
            if let Err(e) = engine.cancel_instance(instance_id).await {
                tracing::warn!(error = %e, "Failed to cancel ticket");
            }
            engine.get_workflow_status(instance_id)
        }
    };
    let Some(snapshot) = snapshot else {
        tracing::error!(%instance_id, "Ticket instance disappeared");
        return;
    };

    tracing::info!(status = %snapshot.status, "Ticket finished");
    match support.read_transcript(&snapshot.data).await {
        Ok(Some(transcript)) => tracing::info!(%transcript, "Archived transcript"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to read transcript"),
    }
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize snapshot"),
    }
}
