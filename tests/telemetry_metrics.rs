//! Integration test for telemetry and metrics functionality.

use concierge::{
    Agent, FnTool, Message, MetricsTracker, ModelResponse, RunReport, StopReason, StubModel,
    TelemetryCollector, TelemetryLabels, ToolOutput, ToolRegistry,
};
use serde_json::json;

#[tokio::test]
async fn emits_metrics_and_traces_with_labels() {
    let labels = TelemetryLabels::agent("car_rental_assistant").with_tool("search_cars");

    let telemetry = TelemetryCollector::default();
    let tracker = MetricsTracker::default();
    let mut guard = tracker.start_run("car_rental_assistant");

    telemetry.record("tool_call", labels.clone(), json!({"operation": "ping"}));
    guard.record_model_call();
    guard.record_tool_call();
    guard.record_failure();

    let report = guard.finish(None);
    assert!(!report.success);
    assert_eq!(report.model_calls, 1);
    assert_eq!(report.tool_calls, 1);
    assert_eq!(report.failures, 1);
    assert_eq!(report.agent, "car_rental_assistant");

    let drained = telemetry.drain();
    assert_eq!(drained.0.len(), 1);
    assert_eq!(drained.0[0].labels, labels);
    assert!(telemetry.drain().0.is_empty());
}

#[tokio::test]
async fn step_limit_runs_count_as_unsuccessful() {
    let mut tools = ToolRegistry::new();
    tools
        .register(FnTool::new("noop", "Does nothing", json!({"type": "object"}), |_| async {
            Ok(ToolOutput::text("ok"))
        }))
        .unwrap();
    let telemetry = TelemetryCollector::default();
    let tracker = MetricsTracker::default();
    let model = StubModel::repeating(ModelResponse::call("n", "noop", json!({})));
    let looping = Agent::new("looping", model)
        .with_tools(tools)
        .with_step_budget(2)
        .with_telemetry(telemetry.clone())
        .with_metrics(tracker.clone());
    let answering = Agent::new("answering", StubModel::new(vec![ModelResponse::text("hi")]))
        .with_metrics(tracker.clone());

    looping.invoke(vec![Message::user("go")]).await.unwrap();
    answering.invoke(vec![Message::user("go")]).await.unwrap();

    let reports = tracker.reports();
    assert_eq!(reports[0].stop_reason, Some(StopReason::StepLimit));
    assert_eq!(reports[0].tool_calls, 1);
    assert_eq!(reports[1].stop_reason, Some(StopReason::FinalAnswer));
    assert!((RunReport::success_rate(&reports) - 0.5).abs() < f32::EPSILON);

    let limits = telemetry.events_of("step_limit");
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].labels.agent.as_deref(), Some("looping"));
    assert_eq!(telemetry.events_of("tool_call").len(), 1);
}
