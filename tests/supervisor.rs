//! Supervisor delegation and the assembled assistant catalog.

use std::sync::Arc;

use concierge::tools::StaticSearch;
use concierge::{
    Agent, AgentTool, AppConfig, AssistantContext, Catalog, Message, ModelResponse, StopReason,
    StubModel, Supervisor, ToolCall, STEP_LIMIT_FALLBACK,
};
use serde_json::json;

fn finance_agent(model: Arc<StubModel>) -> Agent {
    let tools = concierge::tools::finance_toolkit().unwrap();
    Agent::new("finance_assistant", model)
        .with_description("Looks up invoice details.")
        .with_tools(tools)
}

#[tokio::test]
async fn supervisor_relays_nested_answer() {
    let nested = StubModel::new(vec![
        ModelResponse::call("n1", "get_invoice", json!({"invoice_id": "42"})),
        ModelResponse::text("Invoice #42 - Amount: $1,000 - Date: 2024-03-20 - Status: Paid"),
    ]);
    let top = StubModel::new(vec![
        ModelResponse::call(
            "s1",
            "transfer_to_finance_assistant",
            json!({"request": "What is the status of invoice 42?", "context": "User is in accounts payable"}),
        ),
        ModelResponse::text("Invoice #42 - Amount: $1,000 - Date: 2024-03-20 - Status: Paid"),
    ]);
    let supervisor = Supervisor::new("plus_assistant", top.clone())
        .with_member(finance_agent(nested.clone()))
        .build()
        .unwrap();

    let outcome = supervisor
        .invoke(vec![Message::user("status of invoice 42?")])
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::FinalAnswer);
    let nested_input = &nested.seen_messages()[0];
    assert_eq!(
        nested_input.last(),
        Some(&Message::user(
            "What is the status of invoice 42?\n\nContext: User is in accounts payable"
        ))
    );
    match &outcome.messages[2] {
        Message::ToolResult { content, is_error, .. } => {
            assert!(!is_error);
            assert_eq!(
                content,
                &json!("Invoice #42 - Amount: $1,000 - Date: 2024-03-20 - Status: Paid")
            );
        }
        other => panic!("expected tool result, got {other:?}"),
    }
    assert_eq!(top.seen_tools()[0][0].name, "transfer_to_finance_assistant");
}

#[tokio::test]
async fn nested_model_failure_is_a_tool_error() {
    // nothing scripted: the nested agent's first model call fails
    let nested = StubModel::new(vec![]);
    let top = StubModel::new(vec![
        ModelResponse::call("s1", "transfer_to_finance_assistant", json!({"request": "invoice 9"})),
        ModelResponse::text("The finance assistant is unavailable."),
    ]);
    let supervisor = Supervisor::new("plus_assistant", top)
        .with_member(finance_agent(nested))
        .build()
        .unwrap();

    let outcome = supervisor.invoke(vec![Message::user("invoice 9")]).await.unwrap();

    match &outcome.messages[2] {
        Message::ToolResult { content, is_error, .. } => {
            assert!(is_error);
            assert_eq!(content["error"], "tool_execution");
        }
        other => panic!("expected tool result, got {other:?}"),
    }
    assert_eq!(
        outcome.final_text().as_deref(),
        Some("The finance assistant is unavailable.")
    );
}

#[tokio::test]
async fn nested_step_limit_text_is_forwarded() {
    let nested = StubModel::repeating(ModelResponse::call("n", "get_invoice", json!({"invoice_id": "1"})));
    let top = StubModel::new(vec![
        ModelResponse::call("s1", "transfer_to_finance_assistant", json!({"request": "invoice 1"})),
        ModelResponse::text(STEP_LIMIT_FALLBACK),
    ]);
    let supervisor = Supervisor::new("plus_assistant", top)
        .with_member(finance_agent(nested.clone()).with_step_budget(2))
        .build()
        .unwrap();

    let outcome = supervisor.invoke(vec![Message::user("invoice 1")]).await.unwrap();

    assert_eq!(nested.call_count(), 2);
    match &outcome.messages[2] {
        Message::ToolResult { content, .. } => assert_eq!(content, &json!(STEP_LIMIT_FALLBACK)),
        other => panic!("expected tool result, got {other:?}"),
    }
}

#[test]
fn agent_tool_is_named_after_member() {
    let tool = AgentTool::new(Arc::new(finance_agent(StubModel::new(vec![]))));
    assert_eq!(concierge::Tool::name(&tool), "transfer_to_finance_assistant");
    assert_eq!(tool.agent().name(), "finance_assistant");
}

#[tokio::test]
async fn travel_master_delegates_to_flight_assistant() {
    let supervisor_model = StubModel::new(vec![
        ModelResponse::call(
            "t1",
            "transfer_to_flight_assistant",
            json!({"request": "Find flights from BNE to SYD on 2025-06-01"}),
        ),
        ModelResponse::text("Here are the flights I found."),
    ]);
    let sub_model = StubModel::new(vec![
        ModelResponse::calls(vec![ToolCall::new(
            "f1",
            "search_flights",
            json!({"origin": "BNE", "destination": "SYD", "departure_date": "2025-06-01"}),
        )]),
        ModelResponse::text("Here are the flights I found."),
    ]);
    let context = AssistantContext::with_models(AppConfig::default(), supervisor_model, sub_model.clone())
        .unwrap()
        .with_search(Arc::new(StaticSearch::default()));
    let catalog = Catalog::build(&context).unwrap();

    let reply = catalog
        .require("travel_master")
        .unwrap()
        .respond("I need a flight to Sydney")
        .await
        .unwrap();

    assert_eq!(reply, "Here are the flights I found.");
    let second_sub_call = &sub_model.seen_messages()[1];
    match second_sub_call.last() {
        Some(Message::ToolResult { content, .. }) => assert_eq!(content["status"], "success"),
        other => panic!("expected search results, got {other:?}"),
    }
    let reports = context.metrics().reports();
    assert!(reports.iter().any(|r| r.agent == "flight_assistant" && r.success));
    assert!(reports.iter().any(|r| r.agent == "travel_master" && r.success));
}
