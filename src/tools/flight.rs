//! Flight tools: live search through the web search backend, mocked
//! booking, cancellation and changes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{confirmation_code, given, plural, random_fee, timestamp, SearchBackend};
use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolOutput, ToolRegistry};

pub fn flight_toolkit(search: Arc<dyn SearchBackend>, max_results: usize) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(SearchFlightsTool {
        search,
        max_results,
    })?;
    registry.register(BookFlightTool)?;
    registry.register(CancelFlightTool)?;
    registry.register(ChangeFlightTool)?;
    Ok(registry)
}

struct SearchFlightsTool {
    search: Arc<dyn SearchBackend>,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchFlightsInput {
    origin: String,
    destination: String,
    departure_date: String,
    #[serde(default)]
    return_date: Option<String>,
    #[serde(default = "default_passengers")]
    passengers: u32,
}

fn default_passengers() -> u32 {
    1
}

#[async_trait]
impl Tool for SearchFlightsTool {
    fn name(&self) -> &str {
        "search_flights"
    }

    fn description(&self) -> &str {
        "Search for one-way or round-trip flights using live web search."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "origin": {"type": "string", "description": "Departure city or airport code"},
                "destination": {"type": "string", "description": "Arrival city or airport code"},
                "departure_date": {"type": "string", "description": "Departure date (YYYY-MM-DD)"},
                "return_date": {"type": "string", "description": "Return date for a round trip (YYYY-MM-DD)"},
                "passengers": {"type": "integer", "minimum": 1, "default": 1}
            },
            "required": ["origin", "destination", "departure_date"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: SearchFlightsInput = parse_args(self.name(), input)?;
        let return_date = given(&args.return_date).map(str::to_string);
        let trip_type = if return_date.is_some() { "round trip" } else { "one way" };

        let mut query = format!(
            "flights from {} to {} {}",
            args.origin, args.destination, args.departure_date
        );
        if let Some(return_date) = &return_date {
            query.push_str(&format!(" return {return_date}"));
        }
        query.push_str(&format!(
            " {} {} best deals airlines",
            args.passengers,
            plural(args.passengers.into(), "passenger")
        ));

        let results = match self.search.search(&query, self.max_results).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(error = %err, "flight search failed");
                return Ok(ToolOutput::structured(json!({
                    "status": "error",
                    "message": format!("Flight search failed: {err}"),
                    "origin": args.origin,
                    "destination": args.destination,
                })));
            }
        };

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "search_query": query,
            "trip_type": trip_type,
            "origin": args.origin,
            "destination": args.destination,
            "departure_date": args.departure_date,
            "return_date": return_date,
            "passengers": args.passengers,
            "results": results,
            "message": format!(
                "Found flight options for {trip_type} from {} to {}",
                args.origin, args.destination
            ),
        })))
    }
}

struct BookFlightTool;

#[derive(Debug, Deserialize)]
struct BookFlightInput {
    flight_id: String,
    passenger_name: String,
    email: String,
    phone: String,
}

#[async_trait]
impl Tool for BookFlightTool {
    fn name(&self) -> &str {
        "book_flight"
    }

    fn description(&self) -> &str {
        "Book a flight for a passenger and return the confirmation details."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "flight_id": {"type": "string", "description": "Identifier of the flight to book"},
                "passenger_name": {"type": "string"},
                "email": {"type": "string"},
                "phone": {"type": "string"}
            },
            "required": ["flight_id", "passenger_name", "email", "phone"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: BookFlightInput = parse_args(self.name(), input)?;
        let confirmation_number = confirmation_code("FL", 6);
        let booking_reference = confirmation_code("TM", 5);

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "booking_confirmed": true,
            "confirmation_number": confirmation_number,
            "booking_reference": booking_reference,
            "flight_id": args.flight_id,
            "passenger_name": args.passenger_name,
            "email": args.email,
            "phone": args.phone,
            "booking_date": timestamp(),
            "message": format!(
                "Flight booking confirmed! Confirmation number: {confirmation_number}. You will receive an email confirmation at {}.",
                args.email
            ),
        })))
    }
}

struct CancelFlightTool;

#[derive(Debug, Deserialize)]
struct CancelInput {
    confirmation_number: String,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl Tool for CancelFlightTool {
    fn name(&self) -> &str {
        "cancel_flight"
    }

    fn description(&self) -> &str {
        "Cancel a flight booking by confirmation number."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirmation_number": {"type": "string"},
                "reason": {"type": "string", "description": "Optional cancellation reason"}
            },
            "required": ["confirmation_number"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: CancelInput = parse_args(self.name(), input)?;
        let cancellation_id = confirmation_code("CX", 6);

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "cancellation_confirmed": true,
            "cancellation_id": cancellation_id,
            "confirmation_number": args.confirmation_number,
            "reason": args.reason,
            "cancellation_date": timestamp(),
            "refund_status": "pending",
            "refund_timeline": "5-7 business days",
            "message": format!(
                "Flight booking {} has been cancelled. Cancellation ID: {cancellation_id}. Refund will be processed within 5-7 business days.",
                args.confirmation_number
            ),
        })))
    }
}

struct ChangeFlightTool;

#[derive(Debug, Deserialize)]
struct ChangeFlightInput {
    confirmation_number: String,
    #[serde(default)]
    new_departure_date: Option<String>,
    #[serde(default)]
    new_return_date: Option<String>,
    #[serde(default)]
    new_passengers: Option<u32>,
}

#[async_trait]
impl Tool for ChangeFlightTool {
    fn name(&self) -> &str {
        "change_flight"
    }

    fn description(&self) -> &str {
        "Change the dates or passenger count of a flight booking."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirmation_number": {"type": "string"},
                "new_departure_date": {"type": "string", "description": "YYYY-MM-DD"},
                "new_return_date": {"type": "string", "description": "YYYY-MM-DD"},
                "new_passengers": {"type": "integer", "minimum": 1}
            },
            "required": ["confirmation_number"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: ChangeFlightInput = parse_args(self.name(), input)?;
        let change_id = confirmation_code("CH", 6);
        let change_fee = random_fee(50..=200);

        let mut changes_made = Vec::new();
        if let Some(date) = given(&args.new_departure_date) {
            changes_made.push(format!("Departure date changed to {date}"));
        }
        if let Some(date) = given(&args.new_return_date) {
            changes_made.push(format!("Return date changed to {date}"));
        }
        if let Some(passengers) = args.new_passengers.filter(|n| *n > 0) {
            changes_made.push(format!("Number of passengers changed to {passengers}"));
        }

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "change_confirmed": true,
            "change_id": change_id,
            "confirmation_number": args.confirmation_number,
            "changes_made": changes_made,
            "change_date": timestamp(),
            "change_fee": change_fee,
            "new_departure_date": args.new_departure_date,
            "new_return_date": args.new_return_date,
            "new_passengers": args.new_passengers,
            "message": format!(
                "Flight booking {} has been changed. Change ID: {change_id}. Change fee: ${change_fee}.",
                args.confirmation_number
            ),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{SearchResult, StaticSearch, UnconfiguredSearch};

    fn registry(search: Arc<dyn SearchBackend>) -> ToolRegistry {
        flight_toolkit(search, 10).unwrap()
    }

    #[tokio::test]
    async fn searches_round_trip() {
        let tools = registry(Arc::new(StaticSearch::new(vec![SearchResult {
            title: "NYC to LA from $199".into(),
            url: "https://flights.example".into(),
            content: "Nonstop".into(),
            score: None,
        }])));

        let output = tools
            .call(
                "search_flights",
                json!({"origin": "NYC", "destination": "LA", "departure_date": "2025-06-01", "return_date": "2025-06-08", "passengers": 2}),
            )
            .await
            .unwrap()
            .into_value();

        assert_eq!(output["status"], "success");
        assert_eq!(output["trip_type"], "round trip");
        assert_eq!(
            output["search_query"],
            "flights from NYC to LA 2025-06-01 return 2025-06-08 2 passengers best deals airlines"
        );
        assert_eq!(output["results"][0]["title"], "NYC to LA from $199");
    }

    #[tokio::test]
    async fn search_failures_are_reported_not_raised() {
        let tools = registry(Arc::new(UnconfiguredSearch));
        let output = tools
            .call(
                "search_flights",
                json!({"origin": "NYC", "destination": "LA", "departure_date": "tomorrow"}),
            )
            .await
            .unwrap();

        assert_eq!(output.status(), Some("error"));
        let value = output.into_value();
        assert!(value["message"].as_str().unwrap().starts_with("Flight search failed"));
        assert_eq!(value["origin"], "NYC");
    }

    #[tokio::test]
    async fn books_and_changes() {
        let tools = registry(Arc::new(UnconfiguredSearch));
        let booked = tools
            .call(
                "book_flight",
                json!({"flight_id": "QF12", "passenger_name": "Sam Lee", "email": "sam@example.com", "phone": "555-0100"}),
            )
            .await
            .unwrap()
            .into_value();
        let confirmation = booked["confirmation_number"].as_str().unwrap();
        assert!(confirmation.starts_with("FL") && confirmation.len() == 8);
        assert!(booked["booking_reference"].as_str().unwrap().starts_with("TM"));

        let changed = tools
            .call(
                "change_flight",
                json!({"confirmation_number": confirmation, "new_departure_date": "2025-07-01", "new_passengers": 3}),
            )
            .await
            .unwrap()
            .into_value();
        let fee = changed["change_fee"].as_u64().unwrap();
        assert!((50..=200).contains(&fee));
        assert_eq!(changed["changes_made"].as_array().unwrap().len(), 2);

        let cancelled = tools
            .call("cancel_flight", json!({"confirmation_number": confirmation}))
            .await
            .unwrap()
            .into_value();
        assert_eq!(cancelled["refund_timeline"], "5-7 business days");
        assert!(cancelled["reason"].is_null());
    }
}
