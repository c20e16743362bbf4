//! Car rental tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{confirmation_code, days_between, given, plural, random_fee, timestamp, SearchBackend};
use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolOutput, ToolRegistry};

/// Drivers younger than this get young-driver results.
const YOUNG_DRIVER_AGE: u32 = 25;

pub fn car_rental_toolkit(
    search: Arc<dyn SearchBackend>,
    max_results: usize,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(SearchCarsTool {
        search,
        max_results,
    })?;
    registry.register(BookCarTool)?;
    registry.register(CancelCarTool)?;
    registry.register(ChangeCarTool)?;
    Ok(registry)
}

struct SearchCarsTool {
    search: Arc<dyn SearchBackend>,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchCarsInput {
    location: String,
    pickup_date: String,
    dropoff_date: String,
    #[serde(default = "default_time")]
    pickup_time: String,
    #[serde(default = "default_time")]
    dropoff_time: String,
    #[serde(default = "default_car_type")]
    car_type: String,
    #[serde(default = "default_age")]
    age: u32,
}

fn default_time() -> String {
    "10:00".into()
}

fn default_car_type() -> String {
    "economy".into()
}

fn default_age() -> u32 {
    YOUNG_DRIVER_AGE
}

fn search_failure(location: &str, reason: impl std::fmt::Display) -> ToolOutput {
    ToolOutput::structured(json!({
        "status": "error",
        "message": format!("Car rental search failed: {reason}"),
        "location": location,
    }))
}

#[async_trait]
impl Tool for SearchCarsTool {
    fn name(&self) -> &str {
        "search_cars"
    }

    fn description(&self) -> &str {
        "Search for car rentals by location, dates, car type and driver age using live web search."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "Pickup location (city, airport, ...)"},
                "pickup_date": {"type": "string", "description": "YYYY-MM-DD"},
                "dropoff_date": {"type": "string", "description": "YYYY-MM-DD"},
                "pickup_time": {"type": "string", "description": "HH:MM", "default": "10:00"},
                "dropoff_time": {"type": "string", "description": "HH:MM", "default": "10:00"},
                "car_type": {"type": "string", "default": "economy", "description": "economy, compact, midsize, full-size, luxury, SUV"},
                "age": {"type": "integer", "default": 25, "description": "Driver age"}
            },
            "required": ["location", "pickup_date", "dropoff_date"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: SearchCarsInput = parse_args(self.name(), input)?;
        let rental_days = match days_between(&args.pickup_date, &args.dropoff_date) {
            Ok(days) => days,
            Err(reason) => return Ok(search_failure(&args.location, reason)),
        };

        let mut query = format!(
            "car rental {} {} to {} {} car best deals budget hertz avis enterprise",
            args.location, args.pickup_date, args.dropoff_date, args.car_type
        );
        if args.age < YOUNG_DRIVER_AGE {
            query.push_str(" young driver under 25");
        }

        let results = match self.search.search(&query, self.max_results).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(error = %err, "car rental search failed");
                return Ok(search_failure(&args.location, err));
            }
        };

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "search_query": query,
            "location": args.location,
            "pickup_date": args.pickup_date,
            "dropoff_date": args.dropoff_date,
            "pickup_time": args.pickup_time,
            "dropoff_time": args.dropoff_time,
            "rental_days": rental_days,
            "car_type": args.car_type,
            "driver_age": args.age,
            "results": results,
            "message": format!(
                "Found {} car rental options in {} for {rental_days} {}",
                args.car_type,
                args.location,
                plural(rental_days, "day")
            ),
        })))
    }
}

struct BookCarTool;

#[derive(Debug, Deserialize)]
struct BookCarInput {
    car_id: String,
    driver_name: String,
    email: String,
    phone: String,
    license_number: String,
    #[serde(default = "default_pickup_location")]
    pickup_location: String,
}

fn default_pickup_location() -> String {
    "Main Terminal".into()
}

#[async_trait]
impl Tool for BookCarTool {
    fn name(&self) -> &str {
        "book_car"
    }

    fn description(&self) -> &str {
        "Book a rental car for a driver."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "car_id": {"type": "string"},
                "driver_name": {"type": "string"},
                "email": {"type": "string"},
                "phone": {"type": "string"},
                "license_number": {"type": "string"},
                "pickup_location": {"type": "string", "default": "Main Terminal"}
            },
            "required": ["car_id", "driver_name", "email", "phone", "license_number"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: BookCarInput = parse_args(self.name(), input)?;
        let confirmation_number = confirmation_code("CR", 6);

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "booking_confirmed": true,
            "confirmation_number": confirmation_number,
            "booking_reference": confirmation_code("TM", 5),
            "car_id": args.car_id,
            "driver_name": args.driver_name,
            "email": args.email,
            "phone": args.phone,
            "license_number": args.license_number,
            "pickup_location": args.pickup_location,
            "booking_date": timestamp(),
            "message": format!(
                "Car rental booking confirmed! Confirmation number: {confirmation_number}. You will receive an email confirmation at {}.",
                args.email
            ),
        })))
    }
}

struct CancelCarTool;

#[derive(Debug, Deserialize)]
struct CancelCarInput {
    confirmation_number: String,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl Tool for CancelCarTool {
    fn name(&self) -> &str {
        "cancel_car"
    }

    fn description(&self) -> &str {
        "Cancel a car rental booking by confirmation number."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirmation_number": {"type": "string"},
                "reason": {"type": "string"}
            },
            "required": ["confirmation_number"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: CancelCarInput = parse_args(self.name(), input)?;
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
            "cancellation_fee": random_fee(0..=75),
            "message": format!(
                "Car rental booking {} has been cancelled. Cancellation ID: {cancellation_id}. Refund will be processed within 5-7 business days.",
                args.confirmation_number
            ),
        })))
    }
}

struct ChangeCarTool;

#[derive(Debug, Deserialize)]
struct ChangeCarInput {
    confirmation_number: String,
    #[serde(default)]
    new_pickup_date: Option<String>,
    #[serde(default)]
    new_dropoff_date: Option<String>,
    #[serde(default)]
    new_pickup_time: Option<String>,
    #[serde(default)]
    new_dropoff_time: Option<String>,
    #[serde(default)]
    new_car_type: Option<String>,
    #[serde(default)]
    new_pickup_location: Option<String>,
}

#[async_trait]
impl Tool for ChangeCarTool {
    fn name(&self) -> &str {
        "change_car"
    }

    fn description(&self) -> &str {
        "Change dates, times, car type or pickup location of a car rental booking."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirmation_number": {"type": "string"},
                "new_pickup_date": {"type": "string", "description": "YYYY-MM-DD"},
                "new_dropoff_date": {"type": "string", "description": "YYYY-MM-DD"},
                "new_pickup_time": {"type": "string", "description": "HH:MM"},
                "new_dropoff_time": {"type": "string", "description": "HH:MM"},
                "new_car_type": {"type": "string"},
                "new_pickup_location": {"type": "string"}
            },
            "required": ["confirmation_number"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: ChangeCarInput = parse_args(self.name(), input)?;
        let change_id = confirmation_code("CH", 6);
        let change_fee = random_fee(0..=100);

        let changes_made: Vec<String> = [
            ("Pickup date", &args.new_pickup_date),
            ("Drop-off date", &args.new_dropoff_date),
            ("Pickup time", &args.new_pickup_time),
            ("Drop-off time", &args.new_dropoff_time),
            ("Car type", &args.new_car_type),
            ("Pickup location", &args.new_pickup_location),
        ]
        .into_iter()
        .filter_map(|(label, value)| given(value).map(|v| format!("{label} changed to {v}")))
        .collect();

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "change_confirmed": true,
            "change_id": change_id,
            "confirmation_number": args.confirmation_number,
            "changes_made": changes_made,
            "change_date": timestamp(),
            "change_fee": change_fee,
            "new_pickup_date": args.new_pickup_date,
            "new_dropoff_date": args.new_dropoff_date,
            "new_pickup_time": args.new_pickup_time,
            "new_dropoff_time": args.new_dropoff_time,
            "new_car_type": args.new_car_type,
            "new_pickup_location": args.new_pickup_location,
            "message": format!(
                "Car rental booking {} has been changed. Change ID: {change_id}. Change fee: ${change_fee}.",
                args.confirmation_number
            ),
        })))
    }
}
