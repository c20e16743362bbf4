//! Hotel and lodging tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{confirmation_code, days_between, given, plural, random_fee, timestamp, SearchBackend};
use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolOutput, ToolRegistry};

pub fn accommodation_toolkit(
    search: Arc<dyn SearchBackend>,
    max_results: usize,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(SearchHotelsTool {
        search,
        max_results,
    })?;
    registry.register(BookHotelTool)?;
    registry.register(CancelHotelTool)?;
    registry.register(ChangeHotelTool)?;
    Ok(registry)
}

struct SearchHotelsTool {
    search: Arc<dyn SearchBackend>,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchHotelsInput {
    location: String,
    check_in_date: String,
    check_out_date: String,
    #[serde(default = "default_guests")]
    guests: u32,
    #[serde(default = "default_rooms")]
    rooms: u32,
    #[serde(default = "default_accommodation_type")]
    accommodation_type: String,
}

fn default_guests() -> u32 {
    2
}

fn default_rooms() -> u32 {
    1
}

fn default_accommodation_type() -> String {
    "hotel".into()
}

impl SearchHotelsTool {
    fn failure(location: &str, reason: impl std::fmt::Display) -> ToolOutput {
        ToolOutput::structured(json!({
            "status": "error",
            "message": format!("Accommodation search failed: {reason}"),
            "location": location,
        }))
    }
}

#[async_trait]
impl Tool for SearchHotelsTool {
    fn name(&self) -> &str {
        "search_hotels"
    }

    fn description(&self) -> &str {
        "Search for hotels, resorts, apartments and other lodging using live web search."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "City or area to stay in"},
                "check_in_date": {"type": "string", "description": "YYYY-MM-DD"},
                "check_out_date": {"type": "string", "description": "YYYY-MM-DD"},
                "guests": {"type": "integer", "minimum": 1, "default": 2},
                "rooms": {"type": "integer", "minimum": 1, "default": 1},
                "accommodation_type": {"type": "string", "default": "hotel", "description": "hotel, resort, apartment, ..."}
            },
            "required": ["location", "check_in_date", "check_out_date"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: SearchHotelsInput = parse_args(self.name(), input)?;
        let nights = match days_between(&args.check_in_date, &args.check_out_date) {
            Ok(nights) => nights,
            Err(reason) => return Ok(Self::failure(&args.location, reason)),
        };

        let query = format!(
            "{}s in {} {} to {} {} {} {} {} best deals booking reviews rates",
            args.accommodation_type,
            args.location,
            args.check_in_date,
            args.check_out_date,
            args.guests,
            plural(args.guests.into(), "guest"),
            args.rooms,
            plural(args.rooms.into(), "room"),
        );

        let results = match self.search.search(&query, self.max_results).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(error = %err, "accommodation search failed");
                return Ok(Self::failure(&args.location, err));
            }
        };

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "search_query": query,
            "location": args.location,
            "check_in_date": args.check_in_date,
            "check_out_date": args.check_out_date,
            "nights": nights,
            "guests": args.guests,
            "rooms": args.rooms,
            "accommodation_type": args.accommodation_type,
            "results": results,
            "message": format!(
                "Found {} options in {} for {nights} {} ({} {})",
                args.accommodation_type,
                args.location,
                plural(nights, "night"),
                args.guests,
                plural(args.guests.into(), "guest"),
            ),
        })))
    }
}

struct BookHotelTool;

#[derive(Debug, Deserialize)]
struct BookHotelInput {
    hotel_id: String,
    guest_name: String,
    email: String,
    phone: String,
    #[serde(default = "default_room_type")]
    room_type: String,
}

fn default_room_type() -> String {
    "Standard Room".into()
}

#[async_trait]
impl Tool for BookHotelTool {
    fn name(&self) -> &str {
        "book_hotel"
    }

    fn description(&self) -> &str {
        "Book a room at a property for the primary guest."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "hotel_id": {"type": "string"},
                "guest_name": {"type": "string"},
                "email": {"type": "string"},
                "phone": {"type": "string"},
                "room_type": {"type": "string", "default": "Standard Room"}
            },
            "required": ["hotel_id", "guest_name", "email", "phone"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: BookHotelInput = parse_args(self.name(), input)?;
        let confirmation_number = confirmation_code("HT", 6);

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "booking_confirmed": true,
            "confirmation_number": confirmation_number,
            "booking_reference": confirmation_code("TM", 5),
            "hotel_id": args.hotel_id,
            "guest_name": args.guest_name,
            "email": args.email,
            "phone": args.phone,
            "room_type": args.room_type,
            "booking_date": timestamp(),
            "message": format!(
                "Hotel booking confirmed! Confirmation number: {confirmation_number}. You will receive an email confirmation at {}.",
                args.email
            ),
        })))
    }
}

struct CancelHotelTool;

#[derive(Debug, Deserialize)]
struct CancelHotelInput {
    confirmation_number: String,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl Tool for CancelHotelTool {
    fn name(&self) -> &str {
        "cancel_hotel"
    }

    fn description(&self) -> &str {
        "Cancel a hotel booking by confirmation number."
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
        let args: CancelHotelInput = parse_args(self.name(), input)?;
        let cancellation_id = confirmation_code("CX", 6);

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "cancellation_confirmed": true,
            "cancellation_id": cancellation_id,
            "confirmation_number": args.confirmation_number,
            "reason": args.reason,
            "cancellation_date": timestamp(),
            "refund_status": "pending",
            "refund_timeline": "3-5 business days",
            "cancellation_fee": random_fee(0..=100),
            "message": format!(
                "Hotel booking {} has been cancelled. Cancellation ID: {cancellation_id}. Refund will be processed within 3-5 business days.",
                args.confirmation_number
            ),
        })))
    }
}

struct ChangeHotelTool;

#[derive(Debug, Deserialize)]
struct ChangeHotelInput {
    confirmation_number: String,
    #[serde(default)]
    new_check_in_date: Option<String>,
    #[serde(default)]
    new_check_out_date: Option<String>,
    #[serde(default)]
    new_guests: Option<u32>,
    #[serde(default)]
    new_rooms: Option<u32>,
    #[serde(default)]
    new_room_type: Option<String>,
}

#[async_trait]
impl Tool for ChangeHotelTool {
    fn name(&self) -> &str {
        "change_hotel"
    }

    fn description(&self) -> &str {
        "Change dates, guests, rooms or room type of a hotel booking."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirmation_number": {"type": "string"},
                "new_check_in_date": {"type": "string", "description": "YYYY-MM-DD"},
                "new_check_out_date": {"type": "string", "description": "YYYY-MM-DD"},
                "new_guests": {"type": "integer", "minimum": 1},
                "new_rooms": {"type": "integer", "minimum": 1},
                "new_room_type": {"type": "string"}
            },
            "required": ["confirmation_number"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: ChangeHotelInput = parse_args(self.name(), input)?;
        let change_id = confirmation_code("CH", 6);
        let change_fee = random_fee(25..=150);

        let mut changes_made = Vec::new();
        if let Some(date) = given(&args.new_check_in_date) {
            changes_made.push(format!("Check-in date changed to {date}"));
        }
        if let Some(date) = given(&args.new_check_out_date) {
            changes_made.push(format!("Check-out date changed to {date}"));
        }
        if let Some(guests) = args.new_guests.filter(|n| *n > 0) {
            changes_made.push(format!("Number of guests changed to {guests}"));
        }
        if let Some(rooms) = args.new_rooms.filter(|n| *n > 0) {
            changes_made.push(format!("Number of rooms changed to {rooms}"));
        }
        if let Some(room_type) = given(&args.new_room_type) {
            changes_made.push(format!("Room type changed to {room_type}"));
        }

        Ok(ToolOutput::structured(json!({
            "status": "success",
            "change_confirmed": true,
            "change_id": change_id,
            "confirmation_number": args.confirmation_number,
            "changes_made": changes_made,
            "change_date": timestamp(),
            "change_fee": change_fee,
            "new_check_in_date": args.new_check_in_date,
            "new_check_out_date": args.new_check_out_date,
            "new_guests": args.new_guests,
            "new_rooms": args.new_rooms,
            "new_room_type": args.new_room_type,
            "message": format!(
                "Hotel booking {} has been changed. Change ID: {change_id}. Change fee: ${change_fee}.",
                args.confirmation_number
            ),
        })))
    }
}
