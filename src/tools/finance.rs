//! Invoice lookup for the finance assistant.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolOutput, ToolRegistry};

pub fn finance_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(InvoiceTool)?;
    Ok(registry)
}

/// Mocked lookup: every invoice reads as a paid $1,000 invoice dated
/// 2024-03-20, reported under the id the caller asked for rather than a
/// fixed invoice number.
struct InvoiceTool;

#[derive(Debug, Deserialize)]
struct InvoiceInput {
    invoice_id: String,
}

#[async_trait]
impl Tool for InvoiceTool {
    fn name(&self) -> &str {
        "get_invoice"
    }

    fn description(&self) -> &str {
        "Get invoice details."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "invoice_id": {"type": "string"}
            },
            "required": ["invoice_id"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: InvoiceInput = parse_args(self.name(), input)?;
        let invoice_id = args.invoice_id.trim().trim_start_matches('#');
        Ok(ToolOutput::text(format!(
            "Invoice #{invoice_id} - Amount: $1,000 - Date: 2024-03-20 - Status: Paid"
        )))
    }
}
