//! Document lookup for the search assistant.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolOutput, ToolRegistry};

/// Reading-room document every CiA lookup currently resolves to.
pub const CIA_READING_ROOM_LINK: &str =
    "https://www.cia.gov/library/readingroom/docs/CIA-RDP87-00783R000400010001-1.pdf";

pub fn search_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(CiaLinksTool)?;
    Ok(registry)
}

struct CiaLinksTool;

#[derive(Debug, Deserialize)]
struct CiaLinksInput {
    #[allow(dead_code)]
    query: String,
}

#[async_trait]
impl Tool for CiaLinksTool {
    fn name(&self) -> &str {
        "get_cia_links"
    }

    fn description(&self) -> &str {
        "Get links to documents in the CiA system."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What the user is looking for"}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let _args: CiaLinksInput = parse_args(self.name(), input)?;
        Ok(ToolOutput::text(CIA_READING_ROOM_LINK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_reading_room_link() {
        let tools = search_toolkit().unwrap();
        let output = tools
            .call("get_cia_links", json!({"query": "annual report"}))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::text(CIA_READING_ROOM_LINK));
        assert!(tools.call("get_cia_links", json!({})).await.is_err());
    }
}
