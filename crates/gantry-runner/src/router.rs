//! Dispatch of tool identifiers to adapters.

use async_trait::async_trait;
use gantry_core::ports::{ToolAdapter, ToolRequest, ToolResponse};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Routes each request to the adapter registered for its tool id, falling
/// back to a default adapter (usually the host process adapter).
#[derive(Default, Clone)]
pub struct ToolRouter {
    routes: HashMap<String, Arc<dyn ToolAdapter>>,
    fallback: Option<Arc<dyn ToolAdapter>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, tool: impl Into<String>, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.routes.insert(tool.into(), adapter);
        self
    }

    pub fn fallback(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.fallback = Some(adapter);
        self
    }

    pub fn resolve(&self, tool: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.routes.get(tool).or(self.fallback.as_ref())
    }

    pub fn has_route(&self, tool: &str) -> bool {
        self.routes.contains_key(tool)
    }
}

#[async_trait]
impl ToolAdapter for ToolRouter {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
        let adapter = self
            .resolve(&request.tool)
            .ok_or_else(|| Error::ToolNotFound(request.tool.clone()))?;
        debug!(tool = %request.tool, routed = self.has_route(&request.tool), "Routing tool request");
        adapter.invoke(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::trigger::{EventKind, TriggerContext};
    use gantry_core::{JobId, RunId};

    struct Named(&'static str);

    #[async_trait]
    impl ToolAdapter for Named {
        async fn invoke(&self, _request: ToolRequest) -> Result<ToolResponse> {
            Ok(ToolResponse::success().with_output("adapter", self.0))
        }
    }

    fn request(tool: &str) -> ToolRequest {
        ToolRequest {
            run_id: RunId::new(),
            job: JobId::new("job"),
            tool: tool.to_string(),
            args: vec![],
            working_directory: std::env::temp_dir(),
            env: HashMap::new(),
            consumed: vec![],
            trigger: Arc::new(TriggerContext::new(EventKind::Manual, "main", "abc")),
        }
    }

    #[tokio::test]
    async fn test_routes_by_tool_id() {
        let router = ToolRouter::new()
            .route("gantry/deploy", Arc::new(Named("deploy")))
            .fallback(Arc::new(Named("host")));

        let out = router.invoke(request("gantry/deploy")).await.unwrap();
        assert_eq!(out.outputs.get("adapter"), Some("deploy"));

        let out = router.invoke(request("npm")).await.unwrap();
        assert_eq!(out.outputs.get("adapter"), Some("host"));
    }

    #[tokio::test]
    async fn test_unknown_tool_without_fallback() {
        let router = ToolRouter::new().route("gantry/deploy", Arc::new(Named("deploy")));
        assert!(matches!(
            router.invoke(request("npm")).await,
            Err(Error::ToolNotFound(_))
        ));
    }
}
