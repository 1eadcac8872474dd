//! Script execution context
//!
//! What a script can see: the request, the response once there is one, and the
//! variable maps.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::http::{HttpRequest, HttpResponse};

/// Name to value map used for environments and the chain pool
pub type VariableMap = IndexMap<String, JsonValue>;

/// Script execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    /// Runs before the request is sent; may update it
    PreRequest,
    /// Runs after the response arrived; read-only
    PostRequest,
    /// Test script with `pm.test`
    Test,
}

/// The three variable maps a script can read and write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Environment,
    Globals,
    CollectionVariables,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableScopes {
    pub environment: VariableMap,
    pub globals: VariableMap,
    pub collection_variables: VariableMap,
}

impl VariableScopes {
    pub fn with_environment(environment: VariableMap) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    pub fn get(&self, scope: VarScope) -> &VariableMap {
        match scope {
            VarScope::Environment => &self.environment,
            VarScope::Globals => &self.globals,
            VarScope::CollectionVariables => &self.collection_variables,
        }
    }

    pub fn get_mut(&mut self, scope: VarScope) -> &mut VariableMap {
        match scope {
            VarScope::Environment => &mut self.environment,
            VarScope::Globals => &mut self.globals,
            VarScope::CollectionVariables => &mut self.collection_variables,
        }
    }
}

/// Request and optional response handed to a script
#[derive(Debug, Clone)]
pub struct ScriptContext {
    request: HttpRequest,
    response: Option<HttpResponse>,
    response_time: Duration,
}

impl ScriptContext {
    /// Context for a pre-request script
    pub fn pre_request(request: HttpRequest) -> Self {
        Self {
            request,
            response: None,
            response_time: Duration::ZERO,
        }
    }

    /// Context for a post-request script
    pub fn post_request(request: HttpRequest, response: HttpResponse, response_time: Duration) -> Self {
        Self {
            request,
            response: Some(response),
            response_time,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    pub fn response_time(&self) -> Duration {
        self.response_time
    }

    pub fn mode(&self) -> ScriptMode {
        if self.response.is_some() {
            ScriptMode::PostRequest
        } else {
            ScriptMode::PreRequest
        }
    }
}
