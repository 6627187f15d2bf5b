//! Test world for Cucumber scenarios

use async_trait::async_trait;
use cucumber::World;
use std::collections::HashSet;
use std::time::Duration;

use ddi_sync::models::{
    AttributeDefinition, AttributeMapping, AttributeSchema, AuthorityNetwork,
    ClassificationResult, NetworkRecord, TagSuggestions, TaskSnapshot, WriteOperation,
    WriteSet,
};
use ddi_sync::services::{ClientError, LastStatus, NetworkWriter, TransportFailure};

/// Test world that maintains state across scenario steps
#[derive(Debug, Default, World)]
pub struct TestWorld {
    /// Attribute definitions the authority declares
    pub definitions: Vec<AttributeDefinition>,

    /// Networks the authority already holds
    pub authority_networks: Vec<AuthorityNetwork>,

    /// Inventory records under reconciliation
    pub records: Vec<NetworkRecord>,

    pub mapping: AttributeMapping,

    /// Outcome of the last classification; errors kept as their message
    pub classification: Option<Result<ClassificationResult, String>>,

    /// Suggestions from the last suggestion request
    pub suggestions: Vec<TagSuggestions>,

    /// Writes handed to the orchestrator
    pub write_set: WriteSet,

    /// How the simulated authority answers writes
    pub authority_behaviour: AuthorityBehaviour,

    /// Final state of the last task
    pub task: Option<TaskSnapshot>,
}

impl TestWorld {
    pub fn schema(&self) -> AttributeSchema {
        AttributeSchema::new(self.definitions.clone())
    }

    pub fn classification(&self) -> &ClassificationResult {
        match &self.classification {
            Some(Ok(result)) => result,
            Some(Err(e)) => panic!("Classification failed: {}", e),
            None => panic!("No classification has been run"),
        }
    }

    pub fn task(&self) -> &TaskSnapshot {
        self.task.as_ref().expect("No task has been run")
    }
}

/// Scripted answers of the simulated authority
#[derive(Debug, Clone, Default)]
pub struct AuthorityBehaviour {
    /// CIDRs whose writes are rejected as conflicts
    pub rejected: HashSet<String>,
    /// Every write fails to connect
    pub unreachable: bool,
    /// Time each write takes
    pub latency: Duration,
}

/// A [`NetworkWriter`] driven by [`AuthorityBehaviour`]
pub struct SimulatedAuthority {
    behaviour: AuthorityBehaviour,
}

impl SimulatedAuthority {
    pub fn new(behaviour: AuthorityBehaviour) -> Self {
        Self { behaviour }
    }
}

#[async_trait]
impl NetworkWriter for SimulatedAuthority {
    async fn apply(&self, operation: &WriteOperation) -> Result<(), ClientError> {
        if !self.behaviour.latency.is_zero() {
            tokio::time::sleep(self.behaviour.latency).await;
        }

        if self.behaviour.unreachable {
            return Err(ClientError::Transient {
                last: LastStatus::Transport(TransportFailure::Connect),
                attempts: 3,
                message: "connection refused".to_string(),
                idempotent: false,
            });
        }

        let cidr = operation.cidr().to_string();
        if self.behaviour.rejected.contains(&cidr) {
            return Err(ClientError::Permanent {
                status: 400,
                message: format!("The network {} already exists.", cidr),
                code: Some("Client.Ibap.Data.Conflict".to_string()),
                idempotent: false,
            });
        }

        Ok(())
    }
}
