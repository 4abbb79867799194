use async_graphql::{Context, EmptySubscription, Enum, Object, Schema};
use std::sync::Arc;

use crate::domain::governor::Governor;
use crate::domain::intent::{IntentRecord, Trigger, UpdateAvailability};
use crate::domain::types::*;

pub type CadenceSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
pub enum TriggerKind {
    Admit,
    Assessed,
    Updated,
    Failed,
    Resolve,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
pub enum Availability {
    Available,
    Unavailable,
    Unknown,
}

impl From<Availability> for UpdateAvailability {
    fn from(value: Availability) -> Self {
        match value {
            Availability::Available => Self::Available,
            Availability::Unavailable => Self::Unavailable,
            Availability::Unknown => Self::Unknown,
        }
    }
}

fn trigger(kind: TriggerKind, update_available: Option<Availability>) -> async_graphql::Result<Trigger> {
    Ok(match kind {
        TriggerKind::Admit => Trigger::Admit,
        TriggerKind::Assessed => Trigger::Assessed {
            update_available: update_available
                .ok_or_else(|| async_graphql::Error::new("assessed requires updateAvailable"))?
                .into(),
        },
        TriggerKind::Updated => Trigger::Updated,
        TriggerKind::Failed => Trigger::Failed,
        TriggerKind::Resolve => Trigger::Resolve,
    })
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn health(&self, ctx: &Context<'_>) -> async_graphql::Result<DaemonHealth> {
        let svc = ctx.data::<Arc<Governor>>()?;
        Ok(svc.health().await)
    }

    /// Fleet-wide active count against the configured maximum.
    async fn fleet(&self, ctx: &Context<'_>) -> async_graphql::Result<FleetStatus> {
        let svc = ctx.data::<Arc<Governor>>()?;
        Ok(svc.fleet_status().await)
    }

    async fn nodes(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<NodeView>> {
        let svc = ctx.data::<Arc<Governor>>()?;
        Ok(svc.nodes().await)
    }

    async fn node(&self, ctx: &Context<'_>, name: String) -> async_graphql::Result<Option<NodeView>> {
        let svc = ctx.data::<Arc<Governor>>()?;
        Ok(svc.node(&name).await)
    }

    /// Evaluate the admission policy against caller-supplied counts.
    async fn check(
        &self,
        ctx: &Context<'_>,
        state: String,
        update_available: Option<String>,
        cluster_active: u64,
        cluster_count: u64,
    ) -> async_graphql::Result<CheckResponse> {
        let svc = ctx.data::<Arc<Governor>>()?;
        svc.check(&CheckRequest {
            intent: IntentRecord {
                state,
                update_available,
            },
            cluster_active: cluster_active as usize,
            cluster_count: cluster_count as usize,
        })
        .map_err(|e| async_graphql::Error::new(e.to_string()))
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Add a node at the initial intent; known nodes are returned unchanged.
    async fn register(&self, ctx: &Context<'_>, node: String) -> async_graphql::Result<NodeView> {
        let svc = ctx.data::<Arc<Governor>>()?;
        Ok(svc.register(&node).await)
    }

    async fn put_intent(
        &self,
        ctx: &Context<'_>,
        node: String,
        state: String,
        update_available: Option<String>,
    ) -> async_graphql::Result<NodeView> {
        let svc = ctx.data::<Arc<Governor>>()?;
        Ok(svc
            .put_intent(
                &node,
                IntentRecord {
                    state,
                    update_available,
                },
            )
            .await)
    }

    async fn report_event(
        &self,
        ctx: &Context<'_>,
        node: String,
        kind: TriggerKind,
        update_available: Option<Availability>,
    ) -> async_graphql::Result<NodeView> {
        let svc = ctx.data::<Arc<Governor>>()?;
        svc.report(&node, trigger(kind, update_available)?)
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))
    }

    /// Run one reconciliation pass now.
    async fn reconcile(&self, ctx: &Context<'_>) -> async_graphql::Result<ReconcileResult> {
        let svc = ctx.data::<Arc<Governor>>()?;
        Ok(svc.reconcile().await)
    }
}

pub fn build_schema(governor: Arc<Governor>) -> CadenceSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(governor)
        .finish()
}
