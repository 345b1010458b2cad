//! Least-privilege guard around a provider.
//!
//! Every call is checked against the access policy before it reaches the
//! wrapped provider. A call the policy does not grant fails immediately
//! with `PermissionDenied` and never touches the provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fleet_core::{NodeId, NodeTypeSpec};
use tracing::error;

use crate::client::{ProviderAction, ProviderClient, ProviderNode, TerminateReport};
use crate::error::{ProviderError, ProviderResult};
use crate::policy::AccessPolicy;

pub struct PolicyGuard<P> {
    inner: P,
    policy: AccessPolicy,
}

impl<P: ProviderClient> PolicyGuard<P> {
    pub fn new(inner: P, policy: AccessPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    fn check(&self, action: ProviderAction) -> ProviderResult<()> {
        if self.policy.allows_action(action) {
            return Ok(());
        }
        let iam_action = action.iam_action();
        error!(%action, %iam_action, "provider call blocked by access policy");
        Err(ProviderError::PermissionDenied {
            action,
            iam_action: iam_action.to_string(),
        })
    }
}

#[async_trait]
impl<P: ProviderClient> ProviderClient for PolicyGuard<P> {
    async fn list_nodes(&self, cluster_tag: &str) -> ProviderResult<Vec<ProviderNode>> {
        self.check(ProviderAction::Describe)?;
        self.inner.list_nodes(cluster_tag).await
    }

    async fn launch(
        &self,
        cluster_tag: &str,
        node_type: &NodeTypeSpec,
        count: u32,
    ) -> ProviderResult<Vec<NodeId>> {
        self.check(ProviderAction::Launch)?;
        self.inner.launch(cluster_tag, node_type, count).await
    }

    async fn terminate(&self, ids: &[NodeId]) -> ProviderResult<TerminateReport> {
        self.check(ProviderAction::Terminate)?;
        self.inner.terminate(ids).await
    }

    async fn tag(&self, id: &str, tags: &BTreeMap<String, String>) -> ProviderResult<()> {
        self.check(ProviderAction::Tag)?;
        self.inner.tag(id, tags).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryProvider;
    use fleet_core::{ClusterConfig, ClusterSpec};

    fn launch_only_policy() -> AccessPolicy {
        AccessPolicy::from_json(
            r#"{"Version":"2012-10-17","Statement":[
                {"Effect":"Allow","Action":["ec2:RunInstances","ec2:DescribeInstances"]}
            ]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn allowed_calls_pass_through() {
        let spec = ClusterSpec::load(ClusterConfig::scaffold("guarded")).unwrap();
        let guard = PolicyGuard::new(InMemoryProvider::new(), launch_only_policy());

        let ids = guard.launch("guarded", &spec.worker, 2).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(guard.list_nodes("guarded").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn denied_calls_fail_fast_without_reaching_provider() {
        let spec = ClusterSpec::load(ClusterConfig::scaffold("guarded")).unwrap();
        let guard = PolicyGuard::new(InMemoryProvider::new(), launch_only_policy());
        let ids = guard.launch("guarded", &spec.worker, 1).await.unwrap();

        let err = guard.terminate(&ids).await.unwrap_err();
        assert!(err.is_permission());
        assert_eq!(err.action(), ProviderAction::Terminate);

        let err = guard.tag(&ids[0], &BTreeMap::new()).await.unwrap_err();
        assert!(err.is_permission());

        assert_eq!(guard.inner().calls(ProviderAction::Terminate).await, 0);
        assert_eq!(guard.inner().calls(ProviderAction::Tag).await, 0);
        assert_eq!(guard.inner().live_nodes().await.len(), 1);
    }
}
