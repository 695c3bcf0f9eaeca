#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use flowscope::runtime::{Activity, ActivityOutcome, ActivityScope};

/// Completes immediately.
pub struct Pass {
    id: &'static str,
}

pub fn pass(id: &'static str) -> Arc<dyn Activity> {
    Arc::new(Pass { id })
}

#[async_trait]
impl Activity for Pass {
    fn id(&self) -> &str {
        self.id
    }

    fn activity_type(&self) -> &str {
        "Pass"
    }

    async fn execute(&self, _scope: &mut ActivityScope<'_>) -> Result<ActivityOutcome> {
        Ok(ActivityOutcome::Completed)
    }
}

/// Collects a signature, suspending until a human resumes it.
pub struct CollectSignature;

#[async_trait]
impl Activity for CollectSignature {
    fn id(&self) -> &str {
        "collect-signature"
    }

    fn activity_type(&self) -> &str {
        "CollectSignature"
    }

    async fn execute(&self, scope: &mut ActivityScope<'_>) -> Result<ActivityOutcome> {
        let signer = scope.resolve("Input.signer").await.into_value();
        scope.declare_variable("signer", signer)?;
        scope.declare_variable("attempts", 1)?;
        Ok(ActivityOutcome::suspend("signature"))
    }

    async fn resume(&self, scope: &mut ActivityScope<'_>, bookmark: &str) -> Result<ActivityOutcome> {
        anyhow::ensure!(bookmark == "signature", "unexpected bookmark {bookmark}");
        scope.declare_variable("signed", true)?;
        Ok(ActivityOutcome::Completed)
    }
}
