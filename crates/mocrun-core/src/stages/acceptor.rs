//! Acceptor: assign the owner and release the instance for approval.

use tracing::info;

use super::{Advisory, StageController, StageCore, StageEnv, StageKind};
use crate::Result;
use crate::catalog::{self, acceptor};
use crate::config::AcceptorData;
use crate::descriptor::Notification;
use crate::page::Page;
use crate::store::WorkflowContext;

#[derive(Debug)]
pub struct AcceptorStage<'p, P: Page> {
    core: StageCore<'p, P>,
}

impl<'p, P: Page> AcceptorStage<'p, P> {
    #[must_use]
    pub fn new(page: &'p P, env: StageEnv) -> Self {
        Self {
            core: StageCore::new(page, env),
        }
    }

    #[must_use]
    pub fn core(&self) -> &StageCore<'p, P> {
        &self.core
    }
}

impl<P: Page> StageController for AcceptorStage<'_, P> {
    type Input = AcceptorData;

    fn kind(&self) -> StageKind {
        StageKind::Accept
    }

    async fn locate(&mut self, ctx: &WorkflowContext) -> Result<()> {
        self.core.locate(ctx).await?;
        // Some layouts open straight on the acceptor panel.
        let tab = self.core.click(acceptor::tab()).await;
        self.core.optional("acceptor tab", tab)?;
        Ok(())
    }

    async fn act(&mut self, input: &AcceptorData) -> Result<()> {
        self.core
            .choose_filtered(
                acceptor::owner(),
                &input.owner,
                acceptor::owner_option(&input.owner),
                true,
            )
            .await?;
        self.core.check(catalog::agreement_checkbox()).await?;
        self.core.click(acceptor::release_approval()).await?;
        self.core.settle("release approval").await;
        self.core.click(acceptor::approve()).await?;
        self.core.fill(acceptor::comment(), &input.comment).await?;
        info!(owner = %input.owner, "Owner assigned and approval released");
        Ok(())
    }

    async fn submit(&mut self) -> Result<Option<Notification>> {
        self.core.click(acceptor::remark_approve()).await?;
        self.core.settle("acceptance saved").await;
        self.core.capture_notification().await
    }

    fn verify_outcome(&self) -> bool {
        self.core.verify(&StageKind::Accept.vocabulary())
    }

    fn notification(&self) -> Option<Notification> {
        self.core.notification().cloned()
    }

    fn take_advisories(&mut self) -> Vec<Advisory> {
        self.core.take_advisories()
    }
}
