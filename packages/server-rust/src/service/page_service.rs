//! The innermost service: executes page operations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;

use super::operation::{Operation, OperationError, OperationResponse};
use crate::accounts::Accounts;
use crate::cleanup::AnonymousSweeper;
use crate::ownership::OwnershipClaims;
use crate::publish::PublishOrchestrator;

// ---------------------------------------------------------------------------
// PageService
// ---------------------------------------------------------------------------

/// Tower service that runs each [`Operation`] against the orchestrator, the
/// claim protocol or the account records. Every call also gives the anonymous
/// sweeper its chance to start.
#[derive(Clone)]
pub struct PageService {
    orchestrator: Arc<PublishOrchestrator>,
    claims: Arc<OwnershipClaims>,
    accounts: Arc<Accounts>,
    sweeper: Option<AnonymousSweeper>,
}

impl PageService {
    #[must_use]
    pub fn new(
        orchestrator: Arc<PublishOrchestrator>,
        claims: Arc<OwnershipClaims>,
        accounts: Arc<Accounts>,
        sweeper: Option<AnonymousSweeper>,
    ) -> Self {
        Self {
            orchestrator,
            claims,
            accounts,
            sweeper,
        }
    }
}

impl Service<Operation> for PageService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        if let Some(sweeper) = &self.sweeper {
            sweeper.maybe_sweep();
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let claims = Arc::clone(&self.claims);
        let accounts = Arc::clone(&self.accounts);
        Box::pin(async move {
            match op {
                Operation::CreatePage { ctx } => {
                    let page = orchestrator.create_page(&ctx.identity).await?;
                    Ok(OperationResponse::Page(Box::new(page)))
                }
                Operation::GetPage { ctx, page_id } => {
                    let page = orchestrator.get_page(&ctx.identity, &page_id).await?;
                    Ok(OperationResponse::Page(Box::new(page)))
                }
                Operation::ListPages { ctx } => {
                    let pages = orchestrator.list_pages(&ctx.identity).await?;
                    Ok(OperationResponse::Pages(pages))
                }
                Operation::SaveDraft {
                    ctx,
                    page_id,
                    base_revision,
                    document,
                } => {
                    let outcome = orchestrator
                        .save_draft(&ctx.identity, &page_id, base_revision, &document)
                        .await?;
                    Ok(OperationResponse::Draft(outcome))
                }
                Operation::Publish {
                    ctx,
                    page_id,
                    base_revision,
                    document,
                } => {
                    let outcome = orchestrator
                        .publish(&ctx.identity, &page_id, base_revision, &document)
                        .await?;
                    Ok(OperationResponse::Published(Box::new(outcome)))
                }
                Operation::ClaimOwnership { ctx, claim } => {
                    let outcome = claims.claim(&ctx.identity, &claim).await?;
                    Ok(OperationResponse::Claimed(outcome))
                }
                Operation::StartSession { .. } => {
                    Ok(OperationResponse::Session(claims.start_anonymous_session()))
                }
                Operation::GetProfile { ctx } => {
                    let user = accounts.profile(&ctx.identity).await?;
                    Ok(OperationResponse::Profile(user))
                }
                Operation::SetUsername { ctx, username } => {
                    let user = accounts.set_username(&ctx.identity, &username).await?;
                    Ok(OperationResponse::Profile(Some(user)))
                }
                Operation::ServePublished { slug, .. } => {
                    match orchestrator.render_published(&slug).await? {
                        Some(rendered) => Ok(OperationResponse::Rendered(rendered)),
                        None => Ok(OperationResponse::NotPublished),
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
