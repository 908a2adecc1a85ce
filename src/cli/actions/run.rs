use super::Action;
use crate::{probe::LiveProber, scenarios::Orchestrator};

/// Execute the action's business logic by delegating to the appropriate module
pub async fn execute(action: Action) -> anyhow::Result<()> {
    match action {
        Action::Serve {
            target,
            databases,
            users,
            server,
        } => {
            let orchestrator = Orchestrator::new(LiveProber::default(), target, databases, users);
            crate::server::start(orchestrator, server).await
        }
    }
}
