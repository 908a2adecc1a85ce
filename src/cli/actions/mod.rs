mod run;

use crate::{probe::ProbeTarget, scenarios::UsersSample, server::ServerSettings};

/// Action enum representing each possible command
#[derive(Debug)]
pub enum Action {
    Serve {
        target: ProbeTarget,
        databases: Vec<String>,
        users: UsersSample,
        server: ServerSettings,
    },
}

impl Action {
    /// Execute the action
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails to execute
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
