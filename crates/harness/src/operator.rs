//! Operator confirmation for interactive runs

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::PitResult;

/// Pauses a run until a human confirms; callers bound the wait with a deadline
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Show `message` and resolve once the operator confirms
    async fn confirm(&self, message: &str) -> PitResult<()>;
}

/// Prompt on stderr, confirm with enter on stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn confirm(&self, message: &str) -> PitResult<()> {
        eprintln!("\n{}", message);
        let mut line = String::new();
        // EOF (no terminal attached) counts as confirmation
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(())
    }
}
